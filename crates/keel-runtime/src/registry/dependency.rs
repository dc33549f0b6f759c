//! Typed single-slot dependencies
//!
//! A `Dependency<T>` is declared as a field of the importing service and
//! registered from `describe`. The graph keeps it bound to the best
//! published provider of `T`; user code reads the binding through `get`
//! or locks it with `try_use`.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use keel_core::{Guid, Rank};
use parking_lot::{Mutex, MutexGuard};

use super::interface::Interface;
use crate::context::ContextShared;
use crate::graph::NodeKey;
use crate::ownership::{ErasedRef, ErasedService, ErasedUse};

/// Current provider of an import
pub(crate) struct Binding {
    pub provider: NodeKey,
    pub provider_guid: Guid,
    /// Guid of the provider's interface part
    pub part: Guid,
    pub rank: Rank,
    /// `Arc<T>` boxed as `Any`
    pub object: Arc<dyn Any + Send + Sync>,
    pub service: Weak<dyn ErasedService>,
    /// Counted hold taken on connect; disowned on unlock unless the
    /// provider is a default instance
    pub hold: Option<ErasedRef>,
    pub is_default: bool,
}

/// Where the importing part lives
pub(crate) struct SlotOwner {
    pub context: Weak<ContextShared>,
    pub service: Weak<dyn ErasedService>,
    pub key: NodeKey,
    pub part: usize,
}

#[derive(Default)]
pub(crate) struct SlotState {
    pub binding: Option<Binding>,
    /// Live `DependencyGuard`s
    pub locks: usize,
    pub owner: Option<SlotOwner>,
}

/// Shared state behind a `Dependency<T>`
#[derive(Default)]
pub(crate) struct ImportSlot {
    state: Mutex<SlotState>,
}

impl ImportSlot {
    #[inline]
    pub fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locks > 0
    }

    pub fn bound_provider(&self) -> Option<NodeKey> {
        self.state.lock().binding.as_ref().map(|b| b.provider)
    }
}

/// Import of capability `T`, bound to at most one provider
pub struct Dependency<T: ?Sized> {
    slot: Arc<ImportSlot>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: Interface + ?Sized> Default for Dependency<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Interface + ?Sized> Dependency<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ImportSlot::default()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn slot(&self) -> Arc<ImportSlot> {
        Arc::clone(&self.slot)
    }

    /// The bound provider object, while resolved
    pub fn get(&self) -> Option<Arc<T>> {
        let state = self.slot.state();
        state
            .binding
            .as_ref()?
            .object
            .downcast_ref::<Arc<T>>()
            .cloned()
    }

    pub fn is_satisfied(&self) -> bool {
        self.slot.state().binding.is_some()
    }

    /// Guid of the bound provider service
    pub fn provider(&self) -> Option<Guid> {
        self.slot.state().binding.as_ref().map(|b| b.provider_guid)
    }

    /// Whether the bound provider is a runtime-created default instance
    pub fn is_default(&self) -> bool {
        self.slot
            .state()
            .binding
            .as_ref()
            .map(|b| b.is_default)
            .unwrap_or(false)
    }

    pub fn is_locked(&self) -> bool {
        self.slot.is_locked()
    }

    /// Lock the usage and take a `Use` on the provider
    ///
    /// `None` unless called on the loop thread while both the importing
    /// service and the provider are Running. While any guard is live the
    /// binding is not swapped and the provider cannot stop.
    pub fn try_use(&self) -> Option<DependencyGuard<T>> {
        let mut state = self.slot.state();
        let owner = state.owner.as_ref()?;
        let ctx = owner.context.upgrade()?;
        let (key, part) = (owner.key, owner.part);
        if !ctx.event_loop.is_loop_thread() {
            return None;
        }
        if !owner.service.upgrade()?.core().phase().is_running() {
            return None;
        }
        let binding = state.binding.as_ref()?;
        let object = binding.object.downcast_ref::<Arc<T>>()?.clone();
        let usage = ErasedUse::try_new(binding.service.upgrade()?)?;
        let provider = binding.provider_guid;

        state.locks += 1;
        let first = state.locks == 1;
        drop(state);

        if first {
            tracing::trace!(interface = T::NAME, provider = %provider, "usage locked");
            let target = Arc::clone(&ctx);
            ctx.event_loop.post(move || target.on_usage_locked(key, part));
        }
        Some(DependencyGuard {
            object,
            slot: Arc::clone(&self.slot),
            _use: usage,
        })
    }
}

impl<T: ?Sized> fmt::Debug for Dependency<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.slot.state();
        f.debug_struct("Dependency")
            .field("type", &std::any::type_name::<T>())
            .field("provider", &state.binding.as_ref().map(|b| b.provider_guid))
            .field("locks", &state.locks)
            .finish()
    }
}

/// Locked access to a dependency's provider
pub struct DependencyGuard<T: ?Sized> {
    object: Arc<T>,
    slot: Arc<ImportSlot>,
    _use: ErasedUse,
}

impl<T: ?Sized> Deref for DependencyGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T: ?Sized> Drop for DependencyGuard<T> {
    fn drop(&mut self) {
        let mut state = self.slot.state();
        debug_assert!(state.locks > 0, "dependency unlocked twice");
        state.locks = state.locks.saturating_sub(1);
        if state.locks > 0 {
            return;
        }
        if let Some(binding) = state.binding.as_mut() {
            if !binding.is_default {
                binding.hold = None;
            }
        }
        let owner = state
            .owner
            .as_ref()
            .and_then(|o| Some((o.context.upgrade()?, o.key, o.part)));
        drop(state);

        if let Some((ctx, key, part)) = owner {
            let target = Arc::clone(&ctx);
            ctx.event_loop.post(move || target.on_usage_unlocked(key, part));
        }
    }
}
