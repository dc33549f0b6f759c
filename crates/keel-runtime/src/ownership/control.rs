//! Service control block
//!
//! Every service allocation carries a `ServiceCore` next to the user object.
//! The graph is authoritative for lifecycle state; the core mirrors the
//! fields that reference holders need without taking the graph lock:
//! phase, epoch, guid, the active-use count and the external `Ref` count.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use keel_core::{Epoch, Guid, Phase};
use parking_lot::Mutex;

use crate::context::ContextShared;
use crate::graph::NodeKey;

/// Core flag bits
pub mod flags {
    /// Root-anchored long-lived object, never auto-stopped when unreferenced
    pub const STATIC: u8 = 1 << 0;
    /// Created by the runtime as a default provider
    pub const DEFAULT: u8 = 1 << 1;
    /// Strongly owned by a parent's export
    pub const OWNED: u8 = 1 << 2;
    /// A stop is waiting for the last `Use` to drop
    pub const STOP_DEFERRED: u8 = 1 << 3;
}

/// Where an attached service lives
#[derive(Clone)]
pub(crate) struct Attachment {
    pub context: Weak<ContextShared>,
    pub key: NodeKey,
}

pub struct ServiceCore {
    guid: AtomicU64,
    epoch: AtomicU32,
    phase: AtomicU8,
    flags: AtomicU8,
    /// Outstanding `Use` guards
    uses: AtomicUsize,
    /// Live `Ref` handles plus binding holds
    refs: AtomicUsize,
    attachment: Mutex<Option<Attachment>>,
}

impl Default for ServiceCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCore {
    pub fn new() -> Self {
        Self {
            guid: AtomicU64::new(Guid::NONE.as_u64()),
            epoch: AtomicU32::new(Epoch::NONE.as_u32()),
            phase: AtomicU8::new(Phase::Uninitialized as u8),
            flags: AtomicU8::new(0),
            uses: AtomicUsize::new(0),
            refs: AtomicUsize::new(0),
            attachment: Mutex::new(None),
        }
    }

    #[inline]
    pub fn guid(&self) -> Guid {
        Guid::from_raw(self.guid.load(Ordering::Acquire))
    }

    #[inline]
    pub fn epoch(&self) -> Epoch {
        Epoch::new(self.epoch.load(Ordering::Acquire))
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from(self.phase.load(Ordering::Acquire))
    }

    #[inline]
    pub fn uses(&self) -> usize {
        self.uses.load(Ordering::Acquire)
    }

    #[inline]
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    pub(crate) fn set_flag(&self, flag: u8) {
        self.flags.fetch_or(flag, Ordering::AcqRel);
    }

    pub(crate) fn clear_flag(&self, flag: u8) -> bool {
        self.flags.fetch_and(!flag, Ordering::AcqRel) & flag != 0
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn set_guid(&self, guid: Guid) {
        self.guid.store(guid.as_u64(), Ordering::Release);
    }

    pub(crate) fn set_epoch(&self, epoch: Epoch) {
        self.epoch.store(epoch.as_u32(), Ordering::Release);
    }

    pub(crate) fn attach(&self, attachment: Attachment) {
        *self.attachment.lock() = Some(attachment);
    }

    pub(crate) fn detach(&self) {
        *self.attachment.lock() = None;
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attachment.lock().is_some()
    }

    /// Owning context and node, if attached and the context is alive
    pub(crate) fn attachment(&self) -> Option<(Arc<ContextShared>, NodeKey)> {
        let guard = self.attachment.lock();
        let attachment = guard.as_ref()?;
        Some((attachment.context.upgrade()?, attachment.key))
    }

    pub(crate) fn acquire_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one `Ref` or binding hold; when it was the last one of an
    /// active, unpinned service, ask the loop to withdraw its start request.
    pub(crate) fn release_ref(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.has_flag(flags::STATIC | flags::OWNED | flags::DEFAULT) {
            return;
        }
        let phase = self.phase();
        if !(phase.is_active() || phase == Phase::Pending) {
            return;
        }
        if let Some((ctx, key)) = self.attachment() {
            let epoch = self.epoch();
            let target = Arc::clone(&ctx);
            ctx.event_loop.post(move || target.on_unique(key, epoch));
        }
    }

    /// Take an active use; only while Running and on the loop thread
    pub(crate) fn try_acquire_use(&self) -> bool {
        if self.phase() != Phase::Running {
            return false;
        }
        match self.attachment() {
            Some((ctx, _)) if ctx.event_loop.is_loop_thread() => {
                self.uses.fetch_add(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn release_use(&self) {
        let prev = self.uses.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "use count underflow");
        if prev == 1 && self.clear_flag(flags::STOP_DEFERRED) {
            if let Some((ctx, _)) = self.attachment() {
                tracing::trace!(guid = %self.guid(), "last use released, resuming stop");
                ctx.request_process();
            }
        }
    }
}

impl std::fmt::Debug for ServiceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCore")
            .field("guid", &self.guid())
            .field("epoch", &self.epoch())
            .field("phase", &self.phase())
            .field("uses", &self.uses())
            .field("refs", &self.refs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_core() {
        let core = ServiceCore::new();
        assert!(core.guid().is_none());
        assert!(core.epoch().is_none());
        assert_eq!(core.phase(), Phase::Uninitialized);
        assert!(!core.is_attached());
    }

    #[test]
    fn test_flags() {
        let core = ServiceCore::new();
        core.set_flag(flags::STATIC);
        assert!(core.has_flag(flags::STATIC));
        assert!(!core.has_flag(flags::OWNED));
        assert!(core.clear_flag(flags::STATIC));
        assert!(!core.clear_flag(flags::STATIC));
    }

    #[test]
    fn test_use_refused_when_detached() {
        let core = ServiceCore::new();
        core.set_phase(Phase::Running);
        assert!(!core.try_acquire_use());
        assert_eq!(core.uses(), 0);
    }
}
