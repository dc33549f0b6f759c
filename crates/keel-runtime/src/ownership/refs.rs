//! Strong and weak service references

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use keel_core::{Epoch, Guid, Phase};

use super::cell::{ErasedService, ServiceCell};
use super::control::flags;
use super::guard::{Handle, Use};
use crate::service::Service;

/// Strong external reference to a service
///
/// The graph keeps its own reference to every attached service. When the
/// last `Ref` to an active, non-static service drops, the loop is asked to
/// withdraw the external start request so the scheduler can stop it.
pub struct Ref<S: Service> {
    pub(crate) cell: Arc<ServiceCell<S>>,
}

impl<S: Service> Ref<S> {
    /// Wrap a service that is not attached yet
    pub fn new(service: S) -> Self {
        Self::from_cell(ServiceCell::new(service))
    }

    pub(crate) fn from_cell(cell: Arc<ServiceCell<S>>) -> Self {
        cell.core.acquire_ref();
        Self { cell }
    }

    #[inline]
    pub fn guid(&self) -> Guid {
        self.cell.core.guid()
    }

    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.cell.core.epoch()
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.cell.core.phase()
    }

    /// Shared pointer to the user object
    pub fn object(&self) -> Arc<S> {
        Arc::clone(&self.cell.object)
    }

    pub fn downgrade(&self) -> WeakRef<S> {
        WeakRef {
            cell: Arc::downgrade(&self.cell),
        }
    }

    /// Epoch-pinned weak handle for use across threads or async boundaries
    pub fn handle(&self) -> Handle<S> {
        Handle::new(&self.cell)
    }

    /// Active-use guard; `None` unless Running and on the loop thread
    pub fn try_use(&self) -> Option<Use<S>> {
        Use::try_new(&self.cell)
    }

    /// Opt out of auto-stop when the last `Ref` drops
    pub fn make_static(&self) {
        self.cell.core.set_flag(flags::STATIC);
    }

    pub fn is_static(&self) -> bool {
        self.cell.core.has_flag(flags::STATIC)
    }

    /// Runtime-created default provider
    pub fn is_default(&self) -> bool {
        self.cell.core.has_flag(flags::DEFAULT)
    }

    /// Outstanding `Use` guards
    pub fn use_count(&self) -> usize {
        self.cell.core.uses()
    }

    /// Both refer to the same allocation
    pub fn ptr_eq(&self, other: &Ref<S>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<S: Service> Clone for Ref<S> {
    fn clone(&self) -> Self {
        Self::from_cell(Arc::clone(&self.cell))
    }
}

impl<S: Service> Drop for Ref<S> {
    fn drop(&mut self) {
        self.cell.core.release_ref();
    }
}

impl<S: Service> Deref for Ref<S> {
    type Target = S;

    #[inline]
    fn deref(&self) -> &S {
        &self.cell.object
    }
}

impl<S: Service> fmt::Debug for Ref<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("type", &std::any::type_name::<S>())
            .field("core", &self.cell.core)
            .finish()
    }
}

/// Counted reference over a type-erased service
///
/// Taken by a dependency binding on connect. It counts like a `Ref`, so a
/// provider whose callers dropped every `Ref` keeps its start request until
/// the binding lets go.
pub(crate) struct ErasedRef {
    service: Arc<dyn ErasedService>,
}

impl ErasedRef {
    pub fn new(service: Arc<dyn ErasedService>) -> Self {
        service.core().acquire_ref();
        Self { service }
    }
}

impl Drop for ErasedRef {
    fn drop(&mut self) {
        self.service.core().release_ref();
    }
}

/// Weak reference; does not keep the service alive
pub struct WeakRef<S: Service> {
    cell: Weak<ServiceCell<S>>,
}

impl<S: Service> WeakRef<S> {
    pub fn upgrade(&self) -> Option<Ref<S>> {
        self.cell.upgrade().map(Ref::from_cell)
    }

    pub fn is_alive(&self) -> bool {
        self.cell.strong_count() > 0
    }
}

impl<S: Service> Clone for WeakRef<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
        }
    }
}

impl<S: Service> fmt::Debug for WeakRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakRef<{}>(alive: {})", std::any::type_name::<S>(), self.is_alive())
    }
}
