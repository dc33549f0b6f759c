//! Active-use guards and epoch-pinned handles

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use keel_core::{Epoch, Guid};

use super::cell::{ErasedService, ServiceCell};
use crate::service::Service;

/// Scoped proof that a service is relied upon and must stay Running
///
/// Only obtainable on the loop thread while the service is Running. The
/// scheduler defers any stop of the service until every `Use` is dropped.
pub struct Use<S: Service> {
    cell: Arc<ServiceCell<S>>,
    // Loop-thread only.
    _not_send: PhantomData<*const ()>,
}

impl<S: Service> Use<S> {
    pub(crate) fn try_new(cell: &Arc<ServiceCell<S>>) -> Option<Self> {
        if !cell.core.try_acquire_use() {
            return None;
        }
        Some(Self {
            cell: Arc::clone(cell),
            _not_send: PhantomData,
        })
    }

    pub fn guid(&self) -> Guid {
        self.cell.core.guid()
    }

    pub fn epoch(&self) -> Epoch {
        self.cell.core.epoch()
    }
}

impl<S: Service> Deref for Use<S> {
    type Target = S;

    #[inline]
    fn deref(&self) -> &S {
        &self.cell.object
    }
}

impl<S: Service> Drop for Use<S> {
    fn drop(&mut self) {
        self.cell.core.release_use();
    }
}

impl<S: Service> fmt::Debug for Use<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Use({})", self.cell.core.guid().detailed())
    }
}

/// `Use` over a type-erased provider, held by dependency guards
pub(crate) struct ErasedUse {
    service: Arc<dyn ErasedService>,
    _not_send: PhantomData<*const ()>,
}

impl ErasedUse {
    pub fn try_new(service: Arc<dyn ErasedService>) -> Option<Self> {
        if !service.core().try_acquire_use() {
            return None;
        }
        Some(Self {
            service,
            _not_send: PhantomData,
        })
    }
}

impl Drop for ErasedUse {
    fn drop(&mut self) {
        self.service.core().release_use();
    }
}

/// Weak reference pinned to the epoch observed at capture
///
/// `lock` succeeds only if the service is still alive, Running, reached from
/// the loop thread, and has not been re-initialized since capture.
pub struct Handle<S: Service> {
    cell: Weak<ServiceCell<S>>,
    epoch: Epoch,
}

impl<S: Service> Handle<S> {
    pub(crate) fn new(cell: &Arc<ServiceCell<S>>) -> Self {
        Self {
            cell: Arc::downgrade(cell),
            epoch: cell.core.epoch(),
        }
    }

    /// Epoch captured when the handle was made
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn lock(&self) -> Option<Use<S>> {
        let cell = self.cell.upgrade()?;
        let usage = Use::try_new(&cell)?;
        if usage.epoch() != self.epoch {
            return None;
        }
        Some(usage)
    }

    /// Whether the target is gone or re-initialized
    ///
    /// `false` does not imply `lock` will succeed.
    pub fn is_stale(&self) -> bool {
        match self.cell.upgrade() {
            Some(cell) => cell.core.epoch() != self.epoch,
            None => true,
        }
    }
}

impl<S: Service> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
            epoch: self.epoch,
        }
    }
}

impl<S: Service> fmt::Debug for Handle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>(epoch {})", std::any::type_name::<S>(), self.epoch)
    }
}
