//! Service allocation: control block plus user object

use std::sync::Arc;

use keel_core::Completion;

use super::control::ServiceCore;
use crate::service::{Description, Parts, Service, ServiceCx};

pub(crate) struct ServiceCell<S: Service> {
    pub core: ServiceCore,
    pub object: Arc<S>,
}

impl<S: Service> ServiceCell<S> {
    pub fn new(service: S) -> Arc<Self> {
        Arc::new(Self {
            core: ServiceCore::new(),
            object: Arc::new(service),
        })
    }
}

/// Type-erased view of a `ServiceCell` held by the graph
pub(crate) trait ErasedService: Send + Sync + 'static {
    fn core(&self) -> &ServiceCore;
    fn type_name(&self) -> &'static str;
    fn describe(&self) -> Description;
    fn start(&self, cx: &ServiceCx) -> Completion<()>;
    fn stop(&self, cx: &ServiceCx) -> Completion<()>;
}

impl<S: Service> ErasedService for ServiceCell<S> {
    #[inline]
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<S>()
    }

    fn describe(&self) -> Description {
        let mut parts = Parts::new(Arc::clone(&self.object));
        self.object.describe(&mut parts);
        parts.finish()
    }

    fn start(&self, cx: &ServiceCx) -> Completion<()> {
        self.object.on_start(cx)
    }

    fn stop(&self, cx: &ServiceCx) -> Completion<()> {
        self.object.on_stop(cx)
    }
}
