//! Capability declarations
//!
//! A capability is usually a trait object type. Implement [`Interface`] for
//! it once, giving a fully-qualified name; the id is derived from the name.
//!
//! ```rust,ignore
//! pub trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! impl Interface for dyn Clock {
//!     const NAME: &'static str = "app::time::Clock";
//!
//!     fn default_provider() -> Option<DefaultProvider> {
//!         Some(DefaultProvider::of(|| SystemClock))
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use keel_core::InterfaceId;

use crate::ownership::{flags, ErasedService, ServiceCell};
use crate::service::Service;

/// A capability type services can publish and import
pub trait Interface: Send + Sync + 'static {
    /// Fully-qualified name; the registry key is derived from it
    const NAME: &'static str;

    #[inline]
    fn id() -> InterfaceId {
        InterfaceId::of(Self::NAME)
    }

    /// Factory used when a dependency finds no published provider
    fn default_provider() -> Option<DefaultProvider> {
        None
    }
}

type Factory = dyn Fn() -> Arc<dyn ErasedService> + Send + Sync;

/// Factory for a fallback provider instance
///
/// The created service must export the capability it stands in for.
#[derive(Clone)]
pub struct DefaultProvider {
    type_name: &'static str,
    factory: Arc<Factory>,
}

impl DefaultProvider {
    pub fn of<S, F>(factory: F) -> Self
    where
        S: Service,
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<S>(),
            factory: Arc::new(move || {
                let cell = ServiceCell::new(factory());
                cell.core.set_flag(flags::DEFAULT);
                cell as Arc<dyn ErasedService>
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn create(&self) -> Arc<dyn ErasedService> {
        (self.factory)()
    }
}

impl fmt::Debug for DefaultProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefaultProvider({})", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Marker: Send + Sync {}

    impl Interface for dyn Marker {
        const NAME: &'static str = "keel::tests::Marker";
    }

    struct Impl;
    impl Marker for Impl {}
    impl Service for Impl {}

    #[test]
    fn test_id_derives_from_name() {
        assert_eq!(<dyn Marker as Interface>::id(), InterfaceId::of("keel::tests::Marker"));
        assert!(<dyn Marker as Interface>::default_provider().is_none());
    }

    #[test]
    fn test_default_provider_marks_instances() {
        let provider = DefaultProvider::of(|| Impl);
        let a = provider.create();
        let b = provider.create();
        assert!(a.core().has_flag(flags::DEFAULT));
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(provider.type_name().ends_with("Impl"));
    }
}
