//! Service contract and part declarations
//!
//! A service type implements [`Service`] and declares its parts from
//! `describe`: the capabilities it publishes, the dependencies it imports
//! and the child components it owns.
//!
//! ```rust,ignore
//! struct Cache {
//!     store: Dependency<dyn Store>,
//!     sweeper: Component<Sweeper>,
//! }
//!
//! impl Service for Cache {
//!     fn describe(&self, parts: &mut Parts<Self>) {
//!         parts
//!             .import(&self.store)
//!             .component(&self.sweeper)
//!             .export(Priority(10), |s| s as Arc<dyn Lookup>);
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use keel_core::{Completion, Epoch, Guid, InterfaceId, Phase, Priority};

use crate::context::{Context, ContextShared};
use crate::ownership::{ErasedService, Handle, ServiceCell, Use};
use crate::registry::{DefaultProvider, Dependency, ImportSlot, Interface};

/// A lifecycle-managed entity
///
/// Hooks run on the loop thread without any runtime lock held. Returning a
/// pending [`Completion`] suspends the transition until it resolves; the
/// loop keeps serving other work meanwhile.
pub trait Service: Send + Sync + Sized + 'static {
    /// Declare parts; called once per attach, under the graph lock, so it
    /// must only record declarations
    fn describe(&self, parts: &mut Parts<Self>) {
        let _ = parts;
    }

    fn on_start(&self, cx: &ServiceCx) -> Completion<()> {
        let _ = cx;
        Completion::ready(())
    }

    fn on_stop(&self, cx: &ServiceCx) -> Completion<()> {
        let _ = cx;
        Completion::ready(())
    }
}

/// What a lifecycle hook knows about its invocation
#[derive(Clone)]
pub struct ServiceCx {
    guid: Guid,
    epoch: Epoch,
    context: Weak<ContextShared>,
}

impl ServiceCx {
    pub(crate) fn new(guid: Guid, epoch: Epoch, context: Weak<ContextShared>) -> Self {
        Self { guid, epoch, context }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// The owning context, unless it has been dropped
    pub fn context(&self) -> Option<Context> {
        self.context.upgrade().map(Context::from_shared)
    }

    /// Queue `f` on the owning loop; dropped if the context is gone
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(ctx) = self.context.upgrade() {
            ctx.event_loop.post(f);
        }
    }
}

impl fmt::Debug for ServiceCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCx")
            .field("guid", &self.guid)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// One declared part, before it is placed in the graph
pub(crate) enum PartDecl {
    Import {
        interface: InterfaceId,
        name: &'static str,
        slot: Arc<ImportSlot>,
        optional: bool,
        default: Option<DefaultProvider>,
    },
    Interface {
        interface: InterfaceId,
        name: &'static str,
        priority: Priority,
        singleton: bool,
        /// `Arc<T>` boxed as `Any`
        object: Arc<dyn Any + Send + Sync>,
    },
    Export {
        child: Arc<dyn ErasedService>,
    },
}

/// Everything `describe` declared
pub(crate) struct Description {
    pub priority: Priority,
    pub parts: Vec<PartDecl>,
}

/// Part declaration builder handed to [`Service::describe`]
///
/// Part ordinals follow declaration order, starting at 1.
pub struct Parts<S> {
    this: Arc<S>,
    priority: Priority,
    decls: Vec<PartDecl>,
    _marker: PhantomData<fn(&S)>,
}

impl<S: Service> Parts<S> {
    pub(crate) fn new(this: Arc<S>) -> Self {
        Self {
            this,
            priority: Priority::DEFAULT,
            decls: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn finish(self) -> Description {
        Description {
            priority: self.priority,
            parts: self.decls,
        }
    }

    /// Scheduling priority; higher starts and stops first among peers
    pub fn priority(&mut self, priority: Priority) -> &mut Self {
        self.priority = priority;
        self
    }

    /// Required dependency; the service cannot start until it is bound to a
    /// Running provider
    pub fn import<T: Interface + ?Sized>(&mut self, dep: &Dependency<T>) -> &mut Self {
        self.push_import(dep, false)
    }

    /// Dependency that is bound when available but never gates start
    pub fn import_optional<T: Interface + ?Sized>(&mut self, dep: &Dependency<T>) -> &mut Self {
        self.push_import(dep, true)
    }

    fn push_import<T: Interface + ?Sized>(&mut self, dep: &Dependency<T>, optional: bool) -> &mut Self {
        self.decls.push(PartDecl::Import {
            interface: T::id(),
            name: T::NAME,
            slot: dep.slot(),
            optional,
            default: T::default_provider(),
        });
        self
    }

    /// Publish capability `T`, projected from this service
    pub fn export<T, F>(&mut self, priority: Priority, project: F) -> &mut Self
    where
        T: Interface + ?Sized,
        F: FnOnce(Arc<S>) -> Arc<T>,
    {
        self.push_interface(priority, false, project)
    }

    /// Publish capability `T` under singleton control: among all singleton
    /// publishers of `T` at most one runs
    pub fn export_singleton<T, F>(&mut self, priority: Priority, project: F) -> &mut Self
    where
        T: Interface + ?Sized,
        F: FnOnce(Arc<S>) -> Arc<T>,
    {
        self.push_interface(priority, true, project)
    }

    fn push_interface<T, F>(&mut self, priority: Priority, singleton: bool, project: F) -> &mut Self
    where
        T: Interface + ?Sized,
        F: FnOnce(Arc<S>) -> Arc<T>,
    {
        let object: Arc<T> = project(Arc::clone(&self.this));
        self.decls.push(PartDecl::Interface {
            interface: T::id(),
            name: T::NAME,
            priority,
            singleton,
            object: Arc::new(object),
        });
        self
    }

    /// Own `child`; it joins this service's cluster and starts before it
    pub fn component<C: Service>(&mut self, child: &Component<C>) -> &mut Self {
        self.decls.push(PartDecl::Export {
            child: Arc::clone(&child.cell) as Arc<dyn ErasedService>,
        });
        self
    }
}

/// Child service strongly owned by its parent
///
/// Declared as a field of the parent and registered from `describe`. The
/// child lives in the parent's cluster and is torn down with it.
pub struct Component<C: Service> {
    cell: Arc<ServiceCell<C>>,
}

impl<C: Service> Component<C> {
    pub fn new(service: C) -> Self {
        Self {
            cell: ServiceCell::new(service),
        }
    }

    pub fn guid(&self) -> Guid {
        self.cell.core.guid()
    }

    pub fn phase(&self) -> Phase {
        self.cell.core.phase()
    }

    pub fn handle(&self) -> Handle<C> {
        Handle::new(&self.cell)
    }

    pub fn try_use(&self) -> Option<Use<C>> {
        Use::try_new(&self.cell)
    }
}

impl<C: Service> Deref for Component<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.cell.object
    }
}

impl<C: Service> fmt::Debug for Component<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component<{}>({})", std::any::type_name::<C>(), self.guid().detailed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    impl Interface for dyn Greeter {
        const NAME: &'static str = "keel::tests::Greeter";
    }

    struct Leaf;
    impl Service for Leaf {}

    struct Hello {
        dep: Dependency<dyn Greeter>,
        leaf: Component<Leaf>,
    }

    impl Greeter for Hello {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    impl Service for Hello {
        fn describe(&self, parts: &mut Parts<Self>) {
            parts
                .priority(Priority(3))
                .import_optional(&self.dep)
                .component(&self.leaf)
                .export(Priority(7), |s| s as Arc<dyn Greeter>);
        }
    }

    #[test]
    fn test_describe_records_parts_in_order() {
        let cell = ServiceCell::new(Hello {
            dep: Dependency::new(),
            leaf: Component::new(Leaf),
        });
        let desc = cell.describe();
        assert_eq!(desc.priority, Priority(3));
        assert_eq!(desc.parts.len(), 3);
        assert!(matches!(desc.parts[0], PartDecl::Import { optional: true, .. }));
        assert!(matches!(desc.parts[1], PartDecl::Export { .. }));
        match &desc.parts[2] {
            PartDecl::Interface { interface, priority, singleton, object, .. } => {
                assert_eq!(*interface, <dyn Greeter as Interface>::id());
                assert_eq!(*priority, Priority(7));
                assert!(!singleton);
                let greeter = object.downcast_ref::<Arc<dyn Greeter>>().unwrap();
                assert_eq!(greeter.greet(), "hello");
            }
            _ => panic!("expected interface part"),
        }
    }

    #[test]
    fn test_default_hooks_resolve_immediately() {
        let cx = ServiceCx::new(Guid::of_service(1, 0), Epoch::new(1), Weak::new());
        assert!(Leaf.on_start(&cx).is_ready());
        assert!(Leaf.on_stop(&cx).is_ready());
        assert!(cx.context().is_none());
    }
}
