//! Root context
//!
//! A `Context` owns the service graph, its registries and scheduler, and
//! the event loop everything runs on. Graph operations must be issued on
//! the loop thread; other threads hand work over with [`Context::post`].
//!
//! ```rust,ignore
//! let ctx = Context::new(RuntimeConfig::from_env())?;
//! let db = ctx.attach(Database::default())?;
//! let api = ctx.attach(Api::default())?;
//! let started = ctx.start(&api)?;
//! ctx.block_on(started)?; // Database is started first
//! ctx.block_on(ctx.shutdown())?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

use parking_lot::Mutex;

use keel_core::{Completion, Epoch, Guid, KeelError, KeelResult, Outcome, Phase, Promise};

use crate::config::RuntimeConfig;
use crate::executor::EventLoop;
use crate::graph::{Graph, GraphView, NodeKey};
use crate::ownership::{flags, ErasedService, Ref, ServiceCore};
use crate::registry::{RegistryEvent, Subscriber};
use crate::service::Service;

/// State shared by every handle to one context
pub(crate) struct ContextShared {
    pub config: RuntimeConfig,
    pub event_loop: EventLoop,
    graph: Mutex<Graph>,
    /// A `process` task is queued
    pub process_dispatched: AtomicBool,
    /// `process` passes in progress; above one while a hook drains the loop
    pub processing: AtomicUsize,
}

impl ContextShared {
    /// Run `f` on the locked graph, then settle what it deferred
    pub(crate) fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        debug_assert!(self.event_loop.is_loop_thread(), "graph touched off the loop thread");
        let (result, deferred) = {
            let mut graph = self.graph.lock();
            let result = f(&mut graph);
            (result, std::mem::take(&mut graph.deferred))
        };
        deferred.settle();
        result
    }

    /// The last external `Ref` dropped: withdraw the start request
    pub(crate) fn on_unique(self: &Arc<Self>, key: NodeKey, epoch: Epoch) {
        let withdrawn = self.with_graph(|g| {
            let Some(node) = g.get_mut(key) else {
                return false;
            };
            let core = node.core();
            if node.epoch != epoch
                || core.refs() > 0
                || core.has_flag(flags::STATIC | flags::OWNED | flags::DEFAULT)
                || !node.explicit_start
            {
                return false;
            }
            node.explicit_start = false;
            tracing::debug!(guid = %node.guid, service = node.name, "last reference dropped, start withdrawn");
            true
        });
        if withdrawn {
            self.request_process();
        }
    }

    pub(crate) fn on_usage_locked(self: &Arc<Self>, key: NodeKey, part: usize) {
        self.usage_event(key, part, RegistryEvent::Locked(Subscriber { node: key, part }));
    }

    pub(crate) fn on_usage_unlocked(self: &Arc<Self>, key: NodeKey, part: usize) {
        self.usage_event(key, part, RegistryEvent::Unlocked(Subscriber { node: key, part }));
    }

    fn usage_event(self: &Arc<Self>, key: NodeKey, part: usize, event: RegistryEvent) {
        self.with_graph(|g| {
            if let Some(interface) = g.get(key).and_then(|n| n.import(part)).map(|i| i.interface) {
                g.notify(interface, event);
            }
        });
        // Locks feed singleton exclusion.
        self.request_process();
    }

    fn begin_shutdown(self: &Arc<Self>, promise: Promise<()>) {
        self.with_graph(|g| {
            if g.shut_down {
                g.resolve_later(promise, Outcome::Value(()));
                return;
            }
            g.shutdown_waiters.push(promise);
            if g.shutting_down {
                return;
            }
            g.shutting_down = true;
            tracing::info!(services = g.len(), "context shutting down");
            let root = g.root;
            for key in g.keys() {
                if key == root {
                    continue;
                }
                if let Some(node) = g.get_mut(key) {
                    node.explicit_start = false;
                    node.held_down = true;
                }
            }
            let children = g.get(root).map(|r| r.children.clone()).unwrap_or_default();
            for child in children {
                g.mark_destroying(child);
            }
        });
        self.request_process();
    }

    pub(crate) fn log_summary(&self) {
        self.with_graph(|g| {
            let view = g.view();
            let mut running = 0;
            let mut stopped = 0;
            for key in g.keys() {
                match g.get(key).map(|n| n.phase) {
                    Some(Phase::Running) => running += 1,
                    Some(Phase::Stopped) => stopped += 1,
                    _ => {}
                }
            }
            tracing::debug!(
                services = view.len(),
                running,
                stopped,
                in_flight = g.in_flight,
                registries = g.registries.len(),
                "scheduler idle"
            );
        });
    }
}

/// Handle to a root context; cheap to clone
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    /// New context whose loop is bound to the calling thread
    pub fn new(config: RuntimeConfig) -> KeelResult<Self> {
        config.validate()?;
        if config.debug {
            config.log();
        }
        let shared = Arc::new_cyclic(|weak| ContextShared {
            graph: Mutex::new(Graph::new(&config, weak.clone())),
            event_loop: EventLoop::new(&config),
            config,
            process_dispatched: AtomicBool::new(false),
            processing: AtomicUsize::new(0),
        });
        tracing::debug!(name = %shared.config.name, "context created");
        Ok(Self { shared })
    }

    pub(crate) fn from_shared(shared: Arc<ContextShared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.shared.event_loop
    }

    /// Guid of the root service
    pub fn root(&self) -> Guid {
        Guid::of_service(keel_core::constants::ROOT_CLUSTER, 0)
    }

    fn ensure_loop_thread(&self) -> KeelResult<()> {
        if self.shared.event_loop.is_loop_thread() {
            Ok(())
        } else {
            Err(KeelError::NotOnLoopThread)
        }
    }

    /// Node of a service attached to this context
    fn key_of(&self, core: &ServiceCore) -> KeelResult<NodeKey> {
        match core.attachment() {
            Some((ctx, key)) if Arc::ptr_eq(&ctx, &self.shared) => Ok(key),
            _ if core.phase() == Phase::Destroyed => Err(KeelError::Destroyed(core.guid())),
            _ => Err(KeelError::UnknownService(core.guid())),
        }
    }

    /// Attach `service` under the root as the head of a new cluster
    pub fn attach<S: Service>(&self, service: S) -> KeelResult<Ref<S>> {
        let service = Ref::new(service);
        self.attach_ref(&service)?;
        Ok(service)
    }

    /// Attach a long-lived service that is only torn down by `shutdown`
    pub fn attach_static<S: Service>(&self, service: S) -> KeelResult<Ref<S>> {
        let service = Ref::new(service);
        service.make_static();
        self.attach_ref(&service)?;
        Ok(service)
    }

    /// Attach `service` as a new cluster below `parent`; it is destroyed
    /// with `parent`
    pub fn attach_under<S: Service, P: Service>(&self, parent: &Ref<P>, service: S) -> KeelResult<Ref<S>> {
        self.ensure_loop_thread()?;
        let parent = self.key_of(&parent.cell.core)?;
        let service = Ref::new(service);
        self.attach_erased(service.cell.clone(), parent)?;
        Ok(service)
    }

    /// Attach an existing reference under the root
    ///
    /// Re-attaching a destroyed service gives it a new Guid and epoch, so
    /// handles taken before stay stale.
    pub fn attach_ref<S: Service>(&self, service: &Ref<S>) -> KeelResult<()> {
        self.ensure_loop_thread()?;
        let root = self.shared.with_graph(|g| g.root);
        self.attach_erased(service.cell.clone(), root).map(|_| ())
    }

    fn attach_erased(&self, service: Arc<dyn ErasedService>, parent: NodeKey) -> KeelResult<NodeKey> {
        let key = self.shared.with_graph(|g| g.attach(service, parent, false))?;
        if self.shared.config.verify_on_setup {
            if let Err(err) = self.verify() {
                tracing::warn!(error = %err, "cycle after setup");
            }
        }
        // New bindings may unblock waiting services.
        self.shared.request_process();
        Ok(key)
    }

    /// Request `service` to run; resolves once it is Running
    ///
    /// Everything it requires is started first. A start hook failure is
    /// delivered as `Outcome::Error`.
    pub fn start<S: Service>(&self, service: &Ref<S>) -> KeelResult<Completion<()>> {
        self.ensure_loop_thread()?;
        let key = self.key_of(&service.cell.core)?;
        let waiter = self.shared.with_graph(|g| -> KeelResult<Completion<()>> {
            if g.shutting_down {
                return Err(KeelError::ShuttingDown);
            }
            let node = g.get_mut(key).ok_or(KeelError::UnknownService(Guid::NONE))?;
            if node.destroying {
                return Err(KeelError::Destroyed(node.guid));
            }
            node.explicit_start = true;
            node.held_down = false;
            tracing::debug!(guid = %node.guid, service = node.name, "start requested");
            Ok(g.wait_started(key))
        })?;
        self.shared.request_process();
        Ok(waiter)
    }

    /// Request `service` to stop and stay down; resolves once it is Stopped
    ///
    /// Its dependents are stopped first.
    pub fn stop<S: Service>(&self, service: &Ref<S>) -> KeelResult<Completion<()>> {
        self.ensure_loop_thread()?;
        let key = self.key_of(&service.cell.core)?;
        let waiter = self.shared.with_graph(|g| -> KeelResult<Completion<()>> {
            let node = g.get_mut(key).ok_or(KeelError::UnknownService(Guid::NONE))?;
            node.explicit_start = false;
            node.held_down = true;
            tracing::debug!(guid = %node.guid, service = node.name, "stop requested");
            Ok(g.wait_stopped(key))
        })?;
        self.shared.request_process();
        Ok(waiter)
    }

    /// Stop and destroy `service` with everything it owns; resolves once
    /// the subtree is destroyed
    pub fn detach<S: Service>(&self, service: &Ref<S>) -> KeelResult<Completion<()>> {
        self.ensure_loop_thread()?;
        let key = self.key_of(&service.cell.core)?;
        let waiter = self.shared.with_graph(|g| -> KeelResult<Completion<()>> {
            let node = g.get(key).ok_or(KeelError::UnknownService(Guid::NONE))?;
            if node.owned {
                // Components go with their parent.
                return Err(KeelError::UnknownService(node.guid));
            }
            g.mark_destroying(key);
            let (promise, completion) = Completion::pending();
            if let Some(node) = g.get_mut(key) {
                node.explicit_start = false;
                node.detach_waiters.push(promise);
                tracing::debug!(guid = %node.guid, service = node.name, "detach requested");
            }
            Ok(completion)
        })?;
        self.shared.request_process();
        Ok(waiter)
    }

    /// Stop and destroy every service; resolves once the graph is empty
    ///
    /// Safe to call from any thread and more than once.
    pub fn shutdown(&self) -> Completion<()> {
        let (promise, completion) = Completion::pending();
        let shared = Arc::clone(&self.shared);
        self.shared.event_loop.dispatch(move || shared.begin_shutdown(promise));
        completion
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.with_graph(|g| g.shut_down)
    }

    /// Check the capability graph for dependency cycles
    pub fn verify(&self) -> KeelResult<()> {
        self.ensure_loop_thread()?;
        let cycles = self.shared.with_graph(|g| g.find_cycles());
        match cycles.into_iter().next() {
            Some(path) => Err(KeelError::Cycle(path)),
            None => Ok(()),
        }
    }

    /// Read-only look at the graph; `f` must not call back into the context
    pub fn inspect<R>(&self, f: impl FnOnce(GraphView<'_>) -> R) -> R {
        debug_assert!(self.shared.event_loop.is_loop_thread(), "inspect off the loop thread");
        let graph = self.shared.graph.lock();
        f(graph.view())
    }

    /// Phase of the service at `guid`, if attached
    pub fn phase_of(&self, guid: Guid) -> Option<Phase> {
        self.inspect(|view| view.phase(guid))
    }

    /// Queue `f` on the loop; safe from any thread
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.event_loop.post(f);
    }

    /// Run `f` now if on the loop thread, otherwise post it
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.event_loop.dispatch(f);
    }

    /// Drain the loop until nothing is queued
    pub fn run_until_idle(&self) -> usize {
        self.shared.event_loop.run_until_idle()
    }

    /// Serve the loop on the calling thread until `stop_loop`
    pub fn run(&self) -> KeelResult<()> {
        self.shared.event_loop.run()
    }

    pub fn stop_loop(&self) {
        self.shared.event_loop.stop();
    }

    /// Drive the loop until `completion` resolves
    ///
    /// Must be called on the loop thread. Calling it from inside a hook
    /// nests the loop and its scheduler passes; the pass that ran the hook
    /// resumes after. Waiting there on the hook's own service, or on
    /// anything that depends on it, never resolves.
    pub fn block_on<T: Send + 'static>(&self, completion: Completion<T>) -> KeelResult<Outcome<T>> {
        self.ensure_loop_thread()?;
        let slot = Arc::new(Mutex::new(None));
        let filled = Arc::clone(&slot);
        let shared = Arc::downgrade(&self.shared);
        completion.on_complete(move |outcome| {
            *filled.lock() = Some(outcome);
            // Wake a parked loop.
            if let Some(ctx) = shared.upgrade() {
                ctx.event_loop.post(|| {});
            }
        });
        self.shared.event_loop.run_until(|| slot.lock().is_some());
        let outcome = slot.lock().take();
        match outcome {
            Some(outcome) => Ok(outcome),
            None => {
                tracing::debug!("loop returned before the completion resolved, treating as canceled");
                Ok(Outcome::Canceled)
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.shared.config.name)
            .field("event_loop", &self.shared.event_loop)
            .finish()
    }
}
