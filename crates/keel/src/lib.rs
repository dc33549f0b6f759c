//! # keel - in-process component runtime
//!
//! Services declare what they publish, what they import and which child
//! components they own. keel binds every import to the best provider,
//! starts providers before their users, stops them after, and runs every
//! lifecycle transition on one event loop.
//!
//! ## Features
//!
//! - **Priority selection**: an import binds to the highest-priority
//!   provider and rebinds when the graph changes
//! - **Default providers**: an interface may name a fallback that is
//!   created on first demand, once
//! - **Singletons**: at most one member of a singleton capability runs
//! - **Async hooks**: `on_start`/`on_stop` may return a pending
//!   `Completion`; the loop keeps serving while it resolves
//! - **Epoch-checked handles**: a `Handle` never reaches a re-attached
//!   instance
//!
//! ## Quick Start
//!
//! ```ignore
//! use keel::{Runtime, Service, Parts, Dependency, Interface, Priority};
//!
//! let mut runtime = Runtime::new(Default::default())?;
//! runtime.block_on(|ctx| {
//!     let api = ctx.attach(Api::default())?;
//!     let started = ctx.start(&api)?;
//!     ctx.block_on(started)?;
//!     Ok(())
//! })?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        Service, Parts, Dependency, Component, Ref           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Context                               │
//! │       graph arena, registries, scheduler, shutdown          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Event Loop                             │
//! │      local + remote queues, futex parking, executors        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use keel_core::{
    Completion,
    Epoch,
    Guid,
    HookError,
    InterfaceId,
    KeelError,
    KeelResult,
    Outcome,
    Phase,
    Priority,
    Promise,
};

// Re-export env utilities
pub use keel_core::{env_get, env_get_bool, env_get_ms, env_get_opt};

// Re-export runtime types
pub use keel_runtime::{
    Component,
    Context,
    DefaultProvider,
    Dependency,
    DependencyGuard,
    EventLoop,
    GraphView,
    Handle,
    Interface,
    PartInfo,
    Parts,
    PollableExecutor,
    PoolableExecutor,
    Ref,
    RuntimeConfig,
    Service,
    ServiceCx,
    UsageState,
    Use,
    WeakRef,
};

/// Owner of one root context on the current thread
///
/// Shuts the context down when dropped, unless already shut down.
pub struct Runtime {
    context: Context,
}

impl Runtime {
    /// Create the context; its loop is bound to the calling thread
    pub fn new(config: RuntimeConfig) -> KeelResult<Self> {
        Ok(Self {
            context: Context::new(config)?,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Run `f` against the context, then shut it down
    ///
    /// This is the typical entry point for applications.
    pub fn block_on<F, T>(&mut self, f: F) -> KeelResult<T>
    where
        F: FnOnce(&Context) -> KeelResult<T>,
    {
        let result = f(&self.context);
        self.shutdown()?;
        result
    }

    /// Stop and destroy every service, driving the loop until done
    pub fn shutdown(&mut self) -> KeelResult<()> {
        if self.context.is_shut_down() {
            return Ok(());
        }
        let done = self.context.shutdown();
        self.context.block_on(done)?.into_result().map(|_| ())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.context.event_loop().is_loop_thread() {
            if let Err(err) = self.shutdown() {
                tracing::warn!(error = %err, "shutdown on drop failed");
            }
        }
    }
}

/// Common imports for service authors
pub mod prelude {
    pub use crate::{
        Completion, Component, Context, Dependency, Interface, Outcome, Parts, Priority, Ref, Runtime, Service,
        ServiceCx,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    trait Echo: Send + Sync {
        fn echo(&self, s: &str) -> String;
    }

    impl Interface for dyn Echo {
        const NAME: &'static str = "keel::tests::Echo";
    }

    struct Loud;

    impl Echo for Loud {
        fn echo(&self, s: &str) -> String {
            s.to_uppercase()
        }
    }

    impl Service for Loud {
        fn describe(&self, parts: &mut Parts<Self>) {
            parts.export(Priority::DEFAULT, |s| s as Arc<dyn Echo>);
        }
    }

    #[derive(Default)]
    struct Caller {
        echo: Dependency<dyn Echo>,
    }

    impl Service for Caller {
        fn describe(&self, parts: &mut Parts<Self>) {
            parts.import(&self.echo);
        }
    }

    #[test]
    fn test_block_on_runs_and_shuts_down() {
        let mut runtime = Runtime::new(RuntimeConfig::new()).unwrap();
        let caller = runtime
            .block_on(|ctx| {
                let _loud = ctx.attach(Loud)?;
                let caller = ctx.attach(Caller::default())?;
                let started = ctx.start(&caller)?;
                assert!(ctx.block_on(started)?.is_value());
                let guard = caller.echo.try_use().unwrap();
                assert_eq!(guard.echo("hi"), "HI");
                Ok(caller)
            })
            .unwrap();
        assert!(runtime.context().is_shut_down());
        assert_eq!(caller.phase(), Phase::Destroyed);
    }
}
