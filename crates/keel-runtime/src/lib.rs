//! # keel-runtime
//!
//! Service graph, ownership, dependency resolution and lifecycle scheduler
//! for the keel component runtime.
//!
//! This crate provides:
//! - A root [`Context`] owning a graph of attached services
//! - `Ref` / `WeakRef` / `Use` / `Handle` ownership with epoch checks
//! - Capability registries with priority selection, default providers and
//!   singleton exclusion
//! - A scheduler that starts providers before their users and stops them
//!   after
//! - The single-threaded event loop it all runs on, plus pollable and
//!   poolable executors for foreign threads

pub mod config;
pub mod executor;
pub mod graph;
pub mod ownership;
pub mod parking;
pub mod registry;
pub mod tls;

mod context;
mod scheduler;
mod service;

// Re-exports
pub use config::RuntimeConfig;
pub use context::Context;
pub use executor::{EventLoop, PollableExecutor, PoolableExecutor};
pub use graph::{GraphView, NodeKey, PartInfo, UsageState};
pub use ownership::{Handle, Ref, Use, WeakRef};
pub use registry::{DefaultProvider, Dependency, DependencyGuard, Interface};
pub use service::{Component, Parts, Service, ServiceCx};

pub use keel_core::{
    Completion, Epoch, Guid, HookError, InterfaceId, KeelError, KeelResult, Outcome, Phase, Priority, Promise,
};
