//! # keel-core
//!
//! Identity and contract types for the keel component runtime.
//!
//! This crate is platform-agnostic and holds no graph state. The graph,
//! ownership, dependency resolution and scheduler live in `keel-runtime`.
//!
//! ## Modules
//!
//! - `guid` - hierarchical (cluster, component, part) addresses
//! - `epoch` - per-service generation counter
//! - `state` - service phase, capability priority and the rank order
//! - `interface` - stable capability ids
//! - `alloc` - recycling id allocator
//! - `completion` - one-shot asynchronous results
//! - `error` - error types
//! - `env` - environment variable helpers

pub mod guid;
pub mod epoch;
pub mod state;
pub mod interface;
pub mod alloc;
pub mod completion;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use guid::Guid;
pub use epoch::Epoch;
pub use state::{Phase, Priority, Rank};
pub use interface::InterfaceId;
pub use alloc::IdAllocator;
pub use completion::{Completion, Outcome, Promise};
pub use error::{HookError, KeelError, KeelResult};
pub use env::{env_get, env_get_bool, env_get_ms, env_get_opt};

/// Layout limits
pub mod constants {
    /// Cluster id 0 is reserved for the root context itself
    pub const ROOT_CLUSTER: u32 = 0;

    /// Default upper bound on live clusters
    pub const DEFAULT_MAX_CLUSTERS: u32 = 1 << 20;

    /// Hard upper bound on components per cluster (component ids are 16-bit)
    pub const MAX_COMPONENTS: u32 = 1 << 16;

    /// Hard upper bound on parts per service (part ordinals are 16-bit, 0 is the service)
    pub const MAX_PARTS: usize = (1 << 16) - 1;
}
