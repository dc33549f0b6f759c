//! Compile-time configuration defaults
//!
//! Overridden at runtime by `KEEL_*` environment variables, see
//! [`RuntimeConfig::from_env`](super::RuntimeConfig::from_env).

/// Upper bound on live clusters per context
pub const MAX_CLUSTERS: u32 = keel_core::constants::DEFAULT_MAX_CLUSTERS;

/// Upper bound on members per cluster
pub const MAX_COMPONENTS: u32 = keel_core::constants::MAX_COMPONENTS;

/// Cross-thread tasks drained per loop turn before local work is rechecked
pub const REMOTE_BATCH: usize = 256;

/// Idle loop park timeout
pub const PARK_TIMEOUT_MS: u64 = 100;

/// Spins before an idle loop parks
pub const IDLE_SPINS: u32 = 16;

/// Run the cycle check after each setup
pub const VERIFY_ON_SETUP: bool = cfg!(debug_assertions);

/// Context name used in log spans
pub const NAME: &str = "keel";

/// Graph summaries when the scheduler idles
pub const DEBUG: bool = false;
