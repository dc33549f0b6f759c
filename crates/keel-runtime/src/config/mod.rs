//! Runtime configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .name("billing")
//!     .park_timeout(Duration::from_millis(20));
//! ```

pub mod defaults;

use std::time::Duration;

use keel_core::env::{env_get, env_get_bool, env_get_ms};
use keel_core::{KeelError, KeelResult};

/// Configuration of one root context and its event loop
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Name used in log spans
    pub name: String,
    /// Maximum live clusters
    pub max_clusters: u32,
    /// Maximum members per cluster
    pub max_components: u32,
    /// Cross-thread tasks drained per loop turn
    pub remote_batch: usize,
    /// Idle loop park timeout
    pub park_timeout: Duration,
    /// Spins before parking an idle loop
    pub idle_spins: u32,
    /// Run the cycle check after each setup and warn on cycles
    pub verify_on_setup: bool,
    /// Log a graph summary whenever the scheduler goes idle
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    /// Library defaults, no environment lookups
    pub fn new() -> Self {
        Self {
            name: defaults::NAME.to_string(),
            max_clusters: defaults::MAX_CLUSTERS,
            max_components: defaults::MAX_COMPONENTS,
            remote_batch: defaults::REMOTE_BATCH,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            idle_spins: defaults::IDLE_SPINS,
            verify_on_setup: defaults::VERIFY_ON_SETUP,
            debug: defaults::DEBUG,
        }
    }

    /// Defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `KEEL_NAME` - context name
    /// - `KEEL_MAX_CLUSTERS` - maximum live clusters
    /// - `KEEL_MAX_COMPONENTS` - maximum members per cluster
    /// - `KEEL_REMOTE_BATCH` - cross-thread tasks per loop turn
    /// - `KEEL_PARK_TIMEOUT_MS` - idle park timeout in milliseconds
    /// - `KEEL_IDLE_SPINS` - spins before parking
    /// - `KEEL_VERIFY_ON_SETUP` - cycle check after setup (0/1)
    /// - `KEEL_DEBUG` - graph summaries when the scheduler idles (0/1)
    pub fn from_env() -> Self {
        Self {
            name: env_get("KEEL_NAME", defaults::NAME.to_string()),
            max_clusters: env_get("KEEL_MAX_CLUSTERS", defaults::MAX_CLUSTERS),
            max_components: env_get("KEEL_MAX_COMPONENTS", defaults::MAX_COMPONENTS),
            remote_batch: env_get("KEEL_REMOTE_BATCH", defaults::REMOTE_BATCH),
            park_timeout: env_get_ms("KEEL_PARK_TIMEOUT_MS", defaults::PARK_TIMEOUT_MS),
            idle_spins: env_get("KEEL_IDLE_SPINS", defaults::IDLE_SPINS),
            verify_on_setup: env_get_bool("KEEL_VERIFY_ON_SETUP", defaults::VERIFY_ON_SETUP),
            debug: env_get_bool("KEEL_DEBUG", defaults::DEBUG),
        }
    }

    // Builder methods

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn max_clusters(mut self, n: u32) -> Self {
        self.max_clusters = n;
        self
    }

    pub fn max_components(mut self, n: u32) -> Self {
        self.max_components = n;
        self
    }

    pub fn remote_batch(mut self, n: usize) -> Self {
        self.remote_batch = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn verify_on_setup(mut self, enable: bool) -> Self {
        self.verify_on_setup = enable;
        self
    }

    pub fn debug(mut self, enable: bool) -> Self {
        self.debug = enable;
        self
    }

    /// Reject configurations the runtime cannot honor
    pub fn validate(&self) -> KeelResult<()> {
        if self.max_clusters < 2 {
            return Err(KeelError::Config("max_clusters must be >= 2"));
        }
        if self.max_components == 0 || self.max_components > keel_core::constants::MAX_COMPONENTS {
            return Err(KeelError::Config("max_components must be in 1..=65536"));
        }
        if self.remote_batch == 0 {
            return Err(KeelError::Config("remote_batch must be > 0"));
        }
        Ok(())
    }

    /// Log the effective configuration
    pub fn log(&self) {
        tracing::info!(
            name = %self.name,
            max_clusters = self.max_clusters,
            max_components = self.max_components,
            remote_batch = self.remote_batch,
            park_timeout_ms = self.park_timeout.as_millis() as u64,
            idle_spins = self.idle_spins,
            verify_on_setup = self.verify_on_setup,
            debug = self.debug,
            "keel runtime configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_is_valid() {
        let config = RuntimeConfig::from_env();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .name("test")
            .remote_batch(8)
            .park_timeout(Duration::from_millis(5))
            .verify_on_setup(false);

        assert_eq!(config.name, "test");
        assert_eq!(config.remote_batch, 8);
        assert_eq!(config.park_timeout, Duration::from_millis(5));
        assert!(!config.verify_on_setup);
    }

    #[test]
    fn test_validation() {
        assert!(RuntimeConfig::new().remote_batch(0).validate().is_err());
        assert!(RuntimeConfig::new().max_clusters(1).validate().is_err());
        assert!(RuntimeConfig::new().max_components(70_000).validate().is_err());
    }
}
