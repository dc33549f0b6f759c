//! Environment variable helpers for runtime configuration
//!
//! ```ignore
//! use keel_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let clusters: u32 = env_get("KEEL_MAX_CLUSTERS", 4096);
//! let debug = env_get_bool("KEEL_DEBUG", false);
//! let park = env_get_ms("KEEL_PARK_TIMEOUT_MS", 100);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Variable parsed as `T`, or `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean variable
///
/// "1", "true", "yes", "on" (any case) are true; any other value is false;
/// unset yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Millisecond variable as a `Duration`
#[inline]
pub fn env_get_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

/// Variable parsed as `T`, `None` when unset or unparsable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
