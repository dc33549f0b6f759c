//! Idle parking for loop and executor threads
//!
//! A thread with nothing to drain calls `park()`; producers posting work
//! call `wake_one()`. A wake issued while nobody is parked is remembered
//! and consumed by the next `park()`, so a post that races with the
//! decision to sleep is never lost.

use std::time::Duration;

/// Platform-specific sleep/wake primitive
pub trait Parking: Send + Sync {
    /// Park the calling thread until woken or timed out
    ///
    /// Returns `true` if a wake was consumed, `false` on timeout or spurious
    /// return. Callers re-check their queues either way.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked thread, or arm the next `park()`
    fn wake_one(&self);

    /// Wake every parked thread (shutdown)
    fn wake_all(&self);

    /// Parked threads (hint, may be stale)
    fn parked_count(&self) -> usize;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::CondvarParking as PlatformParking;
    }
}

/// Platform-appropriate parking instance
pub fn new_parking() -> Box<dyn Parking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let start = std::time::Instant::now();
        let woken = parking.park(Some(Duration::from_millis(30)));
        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wake_before_park_is_not_lost() {
        let parking = new_parking();
        parking.wake_one();
        let start = std::time::Instant::now();
        assert!(parking.park(Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wake_one() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || parking2.park(Some(Duration::from_secs(10))));

        thread::sleep(Duration::from_millis(50));
        parking.wake_one();

        assert!(handle.join().unwrap());
    }
}
