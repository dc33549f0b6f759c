//! Condvar-based parking for platforms without futex

use super::Parking;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct CondvarParking {
    /// Wake pending
    pending: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl CondvarParking {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for CondvarParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for CondvarParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        if *pending {
            *pending = false;
            return true;
        }

        self.parked.fetch_add(1, Ordering::SeqCst);
        match timeout {
            Some(t) => {
                let _ = self.condvar.wait_for(&mut pending, t);
            }
            None => self.condvar.wait(&mut pending),
        }
        self.parked.fetch_sub(1, Ordering::SeqCst);

        std::mem::replace(&mut *pending, false)
    }

    fn wake_one(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
