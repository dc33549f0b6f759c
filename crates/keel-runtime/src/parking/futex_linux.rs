//! Linux futex-based parking
//!
//! Futex word: 0 = nothing pending, 1 = wake pending.
//!
//! `wake_*` always arms the word before deciding whether a syscall is
//! needed; `park` consumes an armed word without sleeping, and
//! `FUTEX_WAIT` itself refuses to sleep if the word changed in between.

use super::Parking;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

pub struct FutexParking {
    futex: AtomicU32,
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_wake(&self, count: i32) {
        // SAFETY: the futex word lives as long as `self`; FUTEX_WAKE only
        // reads the address.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        if self.futex.swap(0, Ordering::SeqCst) != 0 {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // SAFETY: futex word and timespec outlive the call.
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);

        // EAGAIN means the word was armed between the swap and the wait.
        let woken = result == 0
            || std::io::Error::last_os_error().raw_os_error() == Some(libc::EAGAIN);
        if woken {
            self.futex.store(0, Ordering::SeqCst);
        }
        woken
    }

    fn wake_one(&self) {
        self.futex.store(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.futex_wake(1);
        }
    }

    fn wake_all(&self) {
        self.futex.store(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.futex_wake(i32::MAX);
        }
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
