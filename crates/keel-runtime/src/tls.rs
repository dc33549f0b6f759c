//! Thread-local identity for event loop ownership
//!
//! Each OS thread gets a process-unique token on first use. An event loop
//! records the token of the thread it is bound to; "am I on the loop
//! thread" is then a single comparison with no syscalls.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Token value meaning "no thread"
pub const THREAD_NONE: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Token of this OS thread, `THREAD_NONE` until first requested
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(THREAD_NONE) };

    /// Depth of nested loop drains on this thread
    static DRAIN_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Token of the calling thread
#[inline]
pub fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|cell| {
        let token = cell.get();
        if token != THREAD_NONE {
            return token;
        }
        let token = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        cell.set(token);
        token
    })
}

/// Mark entry into a loop drain, returning the previous depth
#[inline]
pub(crate) fn enter_drain() -> u32 {
    DRAIN_DEPTH.with(|cell| {
        let depth = cell.get();
        cell.set(depth + 1);
        depth
    })
}

#[inline]
pub(crate) fn exit_drain() {
    DRAIN_DEPTH.with(|cell| cell.set(cell.get().saturating_sub(1)));
}

/// Whether the calling thread is currently draining an event loop
#[inline]
pub fn is_draining() -> bool {
    DRAIN_DEPTH.with(|cell| cell.get() > 0)
}
