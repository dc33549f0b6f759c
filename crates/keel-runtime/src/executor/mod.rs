//! Executors
//!
//! `EventLoop` is the single writer for a context's graph. The pollable and
//! poolable executors integrate foreign worker threads without giving them
//! graph access.

mod event_loop;
mod pollable;

pub use event_loop::{EventLoop, Task};
pub use pollable::{PollableExecutor, PoolableExecutor};
