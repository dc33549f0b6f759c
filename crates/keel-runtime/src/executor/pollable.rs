//! Auxiliary single-consumer executors
//!
//! These let a thread that is not the loop thread accumulate work posted from
//! anywhere and run it when it chooses. They never touch the service graph;
//! tasks that need the graph post back to the context's loop.
//!
//! - `PollableExecutor` - the consumer drains explicitly with `poll()`
//! - `PoolableExecutor` - the consumer blocks in `run_one()` until work arrives

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use super::Task;
use crate::parking::{new_parking, Parking};
use crate::tls::{self, THREAD_NONE};

/// Consumer thread bookkeeping shared by both executors
struct Consumer(AtomicU64);

impl Consumer {
    fn new() -> Self {
        Self(AtomicU64::new(THREAD_NONE))
    }

    /// Claim the consumer role for the calling thread on first use
    fn check(&self) {
        let me = tls::current_thread_token();
        let prev = self
            .0
            .compare_exchange(THREAD_NONE, me, Ordering::AcqRel, Ordering::Acquire)
            .unwrap_or_else(|owner| owner);
        debug_assert!(
            prev == THREAD_NONE || prev == me,
            "executor drained from a second consumer thread"
        );
    }
}

struct PollableInner {
    queue: SegQueue<Task>,
    consumer: Consumer,
}

/// Multi-producer queue drained by explicit `poll()` calls
#[derive(Clone)]
pub struct PollableExecutor {
    inner: Arc<PollableInner>,
}

impl Default for PollableExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PollableExecutor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PollableInner {
                queue: SegQueue::new(),
                consumer: Consumer::new(),
            }),
        }
    }

    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.push(Box::new(f));
    }

    /// Run the tasks queued at the time of the call
    ///
    /// Tasks posted while polling wait for the next `poll`.
    pub fn poll(&self) -> usize {
        self.inner.consumer.check();
        let batch = self.inner.queue.len();
        let mut ran = 0;
        while ran < batch {
            match self.inner.queue.pop() {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}

struct PoolableInner {
    queue: SegQueue<Task>,
    parking: Box<dyn Parking>,
    stopped: AtomicBool,
    consumer: Consumer,
}

/// Multi-producer queue whose consumer blocks waiting for work
#[derive(Clone)]
pub struct PoolableExecutor {
    inner: Arc<PoolableInner>,
}

impl Default for PoolableExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolableExecutor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolableInner {
                queue: SegQueue::new(),
                parking: new_parking(),
                stopped: AtomicBool::new(false),
                consumer: Consumer::new(),
            }),
        }
    }

    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.push(Box::new(f));
        self.inner.parking.wake_one();
    }

    /// Run one task, waiting up to `timeout` for one to arrive
    ///
    /// Returns whether a task ran. `None` waits until work or `stop`.
    pub fn run_one(&self, timeout: Option<Duration>) -> bool {
        self.inner.consumer.check();
        loop {
            if let Some(task) = self.inner.queue.pop() {
                task();
                return true;
            }
            if self.inner.stopped.load(Ordering::Acquire) {
                return false;
            }
            let woken = self.inner.parking.park(timeout);
            if !woken && timeout.is_some() {
                return match self.inner.queue.pop() {
                    Some(task) => {
                        task();
                        true
                    }
                    None => false,
                };
            }
        }
    }

    /// Run tasks until `stop`; returns the number executed
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while !self.inner.stopped.load(Ordering::Acquire) {
            if self.run_one(None) {
                ran += 1;
            }
        }
        // Drain what was queued before the stop.
        while let Some(task) = self.inner.queue.pop() {
            task();
            ran += 1;
        }
        ran
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.parking.wake_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pollable_runs_only_on_poll() {
        let exec = PollableExecutor::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            let producer = exec.clone();
            std::thread::spawn(move || {
                producer.post(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .join()
            .unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(exec.poll(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(exec.poll(), 0);
    }

    #[test]
    fn test_pollable_defers_tasks_posted_while_polling() {
        let exec = PollableExecutor::new();
        let inner = exec.clone();
        exec.post(move || inner.post(|| {}));
        assert_eq!(exec.poll(), 1);
        assert_eq!(exec.pending(), 1);
        assert_eq!(exec.poll(), 1);
    }

    #[test]
    fn test_poolable_run_one_times_out() {
        let exec = PoolableExecutor::new();
        assert!(!exec.run_one(Some(Duration::from_millis(5))));
    }

    #[test]
    fn test_poolable_wakes_on_post() {
        let exec = PoolableExecutor::new();
        let consumer = exec.clone();
        let worker = std::thread::spawn(move || consumer.run_one(Some(Duration::from_secs(5))));
        std::thread::sleep(Duration::from_millis(10));
        exec.post(|| {});
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_poolable_stop_ends_run() {
        let exec = PoolableExecutor::new();
        let count = Arc::new(AtomicUsize::new(0));
        let consumer = exec.clone();
        let worker = std::thread::spawn(move || consumer.run());
        for _ in 0..5 {
            let c = Arc::clone(&count);
            exec.post(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        exec.stop();
        assert_eq!(worker.join().unwrap(), 5);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
