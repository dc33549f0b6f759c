//! Single-writer event loop
//!
//! All graph mutation of a context happens on exactly one thread: the
//! thread bound to its `EventLoop`. Other threads hand work in through
//! `post`, which pushes onto a lock-free queue and wakes the loop.
//!
//! Each turn drains every task posted from the loop thread itself, then a
//! bounded batch of cross-thread tasks, so loop-local follow-up work always
//! runs before remote work queued behind it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use keel_core::{KeelError, KeelResult};

use crate::config::RuntimeConfig;
use crate::parking::{new_parking, Parking};
use crate::tls::{self, THREAD_NONE};

/// Type-erased unit of loop work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct EventLoop {
    /// Token of the bound thread
    owner: AtomicU64,

    /// Work posted from the loop thread
    local: SegQueue<Task>,

    /// Work posted from any other thread
    remote: SegQueue<Task>,

    parking: Box<dyn Parking>,

    /// Set by `stop`, cleared when `run` returns
    stop_requested: AtomicBool,

    /// A drain is in progress
    draining: AtomicBool,

    /// Tasks executed over the loop's lifetime
    executed: AtomicUsize,

    remote_batch: usize,
    park_timeout: std::time::Duration,
    idle_spins: u32,
}

impl EventLoop {
    /// New loop bound to the calling thread
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            owner: AtomicU64::new(tls::current_thread_token()),
            local: SegQueue::new(),
            remote: SegQueue::new(),
            parking: new_parking(),
            stop_requested: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            executed: AtomicUsize::new(0),
            remote_batch: config.remote_batch,
            park_timeout: config.park_timeout,
            idle_spins: config.idle_spins,
        }
    }

    /// Whether the calling thread is the loop thread
    #[inline]
    pub fn is_loop_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == tls::current_thread_token()
    }

    /// Make the calling thread the loop thread
    ///
    /// Fails while another thread is draining the loop.
    pub fn bind_current_thread(&self) -> KeelResult<()> {
        let me = tls::current_thread_token();
        let current = self.owner.load(Ordering::Acquire);
        if current == me {
            return Ok(());
        }
        if current != THREAD_NONE && self.draining.load(Ordering::Acquire) {
            return Err(KeelError::NotOnLoopThread);
        }
        self.owner.store(me, Ordering::Release);
        tracing::trace!(thread = me, "event loop rebound");
        Ok(())
    }

    /// Queue `f` for the loop; safe from any thread
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_task(Box::new(f));
    }

    pub fn post_task(&self, task: Task) {
        if self.is_loop_thread() {
            self.local.push(task);
        } else {
            self.remote.push(task);
            self.parking.wake_one();
        }
    }

    /// Run `f` inline when already on the loop thread, otherwise post it
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_loop_thread() {
            f();
        } else {
            self.post(f);
        }
    }

    /// Queued tasks (approximate)
    pub fn pending(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    /// One turn: all local work, then up to `remote_batch` remote tasks
    fn turn(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.local.pop() {
            task();
            ran += 1;
        }
        for _ in 0..self.remote_batch {
            match self.remote.pop() {
                Some(task) => {
                    task();
                    ran += 1;
                    // Remote work may have queued local follow-ups.
                    while let Some(task) = self.local.pop() {
                        task();
                        ran += 1;
                    }
                }
                None => break,
            }
        }
        self.executed.fetch_add(ran, Ordering::Relaxed);
        ran
    }

    /// Drain until no task is queued; returns the number executed
    ///
    /// Must be called on the loop thread.
    pub fn run_until_idle(&self) -> usize {
        debug_assert!(self.is_loop_thread(), "run_until_idle off the loop thread");
        let _drain = DrainGuard::enter(self);
        let mut total = 0;
        loop {
            let ran = self.turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Drain, parking when idle, until `done` holds
    ///
    /// `done` is checked after every turn. Must be called on the loop thread.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> usize {
        debug_assert!(self.is_loop_thread(), "run_until off the loop thread");
        let _drain = DrainGuard::enter(self);
        let mut total = 0;
        loop {
            let ran = self.turn();
            total += ran;
            if done() {
                return total;
            }
            if ran == 0 {
                self.parking.park(Some(self.park_timeout));
            }
        }
    }

    /// Drain and park until `stop` is called
    ///
    /// Binds the calling thread as the loop thread first.
    pub fn run(&self) -> KeelResult<()> {
        self.bind_current_thread()?;
        let _drain = DrainGuard::enter(self);
        let mut idle_spins = 0u32;
        while !self.stop_requested.load(Ordering::Acquire) {
            if self.turn() > 0 {
                idle_spins = 0;
                continue;
            }
            if idle_spins < self.idle_spins {
                idle_spins += 1;
                std::hint::spin_loop();
                std::thread::yield_now();
            } else {
                self.parking.park(Some(self.park_timeout));
                idle_spins = 0;
            }
        }
        self.stop_requested.store(false, Ordering::Release);
        Ok(())
    }

    /// Ask a running `run` to return after its current turn
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.parking.wake_all();
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .field("local", &self.local.len())
            .field("remote", &self.remote.len())
            .field("executed", &self.executed())
            .finish()
    }
}

struct DrainGuard<'a> {
    el: &'a EventLoop,
    outer: bool,
}

impl<'a> DrainGuard<'a> {
    fn enter(el: &'a EventLoop) -> Self {
        tls::enter_drain();
        let outer = !el.draining.swap(true, Ordering::AcqRel);
        Self { el, outer }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.outer {
            self.el.draining.store(false, Ordering::Release);
        }
        tls::exit_drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_loop() -> Arc<EventLoop> {
        Arc::new(EventLoop::new(&RuntimeConfig::new().park_timeout(Duration::from_millis(5))))
    }

    #[test]
    fn test_dispatch_inline_on_loop_thread() {
        let el = test_loop();
        let hit = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&hit);
        el.dispatch(move || h.store(true, Ordering::SeqCst));
        assert!(hit.load(Ordering::SeqCst));
        assert_eq!(el.pending(), 0);
    }

    #[test]
    fn test_post_defers_until_drain() {
        let el = test_loop();
        let hit = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&hit);
        el.post(move || h.store(true, Ordering::SeqCst));
        assert!(!hit.load(Ordering::SeqCst));
        assert_eq!(el.run_until_idle(), 1);
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_local_work_runs_before_remote() {
        let el = test_loop();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (el2, o) = (Arc::clone(&el), Arc::clone(&order));
        std::thread::spawn(move || el2.post(move || o.lock().push("remote")))
            .join()
            .unwrap();
        let o = Arc::clone(&order);
        el.post(move || o.lock().push("local"));

        el.run_until_idle();
        assert_eq!(*order.lock(), vec!["local", "remote"]);
    }

    #[test]
    fn test_cross_thread_dispatch_is_posted() {
        let el = test_loop();
        let hit = Arc::new(AtomicBool::new(false));
        let (el2, h) = (Arc::clone(&el), Arc::clone(&hit));
        std::thread::spawn(move || el2.dispatch(move || h.store(true, Ordering::SeqCst)))
            .join()
            .unwrap();
        assert!(!hit.load(Ordering::SeqCst));
        el.run_until_idle();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_until_wakes_on_remote_post() {
        let el = test_loop();
        let hit = Arc::new(AtomicBool::new(false));
        let (el2, h) = (Arc::clone(&el), Arc::clone(&hit));
        let poster = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            el2.post(move || h.store(true, Ordering::SeqCst));
        });
        el.run_until(|| hit.load(Ordering::SeqCst));
        poster.join().unwrap();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_until_stopped_from_other_thread() {
        let el = test_loop();
        let el2 = Arc::clone(&el);
        let runner = std::thread::spawn(move || el2.run());

        let count = Arc::new(AtomicUsize::new(0));
        // Wait for the runner to bind before posting.
        while el.is_loop_thread() {
            std::thread::yield_now();
        }
        for _ in 0..10 {
            let c = Arc::clone(&count);
            el.post(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        while count.load(Ordering::SeqCst) < 10 {
            std::thread::sleep(Duration::from_millis(1));
        }
        el.stop();
        runner.join().unwrap().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
