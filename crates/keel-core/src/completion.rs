//! One-shot asynchronous results
//!
//! Every lifecycle hook and cross-component operation returns a
//! [`Completion`]. It resolves exactly once to an [`Outcome`]: a value, an
//! error, or cancellation. The producing side is a [`Promise`]; dropping a
//! promise without fulfilling it cancels the completion, which is how an
//! abandoned operation becomes a first-class, non-error result.
//!
//! ```ignore
//! let (promise, completion) = Completion::<u32>::pending();
//! completion.on_complete(|outcome| println!("{:?}", outcome));
//! promise.complete(Outcome::Value(7));
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{HookError, KeelError};

/// Resolution of a one-shot asynchronous result
#[derive(Clone)]
pub enum Outcome<T> {
    Value(T),
    Error(HookError),
    Canceled,
}

impl<T> Outcome<T> {
    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Value(v) => Outcome::Value(f(v)),
            Outcome::Error(e) => Outcome::Error(e),
            Outcome::Canceled => Outcome::Canceled,
        }
    }

    /// Value or `None`, discarding the reason
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    /// `Ok(Some(v))` for a value, `Ok(None)` for cancellation
    pub fn into_result(self) -> Result<Option<T>, KeelError> {
        match self {
            Outcome::Value(v) => Ok(Some(v)),
            Outcome::Error(e) => Err(KeelError::Hook(e)),
            Outcome::Canceled => Ok(None),
        }
    }
}

impl<T> From<Result<T, HookError>> for Outcome<T> {
    fn from(r: Result<T, HookError>) -> Self {
        match r {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Error(e),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Outcome::Error(e) => f.debug_tuple("Error").field(&e.to_string()).finish(),
            Outcome::Canceled => f.write_str("Canceled"),
        }
    }
}

type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

enum State<T> {
    Pending(Option<Continuation<T>>),
    Done(Outcome<T>),
    /// Delivered to a continuation or taken by the consumer
    Consumed,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn resolve(&self, outcome: Outcome<T>) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Consumed) {
            State::Pending(Some(cont)) => {
                drop(state);
                cont(outcome);
            }
            State::Pending(None) => {
                *state = State::Done(outcome);
                drop(state);
                self.ready.notify_all();
            }
            done @ (State::Done(_) | State::Consumed) => {
                // Already resolved; a second resolution is a producer bug.
                *state = done;
                debug_assert!(false, "completion resolved twice");
            }
        }
    }
}

/// Producing side of a [`Completion`]
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    pub fn complete(mut self, outcome: Outcome<T>) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(outcome);
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Outcome::Value(value));
    }

    pub fn fail(self, err: HookError) {
        self.complete(Outcome::Error(err));
    }

    pub fn cancel(self) {
        self.complete(Outcome::Canceled);
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Outcome::Canceled);
        }
    }
}

/// Consuming side of a one-shot asynchronous result
#[must_use = "a completion does nothing unless observed"]
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Completion<T> {
    /// Unresolved completion and the promise that resolves it
    pub fn pending() -> (Promise<T>, Completion<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending(None)),
            ready: Condvar::new(),
        });
        (
            Promise { shared: Some(Arc::clone(&shared)) },
            Completion { shared },
        )
    }

    /// Already-resolved completion
    pub fn resolved(outcome: Outcome<T>) -> Self {
        Completion {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Done(outcome)),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn ready(value: T) -> Self {
        Self::resolved(Outcome::Value(value))
    }

    pub fn failed(err: HookError) -> Self {
        Self::resolved(Outcome::Error(err))
    }

    pub fn canceled() -> Self {
        Self::resolved(Outcome::Canceled)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Done(_))
    }

    /// Take the outcome if it is already known
    pub fn try_take(&self) -> Option<Outcome<T>> {
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Consumed) {
            State::Done(outcome) => Some(outcome),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Run `f` once the outcome is known
    ///
    /// Runs inline, on the calling thread, if already resolved; otherwise on
    /// whichever thread resolves the promise.
    pub fn on_complete<F>(self, f: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Consumed) {
            State::Done(outcome) => {
                drop(state);
                f(outcome);
            }
            State::Pending(None) => {
                *state = State::Pending(Some(Box::new(f)));
            }
            State::Pending(Some(_)) | State::Consumed => {
                // Completion is not Clone, so a second observer cannot exist.
                debug_assert!(false, "completion observed twice");
            }
        }
    }

    /// Chain a continuation producing a new completion
    pub fn then<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>) -> Outcome<U> + Send + 'static,
    {
        let (promise, next) = Completion::pending();
        self.on_complete(move |outcome| promise.complete(f(outcome)));
        next
    }

    pub fn map<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |outcome| outcome.map(f))
    }

    /// Block the calling thread until resolved
    ///
    /// Must not be called on the event loop thread that would resolve it.
    pub fn wait(self) -> Outcome<T> {
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Consumed) {
                State::Done(outcome) => return outcome,
                State::Pending(cont) => {
                    *state = State::Pending(cont);
                    self.shared.ready.wait(&mut state);
                }
                State::Consumed => return Outcome::Canceled,
            }
        }
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// Clone of the outcome if already resolved, without consuming it
    pub fn peek(&self) -> Option<Outcome<T>> {
        match &*self.shared.state.lock() {
            State::Done(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.state.lock() {
            State::Pending(_) => "pending",
            State::Done(Outcome::Value(_)) => "value",
            State::Done(Outcome::Error(_)) => "error",
            State::Done(Outcome::Canceled) => "canceled",
            State::Consumed => "consumed",
        };
        write!(f, "Completion({state})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ready_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        Completion::ready(5u32).on_complete(move |o| {
            assert_eq!(o.value(), Some(5));
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_continuation_runs_on_resolve() {
        let (promise, completion) = Completion::<&'static str>::pending();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        completion.on_complete(move |o| *s.lock() = o.value());
        assert!(seen.lock().is_none());
        promise.succeed("done");
        assert_eq!(*seen.lock(), Some("done"));
    }

    #[test]
    fn test_dropped_promise_cancels() {
        let (promise, completion) = Completion::<()>::pending();
        drop(promise);
        assert!(completion.try_take().unwrap().is_canceled());
    }

    #[test]
    fn test_then_propagates_error() {
        let (promise, completion) = Completion::<u8>::pending();
        let chained = completion.map(|v| v as u32 * 2);
        promise.fail(HookError::msg("nope"));
        match chained.try_take() {
            Some(Outcome::Error(e)) => assert_eq!(e.to_string(), "nope"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wait_across_threads() {
        let (promise, completion) = Completion::<u64>::pending();
        let t = std::thread::spawn(move || completion.wait());
        promise.succeed(42);
        assert_eq!(t.join().unwrap().value(), Some(42));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let c = Completion::ready(1u8);
        assert!(c.peek().unwrap().is_value());
        assert!(c.try_take().unwrap().is_value());
        assert!(c.peek().is_none());
    }
}
