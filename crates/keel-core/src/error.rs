//! Error types for the keel runtime

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::guid::Guid;

/// Result type for runtime operations
pub type KeelResult<T> = Result<T, KeelError>;

/// Errors surfaced to callers of the runtime
///
/// Unsatisfied dependencies and canceled continuations are normal states
/// and never show up here.
#[derive(Debug, Clone, Error)]
pub enum KeelError {
    /// Id space for clusters, components or slots is used up
    #[error("id space exhausted (limit {limit})")]
    IdsExhausted { limit: u32 },

    /// The addressed service is not attached to this context
    #[error("service {0} is not attached")]
    UnknownService(Guid),

    /// The service is attached but already torn down
    #[error("service {0} is destroyed")]
    Destroyed(Guid),

    /// The service is still attached and cannot be attached again
    #[error("service {0} is already attached")]
    AlreadyAttached(Guid),

    /// The context is shutting down and accepts no new services
    #[error("context is shutting down")]
    ShuttingDown,

    /// The context that owned this object has been dropped
    #[error("context is gone")]
    ContextGone,

    /// A graph operation was issued off the event loop thread
    #[error("not on the event loop thread")]
    NotOnLoopThread,

    /// The capability graph contains a directed cycle
    #[error("dependency cycle: {}", render_cycle(.0))]
    Cycle(Vec<Guid>),

    /// A lifecycle hook failed
    #[error("lifecycle hook failed: {0}")]
    Hook(#[from] HookError),

    /// Invalid runtime configuration
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

fn render_cycle(path: &[Guid]) -> String {
    path.iter()
        .map(|g| g.detailed())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error raised by a lifecycle hook
///
/// Cloneable so the same failure can be delivered to every caller awaiting
/// the transition.
#[derive(Clone)]
pub struct HookError(Arc<dyn StdError + Send + Sync + 'static>);

impl HookError {
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        HookError(Arc::new(err))
    }

    /// Error carrying only a message
    pub fn msg(message: impl Into<String>) -> Self {
        HookError(Arc::new(Message(message.into())))
    }

    /// The underlying error
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HookError({:?})", self.0)
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for HookError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}
