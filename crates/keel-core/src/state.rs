//! Service phase and capability priority types

use core::cmp::Ordering;
use core::fmt;

use crate::guid::Guid;

/// Lifecycle phase of a service
///
/// The outer wrapper is `Uninitialized -> Initialized -> Stopped (setup done)
/// -> ... -> Destroyed`; the running sub-cycle is
/// `Stopped -> Pending -> Starting -> Running -> Pending -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Allocated, `describe` not yet run
    Uninitialized = 0,

    /// Parts declared, dependencies not yet wired
    Initialized = 1,

    /// Set up and idle; initial and terminal state of the running sub-cycle
    Stopped = 2,

    /// Queued in the scheduler, awaiting its turn
    Pending = 3,

    /// `on_start` in flight
    Starting = 4,

    /// Started successfully
    Running = 5,

    /// `on_stop` in flight
    Stopping = 6,

    /// Torn down; the epoch is retired
    Destroyed = 7,
}

impl Phase {
    /// Set up and not yet destroyed
    #[inline]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Phase::Uninitialized | Phase::Initialized | Phase::Destroyed)
    }

    /// Anywhere between "start began" and "stop finished"
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Phase::Starting | Phase::Running | Phase::Stopping)
    }

    /// A transition hook is in flight
    #[inline]
    pub const fn is_transitioning(&self) -> bool {
        matches!(self, Phase::Starting | Phase::Stopping)
    }

    #[inline]
    pub const fn is_running(&self) -> bool {
        matches!(self, Phase::Running)
    }
}

impl From<u8> for Phase {
    fn from(v: u8) -> Self {
        match v {
            0 => Phase::Uninitialized,
            1 => Phase::Initialized,
            2 => Phase::Stopped,
            3 => Phase::Pending,
            4 => Phase::Starting,
            5 => Phase::Running,
            6 => Phase::Stopping,
            _ => Phase::Destroyed,
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> u8 {
        phase as u8
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Initialized => "initialized",
            Phase::Stopped => "stopped",
            Phase::Pending => "pending",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Priority of a published capability (higher wins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOWEST: Priority = Priority(i32::MIN);
    pub const DEFAULT: Priority = Priority(0);
    pub const HIGHEST: Priority = Priority(i32::MAX);
}

impl From<i32> for Priority {
    fn from(v: i32) -> Self {
        Priority(v)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strict total order used both for capability selection and scheduling
///
/// Compares by priority, then by identity: between two distinct entities
/// the comparison is never `Equal`, so selecting "the best" is always
/// unambiguous. The lower `Guid` wins a priority tie, which keeps the
/// earliest-attached provider in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rank {
    pub priority: Priority,
    pub guid: Guid,
}

impl Rank {
    pub const fn new(priority: Priority, guid: Guid) -> Self {
        Self { priority, guid }
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.guid.cmp(&self.guid))
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
