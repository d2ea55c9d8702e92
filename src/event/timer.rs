//! Timer events.

use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::reactor::EventLoop;

/// Identifies a scheduled timer. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Whether a timer fires once or keeps firing every period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Rescheduled `period` after each firing
    Repeating,
    /// Removed before it fires
    OneShot,
}

/// Callback invoked when a timer is due.
pub type TimerCallback<S> = Rc<dyn Fn(&mut EventLoop<S>, &mut S, TimerId)>;

pub(crate) struct TimeEvent<S> {
    pub(crate) id: TimerId,
    pub(crate) kind: TimerKind,
    pub(crate) period: Duration,
    pub(crate) deadline: Instant,
    pub(crate) callback: TimerCallback<S>,
}

impl<S> TimeEvent<S> {
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

impl<S> fmt::Debug for TimeEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeEvent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("period", &self.period)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Earliest deadline among `timers`, by linear scan.
pub(crate) fn nearest_deadline<S>(timers: &[TimeEvent<S>]) -> Option<Instant> {
    timers.iter().map(|t| t.deadline).min()
}
