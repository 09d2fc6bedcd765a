//! Event classification: raw runtime events to symbolic timeline states.
//!
//! Each raw event from the host maps to exactly one state rendered on the
//! worker's timeline:
//!
//! | Raw event   | State                                   |
//! |-------------|-----------------------------------------|
//! | `started`   | `started`                               |
//! | `ready`     | `wants-lock`                            |
//! | `resumed`   | `running`                               |
//! | `suspended` | `sleeping` if in a sleep call, else `waiting` |
//! | `exited`    | `died`                                  |
//! | `gc-enter`  | `gc`                                    |
//! | `gc-exit`   | `running`                               |
//!
//! # Coalescing
//!
//! The host may report one lock release more than once (a condition variable
//! broadcast wakes several threads that each fire `suspended`). A `suspended`
//! arriving right after another `suspended` for the same worker renders
//! nothing. No other repeated event is coalesced.

use gvltrace_common::{
    EVENT_GC_ENTER, EVENT_GC_EXIT, EVENT_THREAD_EXITED, EVENT_THREAD_READY, EVENT_THREAD_RESUMED,
    EVENT_THREAD_STARTED, EVENT_THREAD_SUSPENDED,
};
use std::fmt;

use crate::runtime::EventContext;
use crate::timeline::WorkerState;

/// Raw event delivered by the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Ready,
    Resumed,
    Suspended,
    Started,
    Exited,
    GcEnter,
    GcExit,
}

impl RawEventKind {
    /// Every raw event, in bit order
    pub const ALL: [RawEventKind; 7] = [
        RawEventKind::Started,
        RawEventKind::Ready,
        RawEventKind::Resumed,
        RawEventKind::Suspended,
        RawEventKind::Exited,
        RawEventKind::GcEnter,
        RawEventKind::GcExit,
    ];

    /// Decode a single `EVENT_*` bit
    #[must_use]
    pub fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.bit() == bit)
    }

    /// The `EVENT_*` bit for this event
    #[must_use]
    pub fn bit(self) -> u32 {
        match self {
            RawEventKind::Started => EVENT_THREAD_STARTED,
            RawEventKind::Ready => EVENT_THREAD_READY,
            RawEventKind::Resumed => EVENT_THREAD_RESUMED,
            RawEventKind::Suspended => EVENT_THREAD_SUSPENDED,
            RawEventKind::Exited => EVENT_THREAD_EXITED,
            RawEventKind::GcEnter => EVENT_GC_ENTER,
            RawEventKind::GcExit => EVENT_GC_EXIT,
        }
    }

    /// GC events run inside the pause, where new tracking state must not be
    /// allocated
    #[must_use]
    pub fn is_gc(self) -> bool {
        matches!(self, RawEventKind::GcEnter | RawEventKind::GcExit)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn code(self) -> u8 {
        // Bits 0..=6 map to codes 1..=7; 0 means "none"
        self.bit().trailing_zeros() as u8 + 1
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1..=7 => Self::from_bit(1 << (code - 1)),
            _ => None,
        }
    }
}

/// Symbolic state rendered as a span name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimelineState {
    StartedTracing,
    StoppedTracing,
    WantsLock,
    Running,
    Waiting,
    Sleeping,
    Started,
    Died,
    Gc,
}

impl TimelineState {
    pub const ALL: [TimelineState; 9] = [
        TimelineState::StartedTracing,
        TimelineState::StoppedTracing,
        TimelineState::WantsLock,
        TimelineState::Running,
        TimelineState::Waiting,
        TimelineState::Sleeping,
        TimelineState::Started,
        TimelineState::Died,
        TimelineState::Gc,
    ];

    /// Span name written to the trace
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TimelineState::StartedTracing => "started_tracing",
            TimelineState::StoppedTracing => "stopped_tracing",
            TimelineState::WantsLock => "wants-lock",
            TimelineState::Running => "running",
            TimelineState::Waiting => "waiting",
            TimelineState::Sleeping => "sleeping",
            TimelineState::Started => "started",
            TimelineState::Died => "died",
            TimelineState::Gc => "gc",
        }
    }

    /// Parse a span name back
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == name)
    }

    /// Whether the worker holds the global lock in this state
    #[must_use]
    pub fn holds_lock(self) -> bool {
        matches!(self, TimelineState::Running | TimelineState::Gc)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn code(self) -> u8 {
        Self::ALL.iter().position(|s| *s == self).map_or(0, |i| i as u8 + 1)
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        code.checked_sub(1).and_then(|i| Self::ALL.get(usize::from(i)).copied())
    }
}

impl fmt::Display for TimelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw event for `worker`.
///
/// Returns `None` when the event is a repeated `suspended` and must not be
/// rendered. Updates the worker's last-event record either way.
#[must_use]
pub fn classify(
    kind: RawEventKind,
    worker: &WorkerState,
    context: &EventContext,
) -> Option<TimelineState> {
    let previous = worker.swap_last_event(kind);

    let state = match kind {
        RawEventKind::Started => TimelineState::Started,
        RawEventKind::Exited => TimelineState::Died,
        RawEventKind::Ready => TimelineState::WantsLock,
        RawEventKind::Resumed | RawEventKind::GcExit => TimelineState::Running,
        RawEventKind::GcEnter => TimelineState::Gc,
        RawEventKind::Suspended => {
            if previous == Some(RawEventKind::Suspended) {
                return None;
            }
            // Always consume the flag so it only applies to one suspend
            let marked = worker.take_sleeping();
            if (marked || context.in_sleep_call) && context.worker_alive {
                TimelineState::Sleeping
            } else {
                TimelineState::Waiting
            }
        }
    };

    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{WorkerHandle, WorkerId};

    fn worker() -> WorkerState {
        WorkerState::new(WorkerId(1), WorkerHandle(1))
    }

    fn plain() -> EventContext {
        EventContext::default()
    }

    #[test]
    fn test_direct_mappings() {
        let w = worker();
        let cases = [
            (RawEventKind::Started, TimelineState::Started),
            (RawEventKind::Ready, TimelineState::WantsLock),
            (RawEventKind::Resumed, TimelineState::Running),
            (RawEventKind::GcEnter, TimelineState::Gc),
            (RawEventKind::GcExit, TimelineState::Running),
            (RawEventKind::Exited, TimelineState::Died),
        ];
        for (kind, expected) in cases {
            assert_eq!(classify(kind, &w, &plain()), Some(expected), "{kind:?}");
        }
    }

    #[test]
    fn test_repeated_suspend_is_coalesced() {
        let w = worker();
        assert_eq!(classify(RawEventKind::Suspended, &w, &plain()), Some(TimelineState::Waiting));
        assert_eq!(classify(RawEventKind::Suspended, &w, &plain()), None);
        assert_eq!(classify(RawEventKind::Suspended, &w, &plain()), None);
        assert_eq!(classify(RawEventKind::Ready, &w, &plain()), Some(TimelineState::WantsLock));
        assert_eq!(classify(RawEventKind::Suspended, &w, &plain()), Some(TimelineState::Waiting));
    }

    #[test]
    fn test_other_repeats_are_not_coalesced() {
        let w = worker();
        assert!(classify(RawEventKind::Ready, &w, &plain()).is_some());
        assert!(classify(RawEventKind::Ready, &w, &plain()).is_some());
        assert!(classify(RawEventKind::Resumed, &w, &plain()).is_some());
        assert!(classify(RawEventKind::Resumed, &w, &plain()).is_some());
    }

    #[test]
    fn test_marked_sleep_applies_once() {
        let w = worker();
        w.mark_sleeping();
        assert_eq!(classify(RawEventKind::Suspended, &w, &plain()), Some(TimelineState::Sleeping));
        classify(RawEventKind::Resumed, &w, &plain());
        assert_eq!(classify(RawEventKind::Suspended, &w, &plain()), Some(TimelineState::Waiting));
    }

    #[test]
    fn test_sleep_call_context() {
        let w = worker();
        let ctx = EventContext { in_sleep_call: true, worker_alive: true };
        assert_eq!(classify(RawEventKind::Suspended, &w, &ctx), Some(TimelineState::Sleeping));
    }

    #[test]
    fn test_dead_worker_never_sleeps() {
        let w = worker();
        w.mark_sleeping();
        let ctx = EventContext { in_sleep_call: true, worker_alive: false };
        assert_eq!(classify(RawEventKind::Suspended, &w, &ctx), Some(TimelineState::Waiting));
        assert!(!w.is_sleeping());
    }

    #[test]
    fn test_codes_roundtrip() {
        for kind in RawEventKind::ALL {
            assert_eq!(RawEventKind::from_code(kind.code()), Some(kind));
            assert_eq!(RawEventKind::from_bit(kind.bit()), Some(kind));
        }
        for state in TimelineState::ALL {
            assert_eq!(TimelineState::from_code(state.code()), Some(state));
            assert_eq!(TimelineState::from_name(state.as_str()), Some(state));
        }
        assert_eq!(RawEventKind::from_code(0), None);
        assert_eq!(TimelineState::from_code(0), None);
        assert_eq!(RawEventKind::from_bit(EVENT_THREAD_READY | EVENT_THREAD_RESUMED), None);
    }
}
