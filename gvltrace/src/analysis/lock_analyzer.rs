//! Global lock analysis for recorded traces.
//!
//! Aggregates the spans of every worker timeline into time-per-state totals,
//! then derives how busy the lock was and how much waiting it caused.
//!
//! ```text
//! TraceData ──► analyze_lock() ──► LockSummary
//!                                    ├─ per-worker state totals
//!                                    ├─ lock utilization (running + gc)
//!                                    └─ wants-lock total and peak waiters
//! ```
//!
//! The OS-thread view mirrors the worker rows and is ignored here.

// Ratio calculations convert counts and durations to f64
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::fmt;

use crate::classification::TimelineState;
use crate::domain::Micros;
use crate::trace_data::{Timeline, TraceData};

/// Time one worker spent in each state
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSummary {
    pub tid: u64,
    pub name: String,
    /// Span name to total microseconds
    pub states: BTreeMap<String, f64>,
    /// Number of spans on the timeline
    pub transitions: usize,
    /// Longest single `wants-lock` span
    pub longest_wait: Micros,
}

impl WorkerSummary {
    fn from_timeline(timeline: &Timeline) -> Self {
        let mut states = BTreeMap::new();
        let mut longest_wait = 0.0f64;
        for span in &timeline.spans {
            *states.entry(span.name.clone()).or_insert(0.0) += span.duration();
            if span.name == TimelineState::WantsLock.as_str() {
                longest_wait = longest_wait.max(span.duration());
            }
        }
        Self {
            tid: timeline.tid,
            name: timeline.name.clone().unwrap_or_else(|| format!("Thread {}", timeline.tid)),
            states,
            transitions: timeline.spans.len(),
            longest_wait: Micros(longest_wait),
        }
    }

    #[must_use]
    pub fn time_in(&self, state: TimelineState) -> Micros {
        Micros(self.states.get(state.as_str()).copied().unwrap_or(0.0))
    }

    /// Time holding the lock
    #[must_use]
    pub fn lock_held(&self) -> Micros {
        Micros(
            self.states
                .iter()
                .filter(|(name, _)| TimelineState::from_name(name).is_some_and(TimelineState::holds_lock))
                .map(|(_, micros)| micros)
                .sum(),
        )
    }
}

/// Lock usage across the whole trace
#[derive(Debug, Clone, PartialEq)]
pub struct LockSummary {
    pub duration: Micros,
    /// Ordered by worker serial id
    pub workers: Vec<WorkerSummary>,
    pub lock_held: Micros,
    /// `lock_held / duration`, 0.0 for an empty trace
    pub utilization: f64,
    pub wants_lock: Micros,
    /// Most workers waiting for the lock at the same instant
    pub peak_waiters: usize,
}

/// Summarize lock usage of the worker timelines in `data`
#[must_use]
pub fn analyze_lock(data: &TraceData) -> LockSummary {
    let workers: Vec<_> = data.workers().map(WorkerSummary::from_timeline).collect();

    let lock_held: f64 = workers.iter().map(|w| w.lock_held().0).sum();
    let wants_lock: f64 = workers.iter().map(|w| w.time_in(TimelineState::WantsLock).0).sum();
    let utilization = if data.duration.0 > 0.0 { lock_held / data.duration.0 } else { 0.0 };

    LockSummary {
        duration: data.duration,
        workers,
        lock_held: Micros(lock_held),
        utilization,
        wants_lock: Micros(wants_lock),
        peak_waiters: peak_waiters(data),
    }
}

/// Sweep `wants-lock` span boundaries; an end at the same instant as a begin
/// is applied first, since a hand-off is not two waiters.
fn peak_waiters(data: &TraceData) -> usize {
    let mut edges: Vec<(f64, i32)> = data
        .workers()
        .flat_map(|t| &t.spans)
        .filter(|span| span.name == TimelineState::WantsLock.as_str())
        .flat_map(|span| [(span.start, 1), (span.end, -1)])
        .collect();
    edges.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut current = 0i32;
    let mut peak = 0i32;
    for (_, delta) in edges {
        current += delta;
        peak = peak.max(current);
    }
    usize::try_from(peak).unwrap_or(0)
}

impl fmt::Display for LockSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Duration:         {}", self.duration)?;
        writeln!(f, "Workers:          {}", self.workers.len())?;
        writeln!(f, "Lock held:        {} ({:.1}%)", self.lock_held, self.utilization * 100.0)?;
        writeln!(f, "Waiting for lock: {}", self.wants_lock)?;
        writeln!(f, "Peak waiters:     {}", self.peak_waiters)?;
        writeln!(f)?;
        writeln!(f, "{:<24} {:>10} {:>10} {:>10} {:>10} {:>12}", "WORKER", "RUNNING", "WANTS", "WAITING", "SLEEPING", "LONGEST WAIT")?;
        for worker in &self.workers {
            writeln!(
                f,
                "{:<24} {:>10} {:>10} {:>10} {:>10} {:>12}",
                truncate(&worker.name, 24),
                worker.time_in(TimelineState::Running).to_string(),
                worker.time_in(TimelineState::WantsLock).to_string(),
                worker.time_in(TimelineState::Waiting).to_string(),
                worker.time_in(TimelineState::Sleeping).to_string(),
                worker.longest_wait.to_string(),
            )?;
        }
        Ok(())
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        let mut short: String = name.chars().take(width - 1).collect();
        short.push('…');
        short
    }
}
