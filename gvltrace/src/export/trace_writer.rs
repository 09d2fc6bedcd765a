//! # Trace Emitter
//!
//! Streams timeline transitions to the output as a JSON array, one record per
//! line:
//!
//! ```text
//! [
//! {"ph":"M","pid":1234,"name":"process_name","args":{"name":"Runtime threads"}},
//! {"ph":"M","pid":1234,"tid":1,"name":"thread_name","args":{"name":"Main Thread"}},
//! {"ph":"B","pid":1234,"tid":1,"ts":0.0,"name":"started_tracing"},
//! {"ph":"E","pid":1234,"tid":1,"ts":812.4},
//! {"ph":"B","pid":1234,"tid":1,"ts":812.4,"name":"waiting"},
//! ...
//! ]
//! ```
//!
//! ## Invariants
//!
//! - Each worker's timeline is a strict sequence of spans: the first render
//!   writes `thread_name` metadata and a begin record; every later render writes
//!   an end record and a begin record with the same timestamp.
//! - One render is written under the sink lock as a single unit, and the
//!   timestamp is read while holding it, so records never interleave and
//!   timestamps never go backwards in file order.
//! - The set of open rows lives under the same lock. [`TraceWriter::finish`]
//!   closes exactly that set, so a render that lands while the session is
//!   stopping is closed with the rest. After `finish` the sink is gone and
//!   renders are no-ops, so nothing is written past `]`.
//! - A failed clock read aborts the session: the sink is dropped and the error
//!   is reported by `finish`.
//!
//! ## OS-thread view
//!
//! When enabled, every render is mirrored onto a second pseudo process whose
//! rows are keyed by native thread id, showing how workers are multiplexed onto
//! OS threads. Begin records there carry a `cname` picked from the worker's
//! serial id.

use log::warn;
use std::collections::{BTreeSet, HashSet};
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use super::trace_event::TraceRecord;
use crate::classification::TimelineState;
use crate::clock::SessionClock;
use crate::domain::{NativeTid, Pid, TracingError, WorkerId};
use crate::timeline::WorkerState;

/// Reserved trace-viewer color names cycled through by worker id
const WORKER_COLORS: &[&str] = &[
    "thread_state_running",
    "thread_state_runnable",
    "thread_state_iowait",
    "rail_response",
    "rail_animation",
    "rail_idle",
    "rail_load",
    "startup",
    "generic_work",
    "good",
    "bad",
    "terrible",
    "yellow",
    "olive",
];

/// Color hint for a worker's spans in the OS-thread view
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn worker_color(id: WorkerId) -> &'static str {
    WORKER_COLORS[(id.0 % WORKER_COLORS.len() as u64) as usize]
}

/// Process ids and labels written to the document
#[derive(Debug, Clone)]
pub struct TraceLayout {
    pub pid: Pid,
    pub process_name: String,
    /// Pseudo process for the OS-thread view, if enabled
    pub os_threads: Option<(Pid, String)>,
}

impl TraceLayout {
    /// Layout for `pid`, with the OS-thread view on `pid + 1`
    #[must_use]
    pub fn new(pid: Pid, process_name: impl Into<String>) -> Self {
        Self { pid, process_name: process_name.into(), os_threads: None }
    }

    #[must_use]
    pub fn with_os_threads(mut self, name: impl Into<String>) -> Self {
        self.os_threads = Some((Pid(self.pid.0.wrapping_add(1)), name.into()));
        self
    }
}

struct SinkState<W> {
    /// `None` once finished or after a write failure
    out: Option<W>,
    /// Reused per render so one render is one `write_all`
    scratch: Vec<u8>,
    /// Workers with an open span
    open_workers: BTreeSet<WorkerId>,
    /// OS threads that have an open span in the OS-thread view
    os_threads: HashSet<NativeTid>,
    /// Timestamp of the latest render
    last_ts: f64,
    /// First write or clock failure, reported by `finish`
    error: Option<TracingError>,
}

/// Trace emitter over any writer
pub struct TraceWriter<W: Write> {
    layout: TraceLayout,
    sink: Mutex<SinkState<W>>,
}

impl<W: Write> TraceWriter<W> {
    /// Write the opening `[` and the process metadata.
    ///
    /// # Errors
    /// Returns the I/O error if the header cannot be written.
    pub fn open(mut out: W, layout: TraceLayout) -> io::Result<Self> {
        let mut header = b"[".to_vec();
        push_record(&mut header, &TraceRecord::process_name(layout.pid.0, &layout.process_name));
        if let Some((os_pid, os_name)) = &layout.os_threads {
            push_record(&mut header, &TraceRecord::process_name(os_pid.0, os_name));
        }
        out.write_all(&header)?;

        Ok(Self {
            layout,
            sink: Mutex::new(SinkState {
                out: Some(out),
                scratch: Vec::with_capacity(512),
                open_workers: BTreeSet::new(),
                os_threads: HashSet::new(),
                last_ts: 0.0,
                error: None,
            }),
        })
    }

    /// Close `worker`'s open span and open one named after `state`.
    ///
    /// Returns false if nothing was written: the sink is closed, or this render
    /// failed to read the clock or write and closed it.
    pub fn render(
        &self,
        worker: &WorkerState,
        epoch: u64,
        native_tid: NativeTid,
        state: TimelineState,
        clock: &SessionClock,
    ) -> bool {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if sink.out.is_none() {
            return false;
        }
        let ts = match clock.elapsed_micros() {
            Ok(ts) => ts,
            Err(err) => {
                sink.abort(err);
                return false;
            }
        };

        let SinkState { scratch, open_workers, os_threads, .. } = &mut *sink;
        scratch.clear();

        let pid = self.layout.pid.0;
        let tid = worker.id().0;
        worker.mark_rendered(epoch);
        if open_workers.insert(worker.id()) {
            push_record(scratch, &TraceRecord::thread_name(pid, tid, &worker.display_name()));
        } else {
            push_record(scratch, &TraceRecord::end(pid, tid, ts));
        }
        push_record(scratch, &TraceRecord::begin(pid, tid, ts, state.as_str()));

        if let Some((os_pid, _)) = &self.layout.os_threads {
            let os_tid = u64::from(native_tid.0);
            if os_threads.insert(native_tid) {
                let label = format!("OS thread {}", native_tid.0);
                push_record(scratch, &TraceRecord::thread_name(os_pid.0, os_tid, &label));
            } else {
                push_record(scratch, &TraceRecord::end(os_pid.0, os_tid, ts));
            }
            let begin = TraceRecord::begin(os_pid.0, os_tid, ts, state.as_str())
                .with_cname(worker_color(worker.id()));
            push_record(scratch, &begin);
        }

        worker.set_last_state(state);
        sink.last_ts = ts;
        sink.write_scratch()
    }

    /// Close every open span, write refreshed thread names and the closing
    /// `]`, flush, and hand the writer back.
    ///
    /// `renames` are `thread_name` records to append.
    ///
    /// # Errors
    /// - `NotActive` if already finished
    /// - `SinkCloseFailed` if a write failed during the session or the final
    ///   flush fails
    /// - `ClockReadFailed` if a render could not read the clock, or the close
    ///   itself cannot; in the latter case the document is still closed, at the
    ///   latest rendered timestamp
    pub fn finish(&self, clock: &SessionClock, renames: &[(WorkerId, String)]) -> Result<W, TracingError> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let failed = sink.error.take();
        let Some(mut out) = sink.out.take() else {
            return Err(failed.unwrap_or(TracingError::NotActive));
        };
        if let Some(err) = failed {
            return Err(err);
        }

        let (ts, clock_error) = match clock.elapsed_micros() {
            Ok(ts) => (ts.max(sink.last_ts), None),
            Err(err) => (sink.last_ts, Some(err)),
        };

        let mut tail = Vec::new();
        let pid = self.layout.pid.0;
        for id in std::mem::take(&mut sink.open_workers) {
            push_record(&mut tail, &TraceRecord::end(pid, id.0, ts));
        }
        if let Some((os_pid, _)) = &self.layout.os_threads {
            let mut os_threads: Vec<_> = sink.os_threads.drain().collect();
            os_threads.sort();
            for tid in os_threads {
                push_record(&mut tail, &TraceRecord::end(os_pid.0, u64::from(tid.0), ts));
            }
        }
        for (id, name) in renames {
            push_record(&mut tail, &TraceRecord::thread_name(pid, id.0, name));
        }
        tail.extend_from_slice(b"\n]\n");

        out.write_all(&tail).and_then(|()| out.flush()).map_err(TracingError::SinkCloseFailed)?;
        match clock_error {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Whether `finish` has run (or a write failed)
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).out.is_none()
    }
}

impl<W: Write> SinkState<W> {
    fn write_scratch(&mut self) -> bool {
        let Some(out) = self.out.as_mut() else {
            return false;
        };
        match out.write_all(&self.scratch) {
            Ok(()) => true,
            Err(err) => {
                warn!("Trace write failed, dropping further events: {err}");
                // The document is corrupt past this point; stop writing
                self.out = None;
                self.error = Some(TracingError::SinkCloseFailed(err));
                false
            }
        }
    }

    /// Give up on the session after a clock failure
    fn abort(&mut self, err: TracingError) {
        warn!("{err}; aborting the trace session");
        self.out = None;
        self.error.get_or_insert(err);
    }
}

/// Append `record` on its own line. Every record after the first is preceded
/// by a comma, so the document never has a trailing one.
fn push_record(buf: &mut Vec<u8>, record: &TraceRecord<'_>) {
    if buf.last() == Some(&b'[') {
        buf.push(b'\n');
    } else {
        buf.extend_from_slice(b",\n");
    }
    if let Err(err) = serde_json::to_writer(&mut *buf, record) {
        warn!("Failed to serialize trace record: {err}");
    }
}
