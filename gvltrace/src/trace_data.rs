//! Trace read-back
//!
//! Loads a finished trace document into per-timeline span lists, checking the
//! structural guarantees the emitter makes:
//!
//! - the document is a single JSON array of trace records
//! - on every timeline, begin/end records alternate starting with a begin, and
//!   every begin is eventually closed
//! - timestamps never decrease within a timeline
//! - a timeline's `thread_name` metadata precedes its first begin record

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::domain::{Micros, TraceParseError};
use crate::export::{Phase, TraceRecord};

/// One closed span on a timeline, in microseconds since session start
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

impl Span {
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// One row of the trace: a worker, or an OS thread in the OS-thread view
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub pid: u32,
    pub tid: u64,
    /// Latest `thread_name` seen for this row
    pub name: Option<String>,
    pub spans: Vec<Span>,
}

/// Parsed trace document
#[derive(Debug, Clone)]
pub struct TraceData {
    /// `process_name` metadata, keyed by pid
    pub processes: BTreeMap<u32, String>,
    /// Pid of the first process declared, which holds the worker timelines
    pub runtime_pid: Option<u32>,
    /// Timelines ordered by (pid, tid)
    pub timelines: Vec<Timeline>,
    /// Latest span end in the document
    pub duration: Micros,
}

#[derive(Default)]
struct OpenTimeline {
    name: Option<String>,
    open: Option<(String, f64)>,
    last_ts: f64,
    spans: Vec<Span>,
}

impl TraceData {
    /// Load and validate the trace at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not a JSON array of
    /// trace records, or breaks span nesting.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TraceParseError> {
        let content = std::fs::read(path)?;
        Self::from_slice(&content)
    }

    /// Parse and validate a trace document held in memory.
    ///
    /// # Errors
    /// See [`TraceData::from_file`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TraceParseError> {
        let records: Vec<TraceRecord<'static>> = serde_json::from_slice(bytes)?;
        Self::from_records(records)
    }

    fn from_records(records: Vec<TraceRecord<'static>>) -> Result<Self, TraceParseError> {
        let mut processes = BTreeMap::new();
        let mut runtime_pid = None;
        let mut rows: HashMap<(u32, u64), OpenTimeline> = HashMap::new();
        let mut max_ts = 0.0f64;

        for (index, record) in records.into_iter().enumerate() {
            match record.ph {
                Phase::Metadata => match record.name() {
                    Some("process_name") => {
                        let name = record.arg_name().unwrap_or_default().to_string();
                        runtime_pid.get_or_insert(record.pid);
                        processes.insert(record.pid, name);
                    }
                    Some("thread_name") => {
                        let tid = require(record.tid, index, "tid")?;
                        let name = record.arg_name().map(str::to_string);
                        rows.entry((record.pid, tid)).or_default().name = name;
                    }
                    _ => {}
                },
                Phase::Begin => {
                    let tid = require(record.tid, index, "tid")?;
                    let ts = require(record.ts, index, "ts")?;
                    let name = require(record.name.as_deref(), index, "name")?.to_string();
                    let row = rows.entry((record.pid, tid)).or_default();
                    if row.name.is_none() && row.spans.is_empty() && row.open.is_none() {
                        return Err(invalid(index, format!("begin on {}/{tid} before its thread_name", record.pid)));
                    }
                    check_order(row, ts, index)?;
                    if let Some((open, _)) = &row.open {
                        return Err(invalid(index, format!("begin of {name} while {open} is open")));
                    }
                    row.open = Some((name, ts));
                    max_ts = max_ts.max(ts);
                }
                Phase::End => {
                    let tid = require(record.tid, index, "tid")?;
                    let ts = require(record.ts, index, "ts")?;
                    let row = rows.entry((record.pid, tid)).or_default();
                    check_order(row, ts, index)?;
                    let Some((name, start)) = row.open.take() else {
                        return Err(invalid(index, format!("end on {}/{tid} with no open span", record.pid)));
                    };
                    row.spans.push(Span { name, start, end: ts });
                    max_ts = max_ts.max(ts);
                }
                Phase::Other => {}
            }
        }

        let mut timelines = Vec::with_capacity(rows.len());
        for ((pid, tid), row) in rows {
            if let Some((name, _)) = row.open {
                return Err(TraceParseError::InvalidTraceData(format!(
                    "span {name} on {pid}/{tid} is never closed"
                )));
            }
            timelines.push(Timeline { pid, tid, name: row.name, spans: row.spans });
        }
        timelines.sort_by_key(|t| (t.pid, t.tid));

        Ok(TraceData { processes, runtime_pid, timelines, duration: Micros(max_ts) })
    }

    /// Worker timelines, excluding the OS-thread view
    pub fn workers(&self) -> impl Iterator<Item = &Timeline> {
        let pid = self.runtime_pid;
        self.timelines.iter().filter(move |t| Some(t.pid) == pid)
    }

    /// Rows of the OS-thread view, if the trace has one
    pub fn os_threads(&self) -> impl Iterator<Item = &Timeline> {
        let pid = self.runtime_pid;
        self.timelines.iter().filter(move |t| Some(t.pid) != pid)
    }

    #[must_use]
    pub fn span_count(&self) -> usize {
        self.timelines.iter().map(|t| t.spans.len()).sum()
    }
}

fn check_order(row: &mut OpenTimeline, ts: f64, index: usize) -> Result<(), TraceParseError> {
    if ts < row.last_ts {
        return Err(invalid(index, format!("timestamp {ts} goes backwards (previous {})", row.last_ts)));
    }
    row.last_ts = ts;
    Ok(())
}

fn require<T>(value: Option<T>, index: usize, field: &str) -> Result<T, TraceParseError> {
    value.ok_or_else(|| invalid(index, format!("missing {field}")))
}

fn invalid(index: usize, reason: String) -> TraceParseError {
    TraceParseError::InvalidTraceData(format!("record {index}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"[
{"ph":"M","pid":7,"name":"process_name","args":{"name":"Runtime threads"}},
{"ph":"M","pid":7,"tid":1,"name":"thread_name","args":{"name":"Main Thread"}},
{"ph":"B","pid":7,"tid":1,"ts":0.0,"name":"started_tracing"},
{"ph":"E","pid":7,"tid":1,"ts":10.0},
{"ph":"B","pid":7,"tid":1,"ts":10.0,"name":"waiting"},
{"ph":"E","pid":7,"tid":1,"ts":25.5},
{"ph":"M","pid":7,"tid":1,"name":"thread_name","args":{"name":"main"}}
]
"#;

    #[test]
    fn test_parse_valid_trace() {
        let data = TraceData::from_slice(VALID.as_bytes()).unwrap();
        assert_eq!(data.runtime_pid, Some(7));
        assert_eq!(data.processes[&7], "Runtime threads");
        assert_eq!(data.timelines.len(), 1);

        let main = &data.timelines[0];
        assert_eq!(main.name.as_deref(), Some("main"));
        assert_eq!(main.spans.len(), 2);
        assert_eq!(main.spans[1].name, "waiting");
        assert!((main.spans[1].duration() - 15.5).abs() < f64::EPSILON);
        assert!((data.duration.0 - 25.5).abs() < f64::EPSILON);
    }

    fn expect_invalid(doc: &str) -> String {
        match TraceData::from_slice(doc.as_bytes()) {
            Err(TraceParseError::InvalidTraceData(reason)) => reason,
            other => panic!("expected invalid trace, got {other:?}"),
        }
    }

    #[test]
    fn test_orphan_end_rejected() {
        let reason = expect_invalid(
            r#"[{"ph":"M","pid":1,"tid":1,"name":"thread_name","args":{"name":"t"}},
{"ph":"E","pid":1,"tid":1,"ts":1.0}]"#,
        );
        assert!(reason.contains("no open span"), "{reason}");
    }

    #[test]
    fn test_overlapping_begin_rejected() {
        let reason = expect_invalid(
            r#"[{"ph":"M","pid":1,"tid":1,"name":"thread_name","args":{"name":"t"}},
{"ph":"B","pid":1,"tid":1,"ts":1.0,"name":"running"},
{"ph":"B","pid":1,"tid":1,"ts":2.0,"name":"waiting"}]"#,
        );
        assert!(reason.contains("while running is open"), "{reason}");
    }

    #[test]
    fn test_backwards_timestamp_rejected() {
        let reason = expect_invalid(
            r#"[{"ph":"M","pid":1,"tid":1,"name":"thread_name","args":{"name":"t"}},
{"ph":"B","pid":1,"tid":1,"ts":5.0,"name":"running"},
{"ph":"E","pid":1,"tid":1,"ts":4.0}]"#,
        );
        assert!(reason.contains("backwards"), "{reason}");
    }

    #[test]
    fn test_unclosed_span_rejected() {
        let reason = expect_invalid(
            r#"[{"ph":"M","pid":1,"tid":1,"name":"thread_name","args":{"name":"t"}},
{"ph":"B","pid":1,"tid":1,"ts":5.0,"name":"running"}]"#,
        );
        assert!(reason.contains("never closed"), "{reason}");
    }

    #[test]
    fn test_begin_without_thread_name_rejected() {
        let reason = expect_invalid(r#"[{"ph":"B","pid":1,"tid":1,"ts":5.0,"name":"running"}]"#);
        assert!(reason.contains("before its thread_name"), "{reason}");
    }

    #[test]
    fn test_trailing_comma_is_a_json_error() {
        let result = TraceData::from_slice(b"[\n{\"ph\":\"M\",\"pid\":1,\"name\":\"process_name\",\"args\":{\"name\":\"p\"}},\n]");
        assert!(matches!(result, Err(TraceParseError::Json(_))));
    }
}
