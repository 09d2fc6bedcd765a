use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One Chrome Trace Event Format record
/// Format: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
///
/// Field order is the order written: `ph`, `pid`, `tid`, `ts`, `name`, then
/// the optional color hint and args.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord<'a> {
    /// Phase: "M" = metadata, "B" = begin, "E" = end
    pub ph: Phase,
    /// Process ID (or the OS-thread view's pseudo process ID)
    pub pid: u32,
    /// Worker serial id, or native thread id in the OS-thread view
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<u64>,
    /// Timestamp in microseconds since session start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Cow<'a, str>>,
    /// Reserved color name, so rows sharing a span name don't share a color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<Cow<'a, str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<RecordArgs<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "M")]
    Metadata,
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "E")]
    End,
    /// Any phase this crate does not write
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordArgs<'a> {
    pub name: Cow<'a, str>,
}

impl<'a> TraceRecord<'a> {
    fn new(ph: Phase, pid: u32) -> Self {
        Self { ph, pid, tid: None, ts: None, name: None, cname: None, args: None }
    }

    /// `process_name` metadata
    pub fn process_name(pid: u32, name: &'a str) -> Self {
        Self {
            name: Some(Cow::Borrowed("process_name")),
            args: Some(RecordArgs { name: Cow::Borrowed(name) }),
            ..Self::new(Phase::Metadata, pid)
        }
    }

    /// `thread_name` metadata
    pub fn thread_name(pid: u32, tid: u64, name: &'a str) -> Self {
        Self {
            tid: Some(tid),
            name: Some(Cow::Borrowed("thread_name")),
            args: Some(RecordArgs { name: Cow::Borrowed(name) }),
            ..Self::new(Phase::Metadata, pid)
        }
    }

    /// Close the open span on a timeline
    pub fn end(pid: u32, tid: u64, ts: f64) -> Self {
        Self { tid: Some(tid), ts: Some(ts), ..Self::new(Phase::End, pid) }
    }

    /// Open a span on a timeline
    pub fn begin(pid: u32, tid: u64, ts: f64, name: &'a str) -> Self {
        Self {
            tid: Some(tid),
            ts: Some(ts),
            name: Some(Cow::Borrowed(name)),
            ..Self::new(Phase::Begin, pid)
        }
    }

    #[must_use]
    pub fn with_cname(mut self, cname: &'a str) -> Self {
        self.cname = Some(Cow::Borrowed(cname));
        self
    }

    /// Name of the metadata record, or span name of a begin record
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `args.name` of a metadata record
    #[must_use]
    pub fn arg_name(&self) -> Option<&str> {
        self.args.as_ref().map(|args| args.name.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json(record: &TraceRecord<'_>) -> String {
        serde_json::to_string(record).unwrap()
    }

    #[test]
    fn test_thread_name_layout() {
        let json = to_json(&TraceRecord::thread_name(42, 7, "Main Thread"));
        assert_eq!(
            json,
            r#"{"ph":"M","pid":42,"tid":7,"name":"thread_name","args":{"name":"Main Thread"}}"#
        );
    }

    #[test]
    fn test_process_name_layout() {
        let json = to_json(&TraceRecord::process_name(42, "Runtime threads"));
        assert_eq!(json, r#"{"ph":"M","pid":42,"name":"process_name","args":{"name":"Runtime threads"}}"#);
    }

    #[test]
    fn test_span_layout() {
        assert_eq!(to_json(&TraceRecord::end(42, 7, 12.5)), r#"{"ph":"E","pid":42,"tid":7,"ts":12.5}"#);
        assert_eq!(
            to_json(&TraceRecord::begin(42, 7, 12.5, "wants-lock")),
            r#"{"ph":"B","pid":42,"tid":7,"ts":12.5,"name":"wants-lock"}"#
        );
    }

    #[test]
    fn test_cname_follows_name() {
        let json = to_json(&TraceRecord::begin(43, 900, 1.0, "running").with_cname("good"));
        assert_eq!(json, r#"{"ph":"B","pid":43,"tid":900,"ts":1.0,"name":"running","cname":"good"}"#);
    }

    #[test]
    fn test_parse_foreign_phase() {
        let record: TraceRecord<'static> =
            serde_json::from_str(r#"{"ph":"X","pid":1,"tid":2,"ts":3.0,"name":"x"}"#).unwrap();
        assert_eq!(record.ph, Phase::Other);
        assert_eq!(record.name(), Some("x"));
    }
}
