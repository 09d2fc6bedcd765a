use gvltrace::analysis::analyze_lock;
use gvltrace::classification::TimelineState;
use gvltrace::domain::{Micros, TraceParseError};
use gvltrace::trace_data::TraceData;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn test_fixture_parses() {
    let data = TraceData::from_file(fixture("simple_trace.json")).unwrap();
    assert_eq!(data.runtime_pid, Some(3100));
    assert_eq!(data.processes[&3101], "OS threads");
    assert_eq!(data.workers().count(), 2);
    assert_eq!(data.os_threads().count(), 2);
    assert_eq!(data.duration, Micros(400.0));
}

#[test]
fn test_fixture_lock_summary() {
    let data = TraceData::from_file(fixture("simple_trace.json")).unwrap();
    let summary = analyze_lock(&data);

    assert_eq!(summary.lock_held, Micros(250.0));
    assert!((summary.utilization - 0.625).abs() < 1e-9);
    assert_eq!(summary.wants_lock, Micros(40.0));
    assert_eq!(summary.peak_waiters, 1);

    let worker = summary.workers.iter().find(|w| w.name == "worker-0").unwrap();
    assert_eq!(worker.time_in(TimelineState::Running), Micros(200.0));
    assert_eq!(worker.time_in(TimelineState::Gc), Micros(50.0));
    assert_eq!(worker.time_in(TimelineState::Died), Micros(50.0));
    assert_eq!(worker.longest_wait, Micros(40.0));

    let main = summary.workers.iter().find(|w| w.name == "Main Thread").unwrap();
    assert_eq!(main.time_in(TimelineState::Waiting), Micros(300.0));
    assert_eq!(main.lock_held(), Micros(0.0));
}

#[test]
fn test_truncated_trace_is_rejected() {
    let content = std::fs::read_to_string(fixture("simple_trace.json")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.json");
    // Drop the closing records and the bracket, as a crash mid-session would
    let cut = content.rfind("{\"ph\":\"E\",\"pid\":3100,\"tid\":1,\"ts\":400.0}").unwrap();
    std::fs::write(&path, &content[..cut]).unwrap();

    assert!(matches!(TraceData::from_file(&path), Err(TraceParseError::Json(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    assert!(matches!(TraceData::from_file(fixture("does_not_exist.json")), Err(TraceParseError::Io(_))));
}
