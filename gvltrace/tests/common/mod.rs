//! Scripted host runtime for integration tests
//!
//! Tests decide which worker is "current" and fire events by hand through the
//! hooks the tracer installed, so every ordering is deterministic.

#![allow(dead_code)]

use gvltrace::classification::RawEventKind;
use gvltrace::domain::{NativeTid, Pid, WorkerHandle};
use gvltrace::runtime::{EventContext, EventListener, HookId, RawEvent, Runtime, WorkerRef};
use gvltrace::session::WorkerInfo;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_PID: u32 = 4242;

#[derive(Default)]
pub struct ScriptedRuntime {
    current: Mutex<Option<WorkerRef>>,
    dead: Mutex<HashSet<WorkerHandle>>,
    names: Mutex<HashMap<WorkerHandle, String>>,
    hooks: Mutex<Vec<(HookId, u32, Arc<dyn EventListener>)>>,
    next_hook: AtomicU64,
}

impl ScriptedRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_current(&self, worker: Option<WorkerRef>) {
        *self.current.lock().unwrap() = worker;
    }

    pub fn kill(&self, worker: WorkerRef) {
        self.dead.lock().unwrap().insert(worker.handle);
    }

    pub fn set_name(&self, worker: WorkerRef, name: &str) {
        self.names.lock().unwrap().insert(worker.handle, name.to_string());
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }

    /// Deliver `event` to every installed hook whose mask covers it
    pub fn fire_event(&self, event: RawEvent) {
        let listeners: Vec<_> = self
            .hooks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, mask, _)| mask & event.kind.bit() != 0)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    pub fn fire(&self, kind: RawEventKind, worker: WorkerRef) {
        self.fire_event(RawEvent::new(kind, worker));
    }

    pub fn fire_sleep_suspend(&self, worker: WorkerRef) {
        let context = EventContext { in_sleep_call: true, worker_alive: true };
        self.fire_event(RawEvent::new(RawEventKind::Suspended, worker).with_context(context));
    }
}

impl Runtime for ScriptedRuntime {
    fn current_worker(&self) -> Option<WorkerRef> {
        *self.current.lock().unwrap()
    }

    fn is_alive(&self, handle: WorkerHandle) -> bool {
        !self.dead.lock().unwrap().contains(&handle)
    }

    fn add_event_hook(&self, mask: u32, listener: Arc<dyn EventListener>) -> HookId {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().unwrap().push((id, mask, listener));
        id
    }

    fn remove_event_hook(&self, hook: HookId) {
        self.hooks.lock().unwrap().retain(|(id, _, _)| *id != hook);
    }

    fn worker_name(&self, worker: WorkerRef) -> Option<String> {
        self.names.lock().unwrap().get(&worker.handle).cloned()
    }

    fn process_id(&self) -> Pid {
        Pid(TEST_PID)
    }
}

/// Worker with a distinct handle and native tid
#[allow(clippy::cast_possible_truncation)]
pub fn worker(handle: u64) -> WorkerRef {
    WorkerRef::new(WorkerHandle(handle), NativeTid(100_000 + (handle % 100_000) as u32))
}

/// Serial id the tracer rendered `worker` under
pub fn id_of(workers: &[WorkerInfo], worker: WorkerRef) -> u64 {
    workers.iter().find(|w| w.handle == worker.handle).map(|w| w.id.0).unwrap()
}

/// Parse a finished trace file as a JSON array
pub fn read_trace(path: &Path) -> Vec<Value> {
    let content = std::fs::read_to_string(path).unwrap();
    let parsed: Value = serde_json::from_str(&content).unwrap();
    parsed.as_array().unwrap().clone()
}

/// Records on one row, in file order
pub fn row<'a>(records: &'a [Value], pid: u32, tid: u64) -> Vec<&'a Value> {
    records.iter().filter(|r| r["pid"] == pid && r["tid"] == tid).collect()
}

/// Begin-record names on one row, in file order
pub fn span_names(records: &[Value], pid: u32, tid: u64) -> Vec<String> {
    row(records, pid, tid)
        .into_iter()
        .filter(|r| r["ph"] == "B")
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect()
}

/// Assert B/E alternate on every row, starting with B, ending matched, with
/// non-decreasing timestamps
pub fn assert_well_nested(records: &[Value]) {
    let mut rows: HashMap<(u64, u64), (bool, f64)> = HashMap::new();
    for record in records {
        let ph = record["ph"].as_str().unwrap();
        if ph == "M" {
            continue;
        }
        let key = (record["pid"].as_u64().unwrap(), record["tid"].as_u64().unwrap());
        let ts = record["ts"].as_f64().unwrap();
        let (open, last_ts) = rows.entry(key).or_insert((false, 0.0));
        assert!(ts >= *last_ts, "timestamp went backwards on {key:?}: {record}");
        *last_ts = ts;
        match ph {
            "B" => {
                assert!(!*open, "overlapping begin on {key:?}: {record}");
                *open = true;
            }
            "E" => {
                assert!(*open, "orphan end on {key:?}: {record}");
                *open = false;
            }
            other => panic!("unexpected phase {other}"),
        }
    }
    for (key, (open, _)) in rows {
        assert!(!open, "unclosed span on {key:?}");
    }
}
