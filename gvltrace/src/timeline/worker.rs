//! Per-worker timeline state
//!
//! One record per logical worker. Events for a single worker are delivered in
//! order by the host and never concurrently, so every field is a plain atomic
//! with relaxed ordering: the record is shared with the registry and the
//! emitter, but written by its own worker's events only.

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::classification::{RawEventKind, TimelineState};
use crate::domain::{NativeTid, WorkerHandle, WorkerId};

/// Sentinel stored before the first event / first render
const NONE: u8 = 0;

/// Tracking state for one logical worker
#[derive(Debug)]
pub struct WorkerState {
    id: WorkerId,
    handle: WorkerHandle,
    /// OS thread of the most recent event
    native_tid: AtomicU32,
    /// Last raw event seen, used for coalescing repeated suspends
    last_event: AtomicU8,
    /// Epoch of the session that set `last_event`
    event_epoch: AtomicU64,
    /// Last symbolic state rendered
    last_state: AtomicU8,
    /// Set by `mark_sleeping`, consumed by the next suspend
    sleeping: AtomicBool,
    /// Epoch of the session that last rendered this worker (0 = never)
    rendered_epoch: AtomicU64,
    /// Display name used in `thread_name` metadata
    name: ArcSwapOption<String>,
}

impl WorkerState {
    pub(crate) fn new(id: WorkerId, handle: WorkerHandle) -> Self {
        Self {
            id,
            handle,
            native_tid: AtomicU32::new(0),
            last_event: AtomicU8::new(NONE),
            event_epoch: AtomicU64::new(0),
            last_state: AtomicU8::new(NONE),
            sleeping: AtomicBool::new(false),
            rendered_epoch: AtomicU64::new(0),
            name: ArcSwapOption::empty(),
        }
    }

    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        self.handle
    }

    #[must_use]
    pub fn native_tid(&self) -> NativeTid {
        NativeTid(self.native_tid.load(Ordering::Relaxed))
    }

    pub(crate) fn set_native_tid(&self, tid: NativeTid) {
        self.native_tid.store(tid.0, Ordering::Relaxed);
    }

    /// Forget the previous session's last event when first seen in `epoch`.
    /// Events delivered while Idle are never observed, so it is stale.
    pub(crate) fn enter_epoch(&self, epoch: u64) {
        if self.event_epoch.swap(epoch, Ordering::Relaxed) != epoch {
            self.last_event.store(NONE, Ordering::Relaxed);
        }
    }

    /// Record `kind` as the latest raw event, returning the previous one
    pub(crate) fn swap_last_event(&self, kind: RawEventKind) -> Option<RawEventKind> {
        RawEventKind::from_code(self.last_event.swap(kind.code(), Ordering::Relaxed))
    }

    /// Last symbolic state rendered for this worker, in any session
    #[must_use]
    pub fn last_state(&self) -> Option<TimelineState> {
        TimelineState::from_code(self.last_state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_last_state(&self, state: TimelineState) {
        self.last_state.store(state.code(), Ordering::Relaxed);
    }

    /// Flag the next suspend of this worker as a sleep
    pub fn mark_sleeping(&self) {
        self.sleeping.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Relaxed)
    }

    /// Consume the sleeping flag
    pub(crate) fn take_sleeping(&self) -> bool {
        self.sleeping.swap(false, Ordering::Relaxed)
    }

    /// Whether the session with `epoch` has rendered this worker
    #[must_use]
    pub fn rendered_in(&self, epoch: u64) -> bool {
        self.rendered_epoch.load(Ordering::Relaxed) == epoch
    }

    pub(crate) fn mark_rendered(&self, epoch: u64) {
        self.rendered_epoch.store(epoch, Ordering::Relaxed);
    }

    #[must_use]
    pub fn name(&self) -> Option<Arc<String>> {
        self.name.load_full()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.name.store(Some(Arc::new(name.into())));
    }

    /// Display name, falling back to a label derived from the serial id
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name().map_or_else(|| format!("Thread {}", self.id.0), |name| name.to_string())
    }
}
