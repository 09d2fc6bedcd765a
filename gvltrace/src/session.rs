//! # Session Controller
//!
//! [`Tracer`] owns the tracing lifecycle (**Idle → Active → Idle**) and the
//! event path.
//!
//! ## Event path
//!
//! ```text
//! host runtime ──► Hook::on_event / Tracer::handle_event
//!                      │  load active session (lock-free)
//!                      ▼
//!               WorkerRegistry::lookup_or_create   (no allocation during GC)
//!                      ▼
//!               classify()                         (coalesces repeated suspends)
//!                      ▼
//!               TraceWriter::render                (end + begin under sink lock)
//! ```
//!
//! ## Shutdown ordering
//!
//! `stop()` removes both hooks first, then detaches the session, then renders
//! `stopped_tracing` and closes the document. A callback that loaded the
//! session before it was detached either renders before the close, and the
//! writer closes its span with the rest, or finds the sink closed and writes
//! nothing.
//!
//! A failed clock read aborts the session: the writer stops accepting renders
//! and `stop()` reports `ClockReadFailed`.

use arc_swap::ArcSwapOption;
use gvltrace_common::{GC_EVENT_MASK, THREAD_EVENT_MASK};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::classification::{classify, TimelineState};
use crate::clock::SessionClock;
use crate::domain::{NativeTid, TracingError, WorkerHandle, WorkerId};
use crate::export::{TraceLayout, TraceWriter};
use crate::runtime::{EventListener, HookId, RawEvent, Runtime, WorkerRef};
use crate::timeline::{WorkerRegistry, WorkerState};

/// Label for the worker that started tracing when the runtime has no name
const MAIN_THREAD_NAME: &str = "Main Thread";

/// Session epochs are process-wide so worker render state never carries over
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Options for one tracing session
#[derive(Debug, Clone)]
pub struct TraceOptions {
    pub output_path: PathBuf,
    /// Also render the OS-thread view
    pub os_threads_view: bool,
    pub process_name: String,
    pub os_threads_process_name: String,
    /// Prune workers the runtime reports dead before starting
    pub trim_dead_workers: bool,
}

impl TraceOptions {
    #[must_use]
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            os_threads_view: false,
            process_name: "Runtime threads".to_string(),
            os_threads_process_name: "OS threads".to_string(),
            trim_dead_workers: true,
        }
    }

    #[must_use]
    pub fn with_os_threads_view(mut self, enabled: bool) -> Self {
        self.os_threads_view = enabled;
        self
    }
}

/// Snapshot of one worker, returned by `stop()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub handle: WorkerHandle,
    pub native_tid: NativeTid,
    pub name: Option<String>,
}

impl From<&WorkerState> for WorkerInfo {
    fn from(worker: &WorkerState) -> Self {
        Self {
            id: worker.id(),
            handle: worker.handle(),
            native_tid: worker.native_tid(),
            name: worker.name().map(|name| name.to_string()),
        }
    }
}

/// Counters for the event path
#[derive(Debug, Default)]
pub struct EventStats {
    rendered: AtomicU64,
    coalesced: AtomicU64,
    unresolved: AtomicU64,
    failed: AtomicU64,
    /// Log the first unresolved/dropped event only
    unresolved_warned: AtomicBool,
    failed_warned: AtomicBool,
}

/// Point-in-time copy of [`EventStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStatsSnapshot {
    pub rendered: u64,
    pub coalesced: u64,
    /// Events for workers that could not be resolved (GC pause, registry full)
    pub unresolved: u64,
    /// Events dropped because the sink was closed by a clock or write
    /// failure, or by a stop in progress
    pub failed: u64,
}

impl EventStats {
    fn snapshot(&self) -> EventStatsSnapshot {
        EventStatsSnapshot {
            rendered: self.rendered.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record_unresolved(&self, handle: WorkerHandle) {
        self.unresolved.fetch_add(1, Ordering::Relaxed);
        if !self.unresolved_warned.swap(true, Ordering::Relaxed) {
            warn!("Dropping events for untracked worker {handle}");
        }
    }

    fn record_dropped(&self, worker: &WorkerState) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if !self.failed_warned.swap(true, Ordering::Relaxed) {
            warn!("Dropping event for {}: trace output closed", worker.id());
        }
    }

    /// Zero the counters and re-arm the warnings for a new session
    fn reset(&self) {
        for counter in [&self.rendered, &self.coalesced, &self.unresolved, &self.failed] {
            counter.store(0, Ordering::Relaxed);
        }
        self.unresolved_warned.store(false, Ordering::Relaxed);
        self.failed_warned.store(false, Ordering::Relaxed);
    }
}

/// State of one active session
struct Session {
    epoch: u64,
    clock: SessionClock,
    writer: TraceWriter<BufWriter<File>>,
    path: PathBuf,
}

/// Shared between the tracer and its installed hooks
struct TracerCore<R: Runtime> {
    runtime: Arc<R>,
    registry: WorkerRegistry,
    session: ArcSwapOption<Session>,
    stats: EventStats,
}

impl<R: Runtime> TracerCore<R> {
    fn handle_event(&self, event: RawEvent) {
        let session = self.session.load();
        if let Some(session) = &*session {
            self.dispatch(session, event);
        }
    }

    fn dispatch(&self, session: &Session, event: RawEvent) {
        let allow_allocation = !event.kind.is_gc();
        let Some(worker) = self.registry.lookup_or_create(event.worker.handle, allow_allocation) else {
            self.stats.record_unresolved(event.worker.handle);
            return;
        };

        worker.enter_epoch(session.epoch);
        let Some(state) = classify(event.kind, &worker, &event.context) else {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            return;
        };

        self.render(session, &worker, event.worker, state, allow_allocation, None);
    }

    fn render(
        &self,
        session: &Session,
        worker: &WorkerState,
        at: WorkerRef,
        state: TimelineState,
        resolve_name: bool,
        fallback_name: Option<&str>,
    ) {
        if resolve_name && worker.name().is_none() {
            if let Some(name) = self.runtime.worker_name(at).or_else(|| fallback_name.map(String::from)) {
                worker.set_name(name);
            }
        }
        worker.set_native_tid(at.native_tid);

        if session.writer.render(worker, session.epoch, at.native_tid, state, &session.clock) {
            self.stats.rendered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.record_dropped(worker);
        }
    }

    /// Render a synthetic event for the calling worker
    fn render_caller(&self, session: &Session, state: TimelineState) {
        let Some(caller) = self.runtime.current_worker() else {
            debug!("No current worker to render {state} for");
            return;
        };
        match self.registry.lookup_or_create(caller.handle, true) {
            Some(worker) => self.render(session, &worker, caller, state, true, Some(MAIN_THREAD_NAME)),
            None => self.stats.record_unresolved(caller.handle),
        }
    }
}

/// Installed as the runtime's thread and GC hooks
struct Hook<R: Runtime> {
    core: Arc<TracerCore<R>>,
    mask: u32,
}

impl<R: Runtime> EventListener for Hook<R> {
    fn on_event(&self, event: RawEvent) {
        if self.mask & event.kind.bit() != 0 {
            self.core.handle_event(event);
        }
    }
}

struct InstalledHooks {
    thread: HookId,
    gc: HookId,
}

/// Tracing session controller for one host runtime
pub struct Tracer<R: Runtime> {
    core: Arc<TracerCore<R>>,
    /// `Some` while Active; also serializes start/stop
    hooks: Mutex<Option<InstalledHooks>>,
}

impl<R: Runtime> Tracer<R> {
    #[must_use]
    pub fn new(runtime: Arc<R>) -> Self {
        Self::with_registry(runtime, WorkerRegistry::new())
    }

    #[must_use]
    pub fn with_registry(runtime: Arc<R>, registry: WorkerRegistry) -> Self {
        Self {
            core: Arc::new(TracerCore {
                runtime,
                registry,
                session: ArcSwapOption::empty(),
                stats: EventStats::default(),
            }),
            hooks: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Start a session writing to `options.output_path`.
    ///
    /// # Errors
    /// - `AlreadyActive` if a session is running (its output is untouched)
    /// - `ClockReadFailed` if the monotonic clock is unavailable
    /// - `SinkOpenFailed` if the output cannot be created or written
    ///
    /// On error no session is active and no output file is left behind.
    pub fn start(&self, options: &TraceOptions) -> Result<(), TracingError> {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if hooks.is_some() {
            return Err(TracingError::AlreadyActive);
        }
        self.core.stats.reset();

        if options.trim_dead_workers {
            let runtime = &self.core.runtime;
            let removed = self.core.registry.trim_to_alive(|handle| runtime.is_alive(handle));
            if removed > 0 {
                debug!("Pruned {removed} dead workers");
            }
        }

        let clock = SessionClock::start()?;
        let path = options.output_path.clone();
        let file = File::create(&path)
            .map_err(|source| TracingError::SinkOpenFailed { path: path.clone(), source })?;

        let mut layout = TraceLayout::new(self.core.runtime.process_id(), &options.process_name);
        if options.os_threads_view {
            layout = layout.with_os_threads(&options.os_threads_process_name);
        }
        let writer = match TraceWriter::open(BufWriter::new(file), layout) {
            Ok(writer) => writer,
            Err(source) => {
                remove_partial_output(&path);
                return Err(TracingError::SinkOpenFailed { path, source });
            }
        };

        let session = Arc::new(Session {
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
            clock,
            writer,
            path,
        });
        self.core.render_caller(&session, TimelineState::StartedTracing);

        self.core.session.store(Some(Arc::clone(&session)));
        let runtime = &self.core.runtime;
        let thread = runtime.add_event_hook(
            THREAD_EVENT_MASK,
            Arc::new(Hook { core: Arc::clone(&self.core), mask: THREAD_EVENT_MASK }),
        );
        let gc = runtime
            .add_event_hook(GC_EVENT_MASK, Arc::new(Hook { core: Arc::clone(&self.core), mask: GC_EVENT_MASK }));
        *hooks = Some(InstalledHooks { thread, gc });

        info!(
            "Tracing started: {} (os threads view: {})",
            session.path.display(),
            options.os_threads_view
        );
        Ok(())
    }

    /// Stop the active session and close its output.
    ///
    /// Returns every worker observed so far, for caller-side name resolution.
    ///
    /// # Errors
    /// - `NotActive` if no session is running
    /// - `SinkCloseFailed` if a write failed during the session or the output
    ///   cannot be flushed
    /// - `ClockReadFailed` if the clock failed during the session, which
    ///   aborted it
    ///
    /// The hooks are removed and the tracer is Idle either way.
    pub fn stop(&self) -> Result<Vec<WorkerInfo>, TracingError> {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(installed) = hooks.take() else {
            return Err(TracingError::NotActive);
        };

        let runtime = &self.core.runtime;
        runtime.remove_event_hook(installed.thread);
        runtime.remove_event_hook(installed.gc);

        let Some(session) = self.core.session.swap(None) else {
            return Err(TracingError::NotActive);
        };
        self.core.render_caller(&session, TimelineState::StoppedTracing);

        let renames: Vec<_> = self
            .core
            .registry
            .all()
            .into_iter()
            .filter(|w| w.rendered_in(session.epoch))
            .filter_map(|w| {
                let name = runtime.worker_name(WorkerRef::new(w.handle(), w.native_tid()))?;
                if w.name().is_some_and(|current| *current == name) {
                    return None;
                }
                w.set_name(name.clone());
                Some((w.id(), name))
            })
            .collect();

        let result = session.writer.finish(&session.clock, &renames);

        let stats = self.core.stats.snapshot();
        info!(
            "Tracing stopped: {} ({} rendered, {} coalesced, {} unresolved, {} failed)",
            session.path.display(),
            stats.rendered,
            stats.coalesced,
            stats.unresolved,
            stats.failed
        );

        result?;
        Ok(self.workers())
    }

    /// Deliver one event. A no-op while Idle.
    pub fn handle_event(&self, event: RawEvent) {
        self.core.handle_event(event);
    }

    /// Render the calling worker's next suspend as `sleeping`.
    ///
    /// Returns false if the caller is not a worker or cannot be tracked.
    pub fn mark_current_worker_sleeping(&self) -> bool {
        let Some(caller) = self.core.runtime.current_worker() else {
            return false;
        };
        match self.core.registry.lookup_or_create(caller.handle, true) {
            Some(worker) => {
                worker.mark_sleeping();
                true
            }
            None => false,
        }
    }

    /// Every worker observed, ordered by serial id
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.core.registry.all().iter().map(|w| WorkerInfo::from(&**w)).collect()
    }

    /// Drop workers the runtime reports dead. Only allowed while Idle.
    ///
    /// # Errors
    /// Returns `AlreadyActive` while a session is running.
    pub fn trim_workers(&self) -> Result<usize, TracingError> {
        let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if hooks.is_some() {
            return Err(TracingError::AlreadyActive);
        }
        let runtime = &self.core.runtime;
        Ok(self.core.registry.trim_to_alive(|handle| runtime.is_alive(handle)))
    }

    /// Counters for the active session, or the last one once stopped
    #[must_use]
    pub fn stats(&self) -> EventStatsSnapshot {
        self.core.stats.snapshot()
    }
}

impl<R: Runtime> Drop for Tracer<R> {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(err) = self.stop() {
                warn!("Failed to stop tracing on drop: {err}");
            }
        }
    }
}

fn remove_partial_output(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("Failed to remove partial trace {}: {err}", path.display());
    }
}
