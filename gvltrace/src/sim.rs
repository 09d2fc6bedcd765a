//! # Simulated Runtime
//!
//! A small host runtime with a real global lock, used by the `record`
//! workloads, the crate examples and the end-to-end tests.
//!
//! Every worker is an OS thread. A worker runs only while it owns the lock:
//!
//! ```text
//!   spawn ──► started ──► ready ──► resumed ──► ... ──► exited
//!                           ▲          │
//!                           │          ▼
//!                           └──── suspended   (quantum, blocking region, sleep)
//! ```
//!
//! The lock is handed off in FIFO order: on release it goes straight to the
//! longest waiter, so a worker that gives it up cannot immediately take it
//! back. A worker holding the lock past its quantum yields if anyone waits.

use gvltrace_common::{GC_EVENT_MASK, THREAD_EVENT_MASK};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::classification::RawEventKind;
use crate::domain::{NativeTid, WorkerHandle};
use crate::runtime::{current_native_tid, EventContext, EventListener, HookId, RawEvent, Runtime, WorkerRef};

/// Time a worker may hold the lock while others wait
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct LockState {
    owner: Option<WorkerHandle>,
    waiters: VecDeque<WorkerHandle>,
}

#[derive(Debug)]
struct SimWorker {
    native_tid: NativeTid,
    name: Option<String>,
}

struct InstalledHook {
    id: HookId,
    mask: u32,
    listener: Arc<dyn EventListener>,
}

/// Simulated runtime with a FIFO global lock
pub struct SimRuntime {
    lock: Mutex<LockState>,
    handoff: Condvar,
    hooks: RwLock<Vec<InstalledHook>>,
    /// Live workers; exited workers are removed
    workers: RwLock<HashMap<WorkerHandle, SimWorker>>,
    next_handle: AtomicU64,
    next_hook: AtomicU64,
    quantum: Duration,
}

impl SimRuntime {
    /// Create a runtime and adopt the calling thread as its main worker,
    /// holding the lock.
    #[must_use]
    pub fn new() -> (Arc<Self>, SimContext) {
        Self::with_quantum(DEFAULT_QUANTUM)
    }

    #[must_use]
    pub fn with_quantum(quantum: Duration) -> (Arc<Self>, SimContext) {
        let runtime = Arc::new(Self {
            lock: Mutex::new(LockState::default()),
            handoff: Condvar::new(),
            hooks: RwLock::new(Vec::new()),
            workers: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(0x1000),
            next_hook: AtomicU64::new(1),
            quantum,
        });
        let main = runtime.register(None);
        runtime.acquire(main);
        let context = SimContext { runtime: Arc::clone(&runtime), worker: main };
        (runtime, context)
    }

    fn register(&self, name: Option<String>) -> WorkerRef {
        let handle = WorkerHandle(self.next_handle.fetch_add(0x10, Ordering::Relaxed));
        let native_tid = current_native_tid();
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, SimWorker { native_tid, name });
        WorkerRef::new(handle, native_tid)
    }

    fn unregister(&self, handle: WorkerHandle) {
        self.workers.write().unwrap_or_else(PoisonError::into_inner).remove(&handle);
    }

    /// Deliver an event to every hook whose mask covers it. The hook list
    /// stays read-locked for the call so a removed hook is never entered.
    fn fire(&self, event: RawEvent) {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter().filter(|hook| hook.mask & event.kind.bit() != 0) {
            hook.listener.on_event(event);
        }
    }

    fn fire_kind(&self, kind: RawEventKind, worker: WorkerRef) {
        self.fire(RawEvent::new(kind, worker));
    }

    fn acquire(&self, worker: WorkerRef) {
        self.fire_kind(RawEventKind::Ready, worker);
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if lock.owner.is_none() && lock.waiters.is_empty() {
            lock.owner = Some(worker.handle);
        } else {
            lock.waiters.push_back(worker.handle);
            while lock.owner != Some(worker.handle) {
                lock = self.handoff.wait(lock).unwrap_or_else(PoisonError::into_inner);
            }
        }
        drop(lock);
        self.fire_kind(RawEventKind::Resumed, worker);
    }

    fn release(&self, worker: WorkerRef, context: EventContext) {
        self.fire(RawEvent::new(RawEventKind::Suspended, worker).with_context(context));
        self.hand_off();
    }

    /// Pass the lock to the longest waiter, if any
    fn hand_off(&self) {
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        lock.owner = lock.waiters.pop_front();
        if lock.owner.is_some() {
            self.handoff.notify_all();
        }
    }

    fn has_waiters(&self) -> bool {
        !self.lock.lock().unwrap_or_else(PoisonError::into_inner).waiters.is_empty()
    }

    /// Number of live workers, including the main one
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Runtime for SimRuntime {
    fn current_worker(&self) -> Option<WorkerRef> {
        let tid = current_native_tid();
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, worker)| worker.native_tid == tid)
            .map(|(handle, worker)| WorkerRef::new(*handle, worker.native_tid))
    }

    fn is_alive(&self, handle: WorkerHandle) -> bool {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).contains_key(&handle)
    }

    fn add_event_hook(&self, mask: u32, listener: Arc<dyn EventListener>) -> HookId {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().unwrap_or_else(PoisonError::into_inner).push(InstalledHook {
            id,
            mask: mask & (THREAD_EVENT_MASK | GC_EVENT_MASK),
            listener,
        });
        id
    }

    fn remove_event_hook(&self, hook: HookId) {
        self.hooks.write().unwrap_or_else(PoisonError::into_inner).retain(|installed| installed.id != hook);
    }

    fn worker_name(&self, worker: WorkerRef) -> Option<String> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&worker.handle)
            .and_then(|w| w.name.clone())
    }
}

/// A worker's view of the runtime. Only valid on the worker's own thread,
/// which holds the lock whenever it runs user code.
pub struct SimContext {
    runtime: Arc<SimRuntime>,
    worker: WorkerRef,
}

impl SimContext {
    #[must_use]
    pub fn worker(&self) -> WorkerRef {
        self.worker
    }

    /// Run on the lock for `duration`, yielding to waiters every quantum
    pub fn work(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(self.runtime.quantum));
            if Instant::now() < deadline && self.runtime.has_waiters() {
                self.runtime.release(self.worker, EventContext::default());
                self.runtime.acquire(self.worker);
            }
        }
    }

    /// Run `f` with the lock released, as a blocking region (I/O, channel
    /// receive) would
    pub fn without_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        self.runtime.release(self.worker, EventContext::default());
        let result = f();
        self.runtime.acquire(self.worker);
        result
    }

    /// Sleep with the lock released; the suspend is reported as a sleep call
    pub fn sleep(&self, duration: Duration) {
        let context = EventContext { in_sleep_call: true, worker_alive: true };
        self.runtime.release(self.worker, context);
        thread::sleep(duration);
        self.runtime.acquire(self.worker);
    }

    /// Pause for a garbage collection of `duration` while holding the lock
    pub fn gc(&self, duration: Duration) {
        self.runtime.fire_kind(RawEventKind::GcEnter, self.worker);
        thread::sleep(duration);
        self.runtime.fire_kind(RawEventKind::GcExit, self.worker);
    }

    /// Spawn a named worker running `f`.
    ///
    /// # Errors
    /// Returns the I/O error if the OS thread cannot be created.
    pub fn spawn<F>(&self, name: &str, f: F) -> io::Result<SimThread>
    where
        F: FnOnce(&SimContext) + Send + 'static,
    {
        let runtime = Arc::clone(&self.runtime);
        let worker_name = name.to_string();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let worker = runtime.register(Some(worker_name));
            runtime.fire_kind(RawEventKind::Started, worker);
            runtime.acquire(worker);
            let context = SimContext { runtime, worker };
            let _exit = ExitGuard(&context);
            f(&context);
        })?;
        debug!("Spawned sim worker {name}");
        Ok(SimThread { name: name.to_string(), handle })
    }

    /// Wait for `thread` to finish, releasing the lock meanwhile.
    ///
    /// # Errors
    /// Returns the worker's panic payload if it panicked.
    pub fn join(&self, thread: SimThread) -> thread::Result<()> {
        debug!("Joining sim worker {}", thread.name);
        self.without_lock(|| thread.handle.join())
    }
}

/// Reports the exit and frees the lock even if the worker panics
struct ExitGuard<'a>(&'a SimContext);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let SimContext { runtime, worker } = self.0;
        runtime.fire_kind(RawEventKind::Exited, *worker);
        runtime.unregister(worker.handle);
        runtime.hand_off();
    }
}

/// Join handle of a spawned worker
#[derive(Debug)]
pub struct SimThread {
    name: String,
    handle: JoinHandle<()>,
}

impl SimThread {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every event it sees
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(RawEventKind, WorkerHandle)>>,
    }

    impl EventListener for Recorder {
        fn on_event(&self, event: RawEvent) {
            self.events.lock().unwrap().push((event.kind, event.worker.handle));
        }
    }

    #[test]
    fn test_main_worker_is_current() {
        let (runtime, main) = SimRuntime::new();
        assert_eq!(runtime.current_worker(), Some(main.worker()));
        assert!(runtime.is_alive(main.worker().handle));
        assert_eq!(runtime.worker_name(main.worker()), None);
    }

    #[test]
    fn test_worker_lifecycle_events() {
        let (runtime, main) = SimRuntime::new();
        let recorder = Arc::new(Recorder::default());
        runtime.add_event_hook(THREAD_EVENT_MASK, recorder.clone());

        let child = main.spawn("child", |ctx| ctx.work(Duration::from_millis(5))).unwrap();
        main.join(child).unwrap();

        let events = recorder.events.lock().unwrap();
        let child_events: Vec<_> = events
            .iter()
            .filter(|(_, handle)| *handle != main.worker().handle)
            .map(|(kind, _)| *kind)
            .collect();
        assert_eq!(child_events.first(), Some(&RawEventKind::Started));
        assert_eq!(child_events.last(), Some(&RawEventKind::Exited));
        assert_eq!(runtime.worker_count(), 1);
    }

    #[test]
    fn test_removed_hook_stops_receiving() {
        let (runtime, main) = SimRuntime::new();
        let recorder = Arc::new(Recorder::default());
        let hook = runtime.add_event_hook(THREAD_EVENT_MASK, recorder.clone());
        main.sleep(Duration::from_millis(1));
        let seen = recorder.events.lock().unwrap().len();
        assert!(seen > 0);

        runtime.remove_event_hook(hook);
        main.sleep(Duration::from_millis(1));
        assert_eq!(recorder.events.lock().unwrap().len(), seen);
    }

    #[test]
    fn test_gc_events_need_gc_mask() {
        let (runtime, main) = SimRuntime::new();
        let recorder = Arc::new(Recorder::default());
        runtime.add_event_hook(THREAD_EVENT_MASK, recorder.clone());
        main.gc(Duration::from_millis(1));
        assert!(recorder.events.lock().unwrap().is_empty());

        runtime.add_event_hook(GC_EVENT_MASK, recorder.clone());
        main.gc(Duration::from_millis(1));
        let kinds: Vec<_> = recorder.events.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, [RawEventKind::GcEnter, RawEventKind::GcExit]);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let (_runtime, main) = SimRuntime::with_quantum(Duration::from_millis(2));
        let inside = Arc::new(AtomicU64::new(0));
        let mut threads = Vec::new();
        for i in 0..3 {
            let inside = Arc::clone(&inside);
            threads.push(
                main.spawn(&format!("w{i}"), move |ctx| {
                    for _ in 0..5 {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::sleep(Duration::from_millis(1));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        ctx.work(Duration::from_millis(3));
                    }
                })
                .unwrap(),
            );
        }
        for t in threads {
            main.join(t).unwrap();
        }
    }
}
