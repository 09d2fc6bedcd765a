//! Worker registry
//!
//! Process-wide map from host worker handle to [`WorkerState`]. Only handles
//! are stored, so the registry never keeps the runtime's own thread objects
//! alive; dead workers are pruned with [`WorkerRegistry::trim_to_alive`]
//! between sessions.
//!
//! Lookups take a read lock. Inserting a new worker takes the write lock for a
//! single map insert and nothing else.

use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::worker::WorkerState;
use crate::domain::{WorkerHandle, WorkerId};

/// Default cap on tracked workers
pub const DEFAULT_CAPACITY: usize = 65_536;

/// Serial ids are process-wide and never reused
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Registry of every worker observed
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerHandle, Arc<WorkerState>>>,
    capacity: usize,
    /// Log the capacity warning once
    overflow_warned: AtomicBool,
}

impl WorkerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            capacity,
            overflow_warned: AtomicBool::new(false),
        }
    }

    /// Look up a worker without creating it
    #[must_use]
    pub fn lookup(&self, handle: WorkerHandle) -> Option<Arc<WorkerState>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).get(&handle).cloned()
    }

    /// Look up a worker, creating it if `allow_allocation` is set.
    ///
    /// Returns `None` when the worker is unknown and allocation is not
    /// allowed (e.g. inside a GC pause), or when the registry is full.
    pub fn lookup_or_create(
        &self,
        handle: WorkerHandle,
        allow_allocation: bool,
    ) -> Option<Arc<WorkerState>> {
        if let Some(existing) = self.lookup(handle) {
            return Some(existing);
        }
        if !allow_allocation {
            return None;
        }

        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have inserted it between the two locks
        if let Some(existing) = workers.get(&handle) {
            return Some(Arc::clone(existing));
        }
        if workers.len() >= self.capacity {
            drop(workers);
            if !self.overflow_warned.swap(true, Ordering::Relaxed) {
                warn!("Worker registry full ({} workers), new workers are not traced", self.capacity);
            }
            return None;
        }

        let id = WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed));
        let state = Arc::new(WorkerState::new(id, handle));
        workers.insert(handle, Arc::clone(&state));
        Some(state)
    }

    /// Every worker seen, ordered by serial id
    #[must_use]
    pub fn all(&self) -> Vec<Arc<WorkerState>> {
        let mut all: Vec<_> =
            self.workers.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        all.sort_by_key(|w| w.id());
        all
    }

    /// Drop every worker `is_alive` no longer reports as alive.
    ///
    /// Must not run while a session is emitting; the session controller
    /// enforces that. Returns the number of workers removed.
    pub fn trim_to_alive(&self, is_alive: impl Fn(WorkerHandle) -> bool) -> usize {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let before = workers.len();
        workers.retain(|handle, _| is_alive(*handle));
        self.overflow_warned.store(false, Ordering::Relaxed);
        before - workers.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
