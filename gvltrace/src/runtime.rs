//! Host runtime collaborator interface
//!
//! The tracer never talks to a language runtime directly. A host implements
//! [`Runtime`] to tell the tracer which worker is calling, whether a worker is
//! still alive, and to install/remove event hooks. Events then arrive through
//! the [`EventListener`] the tracer installed, or through
//! [`crate::session::Tracer::handle_event`] for hosts that drive the tracer
//! directly.

use gvltrace_common::{HostEvent, FLAG_IN_SLEEP_CALL, FLAG_WORKER_DEAD};
use std::fs;
use std::sync::Arc;

use crate::classification::RawEventKind;
use crate::domain::{NativeTid, Pid, WorkerHandle};

/// Worker identity carried by every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerRef {
    pub handle: WorkerHandle,
    /// OS thread the event fired on
    pub native_tid: NativeTid,
}

impl WorkerRef {
    #[must_use]
    pub fn new(handle: WorkerHandle, native_tid: NativeTid) -> Self {
        Self { handle, native_tid }
    }
}

/// Ambient context of an event, as known by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    /// A sleep primitive is executing on the suspending worker
    pub in_sleep_call: bool,
    pub worker_alive: bool,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { in_sleep_call: false, worker_alive: true }
    }
}

/// One raw event from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub worker: WorkerRef,
    pub context: EventContext,
}

impl RawEvent {
    #[must_use]
    pub fn new(kind: RawEventKind, worker: WorkerRef) -> Self {
        Self { kind, worker, context: EventContext::default() }
    }

    #[must_use]
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

impl TryFrom<HostEvent> for RawEvent {
    type Error = u32;

    /// Decode the FFI form; fails with the offending bits if `event` is not a
    /// single known event bit
    fn try_from(event: HostEvent) -> Result<Self, Self::Error> {
        let kind = RawEventKind::from_bit(event.event).ok_or(event.event)?;
        Ok(RawEvent {
            kind,
            worker: WorkerRef::new(WorkerHandle(event.worker_handle), NativeTid(event.native_tid)),
            context: EventContext {
                in_sleep_call: event.has_flag(FLAG_IN_SLEEP_CALL),
                worker_alive: !event.has_flag(FLAG_WORKER_DEAD),
            },
        })
    }
}

/// Identifies an installed hook so it can be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Receives events from an installed hook.
///
/// Called on whatever OS thread triggered the event, possibly concurrently
/// for different workers. Implementations must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: RawEvent);
}

/// The host runtime as seen by the tracer
pub trait Runtime: Send + Sync + 'static {
    /// The worker making the current call, if the calling thread is one
    fn current_worker(&self) -> Option<WorkerRef>;

    /// Whether the runtime still considers `handle` alive
    fn is_alive(&self, handle: WorkerHandle) -> bool;

    /// Start delivering events in `mask` (`EVENT_*` bits) to `listener`
    fn add_event_hook(&self, mask: u32, listener: Arc<dyn EventListener>) -> HookId;

    /// Stop delivering events to a hook. Once this returns, no new
    /// invocation of the hook's listener may begin.
    fn remove_event_hook(&self, hook: HookId);

    /// Human-readable worker name; defaults to the OS thread name
    fn worker_name(&self, worker: WorkerRef) -> Option<String> {
        os_thread_name(worker.native_tid)
    }

    fn process_id(&self) -> Pid {
        Pid::current()
    }
}

/// OS thread id of the calling thread
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn current_native_tid() -> NativeTid {
    // SAFETY: gettid takes no arguments and cannot fail
    #[allow(unsafe_code)]
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    NativeTid(tid as u32)
}

/// Read an OS thread's name from `/proc/self/task/<tid>/comm`
#[must_use]
pub fn os_thread_name(tid: NativeTid) -> Option<String> {
    let comm = fs::read_to_string(format!("/proc/self/task/{}/comm", tid.0)).ok()?;
    let comm = comm.trim();
    if comm.is_empty() {
        None
    } else {
        Some(comm.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gvltrace_common::{EVENT_GC_ENTER, EVENT_THREAD_SUSPENDED};

    #[test]
    fn test_decode_host_event() {
        let mut host = HostEvent::new(EVENT_THREAD_SUSPENDED, 0x55, 4321);
        host.flags = FLAG_IN_SLEEP_CALL;

        let event = RawEvent::try_from(host).unwrap();
        assert_eq!(event.kind, RawEventKind::Suspended);
        assert_eq!(event.worker.handle, WorkerHandle(0x55));
        assert_eq!(event.worker.native_tid, NativeTid(4321));
        assert!(event.context.in_sleep_call);
        assert!(event.context.worker_alive);
    }

    #[test]
    fn test_decode_dead_worker_flag() {
        let mut host = HostEvent::new(EVENT_GC_ENTER, 1, 1);
        host.flags = FLAG_WORKER_DEAD;
        let event = RawEvent::try_from(host).unwrap();
        assert!(!event.context.worker_alive);
    }

    #[test]
    fn test_decode_rejects_unknown_bits() {
        let host = HostEvent::new(1 << 20, 1, 1);
        assert_eq!(RawEvent::try_from(host), Err(1 << 20));
    }

    #[test]
    fn test_current_thread_name() {
        std::thread::Builder::new()
            .name("gvl-name-test".to_string())
            .spawn(|| {
                let name = os_thread_name(current_native_tid()).unwrap();
                // comm is truncated to 15 bytes
                assert!(name.starts_with("gvl-name-test"));
            })
            .unwrap()
            .join()
            .unwrap();
    }
}
