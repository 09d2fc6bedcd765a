//! # Shared Event Definitions (Host Runtime ↔ Tracer)
//!
//! Defines the raw event values and the record a host binding layer passes to
//! the tracer. All types use `#[repr(C)]` so a binding written against the
//! runtime's C API can fill them in directly.
//!
//! ## Event Sources
//!
//! Two independent hooks feed the tracer:
//!
//! 1. **Thread hook** - worker lifecycle and global-lock transitions
//!    (started, ready, resumed, suspended, exited)
//! 2. **GC hook** - garbage collection pause boundaries (enter, exit)
//!
//! ## Key Types
//!
//! - [`HostEvent`] - One raw event as delivered by the host runtime
//! - `EVENT_*` - Bit values, combinable into hook masks

#![no_std]

// ============================================================================
// Thread Event Bits
// ============================================================================

/// **Thread hook**: Worker was created and is about to run for the first time
pub const EVENT_THREAD_STARTED: u32 = 1 << 0;

/// **Thread hook**: Worker wants the global lock and is queued for it
///
/// Paired with: `EVENT_THREAD_RESUMED` once the lock is acquired
pub const EVENT_THREAD_READY: u32 = 1 << 1;

/// **Thread hook**: Worker acquired the global lock and is running
pub const EVENT_THREAD_RESUMED: u32 = 1 << 2;

/// **Thread hook**: Worker released the global lock
///
/// Fired for blocking calls, sleeps, waits and time-slice preemption. The
/// host may fire it more than once for a single release.
pub const EVENT_THREAD_SUSPENDED: u32 = 1 << 3;

/// **Thread hook**: Worker finished and will not run again
pub const EVENT_THREAD_EXITED: u32 = 1 << 4;

// ============================================================================
// GC Event Bits
// ============================================================================

/// **GC hook**: Runtime entered a garbage collection pause
///
/// Fired on the worker that triggered the pause. Tracking state must not be
/// allocated while handling it.
pub const EVENT_GC_ENTER: u32 = 1 << 5;

/// **GC hook**: Runtime left a garbage collection pause
pub const EVENT_GC_EXIT: u32 = 1 << 6;

/// Every event the thread hook subscribes to
pub const THREAD_EVENT_MASK: u32 = EVENT_THREAD_STARTED
    | EVENT_THREAD_READY
    | EVENT_THREAD_RESUMED
    | EVENT_THREAD_SUSPENDED
    | EVENT_THREAD_EXITED;

/// Every event the GC hook subscribes to
pub const GC_EVENT_MASK: u32 = EVENT_GC_ENTER | EVENT_GC_EXIT;

// ============================================================================
// Context Flags
// ============================================================================

/// The suspension comes from a sleep primitive currently executing
pub const FLAG_IN_SLEEP_CALL: u32 = 1 << 0;

/// The runtime already considers the worker dead
pub const FLAG_WORKER_DEAD: u32 = 1 << 1;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Event sent from the host runtime to the tracer
///
/// **Memory Layout**: `#[repr(C)]` keeps the layout stable for bindings
/// **Size**: 24 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostEvent {
    /// Exactly one `EVENT_*` bit
    pub event: u32,

    /// OS thread the callback fired on
    ///
    /// Used for the OS-thread view and for best-effort thread naming.
    pub native_tid: u32,

    /// Stable handle of the logical worker
    ///
    /// Whatever the runtime uses to identify its thread object (an object id,
    /// a pointer value). Never dereferenced by the tracer.
    pub worker_handle: u64,

    /// Combination of `FLAG_*` bits
    pub flags: u32,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,
}

impl HostEvent {
    /// Build an event with no context flags
    #[must_use]
    pub const fn new(event: u32, worker_handle: u64, native_tid: u32) -> Self {
        Self { event, native_tid, worker_handle, flags: 0, _padding: 0 }
    }

    /// Returns true if `flag` is set
    #[must_use]
    pub const fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_are_disjoint() {
        assert_eq!(THREAD_EVENT_MASK & GC_EVENT_MASK, 0);
        assert_eq!((THREAD_EVENT_MASK | GC_EVENT_MASK).count_ones(), 7);
    }

    #[test]
    fn test_host_event_flags() {
        let mut event = HostEvent::new(EVENT_THREAD_SUSPENDED, 7, 1234);
        assert!(!event.has_flag(FLAG_IN_SLEEP_CALL));
        event.flags |= FLAG_IN_SLEEP_CALL;
        assert!(event.has_flag(FLAG_IN_SLEEP_CALL));
        assert!(!event.has_flag(FLAG_WORKER_DEAD));
    }

    #[test]
    fn test_host_event_size() {
        assert_eq!(core::mem::size_of::<HostEvent>(), 24);
    }
}
