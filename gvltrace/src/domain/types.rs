//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a native thread id
//! where a worker id is expected, and make function signatures more expressive.

use std::fmt;

/// Worker ID (serial number)
///
/// Assigned the first time the tracer sees a worker and never reused within
/// the lifetime of the process. This is the `tid` rendered in the trace.
/// This is NOT the same as the OS thread ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker#{}", self.0)
    }
}

/// Host handle of a logical worker
///
/// Opaque to the tracer: it is only hashed and compared, never dereferenced,
/// so holding one does not keep the runtime's thread object alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerHandle(pub u64);

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:0x{:x}", self.0)
    }
}

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// The current process
    #[must_use]
    pub fn current() -> Self {
        Pid(std::process::id())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Native (OS) thread ID
///
/// A worker may run on different OS threads over its lifetime, and one OS
/// thread may host many workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeTid(pub u32);

impl fmt::Display for NativeTid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Timestamp in nanoseconds
///
/// Represents a point on the monotonic clock (not wall-clock time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Microseconds elapsed since `earlier`, saturating at zero
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn micros_since(self, earlier: Timestamp) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / 1_000.0
    }

    /// Convert to seconds (f64)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

/// Duration in microseconds, as rendered in traces
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Micros(pub f64);

impl Micros {
    /// Convert to milliseconds
    #[must_use]
    pub fn as_millis(self) -> f64 {
        self.0 / 1_000.0
    }

    /// Convert to seconds
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        self.0 / 1_000_000.0
    }
}

impl fmt::Display for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.as_millis();
        if ms >= 1000.0 {
            write!(f, "{:.2}s", self.as_seconds())
        } else {
            write!(f, "{ms:.2}ms")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_display() {
        assert_eq!(WorkerId(5).to_string(), "Worker#5");
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(WorkerHandle(255).to_string(), "handle:0xff");
    }

    #[test]
    fn test_micros_since() {
        let start = Timestamp(1_000_000);
        let later = Timestamp(3_500_000);
        assert_eq!(later.micros_since(start), 2_500.0);
        // Never negative
        assert_eq!(start.micros_since(later), 0.0);
    }

    #[test]
    fn test_micros_display() {
        assert_eq!(Micros(5_000.0).to_string(), "5.00ms");
        assert_eq!(Micros(1_500_000.0).to_string(), "1.50s");
    }
}
