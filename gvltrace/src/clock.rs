//! Monotonic session clock
//!
//! Every timeline record is stamped with microseconds elapsed since the session
//! started, read from `CLOCK_MONOTONIC`. A failed clock read is reported as
//! [`TracingError::ClockReadFailed`]: the session cannot produce consistent
//! timestamps without it.

use std::io;

use crate::domain::{Timestamp, TracingError};

/// Read `CLOCK_MONOTONIC`.
///
/// # Errors
/// Returns `ClockReadFailed` carrying the OS error if the clock cannot be read.
pub fn monotonic_now() -> Result<Timestamp, TracingError> {
    read_clock(libc::CLOCK_MONOTONIC)
}

#[allow(clippy::cast_sign_loss)]
fn read_clock(clock_id: libc::clockid_t) -> Result<Timestamp, TracingError> {
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };

    // SAFETY: `now` is a valid, writable timespec for the duration of the call
    #[allow(unsafe_code)]
    let rc = unsafe { libc::clock_gettime(clock_id, &mut now) };
    if rc != 0 {
        return Err(TracingError::ClockReadFailed(io::Error::last_os_error()));
    }

    Ok(Timestamp(now.tv_sec as u64 * 1_000_000_000 + now.tv_nsec as u64))
}

/// Clock anchored at session start
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started_at: Timestamp,
    clock_id: libc::clockid_t,
}

impl SessionClock {
    /// Anchor a new clock at the current instant
    ///
    /// # Errors
    /// Returns `ClockReadFailed` if the monotonic clock is unavailable.
    pub fn start() -> Result<Self, TracingError> {
        Ok(Self::anchored_at(monotonic_now()?))
    }

    /// Anchor a clock at a known instant
    #[must_use]
    pub fn anchored_at(started_at: Timestamp) -> Self {
        Self { started_at, clock_id: libc::CLOCK_MONOTONIC }
    }

    /// A clock whose every read fails with `EINVAL`
    #[cfg(test)]
    pub(crate) fn unreadable() -> Self {
        Self { started_at: Timestamp(0), clock_id: libc::clockid_t::MAX }
    }

    /// Microseconds since session start
    ///
    /// # Errors
    /// Returns `ClockReadFailed` if the monotonic clock is unavailable.
    pub fn elapsed_micros(&self) -> Result<f64, TracingError> {
        Ok(read_clock(self.clock_id)?.micros_since(self.started_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_now_never_goes_backwards() {
        let mut previous = monotonic_now().unwrap();
        for _ in 0..1_000 {
            let now = monotonic_now().unwrap();
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn test_elapsed_starts_near_zero() {
        let clock = SessionClock::start().unwrap();
        let elapsed = clock.elapsed_micros().unwrap();
        assert!(elapsed >= 0.0);
        assert!(elapsed < 1_000_000.0, "elapsed {elapsed}us right after start");
    }

    #[test]
    fn test_anchored_in_the_future_saturates() {
        let now = monotonic_now().unwrap();
        let clock = SessionClock::anchored_at(Timestamp(now.0 + 60_000_000_000));
        assert_eq!(clock.elapsed_micros().unwrap(), 0.0);
    }

    #[test]
    fn test_unreadable_clock_reports_os_error() {
        let err = SessionClock::unreadable().elapsed_micros().unwrap_err();
        assert!(matches!(err, TracingError::ClockReadFailed(_)));
        assert_eq!(err.os_error_code(), Some(libc::EINVAL));
    }
}
