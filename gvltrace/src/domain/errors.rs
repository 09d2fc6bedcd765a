//! Error types for tracing sessions and trace read-back

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by session start/stop.
///
/// None of these are raised from inside event callbacks; the hot path drops
/// the event instead.
#[derive(Error, Debug)]
pub enum TracingError {
    #[error("Already started")]
    AlreadyActive,

    #[error("Tracing not running")]
    NotActive,

    #[error("Failed to open trace output file {}: {source}", .path.display())]
    SinkOpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to close trace output file: {0}")]
    SinkCloseFailed(#[source] io::Error),

    #[error("Failed to read CLOCK_MONOTONIC: {0}")]
    ClockReadFailed(#[source] io::Error),
}

impl TracingError {
    /// The OS error code behind this error, if there is one
    #[must_use]
    pub fn os_error_code(&self) -> Option<i32> {
        match self {
            TracingError::SinkOpenFailed { source, .. }
            | TracingError::SinkCloseFailed(source)
            | TracingError::ClockReadFailed(source) => source.raw_os_error(),
            TracingError::AlreadyActive | TracingError::NotActive => None,
        }
    }
}

/// Errors reading a finished trace back.
#[derive(Error, Debug)]
pub enum TraceParseError {
    #[error("Invalid trace data: {0}")]
    InvalidTraceData(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        assert_eq!(TracingError::AlreadyActive.to_string(), "Already started");
        assert_eq!(TracingError::NotActive.to_string(), "Tracing not running");
    }

    #[test]
    fn test_open_error_carries_os_code() {
        let err = TracingError::SinkOpenFailed {
            path: PathBuf::from("/nonexistent/trace.json"),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert!(err.to_string().contains("/nonexistent/trace.json"));
        assert_eq!(err.os_error_code(), Some(libc::ENOENT));
        assert_eq!(TracingError::NotActive.os_error_code(), None);
    }
}
