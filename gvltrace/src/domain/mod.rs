//! Core domain types and errors
//!
//! Ids and times are newtypes so a worker handle can never be passed where a
//! serial id or a native tid is expected.

pub mod errors;
pub mod types;

pub use types::{Micros, NativeTid, Pid, Timestamp, WorkerHandle, WorkerId};

pub use errors::{TraceParseError, TracingError};
