//! Trace export
//!
//! Writes Chrome Trace Event Format JSON for visualization in Perfetto or
//! `chrome://tracing`.

pub mod trace_event;
pub mod trace_writer;

pub use trace_event::{Phase, TraceRecord};
pub use trace_writer::{worker_color, TraceLayout, TraceWriter};
