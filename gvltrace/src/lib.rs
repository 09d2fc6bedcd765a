//! # gvltrace - Global Lock Timeline Tracer
//!
//! gvltrace records how the workers of a runtime with a global interpreter
//! lock hand that lock to each other, and writes the result as a Chrome Trace
//! Event Format document that Perfetto or `chrome://tracing` can open.
//!
//! Each worker becomes one row. Each row is a sequence of back-to-back spans
//! named after the worker's state: `wants-lock`, `running`, `waiting`,
//! `sleeping`, `gc`, `started`, `died`, plus the `started_tracing` /
//! `stopped_tracing` markers on the worker that controls the session.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Host Runtime (impl Runtime)                  │
//! │        started / ready / resumed / suspended / exited / gc      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ RawEvent via EventListener hooks
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     gvltrace (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Session    │──▶│  Timeline    │──▶│ Classifier   │         │
//! │  │  (Tracer)    │   │  Registry    │   │              │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               │                 │
//! │                                               ▼                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Analysis   │◀──│  Trace Data  │◀──│    Export    │         │
//! │  │ (lock stats) │   │  (read-back) │   │ (trace.json) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Tracing Pipeline
//!
//! - [`session`]: the [`Tracer`](session::Tracer) lifecycle (start/stop) and
//!   the event path
//! - [`timeline`]: per-worker state and the process-wide worker registry
//! - [`classification`]: raw event to timeline state, including coalescing of
//!   repeated suspends and sleep detection
//! - [`export`]: trace record model and the streaming trace writer
//! - [`clock`]: monotonic timestamps relative to session start
//!
//! ### Host Seam
//!
//! - [`runtime`]: the [`Runtime`](runtime::Runtime) and
//!   [`EventListener`](runtime::EventListener) traits a host implements
//! - [`sim`]: a simulated runtime with a FIFO global lock
//!
//! ### Offline
//!
//! - [`trace_data`]: parse and validate a finished trace
//! - [`analysis`]: per-worker state totals and lock utilization
//! - [`cli`]: command-line arguments and recorded workloads
//! - [`domain`]: core newtypes and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Record a contended workload with the OS-thread view
//! gvltrace record contention --os-threads -o trace.json
//!
//! # Summarize lock usage
//! gvltrace summary trace.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Global lock**: a process-wide mutex that a worker must hold to run
//!   interpreted code
//! - **Worker**: a runtime-level thread, identified by the host's stable
//!   handle and rendered under a serial id that is never reused
//! - **Session**: the interval between `start` and `stop`; every file it
//!   writes is a complete JSON array with matched spans

pub mod analysis;
pub mod classification;
pub mod cli;
pub mod clock;
pub mod domain;
pub mod export;
pub mod runtime;
pub mod session;
pub mod sim;
pub mod timeline;
pub mod trace_data;

pub use session::{TraceOptions, Tracer};
