//! Per-worker timeline state and the registry that owns it

pub mod registry;
pub mod worker;

pub use registry::WorkerRegistry;
pub use worker::WorkerState;
