//! Command-line interface: argument parsing and the recorded workloads

pub mod args;
pub mod workloads;

pub use args::{Args, Command, RecordArgs, Workload};
pub use workloads::{record, Recording, StopCondition};
