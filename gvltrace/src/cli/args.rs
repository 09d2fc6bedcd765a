//! CLI argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gvltrace",
    about = "Trace global lock hand-offs between runtime workers",
    after_help = "\
EXAMPLES:
    gvltrace record contention -o trace.json      Record 4 workers fighting for the lock
    gvltrace record ping-pong --os-threads        Include the OS-thread view
    gvltrace summary trace.json                   Time per state and lock utilization
    gvltrace check trace.json                     Validate a trace file"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a simulated workload under tracing and write the trace
    Record(RecordArgs),

    /// Print per-worker time breakdown and lock statistics
    Summary {
        #[arg(value_name = "TRACE")]
        trace: PathBuf,
    },

    /// Validate a trace file
    Check {
        #[arg(value_name = "TRACE")]
        trace: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RecordArgs {
    /// Workload to run
    #[arg(value_enum, default_value_t = Workload::Contention)]
    pub workload: Workload,

    /// Trace output file
    #[arg(short, long, value_name = "FILE", default_value = "gvltrace.json")]
    pub output: PathBuf,

    /// Also render how workers map onto OS threads
    #[arg(long)]
    pub os_threads: bool,

    /// Number of workers to spawn
    #[arg(short = 'n', long, default_value = "4")]
    pub workers: usize,

    /// Stop after N seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "2")]
    pub duration: u64,

    /// Lock quantum in milliseconds
    #[arg(long, default_value = "100")]
    pub quantum_ms: u64,

    /// Mark blocking waits as sleeps before they happen
    #[arg(long)]
    pub track_sleep: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Workers alternate CPU work, short I/O and the odd GC
    Contention,
    /// Pairs of workers bounce a message over a channel
    PingPong,
    /// Workers mostly sleep, briefly waking to work
    Sleepers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_defaults() {
        let args = Args::try_parse_from(["gvltrace", "record"]).unwrap();
        let Command::Record(record) = args.command else {
            panic!("expected record");
        };
        assert_eq!(record.workload, Workload::Contention);
        assert_eq!(record.output, PathBuf::from("gvltrace.json"));
        assert_eq!(record.workers, 4);
        assert!(!record.os_threads);
    }

    #[test]
    fn test_record_flags() {
        let args = Args::try_parse_from([
            "gvltrace",
            "record",
            "ping-pong",
            "--os-threads",
            "-o",
            "out.json",
            "--duration",
            "0",
            "--track-sleep",
        ])
        .unwrap();
        let Command::Record(record) = args.command else {
            panic!("expected record");
        };
        assert_eq!(record.workload, Workload::PingPong);
        assert!(record.os_threads);
        assert!(record.track_sleep);
        assert_eq!(record.duration, 0);
    }

    #[test]
    fn test_summary_requires_trace() {
        assert!(Args::try_parse_from(["gvltrace", "summary"]).is_err());
    }
}
