//! # gvltrace - Main Entry Point
//!
//! Three subcommands:
//! - **record**: run a simulated global-lock workload under tracing
//! - **summary**: print lock statistics for a trace
//! - **check**: validate a trace file

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gvltrace::analysis::analyze_lock;
use gvltrace::cli::{record, Args, Command, RecordArgs};
use gvltrace::trace_data::TraceData;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version are printed the same way
            let _ = e.print();
            std::process::exit(if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS });
        }
    };

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Record(record_args) => record_trace(record_args).await,
        Command::Summary { trace } => summarize(&trace),
        Command::Check { trace } => check(&trace),
    }
}

async fn record_trace(args: RecordArgs) -> Result<()> {
    let quiet = args.quiet;
    let output = args.output.clone();
    let stop = Arc::new(AtomicBool::new(false));

    if !quiet {
        eprintln!("recording {:?} with {} workers (Ctrl+C to stop)", args.workload, args.workers);
    }

    // The simulated runtime blocks its threads, so keep it off the async workers
    let recording = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || record(&args, stop))
    };
    tokio::pin!(recording);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut exit_reason = "duration limit reached";
    let joined = tokio::select! {
        joined = &mut recording => joined,
        _ = &mut ctrl_c => {
            info!("Interrupted, stopping workers");
            exit_reason = "interrupted";
            stop.store(true, Ordering::Relaxed);
            recording.await
        }
    };
    let recording = joined.context("Recording task failed")??;

    if !quiet {
        let stats = recording.stats;
        eprintln!(
            "\n{}: {:.1}s, {} workers, {} spans rendered ({} coalesced, {} unresolved, {} failed)",
            exit_reason,
            recording.elapsed.as_secs_f64(),
            recording.workers.len(),
            stats.rendered,
            stats.coalesced,
            stats.unresolved,
            stats.failed,
        );
        println!("saved: {}", output.display());
    }
    Ok(())
}

fn summarize(path: &Path) -> Result<()> {
    let data = TraceData::from_file(path).with_context(|| format!("Failed to read trace {}", path.display()))?;
    print!("{}", analyze_lock(&data));
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let data = TraceData::from_file(path).with_context(|| format!("Invalid trace {}", path.display()))?;
    println!(
        "ok: {} workers, {} OS threads, {} spans, {}",
        data.workers().count(),
        data.os_threads().count(),
        data.span_count(),
        data.duration
    );
    Ok(())
}
