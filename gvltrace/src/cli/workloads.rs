//! Simulated workloads recorded by `gvltrace record`
//!
//! Each workload runs on a [`SimRuntime`] whose main worker is the calling
//! thread. Workers loop until the deadline passes or the stop flag is set
//! (Ctrl+C), and the main worker joins them with the lock released.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::args::{RecordArgs, Workload};
use crate::session::{EventStatsSnapshot, TraceOptions, Tracer, WorkerInfo};
use crate::sim::{SimContext, SimRuntime, SimThread};

/// When workers should wind down
#[derive(Debug, Clone)]
pub struct StopCondition {
    until: Option<Instant>,
    stop: Arc<AtomicBool>,
}

impl StopCondition {
    /// Stop after `duration` (if any) or once `stop` is set
    #[must_use]
    pub fn new(duration: Option<Duration>, stop: Arc<AtomicBool>) -> Self {
        Self { until: duration.map(|d| Instant::now() + d), stop }
    }

    #[must_use]
    pub fn reached(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.until.is_some_and(|until| Instant::now() >= until)
    }
}

/// Result of one recording
#[derive(Debug)]
pub struct Recording {
    pub workers: Vec<WorkerInfo>,
    pub stats: EventStatsSnapshot,
    pub elapsed: Duration,
}

/// Run `args.workload` under tracing, writing to `args.output`.
///
/// Tracing is always stopped, even if the workload fails.
///
/// # Errors
/// Returns an error if tracing cannot start or stop, or a worker cannot be
/// spawned or panics.
pub fn record(args: &RecordArgs, stop: Arc<AtomicBool>) -> Result<Recording> {
    let (runtime, main) = SimRuntime::with_quantum(Duration::from_millis(args.quantum_ms.max(1)));
    let tracer = Arc::new(Tracer::new(runtime));
    let options = TraceOptions::new(&args.output).with_os_threads_view(args.os_threads);

    let started = Instant::now();
    tracer.start(&options)?;

    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let condition = StopCondition::new(duration, stop);
    let outcome = run(args, &main, &tracer, &condition);

    let workers = tracer.stop().context("Failed to finish trace")?;
    outcome?;
    Ok(Recording { workers, stats: tracer.stats(), elapsed: started.elapsed() })
}

fn run(
    args: &RecordArgs,
    main: &SimContext,
    tracer: &Arc<Tracer<SimRuntime>>,
    condition: &StopCondition,
) -> Result<()> {
    let workers = args.workers.max(1);
    let threads = match args.workload {
        Workload::Contention => contention(main, workers, condition)?,
        Workload::PingPong => ping_pong(main, workers.div_ceil(2), condition)?,
        Workload::Sleepers => sleepers(main, workers, tracer, args.track_sleep, condition)?,
    };
    join_all(main, threads)
}

fn join_all(main: &SimContext, threads: Vec<SimThread>) -> Result<()> {
    let mut panicked = Vec::new();
    for thread in threads {
        let name = thread.name().to_string();
        if main.join(thread).is_err() {
            warn!("Worker {name} panicked");
            panicked.push(name);
        }
    }
    if panicked.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Workers panicked: {}", panicked.join(", "))
    }
}

/// Workers alternate CPU work with short blocking I/O; every tenth round
/// triggers a GC pause
pub fn contention(main: &SimContext, workers: usize, condition: &StopCondition) -> Result<Vec<SimThread>> {
    (0..workers)
        .map(|i| {
            let condition = condition.clone();
            main.spawn(&format!("worker-{i}"), move |ctx| {
                let mut round = 0u64;
                while !condition.reached() {
                    ctx.work(Duration::from_millis(5));
                    ctx.without_lock(|| thread::sleep(Duration::from_millis(1)));
                    round += 1;
                    if round % 10 == 0 {
                        ctx.gc(Duration::from_millis(1));
                    }
                }
                debug!("worker-{i} ran {round} rounds");
            })
            .with_context(|| format!("Failed to spawn worker-{i}"))
        })
        .collect()
}

/// Pairs of workers bounce a counter over channels; receiving blocks with
/// the lock released
pub fn ping_pong(main: &SimContext, pairs: usize, condition: &StopCondition) -> Result<Vec<SimThread>> {
    let mut threads = Vec::with_capacity(pairs * 2);
    for pair in 0..pairs {
        let (ping_tx, ping_rx) = bounded::<u64>(1);
        let (pong_tx, pong_rx) = bounded::<u64>(1);

        let condition = condition.clone();
        threads.push(
            main.spawn(&format!("ping-{pair}"), move |ctx| {
                let mut count = 0u64;
                while !condition.reached() {
                    if ping_tx.send(count).is_err() {
                        break;
                    }
                    match ctx.without_lock(|| pong_rx.recv()) {
                        Ok(reply) => count = reply + 1,
                        Err(_) => break,
                    }
                    ctx.work(Duration::from_millis(1));
                }
                // Dropping the sender ends the pong side
            })
            .with_context(|| format!("Failed to spawn ping-{pair}"))?,
        );
        threads.push(
            main.spawn(&format!("pong-{pair}"), move |ctx| {
                while let Ok(count) = ctx.without_lock(|| ping_rx.recv()) {
                    ctx.work(Duration::from_millis(1));
                    if pong_tx.send(count).is_err() {
                        break;
                    }
                }
            })
            .with_context(|| format!("Failed to spawn pong-{pair}"))?,
        );
    }
    Ok(threads)
}

/// Workers mostly sleep. With `track_sleep` each wait is flagged through the
/// tracer first; otherwise only the runtime's sleep primitive reports it.
pub fn sleepers(
    main: &SimContext,
    workers: usize,
    tracer: &Arc<Tracer<SimRuntime>>,
    track_sleep: bool,
    condition: &StopCondition,
) -> Result<Vec<SimThread>> {
    (0..workers)
        .map(|i| {
            let condition = condition.clone();
            let tracer = Arc::clone(tracer);
            main.spawn(&format!("sleeper-{i}"), move |ctx| {
                while !condition.reached() {
                    ctx.work(Duration::from_millis(2));
                    if track_sleep {
                        tracer.mark_current_worker_sleeping();
                        ctx.without_lock(|| thread::sleep(Duration::from_millis(20)));
                    } else if i % 2 == 0 {
                        ctx.sleep(Duration::from_millis(20));
                    } else {
                        ctx.without_lock(|| thread::sleep(Duration::from_millis(20)));
                    }
                }
            })
            .with_context(|| format!("Failed to spawn sleeper-{i}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_condition_flag() {
        let stop = Arc::new(AtomicBool::new(false));
        let condition = StopCondition::new(None, Arc::clone(&stop));
        assert!(!condition.reached());
        stop.store(true, Ordering::Relaxed);
        assert!(condition.reached());
    }

    #[test]
    fn test_stop_condition_deadline() {
        let condition = StopCondition::new(Some(Duration::ZERO), Arc::new(AtomicBool::new(false)));
        assert!(condition.reached());
    }
}
