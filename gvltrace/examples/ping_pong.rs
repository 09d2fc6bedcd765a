//! Ping-pong over the global lock
//!
//! Two workers bounce a counter back and forth while a third burns CPU, so
//! the trace shows both clean hand-offs and quantum preemption.
//!
//! Run with: cargo run --example ping_pong -- /tmp/ping_pong.json
//! Then open the file in https://ui.perfetto.dev

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use gvltrace::sim::SimRuntime;
use gvltrace::{TraceOptions, Tracer};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();
    let output = std::env::args().nth(1).unwrap_or_else(|| "ping_pong.json".to_string());

    let (runtime, main) = SimRuntime::with_quantum(Duration::from_millis(10));
    let tracer = Tracer::new(Arc::clone(&runtime));
    tracer.start(&TraceOptions::new(&output).with_os_threads_view(true))?;

    let (ping_tx, ping_rx) = bounded::<u32>(1);
    let (pong_tx, pong_rx) = bounded::<u32>(1);

    let ping = main.spawn("ping", move |ctx| {
        for round in 0..20 {
            if ping_tx.send(round).is_err() {
                break;
            }
            if ctx.without_lock(|| pong_rx.recv()).is_err() {
                break;
            }
            ctx.work(Duration::from_millis(2));
        }
    })?;
    let pong = main.spawn("pong", move |ctx| {
        while let Ok(round) = ctx.without_lock(|| ping_rx.recv()) {
            ctx.work(Duration::from_millis(1));
            if round % 5 == 0 {
                ctx.gc(Duration::from_millis(1));
            }
            if pong_tx.send(round).is_err() {
                break;
            }
        }
    })?;
    let hog = main.spawn("cpu-hog", |ctx| ctx.work(Duration::from_millis(150)))?;

    for thread in [ping, pong, hog] {
        let name = thread.name().to_string();
        main.join(thread).map_err(|_| anyhow::anyhow!("{name} panicked"))?;
    }

    let workers = tracer.stop().context("Failed to finish trace")?;
    println!("traced {} workers", workers.len());
    for worker in &workers {
        println!("  {:>10}  {}", worker.id, worker.name.as_deref().unwrap_or("-"));
    }
    println!("saved: {output}");
    Ok(())
}
