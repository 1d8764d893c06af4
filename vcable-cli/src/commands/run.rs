// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vcable run` command - Create the configured endpoints and tick them.
//!
//! The tick engine runs on its own (optionally pinned) thread. The async side
//! plays the client: it collects the notification handles the session queued
//! and waits on them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use vcable_core::notify::MAX_BATCH;
use vcable_core::{
    ConfigLoader, DriverRegistry, LoopbackHost, ProcessId, SessionStats, TickEngine, TickSummary,
};

use crate::cpu_affinity::{choose_tick_cpu, pin_current_thread};
use crate::metrics::{self, MetricsObserver};
use crate::provision::provision;

/// Totals over the whole run.
#[derive(Debug, Default, Clone, Serialize)]
struct RunTotals {
    ticks: u64,
    committed: u64,
    discarded: u64,
    skipped: u64,
    notified: u64,
    overruns: u64,
}

impl RunTotals {
    fn add(&mut self, summary: TickSummary) {
        self.ticks += 1;
        self.committed += summary.committed as u64;
        self.discarded += summary.discarded as u64;
        self.skipped += summary.skipped as u64;
        self.notified += summary.notified as u64;
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    elapsed_ms: u128,
    totals: RunTotals,
    wakeups: u64,
    session: SessionStats,
}

pub async fn execute(
    config_path: &str,
    seconds: Option<u64>,
    json: bool,
    metrics_port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config = %config_path, "Starting tick engine");

    // Load and validate configuration - fail fast on invalid config
    let config = ConfigLoader::load_file(config_path)?;

    if let Some(port) = metrics_port {
        metrics::start_metrics_server(port);
    }

    let registry = DriverRegistry::new_shared(Arc::new(LoopbackHost::new()));
    let provisioned = provision(&registry, &config).await?;
    let session = provisioned.session.clone();

    // Every handle attached during provisioning is already queued.
    let expected = provisioned
        .endpoints
        .iter()
        .filter(|e| e.signal.is_some())
        .count();
    let mut notifications = Vec::with_capacity(expected);
    while notifications.len() < expected {
        let batch = (expected - notifications.len()).min(MAX_BATCH);
        notifications.extend(session.wait_notifications(batch).await?);
    }

    let mut observer = MetricsObserver::new();
    for endpoint in &provisioned.endpoints {
        observer.register(endpoint.index, endpoint.config.name.as_str());
    }
    let mut engine = TickEngine::with_observer(config.engine.slots, observer)?;
    for endpoint in &provisioned.endpoints {
        engine.bind(session.attach(endpoint.index, ProcessId::current())?)?;
    }
    for notification in notifications {
        engine.install_notification(notification);
    }
    for endpoint in &provisioned.endpoints {
        session.start(endpoint.index)?;
    }

    // Client side of the notifications.
    let wakeups = Arc::new(AtomicU64::new(0));
    let mut waiters = Vec::new();
    for endpoint in provisioned.endpoints {
        let Some(signal) = endpoint.signal else {
            continue;
        };
        let signal = signal.into_async()?;
        let wakeups = wakeups.clone();
        let name = endpoint.config.name;
        waiters.push(tokio::spawn(async move {
            loop {
                match signal.wait().await {
                    Ok(count) => {
                        wakeups.fetch_add(count, Ordering::Relaxed);
                        tracing::trace!(endpoint = %name, count, "Endpoint needs service");
                    }
                    Err(e) => {
                        tracing::warn!(endpoint = %name, error = %e, "Notification wait failed");
                        break;
                    }
                }
            }
        }));
    }

    let cpu = match config.engine.cpu {
        Some(requested) => Some(choose_tick_cpu(Some(requested))?),
        None => None,
    };
    let period = config.engine.period;
    let stop = Arc::new(AtomicBool::new(false));
    let tick_thread = std::thread::Builder::new()
        .name("vcable-tick".to_string())
        .spawn({
            let stop = stop.clone();
            move || run_ticks(engine, period, cpu, stop)
        })?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                     VCABLE TICK ENGINE                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!(
        "  Region: {} bytes at {:#x}",
        provisioned.region.actual_size, provisioned.region.base_address
    );
    println!("  Period: {}us, slots: {}", period.as_micros(), config.engine.slots);
    if let Some(cpu) = cpu {
        println!("  Tick thread pinned to CPU {}", cpu);
    }

    let started = Instant::now();
    match seconds {
        Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
        None => {
            println!();
            println!("Press Ctrl+C to stop...");
            tokio::signal::ctrl_c().await?;
        }
    }

    tracing::info!("Stopping tick engine");
    stop.store(true, Ordering::Release);
    let totals = tokio::task::spawn_blocking(move || tick_thread.join())
        .await?
        .map_err(|_| "tick thread panicked")?;
    for waiter in waiters {
        waiter.abort();
    }

    let report = RunReport {
        elapsed_ms: started.elapsed().as_millis(),
        totals,
        wakeups: wakeups.load(Ordering::Relaxed),
        session: session.stats(),
    };
    registry.disconnect(session.id())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let t = &report.totals;
        println!();
        println!("Ran {} ticks in {}ms", t.ticks, report.elapsed_ms);
        println!(
            "  committed: {}, discarded: {}, skipped: {}, overruns: {}",
            t.committed, t.discarded, t.skipped, t.overruns
        );
        println!(
            "  notifications: {} signalled, {} received",
            t.notified, report.wakeups
        );
    }

    Ok(())
}

fn run_ticks(
    mut engine: TickEngine<MetricsObserver>,
    period: Duration,
    cpu: Option<usize>,
    stop: Arc<AtomicBool>,
) -> RunTotals {
    if let Some(cpu) = cpu {
        if let Err(e) = pin_current_thread(cpu) {
            tracing::warn!(cpu, error = %e, "Failed to pin tick thread");
        }
    }

    let mut totals = RunTotals::default();
    let mut deadline = Instant::now();
    let mut slot = 0;

    while !stop.load(Ordering::Acquire) {
        deadline += period;
        totals.add(engine.tick(slot));
        slot = (slot + 1) % engine.slots();

        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else {
            totals.overruns += 1;
            deadline = now;
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_accumulate() {
        let mut totals = RunTotals::default();
        totals.add(TickSummary {
            committed: 2,
            discarded: 1,
            skipped: 0,
            notified: 1,
        });
        totals.add(TickSummary {
            committed: 3,
            ..Default::default()
        });
        assert_eq!(totals.ticks, 2);
        assert_eq!(totals.committed, 5);
        assert_eq!(totals.discarded, 1);
        assert_eq!(totals.notified, 1);
    }

    #[test]
    fn test_run_ticks_stops() {
        let stop = Arc::new(AtomicBool::new(true));
        let engine = TickEngine::with_observer(1, MetricsObserver::new()).unwrap();
        let totals = run_ticks(engine, Duration::from_micros(100), None, stop);
        assert_eq!(totals.ticks, 0);
    }
}
