// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Prometheus metrics for the tick engine.
//!
//! Label lookups happen when an endpoint is registered with the observer; the
//! tick path only increments pre-resolved counters.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use vcable_core::types::MAX_ENDPOINTS;
use vcable_core::{EndpointIndex, SkipReason, TickObserver};

lazy_static! {
    pub static ref TICKS_COMMITTED: IntCounterVec = register_int_counter_vec!(
        "vcable_ticks_committed_total",
        "Ticks that advanced the endpoint position",
        &["endpoint"]
    )
    .unwrap();
    pub static ref TICKS_DISCARDED: IntCounterVec = register_int_counter_vec!(
        "vcable_ticks_discarded_total",
        "Ticks discarded because the generation changed during the transfer",
        &["endpoint"]
    )
    .unwrap();
    pub static ref TICKS_SKIPPED: IntCounterVec = register_int_counter_vec!(
        "vcable_ticks_skipped_total",
        "Ticks skipped for an inactive endpoint or an out-of-bounds window",
        &["endpoint", "reason"]
    )
    .unwrap();
    pub static ref NOTIFICATIONS: IntCounterVec = register_int_counter_vec!(
        "vcable_notifications_total",
        "Notification handles signalled by the tick engine",
        &["endpoint"]
    )
    .unwrap();
    pub static ref RING_POSITION: IntGaugeVec = register_int_gauge_vec!(
        "vcable_ring_position_bytes",
        "Last committed ring position",
        &["endpoint"]
    )
    .unwrap();
}

struct EndpointCounters {
    committed: IntCounter,
    discarded: IntCounter,
    skipped_inactive: IntCounter,
    skipped_bounds: IntCounter,
    notifications: IntCounter,
    position: IntGauge,
}

/// Tick observer that feeds the Prometheus counters.
pub struct MetricsObserver {
    endpoints: Vec<Option<EndpointCounters>>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        let mut endpoints = Vec::with_capacity(MAX_ENDPOINTS);
        endpoints.resize_with(MAX_ENDPOINTS, || None);
        Self { endpoints }
    }

    /// Resolve the label set for an endpoint. Call before it is ticked.
    pub fn register(&mut self, index: EndpointIndex, name: &str) {
        self.endpoints[index.as_usize()] = Some(EndpointCounters {
            committed: TICKS_COMMITTED.with_label_values(&[name]),
            discarded: TICKS_DISCARDED.with_label_values(&[name]),
            skipped_inactive: TICKS_SKIPPED.with_label_values(&[name, "inactive"]),
            skipped_bounds: TICKS_SKIPPED.with_label_values(&[name, "out_of_bounds"]),
            notifications: NOTIFICATIONS.with_label_values(&[name]),
            position: RING_POSITION.with_label_values(&[name]),
        });
    }

    fn counters(&self, index: EndpointIndex) -> Option<&EndpointCounters> {
        self.endpoints.get(index.as_usize()).and_then(Option::as_ref)
    }
}

impl Default for MetricsObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TickObserver for MetricsObserver {
    fn on_committed(&mut self, endpoint: EndpointIndex, position: u32) {
        if let Some(c) = self.counters(endpoint) {
            c.committed.inc();
            c.position.set(position as i64);
        }
    }

    fn on_discarded(&mut self, endpoint: EndpointIndex) {
        if let Some(c) = self.counters(endpoint) {
            c.discarded.inc();
        }
    }

    fn on_skipped(&mut self, endpoint: EndpointIndex, reason: SkipReason) {
        if let Some(c) = self.counters(endpoint) {
            match reason {
                SkipReason::Inactive => c.skipped_inactive.inc(),
                SkipReason::OutOfBounds => c.skipped_bounds.inc(),
            }
        }
    }

    fn on_notified(&mut self, endpoint: EndpointIndex) {
        if let Some(c) = self.counters(endpoint) {
            c.notifications.inc();
        }
    }
}

/// Start the metrics server in a background task.
pub fn start_metrics_server(port: u16) {
    // Force initialization of metrics
    lazy_static::initialize(&TICKS_COMMITTED);
    lazy_static::initialize(&TICKS_DISCARDED);
    lazy_static::initialize(&TICKS_SKIPPED);
    lazy_static::initialize(&NOTIFICATIONS);
    lazy_static::initialize(&RING_POSITION);

    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!("Metrics server starting on {}", addr);
                loop {
                    if let Ok((mut socket, _)) = listener.accept().await {
                        tokio::spawn(async move {
                            let body = metrics_handler();
                            let response = format!(
                                "HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{}",
                                body.len(),
                                body
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.flush().await;
                        });
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to bind metrics server: {}", e);
            }
        }
    });
}

fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
}
