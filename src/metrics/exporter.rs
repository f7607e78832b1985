//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Gauge mirroring the manager phase (0 disconnected, 1 connecting, 2 connected)
pub const PHASE_GAUGE: &str = "execstream_connection_phase";

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    for (name, _) in MetricsSnapshot::default().counters() {
        describe_counter!(name, describe(name));
    }
    describe_gauge!(PHASE_GAUGE, "Connection phase of the manager");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Record the current phase
pub fn set_phase(phase: crate::connection::ConnectionPhase) {
    use crate::connection::ConnectionPhase;

    let value = match phase {
        ConnectionPhase::Disconnected => 0.0,
        ConnectionPhase::Connecting => 1.0,
        ConnectionPhase::Connected => 2.0,
    };
    gauge!(PHASE_GAUGE).set(value);
}

fn describe(name: &str) -> &'static str {
    match name {
        "execstream_connect_attempts_total" => "Connection attempts started",
        "execstream_connections_opened_total" => "Transports that reached connected",
        "execstream_disconnects_total" => "Transport closes, caller-initiated or not",
        "execstream_reconnects_scheduled_total" => "Automatic reconnects scheduled",
        "execstream_retries_exhausted_total" => "Times the reconnect ceiling was hit",
        "execstream_connect_timeouts_total" => "Attempts killed by the watchdog",
        "execstream_stale_closes_total" => "Transports closed for missing pongs",
        "execstream_errors_total" => "Transport errors",
        "execstream_frames_received_total" => "Inbound text frames",
        "execstream_frames_delivered_total" => "Application frames handed to the caller",
        "execstream_frames_sent_total" => "Outbound frames written",
        "execstream_frames_dropped_total" => "Outbound frames dropped while not connected",
        "execstream_malformed_frames_total" => "Inbound frames that failed to decode",
        _ => "",
    }
}

/// Background task that periodically syncs our atomic counters to the metrics crate
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last = METRICS.snapshot().counters();

    loop {
        interval.tick().await;

        let current = METRICS.snapshot().counters();
        for ((name, now), (_, before)) in current.iter().zip(last.iter()) {
            let delta = now.saturating_sub(*before);
            if delta > 0 {
                counter!(*name).increment(delta);
            }
        }
        last = current;
    }
}
