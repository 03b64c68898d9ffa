//! Prometheus instrumentation.
//!
//! Connection counts are labelled by wire format; event counters by event
//! name and direction. Dropped events carry the routing reason.

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_protocol::WireFormat;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const IDENTITIES_ONLINE: &str = "parley_identities_online";
    pub const EVENTS_TOTAL: &str = "parley_events_total";
    pub const EVENTS_BYTES: &str = "parley_events_bytes";
    pub const EVENTS_DROPPED: &str = "parley_events_dropped_total";
    pub const LATENCY_SECONDS: &str = "parley_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Register descriptions for every Parley metric.
pub fn init_metrics() {
    use names::*;

    for (name, help) in [
        (CONNECTIONS_TOTAL, "Connections accepted since start, by wire format"),
        (EVENTS_TOTAL, "Events decoded or sent, by event name and direction"),
        (EVENTS_BYTES, "Encoded event bytes, by direction"),
        (EVENTS_DROPPED, "Inbound events the hub refused to route, by reason"),
        (ERRORS_TOTAL, "Protocol and transport errors, by type"),
    ] {
        metrics::describe_counter!(name, help);
    }

    metrics::describe_gauge!(CONNECTIONS_ACTIVE, "Open connections, by wire format");
    metrics::describe_gauge!(IDENTITIES_ONLINE, "Display names currently in the presence list");
    metrics::describe_histogram!(LATENCY_SECONDS, "Time spent decoding and routing one inbound frame");

    info!("Metrics initialized");
}

/// Install the Prometheus exporter on `0.0.0.0:<port>`.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or a recorder is already
/// installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Publish the size of the presence list.
pub fn set_online(count: usize) {
    gauge!(names::IDENTITIES_ONLINE).set(count as f64);
}

/// Count one event crossing the socket.
pub fn record_event(event: &'static str, bytes: usize, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event, "direction" => direction).increment(1);
    counter!(names::EVENTS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Count an inbound event the hub refused.
pub fn record_dropped(reason: &'static str) {
    counter!(names::EVENTS_DROPPED, "reason" => reason).increment(1);
}

pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

fn format_label(format: WireFormat) -> &'static str {
    match format {
        WireFormat::Json => "json",
        WireFormat::Msgpack => "msgpack",
    }
}

/// Tracks one open connection in the connection gauges.
///
/// The active gauge is decremented when the guard is dropped, however the
/// connection loop exits.
pub struct ConnectionMetricsGuard {
    format: &'static str,
}

impl ConnectionMetricsGuard {
    /// Count a newly accepted connection speaking `format`.
    #[must_use]
    pub fn open(format: WireFormat) -> Self {
        let format = format_label(format);
        counter!(names::CONNECTIONS_TOTAL, "format" => format).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE, "format" => format).increment(1.0);
        Self { format }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE, "format" => self.format).decrement(1.0);
    }
}
