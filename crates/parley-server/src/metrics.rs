//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const EVENTS_TOTAL: &str = "parley_events_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "parley_events_dropped_total";
    pub const OUTBOUND_TOTAL: &str = "parley_outbound_total";
    pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
    pub const PERSISTENCE_ENABLED_TOTAL: &str = "parley_persistence_enabled_total";
    pub const DISPATCH_SECONDS: &str = "parley_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound events routed, by event name");
    metrics::describe_counter!(
        names::EVENTS_DROPPED_TOTAL,
        "Inbound events dropped as malformed or undecodable"
    );
    metrics::describe_counter!(
        names::OUTBOUND_TOTAL,
        "Outbound event deliveries, by event name"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_counter!(
        names::PERSISTENCE_ENABLED_TOTAL,
        "Rooms that reached unanimous persistence consensus"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Time spent routing and fanning out one inbound event"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of transport errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a routed inbound event.
pub fn record_event(event: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event).increment(1);
}

/// Record a dropped inbound event.
pub fn record_dropped() {
    counter!(names::EVENTS_DROPPED_TOTAL).increment(1);
}

/// Record deliveries of one outbound event.
pub fn record_outbound(event: &'static str, recipients: usize) {
    counter!(names::OUTBOUND_TOTAL, "event" => event).increment(recipients as u64);
}

/// Update the live room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record a room reaching persistence consensus.
pub fn record_persistence_enabled() {
    counter!(names::PERSISTENCE_ENABLED_TOTAL).increment(1);
}

/// Record dispatch latency.
pub fn record_dispatch(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
