//! Prometheus metrics for the booking service.
//!
//! Counters emitted by the engine and the job runner:
//! - `booking.orders.created`
//! - `booking.orders.paid` (label `method`)
//! - `booking.orders.cancelled`
//! - `booking.jobs.fired` / `booking.jobs.suppressed` / `booking.jobs.failed`
//! - `store.*` from the runtime

use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!("booking.orders.created", "Orders created");
    describe_counter!("booking.orders.paid", "Orders marked paid, by payment method");
    describe_counter!("booking.orders.cancelled", "Paid orders cancelled by their owner");
    describe_counter!("booking.jobs.fired", "Deferred jobs that delivered a message");
    describe_counter!(
        "booking.jobs.suppressed",
        "Deferred jobs skipped because their order is no longer paid"
    );
    describe_counter!("booking.jobs.failed", "Deferred jobs that could not deliver");
    describe_counter!("store.commands.total", "Actions reduced by a store");
    describe_counter!("store.effects.executed", "Effects executed by a store, by type");
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed or
/// the listener cannot be started.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_metrics();
    tracing::info!(%addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}
