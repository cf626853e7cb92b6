//! Boxoffice booking service.
//!
//! Wires the booking engine to in-memory adapters, runs the deferred job
//! runner and the abandoned-order sweep, and serves the payment webhook.

use anyhow::Context;
use boxoffice_booking::config::Config;
use boxoffice_booking::mocks::{
    InMemoryCatalog, InMemoryCodes, InMemoryFeedback, InMemoryOrders, InMemoryUsers,
    MockPaymentProvider, RecordingNotifier, StubRenderer,
};
use boxoffice_booking::scheduler::{JobEnvironment, JobRunner};
use boxoffice_booking::server::{AppState, build_router};
use boxoffice_booking::telemetry;
use boxoffice_booking::types::{Event, EventId, Money};
use boxoffice_booking::{BookingDeps, BookingEngine};
use boxoffice_core::environment::{Clock, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Boxoffice booking service");

    let metrics_addr: SocketAddr = format!(
        "{}:{}",
        config.server.metrics_host, config.server.metrics_port
    )
    .parse()
    .context("Invalid metrics address")?;
    if let Err(e) = telemetry::install_prometheus(metrics_addr) {
        warn!(error = %e, "Metrics disabled");
    }

    // In-memory adapters; state is lost on restart
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let catalog = Arc::new(InMemoryCatalog::with(vec![Event {
        id: EventId::new(1),
        short_name: "Opening night".to_string(),
        description: "Demo event".to_string(),
        starts_at: clock.now() + chrono::Duration::days(7),
        base_price: Money::new(1000),
    }]));
    let orders = Arc::new(InMemoryOrders::default());
    let users = Arc::new(InMemoryUsers::default());
    let notifier = Arc::new(RecordingNotifier::default());
    warn!("Using in-memory stores and a mock payment provider");

    let runner = Arc::new(JobRunner::new(JobEnvironment {
        orders: orders.clone(),
        users: users.clone(),
        catalog: catalog.clone(),
        notifier: notifier.clone(),
        clock: Arc::clone(&clock),
        venue_address: config.booking.venue_address.clone(),
    }));

    let engine = Arc::new(BookingEngine::new(
        BookingDeps {
            catalog,
            orders,
            users,
            codes: Arc::new(InMemoryCodes::default()),
            feedback: Arc::new(InMemoryFeedback::default()),
            provider: Arc::new(MockPaymentProvider::default()),
            renderer: Arc::new(StubRenderer),
            notifier,
            scheduler: runner.clone(),
            clock,
        },
        config.engine_settings(),
    ));
    info!(
        currency = %config.provider.currency,
        pending_ttl_secs = config.booking.pending_ttl_secs,
        "Booking engine ready"
    );

    let sweep = tokio::spawn(expiry_sweep(
        Arc::clone(&engine),
        config.pending_ttl(),
        Duration::from_secs(config.booking.sweep_interval_secs.max(1)),
    ));

    let app = build_router(AppState { engine });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweep.abort();
    match runner
        .shutdown(Duration::from_secs(config.server.shutdown_timeout))
        .await
    {
        Ok(()) => info!("Job runner drained"),
        Err(e) => warn!(error = %e, "Job runner stopped with jobs still scheduled"),
    }

    info!("Server stopped");
    Ok(())
}

/// Expire abandoned pending orders every `interval`.
async fn expiry_sweep(engine: Arc<BookingEngine>, ttl: chrono::Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match engine.expire_abandoned(ttl).await {
            Ok(report) if report.expired.is_empty() && report.confirmed.is_empty() => {},
            Ok(report) => info!(
                expired = report.expired.len(),
                confirmed = report.confirmed.len(),
                skipped = report.skipped.len(),
                "Expiry sweep finished"
            ),
            Err(e) => error!(error = %e, "Expiry sweep failed"),
        }
    }
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
