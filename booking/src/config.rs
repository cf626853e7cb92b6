//! Configuration management for the booking service.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::engine::EngineSettings;
use crate::payment::ChargeSettings;
use boxoffice_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Payment provider configuration
    pub provider: ProviderConfig,
    /// Booking rules and timeouts
    pub booking: BookingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Payment provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Merchant account id
    pub shop_id: String,
    /// API secret
    #[serde(skip_serializing)]
    pub secret_key: String,
    /// ISO currency code of all charges
    pub currency: String,
    /// Where the payer is sent after paying
    pub return_url: String,
    /// Timeout of a single provider call in milliseconds
    pub request_timeout_ms: u64,
    /// Retries of a transient provider failure
    pub max_retries: u32,
    /// First retry delay in milliseconds (doubles afterwards)
    pub retry_initial_delay_ms: u64,
}

/// Booking rules and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Printed on tickets and arrival reminders
    pub venue_address: String,
    /// Age in seconds after which a pending order is expired (default: 24 hours)
    pub pending_ttl_secs: u64,
    /// Interval of the expiry sweep in seconds
    pub sweep_interval_secs: u64,
    /// Timeout of a single store call in milliseconds
    pub store_timeout_ms: u64,
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn string(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    ///
    /// Missing or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            server: ServerConfig {
                host: string(&lookup, "HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT", 8080),
                log_level: string(
                    &lookup,
                    "LOG_LEVEL",
                    "boxoffice_booking=info,boxoffice_runtime=info",
                ),
                metrics_host: string(&lookup, "METRICS_HOST", "0.0.0.0"),
                metrics_port: parsed(&lookup, "METRICS_PORT", 9090),
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT", 30),
            },
            provider: ProviderConfig {
                shop_id: string(&lookup, "PROVIDER_SHOP_ID", ""),
                secret_key: string(&lookup, "PROVIDER_SECRET_KEY", ""),
                currency: string(&lookup, "PROVIDER_CURRENCY", "RUB"),
                return_url: string(&lookup, "PROVIDER_RETURN_URL", "http://localhost:8080/paid"),
                request_timeout_ms: parsed(&lookup, "PROVIDER_REQUEST_TIMEOUT_MS", 10_000),
                max_retries: parsed(&lookup, "PROVIDER_MAX_RETRIES", 3),
                retry_initial_delay_ms: parsed(&lookup, "PROVIDER_RETRY_INITIAL_DELAY_MS", 200),
            },
            booking: BookingConfig {
                venue_address: string(&lookup, "VENUE_ADDRESS", "See the event page for the address"),
                pending_ttl_secs: parsed(&lookup, "PENDING_TTL_SECS", 86_400), // 24 hours
                sweep_interval_secs: parsed(&lookup, "SWEEP_INTERVAL_SECS", 900), // 15 minutes
                store_timeout_ms: parsed(&lookup, "STORE_TIMEOUT_MS", 5_000),
            },
        }
    }

    /// Backoff for transient provider failures
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.provider.max_retries)
            .initial_delay(Duration::from_millis(self.provider.retry_initial_delay_ms))
            .build()
    }

    /// Settings for [`BookingEngine::new`](crate::engine::BookingEngine::new)
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            charge: ChargeSettings {
                currency: self.provider.currency.clone(),
                return_url: self.provider.return_url.clone(),
                request_timeout: Duration::from_millis(self.provider.request_timeout_ms),
                retry: self.retry_policy(),
            },
            venue_address: self.booking.venue_address.clone(),
            store_timeout: Duration::from_millis(self.booking.store_timeout_ms),
        }
    }

    /// Age after which pending orders expire; capped at a year
    #[must_use]
    pub fn pending_ttl(&self) -> chrono::Duration {
        let cap = chrono::Duration::days(365);
        i64::try_from(self.booking.pending_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .map_or(cap, |ttl| ttl.min(cap))
    }
}
