//! Payment provider.

use super::BoxFuture;
use crate::types::{IdempotencyToken, Money, OrderId, ProviderRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Correlation data stored with a charge.
///
/// The order id is the only field the engine trusts when a charge is
/// confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    /// The order the charge pays for
    pub order_id: OrderId,
    /// Promo code applied to the order, if any
    pub promo_code: Option<String>,
}

/// Request to create a charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Amount to charge
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Shown to the payer
    pub description: String,
    /// Where the provider sends the payer afterwards
    pub return_url: String,
    /// Correlation data
    pub metadata: ChargeMetadata,
    /// Same token for every retry of this charge
    pub idempotency_token: IdempotencyToken,
}

/// A created charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Provider reference
    pub provider_ref: ProviderRef,
    /// Payment page for the user
    pub redirect_url: String,
}

/// Provider-side status of a charge or refund.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderStatus {
    /// Money moved
    Succeeded,
    /// Still in progress
    Pending,
    /// Any other provider status (`canceled`, `waiting_for_capture`, ...)
    Other(String),
}

impl From<String> for ProviderStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "succeeded" => Self::Succeeded,
            "pending" => Self::Pending,
            _ => Self::Other(status),
        }
    }
}

impl From<ProviderStatus> for String {
    fn from(status: ProviderStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Pending => f.write_str("pending"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// Current state of a charge as the provider reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeInfo {
    /// Provider reference
    pub provider_ref: ProviderRef,
    /// Charge status
    pub status: ProviderStatus,
    /// Correlation data given at creation; absent for foreign charges
    pub metadata: Option<ChargeMetadata>,
}

/// Request to refund a charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// The charge being refunded
    pub provider_ref: ProviderRef,
    /// Amount to return
    pub amount: Money,
    /// Fresh token, never the charge's
    pub idempotency_token: IdempotencyToken,
}

/// Payment provider call failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No answer within the configured timeout
    #[error("Payment provider timed out")]
    Timeout,

    /// Network or provider outage
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether repeating the same request may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// External payment provider.
pub trait PaymentProvider: Send + Sync {
    /// Create a charge.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider fails or refuses.
    fn create_charge(&self, request: ChargeRequest) -> BoxFuture<'_, Result<Charge, ProviderError>>;

    /// Query a charge.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider fails or the charge is unknown.
    fn get_status(&self, reference: ProviderRef) -> BoxFuture<'_, Result<ChargeInfo, ProviderError>>;

    /// Refund a charge, returning the refund status.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider fails or refuses.
    fn create_refund(
        &self,
        request: RefundRequest,
    ) -> BoxFuture<'_, Result<ProviderStatus, ProviderError>>;
}
