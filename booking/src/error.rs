//! Error types for the booking engine.
//!
//! Each component owns a small `thiserror` enum; [`BookingError`] folds them
//! together for the engine façade and the webhook server.

use crate::feedback::FeedbackError;
use crate::fulfillment::FulfillmentError;
use crate::order::OrderError;
use crate::payment::PaymentError;
use crate::promo::PromoError;
use crate::referral::ReferralError;
use crate::types::{EventId, OrderId};
use thiserror::Error;

/// Result type alias for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Failure of a durable store adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store did not answer in time
    #[error("Store operation timed out")]
    Timeout,

    /// The store rejected or failed the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Everything a booking operation can fail with.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Promo or referral code could not be applied
    #[error(transparent)]
    Promo(#[from] PromoError),

    /// Order transition was rejected
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Payment provider interaction failed
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Ticket could not be produced
    #[error(transparent)]
    Fulfillment(#[from] FulfillmentError),

    /// Referral code bookkeeping failed
    #[error(transparent)]
    Referral(#[from] ReferralError),

    /// Feedback was rejected
    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    /// Durable store failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A referenced user or event does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The user already holds a paid ticket for this event
    #[error("User already has a ticket for event {event_id}")]
    AlreadyBooked {
        /// The event in question
        event_id: EventId,
    },

    /// The order belongs to somebody else
    #[error("Order {order_id} does not belong to this user")]
    NotOwner {
        /// The order in question
        order_id: OrderId,
    },

    /// Contact details were empty or malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The provider did not confirm the refund; the order stays paid
    #[error("Refund failed: {0}")]
    RefundFailed(String),
}

impl BookingError {
    /// Whether the error means the referenced order/user/event is unknown
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Order(OrderError::NotFound(_))
                | Self::Payment(PaymentError::MissingCorrelation(_))
        )
    }

    /// Whether retrying later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Payment(PaymentError::ProviderUnavailable(_)) | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_not_found_counts_as_not_found() {
        let err = BookingError::from(OrderError::NotFound(OrderId::new(3)));
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn storage_errors_are_transient() {
        let err = BookingError::from(StorageError::Timeout);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Store operation timed out");
    }
}
