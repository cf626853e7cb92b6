//! Feedback Capture.
//!
//! Ratings left in reply to the feedback-request job.

use crate::error::{BookingError, Result};
use crate::order::{OrderService, OrderStatus};
use crate::providers::FeedbackRepository;
use crate::types::{Feedback, OrderId, UserId};
use boxoffice_core::environment::Clock;
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;

/// Accepted ratings
pub const RATING_RANGE: RangeInclusive<u8> = 1..=5;

/// Rejected feedback
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedbackError {
    /// Rating outside 1..=5
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    /// Only attended (paid) orders can be rated
    #[error("Order {0} is not paid")]
    OrderNotPaid(OrderId),
}

/// Validates and stores feedback.
pub struct FeedbackRecorder {
    orders: Arc<OrderService>,
    feedback: Arc<dyn FeedbackRepository>,
    clock: Arc<dyn Clock>,
}

impl FeedbackRecorder {
    /// Create a recorder
    #[must_use]
    pub fn new(
        orders: Arc<OrderService>,
        feedback: Arc<dyn FeedbackRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            feedback,
            clock,
        }
    }

    /// Store a rating for `user`'s paid order.
    ///
    /// # Errors
    ///
    /// - [`FeedbackError::InvalidRating`] for a rating outside 1..=5
    /// - [`BookingError::NotOwner`] if the order belongs to someone else
    /// - [`FeedbackError::OrderNotPaid`] if the order is pending or cancelled
    #[tracing::instrument(skip(self, text), fields(user_id = %user, order_id = %order_id))]
    pub async fn record(
        &self,
        user: UserId,
        order_id: OrderId,
        rating: u8,
        text: String,
    ) -> Result<Feedback> {
        if !RATING_RANGE.contains(&rating) {
            return Err(FeedbackError::InvalidRating(rating).into());
        }

        let order = self.orders.get(order_id).await?;
        if order.user_id != user {
            return Err(BookingError::NotOwner { order_id });
        }
        if order.status != OrderStatus::Paid {
            return Err(FeedbackError::OrderNotPaid(order_id).into());
        }

        let feedback = Feedback {
            user_id: user,
            order_id,
            event_id: order.event_id,
            rating,
            text: text.trim().to_string(),
            created_at: self.clock.now(),
        };
        self.feedback.insert(feedback.clone()).await?;
        tracing::info!(rating, "Feedback recorded");
        Ok(feedback)
    }
}
