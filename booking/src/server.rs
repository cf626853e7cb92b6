//! HTTP surface of the booking service.
//!
//! - `POST /webhooks/payments`: provider push notification, fed into the
//!   same idempotent confirmation used by the front-end
//! - `GET /health`: liveness
//!
//! The notification body is only used for the charge reference; the charge
//! status is always re-read from the provider.

use crate::engine::BookingEngine;
use crate::error::BookingError;
use crate::order::OrderError;
use crate::payment::{Confirmation, PaymentError};
use crate::types::{OrderId, ProviderRef};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// The booking engine
    pub engine: Arc<BookingEngine>,
}

/// Provider push notification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderNotification {
    /// Notification type, e.g. `payment.succeeded`
    pub event: String,
    /// The charge it is about
    pub object: NotificationObject,
}

/// Charge reference inside a notification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationObject {
    /// Provider reference
    pub id: String,
}

/// Webhook reply
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WebhookResponse {
    /// Confirmation outcome
    pub status: String,
    /// The order concerned
    pub order_id: OrderId,
}

impl From<&Confirmation> for WebhookResponse {
    fn from(confirmation: &Confirmation) -> Self {
        let order_id = match confirmation {
            Confirmation::Fulfilled { order, .. } => order.id,
            Confirmation::AlreadyFulfilled(id)
            | Confirmation::AlreadyCancelled(id)
            | Confirmation::NotYetSucceeded(id) => *id,
            Confirmation::Failed { order_id, .. } => *order_id,
        };
        Self {
            status: confirmation.label().to_string(),
            order_id,
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (for client error handling).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// A [`BookingError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(BookingError);

impl From<BookingError> for ApiError {
    fn from(error: BookingError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        let error = &self.0;
        if error.is_not_found() {
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        } else if error.is_transient() {
            (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
        } else {
            match error {
                BookingError::Order(
                    OrderError::InvalidTransition { .. } | OrderError::ConcurrentModification(_),
                ) => (StatusCode::CONFLICT, "CONFLICT"),
                BookingError::Payment(PaymentError::Failed(_)) => {
                    (StatusCode::BAD_GATEWAY, "PROVIDER_REJECTED")
                },
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(%status, code, error = %self.0, "Webhook failed");
        } else {
            tracing::warn!(%status, code, error = %self.0, "Webhook rejected");
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/payments", post(payment_webhook))
        .with_state(state)
}

/// Liveness check.
pub async fn health_check() -> &'static str {
    "ok"
}

/// Confirm the charge named in a provider notification.
///
/// Replies 200 for every confirmation outcome so the provider stops
/// redelivering, 404 for charges with no order, 503 while the provider is
/// unreachable.
#[tracing::instrument(skip(state, notification), fields(event = %notification.event, provider_ref = %notification.object.id))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(notification): Json<ProviderNotification>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let provider_ref = ProviderRef::new(notification.object.id);
    let confirmation = state.engine.confirm_payment(&provider_ref).await?;
    tracing::info!(outcome = confirmation.label(), "Webhook processed");
    Ok(Json(WebhookResponse::from(&confirmation)))
}
