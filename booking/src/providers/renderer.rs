//! Ticket asset rendering.

use super::BoxFuture;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// What goes on a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketRequest {
    /// Ticket holder
    pub holder_name: String,
    /// Event short name
    pub event_name: String,
    /// Event start
    pub starts_at: DateTime<Utc>,
    /// Venue address
    pub venue_address: String,
}

/// A rendered ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketAsset {
    /// File name to send it under
    pub file_name: String,
    /// Encoded image
    pub bytes: Vec<u8>,
}

/// Rendering failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Ticket rendering failed: {0}")]
pub struct RenderError(pub String);

/// Produces ticket images.
pub trait TicketRenderer: Send + Sync {
    /// Render a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] if the asset cannot be produced.
    fn render(&self, request: TicketRequest) -> BoxFuture<'_, Result<TicketAsset, RenderError>>;
}
