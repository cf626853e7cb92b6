//! Messaging front-end.

use super::BoxFuture;
use super::TicketAsset;
use crate::types::UserId;
use thiserror::Error;

/// Message delivery failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Message delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Sends messages to users.
///
/// Failures never undo a committed transition; callers log them.
pub trait Notifier: Send + Sync {
    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery fails.
    fn send_text(&self, user: UserId, text: String) -> BoxFuture<'_, Result<(), NotifyError>>;

    /// Send a file with a caption.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery fails.
    fn send_asset(
        &self,
        user: UserId,
        asset: TicketAsset,
        caption: String,
    ) -> BoxFuture<'_, Result<(), NotifyError>>;
}
