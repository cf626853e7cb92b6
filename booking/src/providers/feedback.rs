//! Feedback persistence.

use super::BoxFuture;
use crate::error::StorageError;
use crate::types::Feedback;

/// Durable feedback store.
pub trait FeedbackRepository: Send + Sync {
    /// Append one feedback entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn insert(&self, feedback: Feedback) -> BoxFuture<'_, Result<(), StorageError>>;
}
