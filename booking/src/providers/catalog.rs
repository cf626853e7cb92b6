//! Event catalog.

use super::BoxFuture;
use crate::error::StorageError;
use crate::types::{Event, EventId};
use chrono::{DateTime, Utc};

/// Read-only source of events.
pub trait Catalog: Send + Sync {
    /// Events starting after `now`, soonest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the catalog cannot be read.
    fn list_upcoming(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<Event>, StorageError>>;

    /// Look up one event.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the catalog cannot be read.
    fn get_by_id(&self, id: EventId) -> BoxFuture<'_, Result<Option<Event>, StorageError>>;
}
