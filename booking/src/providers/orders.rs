//! Order persistence.

use super::BoxFuture;
use crate::error::StorageError;
use crate::order::{NewOrder, Order, OrderStatus};
use crate::types::{OrderId, ProviderRef, UserId};
use chrono::{DateTime, Utc};

/// Durable order store.
///
/// # Implementation Notes
///
/// - `create` assigns the id
/// - `compare_and_swap` is the only way to change a stored order; it writes
///   only if the stored status still equals `expected`
pub trait OrderRepository: Send + Sync {
    /// Insert a new pending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn create(&self, order: NewOrder) -> BoxFuture<'_, Result<Order, StorageError>>;

    /// Read an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn get(&self, id: OrderId) -> BoxFuture<'_, Result<Option<Order>, StorageError>>;

    /// Replace the stored order if its status is still `expected`.
    ///
    /// Returns `false` when another writer changed the status first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn compare_and_swap(
        &self,
        expected: OrderStatus,
        order: Order,
    ) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// Find the order a provider charge was attached to.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn find_by_provider_ref(
        &self,
        reference: ProviderRef,
    ) -> BoxFuture<'_, Result<Option<Order>, StorageError>>;

    /// All paid orders of a user.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn list_paid_for_user(&self, user: UserId) -> BoxFuture<'_, Result<Vec<Order>, StorageError>>;

    /// Pending orders created before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<Order>, StorageError>>;
}
