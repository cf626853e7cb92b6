//! User persistence.

use super::BoxFuture;
use crate::error::StorageError;
use crate::types::{User, UserId};

/// Durable user store.
pub trait UserRepository: Send + Sync {
    /// Return the stored user, creating it on first interaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store fails.
    fn ensure_user(&self, user: User) -> BoxFuture<'_, Result<User, StorageError>>;

    /// Read a user.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn get(&self, id: UserId) -> BoxFuture<'_, Result<Option<User>, StorageError>>;

    /// Overwrite the stored contact fields.
    ///
    /// Returns `false` if the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn update_contacts(
        &self,
        id: UserId,
        full_name: String,
        phone: String,
    ) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// Overwrite the loyalty visit counter.
    ///
    /// Returns `false` if the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn set_loyalty_visits(&self, id: UserId, visits: u32)
    -> BoxFuture<'_, Result<bool, StorageError>>;
}
