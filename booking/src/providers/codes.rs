//! Promo and referral code persistence.

use super::BoxFuture;
use crate::error::StorageError;
use crate::promo::{CodeKind, CodeRecord, CodeStatus};

/// Durable code store, one namespace per [`CodeKind`].
pub trait CodeRepository: Send + Sync {
    /// Look a code up in its namespace.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn find(
        &self,
        kind: CodeKind,
        code: String,
    ) -> BoxFuture<'_, Result<Option<CodeRecord>, StorageError>>;

    /// Insert a new code; returns `false` if the code already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn insert(&self, record: CodeRecord) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// Replace a code if its status is still `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn compare_and_swap(
        &self,
        expected: CodeStatus,
        record: CodeRecord,
    ) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// Invite codes whose linkage points at `reward_code`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn find_by_reward_code(
        &self,
        reward_code: String,
    ) -> BoxFuture<'_, Result<Vec<CodeRecord>, StorageError>>;
}
