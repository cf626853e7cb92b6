//! Loyalty Ledger.
//!
//! Per-user visit counter. Every mutation is a read-modify-write serialized
//! per user id, so concurrent updates for one user never lose a visit.

use crate::error::{BookingError, Result};
use crate::providers::UserRepository;
use crate::types::UserId;
use boxoffice_runtime::KeyedLocks;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Paid visits needed for a free ticket (the next one is free)
pub const LOYALTY_THRESHOLD: u32 = 5;

/// Where a user stands in the loyalty program
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyProgress {
    /// Paid visits since the last redemption
    pub visits: u32,
    /// Visits needed for a free ticket
    pub threshold: u32,
    /// Whether the next ticket is free
    pub free_next: bool,
}

impl LoyaltyProgress {
    /// Progress for a given visit count
    #[must_use]
    pub const fn from_visits(visits: u32) -> Self {
        Self {
            visits,
            threshold: LOYALTY_THRESHOLD,
            free_next: visits >= LOYALTY_THRESHOLD,
        }
    }
}

/// Visit counter backed by the user store.
pub struct LoyaltyLedger {
    users: Arc<dyn UserRepository>,
    locks: KeyedLocks<UserId>,
}

impl LoyaltyLedger {
    /// Create a ledger over `users`
    #[must_use]
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self {
            users,
            locks: KeyedLocks::new(),
        }
    }

    /// Current visit count.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user.
    pub async fn get(&self, user: UserId) -> Result<u32> {
        self.users
            .get(user)
            .await?
            .map(|u| u.loyalty_visits)
            .ok_or_else(|| BookingError::NotFound(format!("User {user}")))
    }

    /// Add one visit.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user.
    pub async fn increment(&self, user: UserId) -> Result<u32> {
        self.update(user, "increment", |visits| visits.saturating_add(1))
            .await
    }

    /// Remove one visit; stays at zero.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user.
    pub async fn decrement(&self, user: UserId) -> Result<u32> {
        self.update(user, "decrement", |visits| visits.saturating_sub(1))
            .await
    }

    /// Back to zero after a redemption.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user.
    pub async fn reset(&self, user: UserId) -> Result<u32> {
        self.update(user, "reset", |_| 0).await
    }

    /// Overwrite the count.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user.
    pub async fn set_exact(&self, user: UserId, visits: u32) -> Result<u32> {
        self.update(user, "set_exact", |_| visits).await
    }

    /// Visits, threshold and free-ticket eligibility.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user.
    pub async fn progress(&self, user: UserId) -> Result<LoyaltyProgress> {
        Ok(LoyaltyProgress::from_visits(self.get(user).await?))
    }

    async fn update<F>(&self, user: UserId, operation: &'static str, f: F) -> Result<u32>
    where
        F: FnOnce(u32) -> u32 + Send,
    {
        let _guard = self.locks.lock(&user).await;

        let current = self.get(user).await?;
        let next = f(current);
        if next != current && !self.users.set_loyalty_visits(user, next).await? {
            return Err(BookingError::NotFound(format!("User {user}")));
        }

        tracing::info!(user_id = %user, operation, from = current, to = next, "Loyalty counter updated");
        Ok(next)
    }
}
