//! Promo Resolver.
//!
//! Turns a user-typed code into a discount decision. Codes live in three
//! namespaces told apart by prefix: `FRIEND-` invite codes, `REWARD-` reward
//! codes and everything else as standard catalog promos. Resolution never
//! mutates a code; invite activation and reward consumption happen once the
//! order is paid.

use crate::error::StorageError;
use crate::providers::CodeRepository;
use crate::types::{OrderId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Prefix of referral invite codes
pub const INVITE_PREFIX: &str = "FRIEND-";

/// Prefix of referral reward codes
pub const REWARD_PREFIX: &str = "REWARD-";

/// Discount granted by invite and reward codes
pub const REFERRAL_DISCOUNT_PERCENT: u8 = 20;

/// Code namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// Catalog promo, reusable
    Standard,
    /// Referral invite, one activation
    Invite,
    /// Reward minted for an inviter, one redemption
    Reward,
}

impl CodeKind {
    /// Namespace a normalized code belongs to
    #[must_use]
    pub fn classify(code: &str) -> Self {
        if code.starts_with(INVITE_PREFIX) {
            Self::Invite
        } else if code.starts_with(REWARD_PREFIX) {
            Self::Reward
        } else {
            Self::Standard
        }
    }
}

/// Code lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    /// Standard and reward codes ready for use
    Active,
    /// Invite code not yet activated
    Generated,
    /// Consumed
    Used,
}

impl CodeStatus {
    /// Whether the code can still be redeemed
    #[must_use]
    pub const fn is_redeemable(self) -> bool {
        matches!(self, Self::Active | Self::Generated)
    }
}

/// A stored promo or referral code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Normalized code string
    pub code: String,
    /// Namespace
    pub kind: CodeKind,
    /// Percentage off the base price
    pub discount_percent: u8,
    /// Lifecycle status
    pub status: CodeStatus,
    /// Inviter for invite and reward codes
    pub owner: Option<UserId>,
    /// Friend who activated an invite
    pub friend: Option<UserId>,
    /// Order that activated an invite
    pub friend_order: Option<OrderId>,
    /// Reward minted when an invite was activated
    pub reward_code: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl CodeRecord {
    /// A reusable catalog promo
    #[must_use]
    pub fn standard(code: &str, discount_percent: u8, created_at: DateTime<Utc>) -> Self {
        Self {
            code: normalize(code),
            kind: CodeKind::Standard,
            discount_percent,
            status: CodeStatus::Active,
            owner: None,
            friend: None,
            friend_order: None,
            reward_code: None,
            created_at,
        }
    }
}

/// Outcome of a successful resolution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoDecision {
    /// Normalized code
    pub code: String,
    /// Namespace, needed for activation after payment
    pub kind: CodeKind,
    /// Percentage off the base price
    pub discount_percent: u8,
    /// Inviter for referral codes
    pub owner: Option<UserId>,
}

/// Why a code was not accepted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromoError {
    /// Unknown code
    #[error("Promo code not found")]
    InvalidCode,

    /// Inviter tried to redeem their own invite
    #[error("You cannot use your own invite code")]
    OwnCodeRejected,

    /// Code already consumed
    #[error("Promo code has already been used")]
    AlreadyUsed,

    /// Code store failed during lookup
    #[error("Promo codes unavailable: {0}")]
    Unavailable(#[from] StorageError),
}

/// Trim and uppercase a user-typed code
#[must_use]
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Validates codes against the code store.
#[derive(Clone)]
pub struct PromoResolver {
    codes: Arc<dyn CodeRepository>,
}

impl PromoResolver {
    /// Create a resolver over `codes`
    #[must_use]
    pub fn new(codes: Arc<dyn CodeRepository>) -> Self {
        Self { codes }
    }

    /// Resolve `input` on behalf of `requester`.
    ///
    /// # Errors
    ///
    /// - [`PromoError::InvalidCode`] if the code is empty or unknown
    /// - [`PromoError::OwnCodeRejected`] if `requester` owns the invite,
    ///   whatever its status
    /// - [`PromoError::AlreadyUsed`] if the code was consumed
    #[tracing::instrument(skip(self), fields(user_id = %requester))]
    pub async fn resolve(&self, input: &str, requester: UserId) -> Result<PromoDecision, PromoError> {
        let code = normalize(input);
        if code.is_empty() {
            return Err(PromoError::InvalidCode);
        }

        let kind = CodeKind::classify(&code);
        let record = self
            .codes
            .find(kind, code.clone())
            .await?
            .ok_or(PromoError::InvalidCode)?;

        if kind == CodeKind::Invite && record.owner == Some(requester) {
            return Err(PromoError::OwnCodeRejected);
        }

        if !record.status.is_redeemable() {
            return Err(PromoError::AlreadyUsed);
        }

        tracing::debug!(code = %code, ?kind, discount = record.discount_percent, "Promo code resolved");

        Ok(PromoDecision {
            code,
            kind,
            discount_percent: record.discount_percent,
            owner: record.owner,
        })
    }
}
