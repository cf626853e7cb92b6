//! Referral Engine.
//!
//! Users share `FRIEND-` invite codes. When a friend's order paid with an
//! invite code is confirmed, the invite is activated exactly once and the
//! inviter receives a `REWARD-` code worth the same discount.

use crate::error::StorageError;
use crate::promo::{
    CodeKind, CodeRecord, CodeStatus, INVITE_PREFIX, REFERRAL_DISCOUNT_PERCENT, REWARD_PREFIX,
    normalize,
};
use crate::providers::CodeRepository;
use crate::types::{OrderId, UserId};
use boxoffice_core::environment::Clock;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

/// Random characters after the prefix
pub const CODE_SUFFIX_LEN: usize = 6;

/// Attempts before giving up on finding an unused code
pub const MAX_GENERATION_ATTEMPTS: usize = 16;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Referral bookkeeping failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferralError {
    /// No invite with this code
    #[error("Invite code {0} not found")]
    UnknownInvite(String),

    /// The invite was activated before
    #[error("Invite code {0} was already activated")]
    AlreadyActivated(String),

    /// Every generated candidate collided
    #[error("Could not generate an unused code after {MAX_GENERATION_ATTEMPTS} attempts")]
    CodeSpaceExhausted,

    /// Code store failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Generates, activates and looks up referral codes.
#[derive(Clone)]
pub struct ReferralEngine {
    codes: Arc<dyn CodeRepository>,
    clock: Arc<dyn Clock>,
}

impl ReferralEngine {
    /// Create the engine over `codes`
    #[must_use]
    pub fn new(codes: Arc<dyn CodeRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { codes, clock }
    }

    /// Create a fresh invite code owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`ReferralError::CodeSpaceExhausted`] if no unused code was
    /// found, or [`ReferralError::Storage`] if the store fails.
    #[tracing::instrument(skip(self), fields(user_id = %owner))]
    pub async fn generate_invite_code(&self, owner: UserId) -> Result<String, ReferralError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let record = self.referral_record(random_code(INVITE_PREFIX), CodeKind::Invite, owner);
            let code = record.code.clone();
            if self.codes.insert(record).await? {
                tracing::info!(code = %code, "Invite code generated");
                return Ok(code);
            }
            tracing::debug!(code = %code, "Invite code collision, retrying");
        }
        Err(ReferralError::CodeSpaceExhausted)
    }

    /// Activate an invite for `friend`'s paid order and mint the inviter's
    /// reward code.
    ///
    /// The invite flips `generated → used` with a compare-and-swap, so a
    /// second activation fails instead of minting another reward.
    ///
    /// # Errors
    ///
    /// - [`ReferralError::UnknownInvite`] if the code does not exist
    /// - [`ReferralError::AlreadyActivated`] if it was activated before
    #[tracing::instrument(skip(self), fields(user_id = %friend, order_id = %friend_order))]
    pub async fn activate_invite_code(
        &self,
        code: &str,
        friend: UserId,
        friend_order: OrderId,
    ) -> Result<String, ReferralError> {
        let code = normalize(code);
        let invite = self
            .codes
            .find(CodeKind::Invite, code.clone())
            .await?
            .ok_or_else(|| ReferralError::UnknownInvite(code.clone()))?;

        if invite.status != CodeStatus::Generated {
            return Err(ReferralError::AlreadyActivated(code));
        }
        let owner = invite.owner.unwrap_or(friend);

        let reward_code = self.unused_code(REWARD_PREFIX, CodeKind::Reward).await?;

        let activated = CodeRecord {
            status: CodeStatus::Used,
            friend: Some(friend),
            friend_order: Some(friend_order),
            reward_code: Some(reward_code.clone()),
            ..invite
        };
        if !self
            .codes
            .compare_and_swap(CodeStatus::Generated, activated)
            .await?
        {
            return Err(ReferralError::AlreadyActivated(code));
        }

        let reward = self.referral_record(reward_code.clone(), CodeKind::Reward, owner);
        if !self.codes.insert(reward).await? {
            tracing::error!(code = %code, reward = %reward_code, "Reward code taken between check and insert");
            return Err(ReferralError::CodeSpaceExhausted);
        }

        tracing::info!(code = %code, reward = %reward_code, owner = %owner, "Invite code activated");
        Ok(reward_code)
    }

    /// The invite whose activation minted `reward_code`.
    ///
    /// # Errors
    ///
    /// Returns [`ReferralError::Storage`] if the store fails.
    pub async fn find_by_reward_code(
        &self,
        reward_code: &str,
    ) -> Result<Option<CodeRecord>, ReferralError> {
        let mut invites = self
            .codes
            .find_by_reward_code(normalize(reward_code))
            .await?;
        if invites.len() > 1 {
            tracing::warn!(reward = %reward_code, count = invites.len(), "Reward code linked to several invites");
        }
        Ok(invites.pop())
    }

    /// Mark a reward code used once the order that redeemed it is paid.
    ///
    /// Returns `false` if it was already used.
    ///
    /// # Errors
    ///
    /// Returns [`ReferralError::Storage`] if the store fails.
    pub async fn consume_reward_code(&self, reward_code: &str) -> Result<bool, ReferralError> {
        let code = normalize(reward_code);
        let Some(reward) = self.codes.find(CodeKind::Reward, code.clone()).await? else {
            return Ok(false);
        };
        if reward.status != CodeStatus::Active {
            return Ok(false);
        }
        let used = CodeRecord {
            status: CodeStatus::Used,
            ..reward
        };
        let consumed = self.codes.compare_and_swap(CodeStatus::Active, used).await?;
        if consumed {
            tracing::info!(code = %code, "Reward code consumed");
        }
        Ok(consumed)
    }

    async fn unused_code(&self, prefix: &str, kind: CodeKind) -> Result<String, ReferralError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = random_code(prefix);
            if self.codes.find(kind, candidate.clone()).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(ReferralError::CodeSpaceExhausted)
    }

    fn referral_record(&self, code: String, kind: CodeKind, owner: UserId) -> CodeRecord {
        CodeRecord {
            code,
            kind,
            discount_percent: REFERRAL_DISCOUNT_PERCENT,
            status: if kind == CodeKind::Invite {
                CodeStatus::Generated
            } else {
                CodeStatus::Active
            },
            owner: Some(owner),
            friend: None,
            friend_order: None,
            reward_code: None,
            created_at: self.clock.now(),
        }
    }
}

fn random_code(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_SUFFIX_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect();
    format!("{prefix}{suffix}")
}
