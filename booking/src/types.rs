//! Domain types shared by the booking components.
//!
//! Identifiers, money, users, catalog events and the payment method attached
//! to an order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Messaging platform user id
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a platform user id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw platform id
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog event id
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a catalog id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw catalog id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order id, assigned by the order repository on creation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(u64);

impl OrderId {
    /// Wrap a stored order id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque payment provider reference for a charge
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderRef(String);

impl ProviderRef {
    /// Wrap a provider reference
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Borrow the raw reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-generated token that makes a provider request safe to repeat
///
/// One token per logical action: every retry of a charge creation reuses the
/// charge's token, and a refund always gets a token of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken(Uuid);

impl IdempotencyToken {
    /// Generate a fresh random token
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IdempotencyToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value objects
// ============================================================================

/// Amount in whole currency units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Create from whole units
    #[must_use]
    pub const fn new(units: u64) -> Self {
        Self(units)
    }

    /// Whole units
    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    /// Whether the amount is zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Apply a percentage discount, rounding down
    ///
    /// Percentages above 100 are treated as 100.
    #[must_use]
    pub fn discounted(self, percent: u8) -> Self {
        let keep = 100 - u64::from(percent.min(100));
        // floor(units * keep / 100) without overflowing on large amounts
        Self((self.0 / 100) * keep + (self.0 % 100) * keep / 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A user of the booking front-end
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Platform id
    pub id: UserId,
    /// Platform username, if the user has one
    pub username: Option<String>,
    /// Full name given during booking
    pub full_name: Option<String>,
    /// Phone number given during booking
    pub phone: Option<String>,
    /// Paid visits since the last loyalty redemption
    pub loyalty_visits: u32,
    /// First interaction
    pub registered_at: DateTime<Utc>,
}

impl User {
    /// A freshly registered user with no contacts and no visits
    #[must_use]
    pub const fn new(id: UserId, username: Option<String>, registered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            username,
            full_name: None,
            phone: None,
            loyalty_visits: 0,
            registered_at,
        }
    }

    /// Name to address the user by
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("guest")
    }
}

/// A catalog event (read-only to the booking engine)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Catalog id
    pub id: EventId,
    /// Short display name
    pub short_name: String,
    /// Longer description
    pub description: String,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// Ticket price before discounts
    pub base_price: Money,
}

impl Event {
    /// Whether tickets cost nothing
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.base_price.is_zero()
    }
}

/// How an order was (or stopped being) paid for
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "provider_ref", rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Charged through the payment provider
    ProviderCharge(ProviderRef),
    /// Issued for free by redeeming the loyalty bucket
    LoyaltyRedeemed,
    /// The event itself is free
    FreeEvent,
    /// The user cancelled the booking
    UserCancelled,
}

impl PaymentMethod {
    /// Short label for logs and metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ProviderCharge(_) => "provider",
            Self::LoyaltyRedeemed => "loyalty",
            Self::FreeEvent => "free",
            Self::UserCancelled => "cancelled",
        }
    }

    /// Provider reference, for provider charges
    #[must_use]
    pub const fn provider_ref(&self) -> Option<&ProviderRef> {
        match self {
            Self::ProviderCharge(reference) => Some(reference),
            _ => None,
        }
    }
}

/// Rating and comment left after an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Who left it
    pub user_id: UserId,
    /// The order it is about
    pub order_id: OrderId,
    /// The event it is about
    pub event_id: EventId,
    /// 1 to 5
    pub rating: u8,
    /// Free text, possibly empty
    pub text: String,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_rounds_down() {
        assert_eq!(Money::new(1000).discounted(20), Money::new(800));
        assert_eq!(Money::new(999).discounted(15), Money::new(849));
        assert_eq!(Money::new(1).discounted(50), Money::ZERO);
    }

    #[test]
    fn discount_is_capped_at_full_price() {
        assert_eq!(Money::new(1000).discounted(150), Money::ZERO);
        assert_eq!(Money::new(1000).discounted(0), Money::new(1000));
    }

    #[test]
    fn payment_method_serializes_tagged() {
        let json = serde_json::to_value(PaymentMethod::ProviderCharge(ProviderRef::new("2c4e")))
            .unwrap_or_default();
        assert_eq!(json["type"], "provider_charge");
        assert_eq!(json["provider_ref"], "2c4e");

        let json = serde_json::to_value(PaymentMethod::LoyaltyRedeemed).unwrap_or_default();
        assert_eq!(json["type"], "loyalty_redeemed");
    }

    #[test]
    fn display_name_prefers_full_name() {
        let mut user = User::new(UserId::new(7), Some("neo".into()), Utc::now());
        assert_eq!(user.display_name(), "neo");
        user.full_name = Some("Thomas Anderson".into());
        assert_eq!(user.display_name(), "Thomas Anderson");
    }
}
