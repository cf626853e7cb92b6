//! Pricing Engine.

use crate::loyalty::LOYALTY_THRESHOLD;
use crate::promo::PromoDecision;
use crate::types::Money;
use serde::{Deserialize, Serialize};

/// Final price of a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount to charge
    pub final_price: Money,
    /// Issued free by redeeming the loyalty bucket
    pub loyalty_free: bool,
    /// Promo recorded on the order, if it affected the price
    pub applied_promo: Option<PromoDecision>,
}

/// Combine base price, loyalty and promo.
///
/// Loyalty wins over any promo. Free events never redeem loyalty and never
/// record a promo, so neither is consumed.
#[must_use]
pub fn price(base: Money, loyalty_visits: u32, promo: Option<&PromoDecision>) -> Price {
    if base.is_zero() {
        return Price {
            final_price: Money::ZERO,
            loyalty_free: false,
            applied_promo: None,
        };
    }

    if loyalty_visits >= LOYALTY_THRESHOLD {
        return Price {
            final_price: Money::ZERO,
            loyalty_free: true,
            applied_promo: None,
        };
    }

    match promo {
        Some(decision) => Price {
            final_price: base.discounted(decision.discount_percent),
            loyalty_free: false,
            applied_promo: Some(decision.clone()),
        },
        None => Price {
            final_price: base,
            loyalty_free: false,
            applied_promo: None,
        },
    }
}
