//! Payment Reconciliation.
//!
//! Bridges orders and the payment provider:
//! 1. Free tickets are marked paid on the spot
//! 2. Paid tickets get a provider charge and stay pending
//! 3. Confirmation (user-triggered, webhook or sweep) marks the order paid
//!    exactly once and runs the post-payment bookkeeping
//! 4. Refunds run only from a cancellation that passed the window check

use crate::error::{BookingError, Result};
use crate::fulfillment::{Fulfillment, FulfillmentReport, LoyaltyEffect};
use crate::loyalty::{LOYALTY_THRESHOLD, LoyaltyLedger};
use crate::order::{Order, OrderAction, OrderService, OrderStatus, OrderTransaction};
use crate::pricing::Price;
use crate::promo::{CodeKind, INVITE_PREFIX};
use crate::providers::{
    BoxFuture, Catalog, ChargeInfo, ChargeMetadata, ChargeRequest, Notifier, PaymentProvider,
    ProviderError, ProviderStatus, RefundRequest,
};
use crate::referral::ReferralEngine;
use crate::types::{
    Event, EventId, IdempotencyToken, Money, OrderId, PaymentMethod, ProviderRef, UserId,
};
use boxoffice_runtime::{RetryPolicy, retry_with_predicate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Payment provider failure as seen by the booking flow
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Provider down, timed out or retries exhausted; the order stays pending
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(ProviderError),

    /// Charge not completed yet
    #[error("Payment has not succeeded yet")]
    NotYetSucceeded,

    /// Provider reported a terminal non-success status
    #[error("Payment failed with status {0}")]
    Failed(ProviderStatus),

    /// The charge carries no order id
    #[error("Charge {0} is not linked to an order")]
    MissingCorrelation(ProviderRef),
}

/// Provider settings used when creating charges
#[derive(Clone, Debug)]
pub struct ChargeSettings {
    /// ISO currency code
    pub currency: String,
    /// Where the payer returns after paying
    pub return_url: String,
    /// Per-call timeout
    pub request_timeout: Duration,
    /// Backoff for transient provider failures
    pub retry: RetryPolicy,
}

/// Result of booking a priced order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Free ticket issued and delivered
    Ticket {
        /// The paid order
        order: Order,
        /// Delivery and scheduling details
        report: FulfillmentReport,
    },
    /// The user has to pay first
    PaymentLink {
        /// The pending order
        order: Order,
        /// Provider reference to confirm later
        provider_ref: ProviderRef,
        /// Payment page
        url: String,
    },
}

/// Result of confirming a charge
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// Order marked paid now
    Fulfilled {
        /// The paid order
        order: Order,
        /// Delivery and scheduling details
        report: FulfillmentReport,
    },
    /// Order was already paid; nothing re-issued
    AlreadyFulfilled(OrderId),
    /// The user cancelled the order after paying; nothing changed
    AlreadyCancelled(OrderId),
    /// Charge still pending
    NotYetSucceeded(OrderId),
    /// Charge ended without success
    Failed {
        /// The order, still pending
        order_id: OrderId,
        /// Provider status
        status: ProviderStatus,
    },
}

impl Confirmation {
    /// Short label for logs and webhook replies
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Fulfilled { .. } => "fulfilled",
            Self::AlreadyFulfilled(_) => "already_fulfilled",
            Self::AlreadyCancelled(_) => "already_cancelled",
            Self::NotYetSucceeded(_) => "not_yet_succeeded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Compensation performed by a refund
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundOutcome {
    /// Loyalty ticket returned: counter back to the threshold
    LoyaltyRestored,
    /// Money returned and the earned visit removed
    Refunded {
        /// Provider refund status (`succeeded` or `pending`)
        status: ProviderStatus,
        /// Amount returned
        amount: Money,
    },
    /// Free event: nothing to return
    NothingToRefund,
}

/// Drives orders through payment.
pub struct PaymentReconciler {
    provider: Arc<dyn PaymentProvider>,
    orders: Arc<OrderService>,
    catalog: Arc<dyn Catalog>,
    loyalty: Arc<LoyaltyLedger>,
    referral: Arc<ReferralEngine>,
    fulfillment: Arc<Fulfillment>,
    notifier: Arc<dyn Notifier>,
    settings: ChargeSettings,
}

impl PaymentReconciler {
    /// Wire the reconciler
    #[allow(clippy::too_many_arguments)] // One collaborator per external system
    #[must_use]
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        orders: Arc<OrderService>,
        catalog: Arc<dyn Catalog>,
        loyalty: Arc<LoyaltyLedger>,
        referral: Arc<ReferralEngine>,
        fulfillment: Arc<Fulfillment>,
        notifier: Arc<dyn Notifier>,
        settings: ChargeSettings,
    ) -> Self {
        Self {
            provider,
            orders,
            catalog,
            loyalty,
            referral,
            fulfillment,
            notifier,
            settings,
        }
    }

    /// Issue a free ticket or create the charge for a pending order.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::ProviderUnavailable`] if the charge could not be
    ///   created; the order stays pending and can be retried
    /// - [`BookingError::Order`] if the order is no longer pending
    #[tracing::instrument(skip_all, fields(order_id = %order_id, amount = %price.final_price))]
    pub async fn charge_or_fulfill_free(
        &self,
        order_id: OrderId,
        price: &Price,
        event: &Event,
    ) -> Result<ChargeOutcome> {
        let mut txn = self.orders.begin(order_id).await?;

        if price.final_price.is_zero() {
            let payment = if price.loyalty_free {
                PaymentMethod::LoyaltyRedeemed
            } else {
                PaymentMethod::FreeEvent
            };
            let (order, report) = self.settle(&mut txn, payment, event).await?;
            return Ok(ChargeOutcome::Ticket { order, report });
        }

        let order = txn.order().clone();
        let request = ChargeRequest {
            amount: order.amount,
            currency: self.settings.currency.clone(),
            description: format!("Ticket: {}", event.short_name),
            return_url: self.settings.return_url.clone(),
            metadata: ChargeMetadata {
                order_id: order.id,
                promo_code: order.promo_code.clone(),
            },
            idempotency_token: IdempotencyToken::new(),
        };

        let charge = self
            .call_provider(|| self.provider.create_charge(request.clone()))
            .await?;

        let order = txn
            .apply(OrderAction::AttachCharge {
                provider_ref: charge.provider_ref.clone(),
            })
            .await?
            .clone();

        tracing::info!(provider_ref = %charge.provider_ref, "Charge created");
        Ok(ChargeOutcome::PaymentLink {
            order,
            provider_ref: charge.provider_ref,
            url: charge.redirect_url,
        })
    }

    /// Confirm a charge; safe to call any number of times.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::ProviderUnavailable`] if the status query failed
    /// - [`PaymentError::MissingCorrelation`] if the charge has no order id and
    ///   no order holds it
    /// - [`BookingError::Order`] if the order is unknown or was cancelled
    #[tracing::instrument(skip(self), fields(provider_ref = %provider_ref))]
    pub async fn confirm_payment(&self, provider_ref: &ProviderRef) -> Result<Confirmation> {
        let info: ChargeInfo = self
            .call_provider(|| self.provider.get_status(provider_ref.clone()))
            .await?;

        let order_id = match info.metadata.as_ref() {
            Some(metadata) => metadata.order_id,
            None => self
                .orders
                .find_by_provider_ref(provider_ref)
                .await?
                .map(|order| order.id)
                .ok_or_else(|| PaymentError::MissingCorrelation(provider_ref.clone()))?,
        };

        let mut txn = self.orders.begin(order_id).await?;

        if txn.order().status == OrderStatus::Paid {
            tracing::info!(order_id = %order_id, "Payment already confirmed");
            return Ok(Confirmation::AlreadyFulfilled(order_id));
        }
        if txn.order().status == OrderStatus::Cancelled
            && txn.order().payment == Some(PaymentMethod::UserCancelled)
        {
            tracing::info!(order_id = %order_id, "Charge belongs to a cancelled booking");
            return Ok(Confirmation::AlreadyCancelled(order_id));
        }

        match info.status {
            ProviderStatus::Succeeded => {
                let event = self.event(txn.order().event_id).await?;
                let (order, report) = self
                    .settle(
                        &mut txn,
                        PaymentMethod::ProviderCharge(provider_ref.clone()),
                        &event,
                    )
                    .await?;
                Ok(Confirmation::Fulfilled { order, report })
            },
            ProviderStatus::Pending => Ok(Confirmation::NotYetSucceeded(order_id)),
            status => {
                tracing::info!(order_id = %order_id, %status, "Payment did not succeed");
                Ok(Confirmation::Failed { order_id, status })
            },
        }
    }

    /// Return the money of a paid order.
    ///
    /// Only the provider is called here; the loyalty counter is adjusted by
    /// [`Self::restore_loyalty`] once the order is cancelled. Callers hold
    /// the order's transaction and have checked the cancellation window.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::RefundFailed`] if the provider failed or did
    /// not accept the refund; nothing was changed.
    #[tracing::instrument(skip_all, fields(order_id = %order.id))]
    pub(crate) async fn refund(&self, order: &Order) -> Result<RefundOutcome> {
        match &order.payment {
            Some(PaymentMethod::LoyaltyRedeemed) => Ok(RefundOutcome::LoyaltyRestored),
            Some(PaymentMethod::ProviderCharge(provider_ref)) if !order.amount.is_zero() => {
                let request = RefundRequest {
                    provider_ref: provider_ref.clone(),
                    amount: order.amount,
                    idempotency_token: IdempotencyToken::new(),
                };
                let status = self
                    .call_provider(|| self.provider.create_refund(request.clone()))
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Refund request failed");
                        BookingError::RefundFailed(e.to_string())
                    })?;

                match status {
                    ProviderStatus::Succeeded | ProviderStatus::Pending => {
                        Ok(RefundOutcome::Refunded {
                            status,
                            amount: order.amount,
                        })
                    },
                    ProviderStatus::Other(other) => {
                        tracing::error!(status = %other, "Refund rejected by provider");
                        Err(BookingError::RefundFailed(
                            PaymentError::Failed(ProviderStatus::Other(other)).to_string(),
                        ))
                    },
                }
            },
            _ => Ok(RefundOutcome::NothingToRefund),
        }
    }

    /// Undo the loyalty effect of a cancelled order.
    ///
    /// A returned loyalty ticket puts the counter back at the threshold; a
    /// refunded charge takes its visit away.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if the counter could not be written.
    pub(crate) async fn restore_loyalty(
        &self,
        user: UserId,
        refund: &RefundOutcome,
    ) -> Result<()> {
        match refund {
            RefundOutcome::LoyaltyRestored => {
                self.loyalty.set_exact(user, LOYALTY_THRESHOLD).await?;
            },
            RefundOutcome::Refunded { .. } => {
                self.loyalty.decrement(user).await?;
            },
            RefundOutcome::NothingToRefund => {},
        }
        Ok(())
    }

    /// Mark paid, then loyalty, codes and fulfillment.
    ///
    /// Only the status transition can fail the call; later steps are logged.
    async fn settle(
        &self,
        txn: &mut OrderTransaction<'_>,
        payment: PaymentMethod,
        event: &Event,
    ) -> Result<(Order, FulfillmentReport)> {
        let label = payment.label();
        let redeemed = payment == PaymentMethod::LoyaltyRedeemed;
        let order = txn.apply(OrderAction::MarkPaid { payment }).await?.clone();
        metrics::counter!("booking.orders.paid", "method" => label).increment(1);
        tracing::info!(order_id = %order.id, method = label, "Order paid");

        let loyalty = if redeemed {
            if let Err(error) = self.loyalty.reset(order.user_id).await {
                tracing::error!(%error, "Loyalty reset failed");
            }
            LoyaltyEffect::Redeemed
        } else if order.amount.is_zero() {
            LoyaltyEffect::Unchanged
        } else {
            match self.loyalty.increment(order.user_id).await {
                Ok(visits) => LoyaltyEffect::Visit { visits },
                Err(error) => {
                    tracing::error!(%error, "Loyalty increment failed");
                    LoyaltyEffect::Unchanged
                },
            }
        };

        if let Some(code) = &order.promo_code {
            self.redeem_code(code, &order).await;
        }

        let report = self.fulfillment.on_order_paid(&order, event, loyalty).await;
        Ok((order, report))
    }

    async fn redeem_code(&self, code: &str, order: &Order) {
        match CodeKind::classify(code) {
            CodeKind::Invite => {
                match self
                    .referral
                    .activate_invite_code(code, order.user_id, order.id)
                    .await
                {
                    Ok(reward) => self.deliver_reward(code, reward),
                    Err(error) => tracing::warn!(%error, code, "Invite activation failed"),
                }
            },
            CodeKind::Reward => {
                if let Err(error) = self.referral.consume_reward_code(code).await {
                    tracing::warn!(%error, code, "Reward code not consumed");
                }
            },
            CodeKind::Standard => {},
        }
    }

    /// Send the reward to the inviter in the background
    fn deliver_reward(&self, invite_code: &str, reward: String) {
        let referral = Arc::clone(&self.referral);
        let notifier = Arc::clone(&self.notifier);
        let invite_code = invite_code.to_string();

        tokio::spawn(async move {
            let owner = match referral.find_by_reward_code(&reward).await {
                Ok(Some(invite)) => invite.owner,
                Ok(None) => None,
                Err(error) => {
                    tracing::warn!(%error, "Invite lookup failed");
                    None
                },
            };
            let Some(owner) = owner else {
                tracing::warn!(reward = %reward, "Reward code has no owner to notify");
                return;
            };

            let text = format!(
                "Your friend used {invite_code}! Here is your reward code: {reward}. \
                 Share another {INVITE_PREFIX} code any time."
            );
            if let Err(error) = notifier.send_text(owner, text).await {
                tracing::warn!(%error, user_id = %owner, "Reward code not delivered");
            }
        });
    }

    async fn event(&self, id: EventId) -> Result<Event> {
        self.catalog
            .get_by_id(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("Event {id}")))
    }

    /// One logical provider call: per-attempt timeout, retried while transient
    async fn call_provider<'a, T, F>(&'a self, call: F) -> std::result::Result<T, PaymentError>
    where
        F: Fn() -> BoxFuture<'a, std::result::Result<T, ProviderError>>,
    {
        let timeout = self.settings.request_timeout;
        retry_with_predicate(
            self.settings.retry.clone(),
            || {
                let attempt = call();
                async move {
                    tokio::time::timeout(timeout, attempt)
                        .await
                        .map_err(|_| ProviderError::Timeout)?
                }
            },
            ProviderError::is_transient,
        )
        .await
        .map_err(|error| match error {
            ProviderError::Rejected(reason) => {
                PaymentError::Failed(ProviderStatus::Other(reason))
            },
            transient => PaymentError::ProviderUnavailable(transient),
        })
    }
}
