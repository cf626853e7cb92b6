//! Booking Engine.
//!
//! The façade the front-end talks to. It owns no state of its own: every
//! operation composes the promo resolver, pricing, the order service, payment
//! reconciliation, referral and loyalty components.

use crate::error::{BookingError, Result};
use crate::feedback::FeedbackRecorder;
use crate::fulfillment::Fulfillment;
use crate::loyalty::{LoyaltyLedger, LoyaltyProgress};
use crate::order::{
    NewOrder, Order, OrderAction, OrderError, OrderService, OrderStatus, cancellation_open,
};
use crate::payment::{
    ChargeOutcome, ChargeSettings, Confirmation, PaymentError, PaymentReconciler, RefundOutcome,
};
use crate::pricing::{Price, price};
use crate::promo::{PromoError, PromoResolver};
use crate::providers::{
    Catalog, CodeRepository, FeedbackRepository, JobScheduler, Notifier, OrderRepository,
    PaymentProvider, TicketRenderer, UserRepository,
};
use crate::referral::ReferralEngine;
use crate::types::{Event, EventId, Feedback, OrderId, ProviderRef, User, UserId};
use boxoffice_core::environment::Clock;
use boxoffice_runtime::KeyedLocks;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Result of [`BookingEngine::book`]
pub type BookingOutcome = ChargeOutcome;

/// External collaborators of the engine
#[derive(Clone)]
pub struct BookingDeps {
    /// Event catalog
    pub catalog: Arc<dyn Catalog>,
    /// Order store
    pub orders: Arc<dyn OrderRepository>,
    /// User store
    pub users: Arc<dyn UserRepository>,
    /// Promo and referral code store
    pub codes: Arc<dyn CodeRepository>,
    /// Feedback store
    pub feedback: Arc<dyn FeedbackRepository>,
    /// Payment provider
    pub provider: Arc<dyn PaymentProvider>,
    /// Ticket renderer
    pub renderer: Arc<dyn TicketRenderer>,
    /// Messaging front-end
    pub notifier: Arc<dyn Notifier>,
    /// Deferred job runner
    pub scheduler: Arc<dyn JobScheduler>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Engine tuning
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Provider call settings
    pub charge: ChargeSettings,
    /// Printed on tickets and arrival reminders
    pub venue_address: String,
    /// Timeout for order store calls
    pub store_timeout: Duration,
}

/// First step of a booking
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingStart {
    /// The chosen event
    pub event: Event,
    /// The user, with any contacts saved earlier
    pub user: User,
    /// Loyalty standing; `free_next` means this ticket costs nothing
    pub loyalty: LoyaltyProgress,
}

/// Why a promo code was ignored
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromoNotice {
    /// Code as typed
    pub code: String,
    /// Rejection
    pub reason: PromoError,
}

/// Price shown to the user before booking
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quote {
    /// Who asked
    pub user_id: UserId,
    /// The event
    pub event: Event,
    /// Final price
    pub price: Price,
    /// Set when a code was entered but not applied
    pub notice: Option<PromoNotice>,
}

/// Result of a cancellation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancellationOutcome {
    /// The cancelled order
    pub order: Order,
    /// Compensation performed
    pub refund: RefundOutcome,
}

/// Result of one expiry sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryReport {
    /// Orders moved to cancelled
    pub expired: Vec<OrderId>,
    /// Orders whose charge had succeeded; confirmed instead of expired
    pub confirmed: Vec<OrderId>,
    /// Orders left pending (charge still in progress or provider unreachable)
    pub skipped: Vec<OrderId>,
}

/// User-facing booking operations.
pub struct BookingEngine {
    catalog: Arc<dyn Catalog>,
    users: Arc<dyn UserRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    orders: Arc<OrderService>,
    loyalty: Arc<LoyaltyLedger>,
    promos: PromoResolver,
    referral: Arc<ReferralEngine>,
    payments: PaymentReconciler,
    feedback: FeedbackRecorder,
    booking_locks: KeyedLocks<UserId>,
}

impl BookingEngine {
    /// Wire the engine and its components
    #[must_use]
    pub fn new(deps: BookingDeps, settings: EngineSettings) -> Self {
        let orders = Arc::new(OrderService::new(
            deps.orders,
            Arc::clone(&deps.clock),
            settings.store_timeout,
        ));
        let loyalty = Arc::new(LoyaltyLedger::new(Arc::clone(&deps.users)));
        let referral = Arc::new(ReferralEngine::new(
            Arc::clone(&deps.codes),
            Arc::clone(&deps.clock),
        ));
        let fulfillment = Arc::new(Fulfillment::new(
            Arc::clone(&deps.users),
            deps.renderer,
            Arc::clone(&deps.notifier),
            deps.scheduler,
            Arc::clone(&deps.clock),
            settings.venue_address,
        ));
        let payments = PaymentReconciler::new(
            deps.provider,
            Arc::clone(&orders),
            Arc::clone(&deps.catalog),
            Arc::clone(&loyalty),
            Arc::clone(&referral),
            fulfillment,
            Arc::clone(&deps.notifier),
            settings.charge,
        );
        let feedback =
            FeedbackRecorder::new(Arc::clone(&orders), deps.feedback, Arc::clone(&deps.clock));

        Self {
            catalog: deps.catalog,
            users: deps.users,
            notifier: deps.notifier,
            clock: deps.clock,
            orders,
            loyalty,
            promos: PromoResolver::new(deps.codes),
            referral,
            payments,
            feedback,
            booking_locks: KeyedLocks::new(),
        }
    }

    /// Create the user on first contact; returns the stored user.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if the user store fails.
    pub async fn register_user(&self, user: UserId, username: Option<String>) -> Result<User> {
        let user = self
            .users
            .ensure_user(User::new(user, username, self.clock.now()))
            .await?;
        tracing::debug!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Events that have not started yet.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if the catalog fails.
    pub async fn upcoming_events(&self) -> Result<Vec<Event>> {
        Ok(self.catalog.list_upcoming(self.clock.now()).await?)
    }

    /// Begin booking `event_id`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown user or event
    /// - [`BookingError::AlreadyBooked`] if the user already holds a ticket
    #[tracing::instrument(skip(self), fields(user_id = %user, event_id = %event_id))]
    pub async fn start_booking(&self, user: UserId, event_id: EventId) -> Result<BookingStart> {
        let event = self.event(event_id).await?;
        let user = self.user(user).await?;
        self.ensure_not_booked(user.id, event_id).await?;

        Ok(BookingStart {
            event,
            loyalty: LoyaltyProgress::from_visits(user.loyalty_visits),
            user,
        })
    }

    /// Store the name and phone given during booking.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidInput`] if either is blank
    /// - [`BookingError::NotFound`] for an unknown user
    pub async fn save_contacts(&self, user: UserId, full_name: &str, phone: &str) -> Result<()> {
        let full_name = full_name.trim();
        let phone = phone.trim();
        if full_name.is_empty() {
            return Err(BookingError::InvalidInput("name is empty".into()));
        }
        if phone.is_empty() {
            return Err(BookingError::InvalidInput("phone is empty".into()));
        }

        if self
            .users
            .update_contacts(user, full_name.to_string(), phone.to_string())
            .await?
        {
            Ok(())
        } else {
            Err(BookingError::NotFound(format!("User {user}")))
        }
    }

    /// Price a ticket, applying `promo_input` if it resolves.
    ///
    /// A rejected code never fails the quote; it is reported in
    /// [`Quote::notice`] and the ticket is priced without a discount.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user or event.
    #[tracing::instrument(skip(self), fields(user_id = %user, event_id = %event_id))]
    pub async fn quote(
        &self,
        user: UserId,
        event_id: EventId,
        promo_input: Option<&str>,
    ) -> Result<Quote> {
        let event = self.event(event_id).await?;
        let visits = self.loyalty.get(user).await?;

        let (decision, notice) = match promo_input.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => match self.promos.resolve(code, user).await {
                Ok(decision) => (Some(decision), None),
                Err(reason) => {
                    tracing::warn!(code, %reason, "Promo code ignored");
                    let notice = PromoNotice {
                        code: code.to_string(),
                        reason,
                    };
                    (None, Some(notice))
                },
            },
            None => (None, None),
        };

        Ok(Quote {
            user_id: user,
            price: price(event.base_price, visits, decision.as_ref()),
            event,
            notice,
        })
    }

    /// Create the order for a quote and either issue the ticket or return
    /// the payment link.
    ///
    /// Loyalty is re-read under a per-user lock, so two concurrent bookings
    /// cannot both redeem the same free ticket.
    ///
    /// # Errors
    ///
    /// - [`BookingError::AlreadyBooked`] if a ticket was issued meanwhile
    /// - [`PaymentError::ProviderUnavailable`] if the charge could not be
    ///   created; the order stays pending
    #[tracing::instrument(skip(self, quote), fields(user_id = %quote.user_id, event_id = %quote.event.id))]
    pub async fn book(&self, quote: &Quote) -> Result<BookingOutcome> {
        let user = quote.user_id;
        let _guard = self.booking_locks.lock(&user).await;

        self.ensure_not_booked(user, quote.event.id).await?;

        let visits = self.loyalty.get(user).await?;
        let price = price(
            quote.event.base_price,
            visits,
            quote.price.applied_promo.as_ref(),
        );
        if price != quote.price {
            tracing::info!(quoted = %quote.price.final_price, actual = %price.final_price, "Quote repriced");
        }

        let order = self
            .orders
            .create(NewOrder {
                user_id: user,
                event_id: quote.event.id,
                amount: price.final_price,
                promo_code: price.applied_promo.as_ref().map(|p| p.code.clone()),
                created_at: self.clock.now(),
            })
            .await?;

        self.payments
            .charge_or_fulfill_free(order.id, &price, &quote.event)
            .await
    }

    /// Confirm a provider charge.
    ///
    /// # Errors
    ///
    /// See [`PaymentReconciler::confirm_payment`].
    pub async fn confirm_payment(&self, provider_ref: &ProviderRef) -> Result<Confirmation> {
        self.payments.confirm_payment(provider_ref).await
    }

    /// Cancel a paid order, refunding it first.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotOwner`] if `user` does not own the order
    /// - [`OrderError::InvalidTransition`] if the order is not paid
    /// - [`OrderError::CancellationWindowClosed`] 48 hours or less before the start
    /// - [`BookingError::RefundFailed`] if the provider did not accept the
    ///   refund; the order stays paid
    #[tracing::instrument(skip(self), fields(user_id = %user, order_id = %order_id))]
    pub async fn cancel_booking(
        &self,
        user: UserId,
        order_id: OrderId,
    ) -> Result<CancellationOutcome> {
        let mut txn = self.orders.begin(order_id).await?;
        let order = txn.order().clone();

        if order.user_id != user {
            return Err(BookingError::NotOwner { order_id });
        }
        if order.status != OrderStatus::Paid {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "cancel",
            }
            .into());
        }

        let event = self.event(order.event_id).await?;
        let requested_at = self.clock.now();
        if !cancellation_open(requested_at, event.starts_at) {
            return Err(OrderError::CancellationWindowClosed {
                starts_at: event.starts_at,
            }
            .into());
        }

        let refund = self.payments.refund(&order).await?;

        let order = match txn
            .apply(OrderAction::Cancel {
                event_start: event.starts_at,
                requested_at,
            })
            .await
        {
            Ok(order) => order.clone(),
            Err(error) => {
                tracing::error!(%error, ?refund, "Refund done but order not cancelled");
                return Err(error);
            },
        };
        metrics::counter!("booking.orders.cancelled").increment(1);
        tracing::info!(?refund, "Booking cancelled");

        if let Err(error) = self.payments.restore_loyalty(user, &refund).await {
            tracing::error!(%error, ?refund, "Booking cancelled but loyalty not restored");
        }

        let text = format!("Your booking for {} is cancelled.", event.short_name);
        if let Err(error) = self.notifier.send_text(user, text).await {
            tracing::warn!(%error, "Cancellation notice not delivered");
        }

        Ok(CancellationOutcome { order, refund })
    }

    /// Paid orders for events that have not started, soonest first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if a store fails.
    pub async fn my_tickets(&self, user: UserId) -> Result<Vec<(Order, Event)>> {
        let now = self.clock.now();
        let mut tickets = Vec::new();
        for order in self.orders.repository().list_paid_for_user(user).await? {
            match self.catalog.get_by_id(order.event_id).await? {
                Some(event) if event.starts_at > now => tickets.push((order, event)),
                Some(_) => {},
                None => tracing::warn!(order_id = %order.id, "Paid order for unknown event"),
            }
        }
        tickets.sort_by_key(|(_, event)| event.starts_at);
        Ok(tickets)
    }

    /// New invite code for `user` to share.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Referral`] if no code could be stored.
    pub async fn invite_friend(&self, user: UserId) -> Result<String> {
        self.user(user).await?;
        Ok(self.referral.generate_invite_code(user).await?)
    }

    /// Loyalty standing of `user`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for an unknown user.
    pub async fn loyalty_progress(&self, user: UserId) -> Result<LoyaltyProgress> {
        self.loyalty.progress(user).await
    }

    /// Store a rating for a paid order.
    ///
    /// # Errors
    ///
    /// See [`FeedbackRecorder::record`].
    pub async fn record_feedback(
        &self,
        user: UserId,
        order_id: OrderId,
        rating: u8,
        text: String,
    ) -> Result<Feedback> {
        self.feedback.record(user, order_id, rating, text).await
    }

    /// Cancel pending orders created more than `ttl` ago.
    ///
    /// Orders with a charge are checked with the provider first: a
    /// succeeded charge is confirmed, a charge still in progress keeps the
    /// order pending.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if the pending orders cannot be
    /// listed; failures on single orders are logged and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn expire_abandoned(&self, ttl: chrono::Duration) -> Result<ExpiryReport> {
        let cutoff = self.clock.now() - ttl;
        let stale = self
            .orders
            .repository()
            .list_pending_before(cutoff)
            .await?;

        let mut report = ExpiryReport::default();
        for order in stale {
            if let Some(provider_ref) = order.payment.as_ref().and_then(|p| p.provider_ref()) {
                match self.payments.confirm_payment(provider_ref).await {
                    Ok(Confirmation::Fulfilled { .. } | Confirmation::AlreadyFulfilled(_)) => {
                        report.confirmed.push(order.id);
                        continue;
                    },
                    Ok(Confirmation::NotYetSucceeded(_)) => {
                        report.skipped.push(order.id);
                        continue;
                    },
                    Ok(Confirmation::Failed { .. } | Confirmation::AlreadyCancelled(_)) => {},
                    Err(BookingError::Payment(PaymentError::MissingCorrelation(_))) => {},
                    Err(error) => {
                        tracing::warn!(order_id = %order.id, %error, "Charge check failed, keeping order");
                        report.skipped.push(order.id);
                        continue;
                    },
                }
            }

            match self.orders.apply(order.id, OrderAction::Expire).await {
                Ok(_) => {
                    tracing::info!(order_id = %order.id, "Abandoned order expired");
                    report.expired.push(order.id);
                },
                Err(error) => {
                    tracing::warn!(order_id = %order.id, %error, "Order not expired");
                    report.skipped.push(order.id);
                },
            }
        }
        Ok(report)
    }

    async fn event(&self, id: EventId) -> Result<Event> {
        self.catalog
            .get_by_id(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("Event {id}")))
    }

    async fn user(&self, id: UserId) -> Result<User> {
        self.users
            .get(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("User {id}")))
    }

    async fn ensure_not_booked(&self, user: UserId, event_id: EventId) -> Result<()> {
        let paid = self.orders.repository().list_paid_for_user(user).await?;
        if paid.iter().any(|o| o.event_id == event_id) {
            return Err(BookingError::AlreadyBooked { event_id });
        }
        Ok(())
    }
}
