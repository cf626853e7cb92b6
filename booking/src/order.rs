//! Order State Machine.
//!
//! The order aggregate moves `pending → paid → cancelled`, or
//! `pending → cancelled` when an abandoned order expires. [`OrderReducer`]
//! decides transitions; [`OrderService`] loads the order, runs the reducer and
//! persists the result with a status compare-and-swap, all under a per-order
//! lock.

use crate::error::{BookingError, Result, StorageError};
use crate::providers::OrderRepository;
use crate::types::{EventId, Money, OrderId, PaymentMethod, ProviderRef, UserId};
use boxoffice_core::{SmallVec, effect::Effect, environment::Clock, reducer::Reducer};
use boxoffice_runtime::{KeyedLocks, keyed::KeyGuard};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Cancellation closes this long before the event starts
pub const CANCELLATION_WINDOW_HOURS: i64 = 48;

// ============================================================================
// Types
// ============================================================================

/// Order lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, waiting for payment
    Pending,
    /// Paid and fulfilled
    Paid,
    /// Cancelled by the user or expired
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Paid => f.write_str("paid"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A ticket order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Store-assigned id
    pub id: OrderId,
    /// Buyer
    pub user_id: UserId,
    /// Event the ticket is for
    pub event_id: EventId,
    /// How it was paid; `None` until a charge exists or a free ticket is issued
    pub payment: Option<PaymentMethod>,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Amount charged (zero for free tickets)
    pub amount: Money,
    /// Normalized promo code that priced the order
    pub promo_code: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

/// Data for a new pending order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Buyer
    pub user_id: UserId,
    /// Event the ticket is for
    pub event_id: EventId,
    /// Amount to charge
    pub amount: Money,
    /// Normalized promo code, if one priced the order
    pub promo_code: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Build the stored order once the repository assigned an id
    #[must_use]
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            user_id: self.user_id,
            event_id: self.event_id,
            payment: None,
            status: OrderStatus::Pending,
            amount: self.amount,
            promo_code: self.promo_code,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Rejected order operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// The transition is not allowed from the current status
    #[error("Cannot {action} an order that is {from}")]
    InvalidTransition {
        /// Status at the time of the request
        from: OrderStatus,
        /// Requested transition
        action: &'static str,
    },

    /// Less than 48 hours before the event
    #[error("Cancellation closed: event starts at {starts_at}")]
    CancellationWindowClosed {
        /// Event start
        starts_at: DateTime<Utc>,
    },

    /// Unknown order
    #[error("Order {0} not found")]
    NotFound(OrderId),

    /// Another writer changed the order between load and save
    #[error("Order {0} was modified concurrently")]
    ConcurrentModification(OrderId),
}

// ============================================================================
// Actions
// ============================================================================

/// Transitions of the order aggregate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    /// Record the provider charge; the order stays pending
    AttachCharge {
        /// Provider reference of the charge
        provider_ref: ProviderRef,
    },
    /// Payment confirmed or free ticket issued
    MarkPaid {
        /// How it was paid
        payment: PaymentMethod,
    },
    /// User cancellation of a paid order
    Cancel {
        /// Event start
        event_start: DateTime<Utc>,
        /// When the user asked
        requested_at: DateTime<Utc>,
    },
    /// Abandoned pending order
    Expire,
}

impl OrderAction {
    const fn name(&self) -> &'static str {
        match self {
            Self::AttachCharge { .. } => "attach a charge to",
            Self::MarkPaid { .. } => "mark paid",
            Self::Cancel { .. } => "cancel",
            Self::Expire => "expire",
        }
    }
}

/// Whether cancellation is still open at `now` for an event starting at `starts_at`
///
/// Exactly 48 hours before the start is already too late.
#[must_use]
pub fn cancellation_open(now: DateTime<Utc>, starts_at: DateTime<Utc>) -> bool {
    starts_at - now > Duration::hours(CANCELLATION_WINDOW_HOURS)
}

// ============================================================================
// Reducer
// ============================================================================

/// Order aggregate state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderState {
    /// The order
    pub order: Order,
    /// Rejection of the last action, if any
    pub last_error: Option<OrderError>,
}

impl OrderState {
    /// Wrap a loaded order
    #[must_use]
    pub const fn new(order: Order) -> Self {
        Self {
            order,
            last_error: None,
        }
    }
}

/// Environment dependencies for the order aggregate
#[derive(Clone)]
pub struct OrderEnvironment {
    /// Clock for transition timestamps
    pub clock: Arc<dyn Clock>,
}

impl OrderEnvironment {
    /// Creates a new `OrderEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Decides order transitions
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderReducer;

impl OrderReducer {
    fn apply(
        order: &mut Order,
        action: OrderAction,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), OrderError> {
        let rejected = OrderError::InvalidTransition {
            from: order.status,
            action: action.name(),
        };

        match (order.status, action) {
            (OrderStatus::Pending, OrderAction::AttachCharge { provider_ref }) => {
                order.payment = Some(PaymentMethod::ProviderCharge(provider_ref));
            },
            (OrderStatus::Pending, OrderAction::MarkPaid { payment }) => {
                order.payment = Some(payment);
                order.status = OrderStatus::Paid;
            },
            (
                OrderStatus::Paid,
                OrderAction::Cancel {
                    event_start,
                    requested_at,
                },
            ) => {
                if !cancellation_open(requested_at, event_start) {
                    return Err(OrderError::CancellationWindowClosed {
                        starts_at: event_start,
                    });
                }
                order.payment = Some(PaymentMethod::UserCancelled);
                order.status = OrderStatus::Cancelled;
            },
            (OrderStatus::Pending, OrderAction::Expire) => {
                order.status = OrderStatus::Cancelled;
            },
            _ => return Err(rejected),
        }

        order.updated_at = now;
        Ok(())
    }
}

impl Reducer for OrderReducer {
    type State = OrderState;
    type Action = OrderAction;
    type Environment = OrderEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        state.last_error = Self::apply(&mut state.order, action, env.clock.now()).err();
        SmallVec::new()
    }
}

// ============================================================================
// Service
// ============================================================================

/// Loads, transitions and persists orders.
pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    locks: KeyedLocks<OrderId>,
    env: OrderEnvironment,
    store_timeout: std::time::Duration,
}

impl OrderService {
    /// Create a service over `repository`
    #[must_use]
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        clock: Arc<dyn Clock>,
        store_timeout: std::time::Duration,
    ) -> Self {
        Self {
            repository,
            locks: KeyedLocks::new(),
            env: OrderEnvironment::new(clock),
            store_timeout,
        }
    }

    /// The underlying repository, for queries
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn OrderRepository> {
        &self.repository
    }

    /// Insert a new pending order.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if the write fails or times out.
    #[tracing::instrument(skip(self, order), fields(user_id = %order.user_id, event_id = %order.event_id))]
    pub async fn create(&self, order: NewOrder) -> Result<Order> {
        let order = self.with_timeout(self.repository.create(order)).await?;
        metrics::counter!("booking.orders.created").increment(1);
        tracing::info!(order_id = %order.id, amount = %order.amount, "Order created");
        Ok(order)
    }

    /// Read an order.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::NotFound`] for an unknown id.
    pub async fn get(&self, id: OrderId) -> Result<Order> {
        self.with_timeout(self.repository.get(id))
            .await?
            .ok_or_else(|| OrderError::NotFound(id).into())
    }

    /// Find the order a charge was attached to.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if the read fails or times out.
    pub async fn find_by_provider_ref(&self, reference: &ProviderRef) -> Result<Option<Order>> {
        self.with_timeout(self.repository.find_by_provider_ref(reference.clone()))
            .await
    }

    /// Lock an order and load it.
    ///
    /// The lock is held until the returned transaction is dropped, so every
    /// transition and side effect performed through it is serialized with
    /// other operations on the same order.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::NotFound`] for an unknown id.
    pub async fn begin(&self, id: OrderId) -> Result<OrderTransaction<'_>> {
        let guard = self.locks.lock(&id).await;
        let order = self.get(id).await?;
        Ok(OrderTransaction {
            service: self,
            order,
            _guard: guard,
        })
    }

    /// Lock, load, transition and save in one step.
    ///
    /// # Errors
    ///
    /// See [`OrderTransaction::apply`].
    pub async fn apply(&self, id: OrderId, action: OrderAction) -> Result<Order> {
        let mut txn = self.begin(id).await?;
        txn.apply(action).await?;
        Ok(txn.into_order())
    }

    async fn with_timeout<T, F>(&self, operation: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, StorageError>>,
    {
        tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| StorageError::Timeout)?
            .map_err(BookingError::from)
    }
}

/// A locked, loaded order.
pub struct OrderTransaction<'a> {
    service: &'a OrderService,
    order: Order,
    _guard: KeyGuard,
}

impl OrderTransaction<'_> {
    /// The order as last loaded or saved
    #[must_use]
    pub const fn order(&self) -> &Order {
        &self.order
    }

    /// Run a transition and persist it.
    ///
    /// # Errors
    ///
    /// - [`OrderError::InvalidTransition`] / [`OrderError::CancellationWindowClosed`]
    ///   if the reducer rejects the action
    /// - [`OrderError::ConcurrentModification`] if the stored status changed
    /// - [`BookingError::Storage`] if the write fails
    pub async fn apply(&mut self, action: OrderAction) -> Result<&Order> {
        let expected = self.order.status;
        let mut state = OrderState::new(self.order.clone());
        OrderReducer.reduce(&mut state, action, &self.service.env);

        if let Some(error) = state.last_error {
            tracing::debug!(order_id = %self.order.id, %error, "Order transition rejected");
            return Err(error.into());
        }

        let saved = self
            .service
            .with_timeout(
                self.service
                    .repository
                    .compare_and_swap(expected, state.order.clone()),
            )
            .await?;
        if !saved {
            return Err(OrderError::ConcurrentModification(self.order.id).into());
        }

        if expected != state.order.status {
            tracing::info!(
                order_id = %state.order.id,
                from = %expected,
                to = %state.order.status,
                "Order transitioned"
            );
        }
        self.order = state.order;
        Ok(&self.order)
    }

    /// Release the lock and keep the order
    #[must_use]
    pub fn into_order(self) -> Order {
        self.order
    }
}
