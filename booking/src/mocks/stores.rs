//! HashMap-backed stores.

use super::lock;
use crate::error::StorageError;
use crate::order::{NewOrder, Order, OrderStatus};
use crate::promo::{CodeKind, CodeRecord, CodeStatus};
use crate::providers::{
    BoxFuture, Catalog, CodeRepository, FeedbackRepository, OrderRepository, UserRepository,
};
use crate::types::{Event, EventId, Feedback, OrderId, ProviderRef, User, UserId};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

type StoreResult<T> = Result<T, StorageError>;

fn ready<'a, T: Send + 'a>(value: StoreResult<T>) -> BoxFuture<'a, StoreResult<T>> {
    futures::future::ready(value).boxed()
}

// ============================================================================
// Catalog
// ============================================================================

/// Fixed event list.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    events: Mutex<BTreeMap<EventId, Event>>,
}

impl InMemoryCatalog {
    /// Catalog holding `events`
    #[must_use]
    pub fn with(events: Vec<Event>) -> Self {
        let catalog = Self::default();
        for event in events {
            catalog.add(event);
        }
        catalog
    }

    /// Add or replace an event
    pub fn add(&self, event: Event) {
        lock(&self.events).insert(event.id, event);
    }
}

impl Catalog for InMemoryCatalog {
    fn list_upcoming(&self, now: DateTime<Utc>) -> BoxFuture<'_, StoreResult<Vec<Event>>> {
        let mut events: Vec<Event> = lock(&self.events)
            .values()
            .filter(|e| e.starts_at > now)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.starts_at);
        ready(Ok(events))
    }

    fn get_by_id(&self, id: EventId) -> BoxFuture<'_, StoreResult<Option<Event>>> {
        ready(Ok(lock(&self.events).get(&id).cloned()))
    }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Default)]
struct OrderTable {
    next_id: u64,
    orders: BTreeMap<OrderId, Order>,
}

/// Order table with sequential ids starting at 1.
#[derive(Debug, Default)]
pub struct InMemoryOrders {
    table: Mutex<OrderTable>,
    failing_writes: AtomicBool,
}

impl InMemoryOrders {
    /// Make every status update fail until switched back
    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// Every stored order, by id
    #[must_use]
    pub fn all(&self) -> Vec<Order> {
        lock(&self.table).orders.values().cloned().collect()
    }

    fn select(&self, predicate: impl Fn(&Order) -> bool) -> Vec<Order> {
        lock(&self.table)
            .orders
            .values()
            .filter(|o| predicate(o))
            .cloned()
            .collect()
    }
}

impl OrderRepository for InMemoryOrders {
    fn create(&self, order: NewOrder) -> BoxFuture<'_, StoreResult<Order>> {
        let mut table = lock(&self.table);
        table.next_id += 1;
        let order = order.into_order(OrderId::new(table.next_id));
        table.orders.insert(order.id, order.clone());
        ready(Ok(order))
    }

    fn get(&self, id: OrderId) -> BoxFuture<'_, StoreResult<Option<Order>>> {
        ready(Ok(lock(&self.table).orders.get(&id).cloned()))
    }

    fn compare_and_swap(
        &self,
        expected: OrderStatus,
        order: Order,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return ready(Err(StorageError::Unavailable("orders offline".into())));
        }
        let mut table = lock(&self.table);
        let swapped = match table.orders.get_mut(&order.id) {
            Some(current) if current.status == expected => {
                *current = order;
                true
            },
            _ => false,
        };
        ready(Ok(swapped))
    }

    fn find_by_provider_ref(
        &self,
        reference: ProviderRef,
    ) -> BoxFuture<'_, StoreResult<Option<Order>>> {
        let found = self
            .select(|o| o.payment.as_ref().and_then(|p| p.provider_ref()) == Some(&reference))
            .into_iter()
            .next();
        ready(Ok(found))
    }

    fn list_paid_for_user(&self, user: UserId) -> BoxFuture<'_, StoreResult<Vec<Order>>> {
        ready(Ok(
            self.select(|o| o.user_id == user && o.status == OrderStatus::Paid)
        ))
    }

    fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Order>>> {
        ready(Ok(
            self.select(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
        ))
    }
}

// ============================================================================
// Users
// ============================================================================

/// User table.
#[derive(Debug, Default)]
pub struct InMemoryUsers {
    users: Mutex<HashMap<UserId, User>>,
}

impl InMemoryUsers {
    /// Stored copy of a user
    #[must_use]
    pub fn user(&self, id: UserId) -> Option<User> {
        lock(&self.users).get(&id).cloned()
    }

    fn modify(&self, id: UserId, f: impl FnOnce(&mut User)) -> bool {
        lock(&self.users).get_mut(&id).map(f).is_some()
    }
}

impl UserRepository for InMemoryUsers {
    fn ensure_user(&self, user: User) -> BoxFuture<'_, StoreResult<User>> {
        let stored = lock(&self.users).entry(user.id).or_insert(user).clone();
        ready(Ok(stored))
    }

    fn get(&self, id: UserId) -> BoxFuture<'_, StoreResult<Option<User>>> {
        ready(Ok(self.user(id)))
    }

    fn update_contacts(
        &self,
        id: UserId,
        full_name: String,
        phone: String,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        ready(Ok(self.modify(id, |u| {
            u.full_name = Some(full_name);
            u.phone = Some(phone);
        })))
    }

    fn set_loyalty_visits(&self, id: UserId, visits: u32) -> BoxFuture<'_, StoreResult<bool>> {
        ready(Ok(self.modify(id, |u| u.loyalty_visits = visits)))
    }
}

// ============================================================================
// Codes
// ============================================================================

/// Code table keyed by namespace and code.
#[derive(Debug, Default)]
pub struct InMemoryCodes {
    codes: Mutex<HashMap<(CodeKind, String), CodeRecord>>,
}

impl InMemoryCodes {
    /// Table holding `records`
    #[must_use]
    pub fn with(records: Vec<CodeRecord>) -> Self {
        let codes = records
            .into_iter()
            .map(|r| ((r.kind, r.code.clone()), r))
            .collect();
        Self {
            codes: Mutex::new(codes),
        }
    }

    /// Every stored code
    #[must_use]
    pub fn all(&self) -> Vec<CodeRecord> {
        lock(&self.codes).values().cloned().collect()
    }
}

impl CodeRepository for InMemoryCodes {
    fn find(&self, kind: CodeKind, code: String) -> BoxFuture<'_, StoreResult<Option<CodeRecord>>> {
        ready(Ok(lock(&self.codes).get(&(kind, code)).cloned()))
    }

    fn insert(&self, record: CodeRecord) -> BoxFuture<'_, StoreResult<bool>> {
        let mut codes = lock(&self.codes);
        let key = (record.kind, record.code.clone());
        let inserted = if codes.contains_key(&key) {
            false
        } else {
            codes.insert(key, record);
            true
        };
        ready(Ok(inserted))
    }

    fn compare_and_swap(
        &self,
        expected: CodeStatus,
        record: CodeRecord,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        let mut codes = lock(&self.codes);
        let swapped = match codes.get_mut(&(record.kind, record.code.clone())) {
            Some(current) if current.status == expected => {
                *current = record;
                true
            },
            _ => false,
        };
        ready(Ok(swapped))
    }

    fn find_by_reward_code(
        &self,
        reward_code: String,
    ) -> BoxFuture<'_, StoreResult<Vec<CodeRecord>>> {
        let invites = lock(&self.codes)
            .values()
            .filter(|r| r.kind == CodeKind::Invite && r.reward_code.as_deref() == Some(&reward_code))
            .cloned()
            .collect();
        ready(Ok(invites))
    }
}

// ============================================================================
// Feedback
// ============================================================================

/// Append-only feedback list.
#[derive(Debug, Default)]
pub struct InMemoryFeedback {
    entries: Mutex<Vec<Feedback>>,
}

impl InMemoryFeedback {
    /// Everything recorded, oldest first
    #[must_use]
    pub fn all(&self) -> Vec<Feedback> {
        lock(&self.entries).clone()
    }
}

impl FeedbackRepository for InMemoryFeedback {
    fn insert(&self, feedback: Feedback) -> BoxFuture<'_, StoreResult<()>> {
        lock(&self.entries).push(feedback);
        ready(Ok(()))
    }
}
