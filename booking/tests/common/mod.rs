//! Shared fixture for the booking integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use boxoffice_booking::engine::{EngineSettings, Quote};
use boxoffice_booking::mocks::{
    InMemoryCatalog, InMemoryCodes, InMemoryFeedback, InMemoryOrders, InMemoryUsers,
    MockPaymentProvider, RecordingNotifier, RecordingScheduler, StubRenderer,
};
use boxoffice_booking::order::Order;
use boxoffice_booking::payment::{ChargeOutcome, ChargeSettings, Confirmation};
use boxoffice_booking::providers::{JobScheduler, ProviderStatus};
use boxoffice_booking::scheduler::{JobEnvironment, JobRunner};
use boxoffice_booking::types::{Event, EventId, Money, ProviderRef, UserId};
use boxoffice_booking::{BookingDeps, BookingEngine};
use boxoffice_core::environment::Clock;
use boxoffice_runtime::retry::RetryPolicy;
use boxoffice_testing::{ManualClock, test_clock};
use std::sync::Arc;
use std::time::Duration;

pub const ANN: UserId = UserId::new(100);
pub const BOB: UserId = UserId::new(200);
pub const CAROL: UserId = UserId::new(300);
pub const DAN: UserId = UserId::new(400);

pub const CONCERT: EventId = EventId::new(1);
pub const OPEN_DAY: EventId = EventId::new(2);

pub const VENUE: &str = "1 Harbour St";

pub struct Harness {
    pub engine: Arc<BookingEngine>,
    pub clock: ManualClock,
    pub catalog: Arc<InMemoryCatalog>,
    pub orders: Arc<InMemoryOrders>,
    pub users: Arc<InMemoryUsers>,
    pub codes: Arc<InMemoryCodes>,
    pub provider: Arc<MockPaymentProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<RecordingScheduler>,
}

/// Concert a week out for 1000, free open day five days out
pub fn events(now: chrono::DateTime<chrono::Utc>) -> Vec<Event> {
    vec![
        Event {
            id: CONCERT,
            short_name: "Concert".into(),
            description: "Strings and brass".into(),
            starts_at: now + chrono::Duration::days(7),
            base_price: Money::new(1000),
        },
        Event {
            id: OPEN_DAY,
            short_name: "Open day".into(),
            description: String::new(),
            starts_at: now + chrono::Duration::days(5),
            base_price: Money::new(0),
        },
    ]
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        charge: ChargeSettings {
            currency: "RUB".into(),
            return_url: "https://t.me/boxoffice_bot".into(),
            request_timeout: Duration::from_secs(1),
            retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .build(),
        },
        venue_address: VENUE.into(),
        store_timeout: Duration::from_secs(1),
    }
}

/// Engine over in-memory stores with a recording scheduler
pub fn harness() -> Harness {
    let recorder = Arc::new(RecordingScheduler::default());
    let mut harness = build_with(|_| recorder.clone() as Arc<dyn JobScheduler>);
    harness.scheduler = recorder;
    harness
}

/// Engine whose jobs run on a real [`JobRunner`]
pub fn harness_with_runner() -> (Harness, JobRunner) {
    let mut runner = None;
    let harness = build_with(|parts| {
        let job_runner = JobRunner::new(JobEnvironment {
            orders: parts.orders.clone(),
            users: parts.users.clone(),
            catalog: parts.catalog.clone(),
            notifier: parts.notifier.clone(),
            clock: Arc::new(parts.clock.clone()),
            venue_address: VENUE.into(),
        });
        runner = Some(job_runner.clone());
        Arc::new(job_runner) as Arc<dyn JobScheduler>
    });
    (harness, runner.unwrap())
}

pub struct Parts {
    pub clock: ManualClock,
    pub catalog: Arc<InMemoryCatalog>,
    pub orders: Arc<InMemoryOrders>,
    pub users: Arc<InMemoryUsers>,
    pub notifier: Arc<RecordingNotifier>,
}

fn build_with(make_scheduler: impl FnOnce(&Parts) -> Arc<dyn JobScheduler>) -> Harness {
    let clock = ManualClock::new(test_clock().now());
    let parts = Parts {
        catalog: Arc::new(InMemoryCatalog::with(events(clock.now()))),
        orders: Arc::new(InMemoryOrders::default()),
        users: Arc::new(InMemoryUsers::default()),
        notifier: Arc::new(RecordingNotifier::default()),
        clock,
    };
    let scheduler = make_scheduler(&parts);
    let codes = Arc::new(InMemoryCodes::default());
    let provider = Arc::new(MockPaymentProvider::default());

    let engine = BookingEngine::new(
        BookingDeps {
            catalog: parts.catalog.clone(),
            orders: parts.orders.clone(),
            users: parts.users.clone(),
            codes: codes.clone(),
            feedback: Arc::new(InMemoryFeedback::default()),
            provider: provider.clone(),
            renderer: Arc::new(StubRenderer),
            notifier: parts.notifier.clone(),
            scheduler,
            clock: Arc::new(parts.clock.clone()),
        },
        settings(),
    );

    Harness {
        engine: Arc::new(engine),
        clock: parts.clock,
        catalog: parts.catalog,
        orders: parts.orders,
        users: parts.users,
        codes,
        provider,
        notifier: parts.notifier,
        scheduler: Arc::new(RecordingScheduler::default()),
    }
}

impl Harness {
    /// Register `user` with contacts and quote `event` with an optional code
    pub async fn quote(&self, user: UserId, event: EventId, code: Option<&str>) -> Quote {
        self.engine
            .register_user(user, Some(format!("user{user}")))
            .await
            .unwrap();
        self.engine.start_booking(user, event).await.unwrap();
        self.engine
            .save_contacts(user, &format!("Guest {user}"), "+100200300")
            .await
            .unwrap();
        self.engine.quote(user, event, code).await.unwrap()
    }

    /// Book a priced ticket up to the payment link
    pub async fn book_unpaid(
        &self,
        user: UserId,
        event: EventId,
        code: Option<&str>,
    ) -> (Order, ProviderRef) {
        let quote = self.quote(user, event, code).await;
        match self.engine.book(&quote).await.unwrap() {
            ChargeOutcome::PaymentLink {
                order,
                provider_ref,
                ..
            } => (order, provider_ref),
            other => panic!("expected a payment link, got {other:?}"),
        }
    }

    /// Book and pay a priced ticket
    pub async fn book_paid(&self, user: UserId, event: EventId, code: Option<&str>) -> Order {
        let (_, provider_ref) = self.book_unpaid(user, event, code).await;
        self.provider
            .set_status(&provider_ref, ProviderStatus::Succeeded);
        match self.engine.confirm_payment(&provider_ref).await.unwrap() {
            Confirmation::Fulfilled { order, .. } => order,
            other => panic!("expected fulfilment, got {other:?}"),
        }
    }

    pub async fn visits(&self, user: UserId) -> u32 {
        self.engine.loyalty_progress(user).await.unwrap().visits
    }

    pub fn order(&self, order: &Order) -> Order {
        self.orders
            .all()
            .into_iter()
            .find(|o| o.id == order.id)
            .unwrap()
    }

    pub fn event_start(&self, event: EventId) -> chrono::DateTime<chrono::Utc> {
        events(test_clock().now())
            .into_iter()
            .find(|e| e.id == event)
            .unwrap()
            .starts_at
    }
}

/// Let spawned tasks run until `done` holds
pub async fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
