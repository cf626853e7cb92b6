//! Fulfillment Scheduler.
//!
//! Runs once an order is paid: renders and sends the ticket, then queues the
//! arrival reminder and the feedback request. Nothing here can undo the
//! payment; failures are logged and reported.

use crate::loyalty::LOYALTY_THRESHOLD;
use crate::order::Order;
use crate::providers::{
    BoxFuture, JobScheduler, Notifier, TicketRenderer, TicketRequest, UserRepository,
};
use crate::scheduler::{JobKind, ScheduledJob};
use crate::types::Event;
use boxoffice_core::environment::Clock;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Arrival reminders go out this long before the start
pub const ARRIVAL_REMINDER_LEAD_HOURS: i64 = 24;

/// Upper bound for one render or notifier call
pub const DELIVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Feedback requests go out this long after the start
pub const FEEDBACK_DELAY_HOURS: i64 = 18;

/// Ticket delivery failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FulfillmentError {
    /// The renderer could not produce the ticket
    #[error("Ticket generation failed: {0}")]
    AssetGenerationFailed(String),

    /// The ticket was rendered but could not be sent
    #[error("Ticket delivery failed: {0}")]
    DeliveryFailed(String),
}

/// What the paid order did to the loyalty counter, for the ticket caption
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoyaltyEffect {
    /// Free ticket from the loyalty bucket
    Redeemed,
    /// One more paid visit, new total
    Visit {
        /// Counter after the increment
        visits: u32,
    },
    /// Free ticket, counter untouched
    Unchanged,
}

impl LoyaltyEffect {
    fn caption(self, event: &Event) -> String {
        match self {
            Self::Redeemed => format!(
                "Your ticket for {}. This one is on us: thanks for being a regular!",
                event.short_name
            ),
            Self::Visit { visits } if visits >= LOYALTY_THRESHOLD => format!(
                "Your ticket for {}. Visit {visits} counted: your next ticket is free!",
                event.short_name
            ),
            Self::Visit { visits } => format!(
                "Your ticket for {}. Visit {visits} of {LOYALTY_THRESHOLD} counted.",
                event.short_name
            ),
            Self::Unchanged => format!("Your ticket for {}. See you there!", event.short_name),
        }
    }
}

/// What fulfillment managed to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FulfillmentReport {
    /// Whether the ticket reached the user
    pub ticket_delivered: bool,
    /// Why it did not
    pub ticket_error: Option<FulfillmentError>,
    /// Jobs accepted by the scheduler
    pub jobs: Vec<ScheduledJob>,
    /// Arrival info sent right away because the event is less than a day out
    pub arrival_sent_now: bool,
}

/// Delivers tickets and queues follow-up jobs.
pub struct Fulfillment {
    users: Arc<dyn UserRepository>,
    renderer: Arc<dyn TicketRenderer>,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    venue_address: String,
}

impl Fulfillment {
    /// Create the fulfillment step
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        renderer: Arc<dyn TicketRenderer>,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<dyn JobScheduler>,
        clock: Arc<dyn Clock>,
        venue_address: String,
    ) -> Self {
        Self {
            users,
            renderer,
            notifier,
            scheduler,
            clock,
            venue_address,
        }
    }

    /// Deliver the ticket for a freshly paid order and queue its jobs.
    #[tracing::instrument(skip_all, fields(order_id = %order.id, user_id = %order.user_id))]
    pub async fn on_order_paid(
        &self,
        order: &Order,
        event: &Event,
        loyalty: LoyaltyEffect,
    ) -> FulfillmentReport {
        let holder_name = match self.users.get(order.user_id).await {
            Ok(Some(user)) => user.display_name().to_string(),
            Ok(None) => "guest".to_string(),
            Err(error) => {
                tracing::warn!(%error, "User lookup failed, rendering ticket without a name");
                "guest".to_string()
            },
        };

        let ticket_error = self
            .deliver_ticket(order, event, &holder_name, loyalty)
            .await
            .err();

        let mut jobs = Vec::with_capacity(2);
        let feedback = ScheduledJob::for_order(
            JobKind::FeedbackRequest,
            event.starts_at + Duration::hours(FEEDBACK_DELAY_HOURS),
            order,
        );
        self.queue(feedback, &mut jobs).await;

        let now = self.clock.now();
        let lead = Duration::hours(ARRIVAL_REMINDER_LEAD_HOURS);
        let arrival_sent_now = if event.starts_at - now < lead {
            let text = arrival_message(&holder_name, event, &self.venue_address);
            if let Err(error) = bounded(self.notifier.send_text(order.user_id, text)).await {
                tracing::warn!(%error, "Arrival info not delivered");
            }
            true
        } else {
            let reminder =
                ScheduledJob::for_order(JobKind::ArrivalReminder, event.starts_at - lead, order);
            self.queue(reminder, &mut jobs).await;
            false
        };

        FulfillmentReport {
            ticket_delivered: ticket_error.is_none(),
            ticket_error,
            jobs,
            arrival_sent_now,
        }
    }

    async fn deliver_ticket(
        &self,
        order: &Order,
        event: &Event,
        holder_name: &str,
        loyalty: LoyaltyEffect,
    ) -> Result<(), FulfillmentError> {
        let request = TicketRequest {
            holder_name: holder_name.to_string(),
            event_name: event.short_name.clone(),
            starts_at: event.starts_at,
            venue_address: self.venue_address.clone(),
        };

        let asset = match bounded(self.renderer.render(request)).await {
            Ok(asset) => asset,
            Err(error) => {
                tracing::warn!(%error, "Ticket rendering failed");
                let apology = format!(
                    "Your booking for {} is confirmed, but we could not generate the ticket. \
                     Please contact support and mention order {}.",
                    event.short_name, order.id
                );
                if let Err(error) = bounded(self.notifier.send_text(order.user_id, apology)).await {
                    tracing::warn!(%error, "Support notice not delivered");
                }
                return Err(FulfillmentError::AssetGenerationFailed(error));
            },
        };

        bounded(
            self.notifier
                .send_asset(order.user_id, asset, loyalty.caption(event)),
        )
        .await
        .map_err(|error| {
            tracing::warn!(%error, "Ticket not delivered");
            FulfillmentError::DeliveryFailed(error)
        })
    }

    async fn queue(&self, job: ScheduledJob, accepted: &mut Vec<ScheduledJob>) {
        match self.scheduler.schedule(job.clone()).await {
            Ok(()) => accepted.push(job),
            Err(error) => {
                tracing::error!(%error, kind = ?job.kind, fire_at = %job.fire_at, "Job not scheduled");
            },
        }
    }
}

/// Await a render or notifier call for at most [`DELIVERY_TIMEOUT`]
async fn bounded<T, E: std::fmt::Display>(call: BoxFuture<'_, Result<T, E>>) -> Result<T, String> {
    match tokio::time::timeout(DELIVERY_TIMEOUT, call).await {
        Ok(result) => result.map_err(|error| error.to_string()),
        Err(_) => Err(format!("no answer within {}s", DELIVERY_TIMEOUT.as_secs())),
    }
}

/// How to get to the venue
#[must_use]
pub fn arrival_message(name: &str, event: &Event, venue_address: &str) -> String {
    format!(
        "Hi, {name}! A reminder about {} on {} at {venue_address}. Please don't be late!",
        event.short_name,
        event.starts_at.format("%d.%m at %H:%M"),
    )
}

/// Rating prompt after the event
#[must_use]
pub fn feedback_request_message(event: &Event) -> String {
    format!(
        "Hope you enjoyed {}! Please rate it from 1 to 5, it really helps us.",
        event.short_name
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{FailingRenderer, InMemoryUsers, RecordingNotifier, RecordingScheduler, StubRenderer};
    use crate::order::NewOrder;
    use crate::types::{EventId, Money, OrderId, UserId};
    use boxoffice_testing::test_clock;

    fn event_in(hours: i64) -> Event {
        Event {
            id: EventId::new(1),
            short_name: "Poetry slam".into(),
            description: String::new(),
            starts_at: test_clock().now() + Duration::hours(hours),
            base_price: Money::new(700),
        }
    }

    fn order() -> Order {
        NewOrder {
            user_id: UserId::new(9),
            event_id: EventId::new(1),
            amount: Money::new(700),
            promo_code: None,
            created_at: test_clock().now(),
        }
        .into_order(OrderId::new(3))
    }

    fn fulfillment(
        renderer: Arc<dyn TicketRenderer>,
    ) -> (Fulfillment, Arc<RecordingNotifier>, Arc<RecordingScheduler>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let fulfillment = Fulfillment::new(
            Arc::new(InMemoryUsers::default()),
            renderer,
            notifier.clone(),
            scheduler.clone(),
            Arc::new(test_clock()),
            "1 Main St".into(),
        );
        (fulfillment, notifier, scheduler)
    }

    #[tokio::test]
    async fn schedules_reminder_and_feedback() {
        let (fulfillment, notifier, scheduler) = fulfillment(Arc::new(StubRenderer));
        let event = event_in(72);

        let report = fulfillment
            .on_order_paid(&order(), &event, LoyaltyEffect::Visit { visits: 2 })
            .await;

        assert!(report.ticket_delivered);
        assert!(!report.arrival_sent_now);
        let jobs = scheduler.jobs();
        assert_eq!(jobs.len(), 2);
        let feedback = jobs.iter().find(|j| j.kind == JobKind::FeedbackRequest).unwrap();
        assert_eq!(feedback.fire_at, event.starts_at + Duration::hours(18));
        let arrival = jobs.iter().find(|j| j.kind == JobKind::ArrivalReminder).unwrap();
        assert_eq!(arrival.fire_at, event.starts_at - Duration::hours(24));

        let (_, caption) = &notifier.assets_for(UserId::new(9))[0];
        assert!(caption.contains("Visit 2 of 5"));
    }

    #[tokio::test]
    async fn arrival_sent_immediately_when_close() {
        let (fulfillment, notifier, scheduler) = fulfillment(Arc::new(StubRenderer));

        let report = fulfillment
            .on_order_paid(&order(), &event_in(10), LoyaltyEffect::Unchanged)
            .await;

        assert!(report.arrival_sent_now);
        assert_eq!(scheduler.jobs().len(), 1);
        assert_eq!(scheduler.jobs()[0].kind, JobKind::FeedbackRequest);
        assert_eq!(notifier.texts_for(UserId::new(9)).len(), 1);
    }

    #[tokio::test]
    async fn render_failure_still_schedules_jobs() {
        let (fulfillment, notifier, scheduler) = fulfillment(Arc::new(FailingRenderer));

        let report = fulfillment
            .on_order_paid(&order(), &event_in(72), LoyaltyEffect::Redeemed)
            .await;

        assert!(!report.ticket_delivered);
        assert!(matches!(
            report.ticket_error,
            Some(FulfillmentError::AssetGenerationFailed(_))
        ));
        assert_eq!(scheduler.jobs().len(), 2);
        assert!(notifier.texts_for(UserId::new(9))[0].contains("contact support"));
        assert!(notifier.assets_for(UserId::new(9)).is_empty());
    }

    #[test]
    fn caption_announces_free_next_ticket() {
        let caption = LoyaltyEffect::Visit { visits: 5 }.caption(&event_in(72));
        assert!(caption.contains("next ticket is free"));
    }
}
