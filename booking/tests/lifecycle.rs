//! End-to-end booking flows over in-memory adapters.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use boxoffice_booking::BookingError;
use boxoffice_booking::order::{OrderError, OrderStatus};
use boxoffice_booking::payment::{ChargeOutcome, Confirmation, PaymentError, RefundOutcome};
use boxoffice_booking::promo::{CodeKind, CodeStatus, PromoError};
use boxoffice_booking::providers::{ProviderError, ProviderStatus, UserRepository};
use boxoffice_booking::scheduler::{JobAction, JobOutcome};
use boxoffice_booking::types::{Money, PaymentMethod};
use common::{ANN, BOB, CAROL, CONCERT, DAN, OPEN_DAY, VENUE, eventually, harness, harness_with_runner};
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::test]
async fn confirming_twice_issues_one_ticket() {
    let h = harness();
    let (order, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(
        order.payment,
        Some(PaymentMethod::ProviderCharge(provider_ref.clone()))
    );

    h.provider
        .set_status(&provider_ref, ProviderStatus::Succeeded);
    let first = h.engine.confirm_payment(&provider_ref).await.unwrap();
    let second = h.engine.confirm_payment(&provider_ref).await.unwrap();

    assert!(matches!(first, Confirmation::Fulfilled { .. }));
    assert_eq!(second, Confirmation::AlreadyFulfilled(order.id));
    assert_eq!(h.notifier.assets_for(ANN).len(), 1);
    assert_eq!(h.visits(ANN).await, 1);
    assert_eq!(h.scheduler.jobs().len(), 2);
    assert_eq!(h.order(&order).status, OrderStatus::Paid);
}

#[tokio::test]
async fn unfinished_charges_leave_the_order_pending() {
    let h = harness();
    let (order, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;

    let pending = h.engine.confirm_payment(&provider_ref).await.unwrap();
    assert_eq!(pending, Confirmation::NotYetSucceeded(order.id));

    h.provider
        .set_status(&provider_ref, ProviderStatus::Other("canceled".into()));
    let failed = h.engine.confirm_payment(&provider_ref).await.unwrap();
    assert_eq!(
        failed,
        Confirmation::Failed {
            order_id: order.id,
            status: ProviderStatus::Other("canceled".into()),
        }
    );

    assert_eq!(h.order(&order).status, OrderStatus::Pending);
    assert!(h.notifier.assets_for(ANN).is_empty());
    assert_eq!(h.visits(ANN).await, 0);
}

#[tokio::test]
async fn a_second_booking_for_the_same_event_is_refused() {
    let h = harness();
    let stale_quote = h.quote(ANN, CONCERT, None).await;
    h.book_paid(ANN, CONCERT, None).await;

    let started = h.engine.start_booking(ANN, CONCERT).await;
    assert!(matches!(started, Err(BookingError::AlreadyBooked { .. })));

    let booked = h.engine.book(&stale_quote).await;
    assert!(matches!(booked, Err(BookingError::AlreadyBooked { .. })));
}

#[tokio::test]
async fn fifth_visit_earns_a_free_ticket_that_cancellation_gives_back() {
    let h = harness();
    h.engine.register_user(ANN, None).await.unwrap();
    h.users.set_loyalty_visits(ANN, 5).await.unwrap();

    let quote = h.quote(ANN, CONCERT, None).await;
    assert!(quote.price.loyalty_free);
    assert_eq!(quote.price.final_price, Money::ZERO);

    let order = match h.engine.book(&quote).await.unwrap() {
        ChargeOutcome::Ticket { order, report } => {
            assert!(report.ticket_delivered);
            order
        },
        other => panic!("expected a free ticket, got {other:?}"),
    };
    assert_eq!(order.payment, Some(PaymentMethod::LoyaltyRedeemed));
    assert_eq!(h.provider.charge_count(), 0);
    assert_eq!(h.visits(ANN).await, 0);

    let cancelled = h.engine.cancel_booking(ANN, order.id).await.unwrap();
    assert_eq!(cancelled.refund, RefundOutcome::LoyaltyRestored);
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(h.visits(ANN).await, 5);
    assert!(h.provider.refunds().is_empty());
}

#[tokio::test]
async fn free_event_issues_a_ticket_without_touching_loyalty() {
    let h = harness();
    let quote = h.quote(ANN, OPEN_DAY, None).await;

    let outcome = h.engine.book(&quote).await.unwrap();
    let ChargeOutcome::Ticket { order, .. } = outcome else {
        panic!("expected a ticket, got {outcome:?}");
    };
    assert_eq!(order.payment, Some(PaymentMethod::FreeEvent));
    assert_eq!(h.provider.charge_count(), 0);
    assert_eq!(h.visits(ANN).await, 0);

    let cancelled = h.engine.cancel_booking(ANN, order.id).await.unwrap();
    assert_eq!(cancelled.refund, RefundOutcome::NothingToRefund);
}

#[tokio::test]
async fn cancellation_closes_exactly_48_hours_before_the_start() {
    let h = harness();
    let order = h.book_paid(ANN, CONCERT, None).await;
    let starts_at = h.event_start(CONCERT);

    for offset in [
        chrono::Duration::hours(48) - chrono::Duration::seconds(1),
        chrono::Duration::hours(48),
    ] {
        h.clock.set(starts_at - offset);
        let result = h.engine.cancel_booking(ANN, order.id).await;
        assert!(
            matches!(
                result,
                Err(BookingError::Order(OrderError::CancellationWindowClosed { .. }))
            ),
            "cancel at {offset} before start should be refused"
        );
        assert_eq!(h.order(&order).status, OrderStatus::Paid);
    }
    assert!(h.provider.refunds().is_empty());

    h.clock
        .set(starts_at - chrono::Duration::hours(48) - chrono::Duration::seconds(1));
    let cancelled = h.engine.cancel_booking(ANN, order.id).await.unwrap();

    assert_eq!(
        cancelled.refund,
        RefundOutcome::Refunded {
            status: ProviderStatus::Succeeded,
            amount: Money::new(1000),
        }
    );
    assert_eq!(cancelled.order.payment, Some(PaymentMethod::UserCancelled));
    assert_eq!(h.provider.refunds().len(), 1);
    assert_eq!(h.visits(ANN).await, 0);
    assert!(
        h.notifier
            .texts_for(ANN)
            .iter()
            .any(|t| t.contains("cancelled"))
    );
}

#[tokio::test]
async fn rejected_refund_keeps_the_order_paid() {
    let h = harness();
    let order = h.book_paid(ANN, CONCERT, None).await;

    h.provider
        .set_refund_status(ProviderStatus::Other("rejected".into()));
    let rejected = h.engine.cancel_booking(ANN, order.id).await;
    assert!(matches!(rejected, Err(BookingError::RefundFailed(_))));

    h.provider.set_refund_status(ProviderStatus::Succeeded);
    h.provider
        .fail_next(3, &ProviderError::Unavailable("maintenance".into()));
    let unreachable = h.engine.cancel_booking(ANN, order.id).await;
    assert!(matches!(unreachable, Err(BookingError::RefundFailed(_))));

    assert_eq!(h.order(&order).status, OrderStatus::Paid);
    assert_eq!(h.visits(ANN).await, 1);
    assert!(h.provider.refunds().is_empty());
}

#[tokio::test]
async fn confirming_after_cancellation_changes_nothing() {
    let h = harness();
    let (_, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;
    h.provider
        .set_status(&provider_ref, ProviderStatus::Succeeded);
    let Confirmation::Fulfilled { order, .. } =
        h.engine.confirm_payment(&provider_ref).await.unwrap()
    else {
        panic!("expected fulfilment");
    };
    h.engine.cancel_booking(ANN, order.id).await.unwrap();

    let again = h.engine.confirm_payment(&provider_ref).await.unwrap();

    assert_eq!(again, Confirmation::AlreadyCancelled(order.id));
    assert_eq!(h.order(&order).status, OrderStatus::Cancelled);
    assert_eq!(h.notifier.assets_for(ANN).len(), 1);
    assert_eq!(h.visits(ANN).await, 0);
}

#[tokio::test]
async fn failed_cancellation_write_leaves_loyalty_alone() {
    let h = harness();
    let order = h.book_paid(ANN, CONCERT, None).await;
    assert_eq!(h.visits(ANN).await, 1);

    h.orders.set_failing_writes(true);
    let result = h.engine.cancel_booking(ANN, order.id).await;
    h.orders.set_failing_writes(false);

    assert!(matches!(result, Err(BookingError::Storage(_))));
    assert_eq!(h.order(&order).status, OrderStatus::Paid);
    assert_eq!(h.visits(ANN).await, 1);
}

#[tokio::test]
async fn charge_without_metadata_is_matched_by_reference() {
    let h = harness();
    let (order, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;
    h.provider
        .set_status(&provider_ref, ProviderStatus::Succeeded);
    h.provider.drop_metadata(&provider_ref);

    let confirmation = h.engine.confirm_payment(&provider_ref).await.unwrap();

    assert!(matches!(confirmation, Confirmation::Fulfilled { .. }));
    assert_eq!(h.order(&order).status, OrderStatus::Paid);
}

#[tokio::test]
async fn only_the_owner_may_cancel() {
    let h = harness();
    let order = h.book_paid(ANN, CONCERT, None).await;
    h.engine.register_user(BOB, None).await.unwrap();

    let result = h.engine.cancel_booking(BOB, order.id).await;
    assert!(matches!(result, Err(BookingError::NotOwner { .. })));
    assert_eq!(h.order(&order).status, OrderStatus::Paid);
}

#[tokio::test]
async fn pending_orders_cannot_be_cancelled() {
    let h = harness();
    let (order, _) = h.book_unpaid(ANN, CONCERT, None).await;

    let result = h.engine.cancel_booking(ANN, order.id).await;
    assert!(matches!(
        result,
        Err(BookingError::Order(OrderError::InvalidTransition {
            from: OrderStatus::Pending,
            ..
        }))
    ));
}

#[tokio::test]
async fn transient_failures_retry_with_the_same_token() {
    let h = harness();
    let quote = h.quote(ANN, CONCERT, None).await;
    h.provider
        .fail_next(2, &ProviderError::Unavailable("maintenance".into()));

    let outcome = h.engine.book(&quote).await.unwrap();
    assert!(matches!(outcome, ChargeOutcome::PaymentLink { .. }));

    let attempts = h.provider.charge_attempts();
    assert_eq!(attempts.len(), 3);
    assert!(
        attempts
            .iter()
            .all(|a| a.idempotency_token == attempts[0].idempotency_token)
    );
    assert_eq!(h.provider.charge_count(), 1);
}

#[tokio::test]
async fn rejected_charges_are_not_retried() {
    let h = harness();
    let quote = h.quote(ANN, CONCERT, None).await;
    h.provider
        .fail_next(1, &ProviderError::Rejected("amount too small".into()));

    let result = h.engine.book(&quote).await;
    assert!(matches!(
        result,
        Err(BookingError::Payment(PaymentError::Failed(_)))
    ));
    assert_eq!(h.provider.charge_attempts().len(), 1);

    let orders = h.orders.all();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert_eq!(orders[0].payment, None);
}

#[tokio::test]
async fn expiry_checks_the_provider_before_cancelling() {
    let h = harness();
    let (waiting, _) = h.book_unpaid(ANN, CONCERT, None).await;
    let (succeeded, succeeded_ref) = h.book_unpaid(BOB, CONCERT, None).await;
    let (abandoned, abandoned_ref) = h.book_unpaid(CAROL, CONCERT, None).await;

    let quote = h.quote(DAN, CONCERT, None).await;
    h.provider
        .fail_next(3, &ProviderError::Unavailable("maintenance".into()));
    let outage = h.engine.book(&quote).await;
    assert!(matches!(
        outage,
        Err(BookingError::Payment(PaymentError::ProviderUnavailable(_)))
    ));
    let uncharged = h.orders.all().into_iter().find(|o| o.user_id == DAN).unwrap();

    h.provider
        .set_status(&succeeded_ref, ProviderStatus::Succeeded);
    h.provider
        .set_status(&abandoned_ref, ProviderStatus::Other("canceled".into()));
    h.clock.advance(chrono::Duration::hours(25));
    let (fresh, _) = h.book_unpaid(CAROL, CONCERT, None).await;

    let report = h
        .engine
        .expire_abandoned(chrono::Duration::hours(24))
        .await
        .unwrap();

    assert_eq!(report.expired, vec![abandoned.id, uncharged.id]);
    assert_eq!(report.confirmed, vec![succeeded.id]);
    assert_eq!(report.skipped, vec![waiting.id]);

    assert_eq!(h.order(&waiting).status, OrderStatus::Pending);
    assert_eq!(h.order(&succeeded).status, OrderStatus::Paid);
    assert_eq!(h.order(&abandoned).status, OrderStatus::Cancelled);
    assert_eq!(h.order(&uncharged).status, OrderStatus::Cancelled);
    assert_eq!(h.order(&fresh).status, OrderStatus::Pending);
}

#[tokio::test]
async fn referral_codes_reward_the_inviter_once() {
    let h = harness();
    h.engine.register_user(ANN, None).await.unwrap();
    let invite = h.engine.invite_friend(ANN).await.unwrap();
    assert!(invite.starts_with("FRIEND-"));

    let own = h.quote(ANN, CONCERT, Some(&invite)).await;
    assert_eq!(own.price.final_price, Money::new(1000));
    assert_eq!(
        own.notice.map(|n| n.reason),
        Some(PromoError::OwnCodeRejected)
    );

    let friend_quote = h.quote(BOB, CONCERT, Some(&invite.to_lowercase())).await;
    assert_eq!(friend_quote.price.final_price, Money::new(800));
    assert!(friend_quote.notice.is_none());
    h.book_paid(BOB, CONCERT, Some(&invite)).await;

    let codes = h.codes.all();
    let activated = codes.iter().find(|c| c.code == invite).unwrap();
    assert_eq!(activated.status, CodeStatus::Used);
    assert_eq!(activated.friend, Some(BOB));
    let reward = activated.reward_code.clone().unwrap();
    let reward_record = codes.iter().find(|c| c.code == reward).unwrap();
    assert_eq!(reward_record.kind, CodeKind::Reward);
    assert_eq!(reward_record.owner, Some(ANN));
    assert_eq!(reward_record.status, CodeStatus::Active);

    let notifier = h.notifier.clone();
    eventually(|| notifier.texts_for(ANN).iter().any(|t| t.contains(&reward))).await;

    let replay = h.quote(CAROL, CONCERT, Some(&invite)).await;
    assert_eq!(replay.notice.map(|n| n.reason), Some(PromoError::AlreadyUsed));

    let order = h.book_paid(ANN, CONCERT, Some(&reward)).await;
    assert_eq!(order.amount, Money::new(800));
    let consumed = h.codes.all().into_iter().find(|c| c.code == reward).unwrap();
    assert_eq!(consumed.status, CodeStatus::Used);

    let second = h.quote(DAN, CONCERT, Some(&reward)).await;
    assert_eq!(second.price.final_price, Money::new(1000));
    assert_eq!(second.notice.map(|n| n.reason), Some(PromoError::AlreadyUsed));
}

#[tokio::test]
async fn tickets_and_feedback_follow_paid_orders() {
    let h = harness();
    let concert = h.book_paid(ANN, CONCERT, None).await;
    let quote = h.quote(ANN, OPEN_DAY, None).await;
    h.engine.book(&quote).await.unwrap();

    let tickets = h.engine.my_tickets(ANN).await.unwrap();
    let events: Vec<_> = tickets.iter().map(|(_, e)| e.id).collect();
    assert_eq!(events, vec![OPEN_DAY, CONCERT]);

    let feedback = h
        .engine
        .record_feedback(ANN, concert.id, 5, "  loved it ".into())
        .await
        .unwrap();
    assert_eq!(feedback.text, "loved it");
    assert_eq!(feedback.event_id, CONCERT);

    h.clock.advance(chrono::Duration::days(8));
    assert!(h.engine.my_tickets(ANN).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reminders_fire_for_paid_orders() {
    let (h, runner) = harness_with_runner();
    let mut actions = runner.subscribe();
    h.book_paid(ANN, CONCERT, None).await;
    assert_eq!(runner.pending().await.len(), 2);

    let outcomes = finished_jobs(&mut actions, 2).await;

    assert!(outcomes.iter().all(|o| *o == JobOutcome::Delivered));
    assert!(h.notifier.texts_for(ANN).iter().any(|t| t.contains(VENUE)));
    assert_eq!(runner.tally().await.delivered, 2);
    assert!(runner.pending().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reminders_are_suppressed_after_cancellation() {
    let (h, runner) = harness_with_runner();
    let mut actions = runner.subscribe();
    let order = h.book_paid(ANN, CONCERT, None).await;
    h.engine.cancel_booking(ANN, order.id).await.unwrap();

    let outcomes = finished_jobs(&mut actions, 2).await;

    assert!(!h.notifier.texts_for(ANN).iter().any(|t| t.contains(VENUE)));
    for outcome in outcomes {
        assert_eq!(
            outcome,
            JobOutcome::Suppressed {
                status: Some(OrderStatus::Cancelled)
            }
        );
    }
    assert_eq!(runner.tally().await.suppressed, 2);
}

/// Outcomes of the next `count` jobs to finish; paused time skips ahead
async fn finished_jobs(
    actions: &mut broadcast::Receiver<JobAction>,
    count: usize,
) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    while outcomes.len() < count {
        let next = tokio::time::timeout(Duration::from_secs(30 * 24 * 3600), actions.recv())
            .await
            .unwrap_or_else(|_| panic!("only {} jobs finished", outcomes.len()));
        match next {
            Ok(JobAction::Finished { outcome, .. }) => outcomes.push(outcome),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
            Err(broadcast::error::RecvError::Closed) => panic!("job runner stopped"),
        }
    }
    outcomes
}
