//! Payment webhook over HTTP.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use boxoffice_booking::order::OrderStatus;
use boxoffice_booking::providers::{ProviderError, ProviderStatus};
use boxoffice_booking::server::{AppState, ErrorResponse, WebhookResponse, build_router};
use boxoffice_booking::types::{PaymentMethod, ProviderRef};
use common::{ANN, CONCERT, Harness, harness};
use serde_json::json;

fn server(h: &Harness) -> TestServer {
    TestServer::new(build_router(AppState {
        engine: h.engine.clone(),
    }))
    .unwrap()
}

fn notification(provider_ref: &ProviderRef) -> serde_json::Value {
    json!({
        "type": "notification",
        "event": "payment.succeeded",
        "object": { "id": provider_ref.to_string(), "status": "succeeded" }
    })
}

#[tokio::test]
async fn health_check_answers() {
    let h = harness();
    let response = server(&h).get("/health").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn redelivered_notification_fulfils_once() {
    let h = harness();
    let server = server(&h);
    let (order, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;
    h.provider
        .set_status(&provider_ref, ProviderStatus::Succeeded);

    let first = server
        .post("/webhooks/payments")
        .json(&notification(&provider_ref))
        .await;
    first.assert_status_ok();
    assert_eq!(
        first.json::<WebhookResponse>(),
        WebhookResponse {
            status: "fulfilled".into(),
            order_id: order.id,
        }
    );

    let second = server
        .post("/webhooks/payments")
        .json(&notification(&provider_ref))
        .await;
    second.assert_status_ok();
    assert_eq!(second.json::<WebhookResponse>().status, "already_fulfilled");

    assert_eq!(h.notifier.assets_for(ANN).len(), 1);
    assert_eq!(h.order(&order).status, OrderStatus::Paid);
}

#[tokio::test]
async fn pending_charge_is_acknowledged_without_a_ticket() {
    let h = harness();
    let (order, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;

    let response = server(&h)
        .post("/webhooks/payments")
        .json(&notification(&provider_ref))
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<WebhookResponse>().status, "not_yet_succeeded");
    assert_eq!(h.order(&order).status, OrderStatus::Pending);
}

#[tokio::test]
async fn charge_without_an_order_is_not_found() {
    let h = harness();
    let foreign = ProviderRef::new("foreign-1");
    h.provider
        .insert_foreign_charge(foreign.clone(), ProviderStatus::Succeeded);

    let response = server(&h)
        .post("/webhooks/payments")
        .json(&notification(&foreign))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<ErrorResponse>().code, "NOT_FOUND");
}

#[tokio::test]
async fn provider_outage_asks_for_redelivery() {
    let h = harness();
    let (order, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;
    h.provider
        .set_status(&provider_ref, ProviderStatus::Succeeded);
    h.provider.fail_next(3, &ProviderError::Timeout);

    let server = server(&h);
    let outage = server
        .post("/webhooks/payments")
        .json(&notification(&provider_ref))
        .await;
    outage.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(h.order(&order).status, OrderStatus::Pending);

    let retry = server
        .post("/webhooks/payments")
        .json(&notification(&provider_ref))
        .await;
    retry.assert_status_ok();
    assert_eq!(h.order(&order).status, OrderStatus::Paid);
}

#[tokio::test]
async fn notification_for_a_cancelled_booking_is_acknowledged() {
    let h = harness();
    let server = server(&h);
    let order = h.book_paid(ANN, CONCERT, None).await;
    let Some(PaymentMethod::ProviderCharge(provider_ref)) = order.payment.clone() else {
        panic!("expected a provider charge, got {:?}", order.payment);
    };
    h.engine.cancel_booking(ANN, order.id).await.unwrap();

    let response = server
        .post("/webhooks/payments")
        .json(&notification(&provider_ref))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.json::<WebhookResponse>(),
        WebhookResponse {
            status: "already_cancelled".into(),
            order_id: order.id,
        }
    );
    assert_eq!(h.notifier.assets_for(ANN).len(), 1);
    assert_eq!(h.order(&order).status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn success_after_expiry_is_a_conflict() {
    let h = harness();
    let (order, provider_ref) = h.book_unpaid(ANN, CONCERT, None).await;
    h.provider
        .set_status(&provider_ref, ProviderStatus::Other("canceled".into()));
    h.clock.advance(chrono::Duration::hours(25));
    let report = h
        .engine
        .expire_abandoned(chrono::Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(report.expired, vec![order.id]);

    h.provider
        .set_status(&provider_ref, ProviderStatus::Succeeded);
    let response = server(&h)
        .post("/webhooks/payments")
        .json(&notification(&provider_ref))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(h.order(&order).status, OrderStatus::Cancelled);
    assert!(h.notifier.assets_for(ANN).is_empty());
}
