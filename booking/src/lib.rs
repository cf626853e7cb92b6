//! # Boxoffice Booking
//!
//! Booking lifecycle engine: turns a user's intent to attend an event into a
//! ticket, an optional payment, a loyalty-program update and a set of
//! deferred follow-ups, without ever issuing a ticket twice.
//!
//! ## Components
//!
//! - [`promo`]: promo and referral code resolution
//! - [`loyalty`]: per-user visit counter
//! - [`pricing`]: base price, loyalty and promo into a final amount
//! - [`order`]: the order aggregate as a reducer, persisted under a per-order lock
//! - [`payment`]: charges, confirmation and refunds against the provider
//! - [`fulfillment`] and [`scheduler`]: ticket delivery and deferred jobs
//! - [`referral`]: invite and reward codes
//! - [`engine`]: the façade composing all of the above
//! - [`dialogue`]: per-user booking conversation state
//! - [`feedback`]: post-event ratings
//! - [`server`]: payment webhook and health endpoints
//!
//! External systems are traits in [`providers`]; in-memory versions live in
//! `mocks` behind the `test-utils` feature.
//!
//! ## Example
//!
//! ```ignore
//! let engine = BookingEngine::new(deps, config.engine_settings());
//!
//! engine.register_user(user, Some("ann".into())).await?;
//! engine.start_booking(user, event_id).await?;
//! engine.save_contacts(user, "Ann Lee", "+100200").await?;
//! let quote = engine.quote(user, event_id, Some("FRIEND-AB12CD")).await?;
//! match engine.book(&quote).await? {
//!     BookingOutcome::Ticket { .. } => {},
//!     BookingOutcome::PaymentLink { url, .. } => send_link(url),
//! }
//! ```

pub mod config;
pub mod dialogue;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod fulfillment;
pub mod loyalty;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod promo;
pub mod providers;
pub mod referral;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use engine::{BookingDeps, BookingEngine, BookingOutcome, EngineSettings};
pub use error::{BookingError, Result};
