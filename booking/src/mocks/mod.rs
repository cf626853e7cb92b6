//! In-memory adapters for tests and the demo binary.
//!
//! - Stores: [`InMemoryCatalog`], [`InMemoryOrders`], [`InMemoryUsers`],
//!   [`InMemoryCodes`], [`InMemoryFeedback`]
//! - [`MockPaymentProvider`]: scriptable provider that records every request
//! - Delivery: [`StubRenderer`], [`FailingRenderer`], [`RecordingNotifier`],
//!   [`RecordingScheduler`]

mod delivery;
mod provider;
mod stores;

pub use delivery::{FailingRenderer, RecordingNotifier, RecordingScheduler, StubRenderer};
pub use provider::MockPaymentProvider;
pub use stores::{InMemoryCatalog, InMemoryCodes, InMemoryFeedback, InMemoryOrders, InMemoryUsers};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poisoning; a panicking test must not cascade into others
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
