//! Scriptable payment provider.

use super::lock;
use crate::providers::{
    BoxFuture, Charge, ChargeInfo, ChargeRequest, PaymentProvider, ProviderError, ProviderStatus,
    RefundRequest,
};
use crate::types::{IdempotencyToken, ProviderRef};
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug)]
struct ProviderState {
    next_id: u64,
    charges: HashMap<ProviderRef, ChargeInfo>,
    by_token: HashMap<IdempotencyToken, Charge>,
    charge_attempts: Vec<ChargeRequest>,
    refunds: Vec<RefundRequest>,
    refund_status: ProviderStatus,
    failures: VecDeque<ProviderError>,
}

/// In-memory payment provider.
///
/// Charges start `pending`; tests move them with [`set_status`]. Scripted
/// failures from [`fail_next`] are returned by the next calls of any kind.
/// A repeated charge token returns the original charge.
///
/// [`set_status`]: MockPaymentProvider::set_status
/// [`fail_next`]: MockPaymentProvider::fail_next
#[derive(Debug)]
pub struct MockPaymentProvider {
    state: Mutex<ProviderState>,
}

impl Default for MockPaymentProvider {
    fn default() -> Self {
        Self {
            state: Mutex::new(ProviderState {
                next_id: 0,
                charges: HashMap::new(),
                by_token: HashMap::new(),
                charge_attempts: Vec::new(),
                refunds: Vec::new(),
                refund_status: ProviderStatus::Succeeded,
                failures: VecDeque::new(),
            }),
        }
    }
}

impl MockPaymentProvider {
    /// Move a charge to `status`
    pub fn set_status(&self, reference: &ProviderRef, status: ProviderStatus) {
        if let Some(charge) = lock(&self.state).charges.get_mut(reference) {
            charge.status = status;
        }
    }

    /// Register a charge the engine never created (no metadata)
    pub fn insert_foreign_charge(&self, reference: ProviderRef, status: ProviderStatus) {
        lock(&self.state).charges.insert(
            reference.clone(),
            ChargeInfo {
                provider_ref: reference,
                status,
                metadata: None,
            },
        );
    }

    /// Strip the order id from a charge, as some notifications arrive
    pub fn drop_metadata(&self, reference: &ProviderRef) {
        if let Some(charge) = lock(&self.state).charges.get_mut(reference) {
            charge.metadata = None;
        }
    }

    /// Fail the next `times` calls with `error`
    pub fn fail_next(&self, times: usize, error: &ProviderError) {
        let mut state = lock(&self.state);
        state
            .failures
            .extend(std::iter::repeat_n(error.clone(), times));
    }

    /// Status returned by refunds from now on
    pub fn set_refund_status(&self, status: ProviderStatus) {
        lock(&self.state).refund_status = status;
    }

    /// Every `create_charge` call, failed attempts included
    #[must_use]
    pub fn charge_attempts(&self) -> Vec<ChargeRequest> {
        lock(&self.state).charge_attempts.clone()
    }

    /// Accepted refunds
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundRequest> {
        lock(&self.state).refunds.clone()
    }

    /// Number of distinct charges
    #[must_use]
    pub fn charge_count(&self) -> usize {
        lock(&self.state).by_token.len()
    }
}

impl PaymentProvider for MockPaymentProvider {
    fn create_charge(
        &self,
        request: ChargeRequest,
    ) -> BoxFuture<'_, Result<Charge, ProviderError>> {
        let mut state = lock(&self.state);
        state.charge_attempts.push(request.clone());
        if let Some(error) = state.failures.pop_front() {
            return futures::future::ready(Err(error)).boxed();
        }

        let result = if let Some(existing) = state.by_token.get(&request.idempotency_token) {
            existing.clone()
        } else {
            state.next_id += 1;
            let provider_ref = ProviderRef::new(format!("pay-{}", state.next_id));
            let charge = Charge {
                redirect_url: format!("https://pay.example/checkout/{provider_ref}"),
                provider_ref: provider_ref.clone(),
            };
            state.charges.insert(
                provider_ref.clone(),
                ChargeInfo {
                    provider_ref,
                    status: ProviderStatus::Pending,
                    metadata: Some(request.metadata.clone()),
                },
            );
            state
                .by_token
                .insert(request.idempotency_token, charge.clone());
            charge
        };
        futures::future::ready(Ok(result)).boxed()
    }

    fn get_status(
        &self,
        reference: ProviderRef,
    ) -> BoxFuture<'_, Result<ChargeInfo, ProviderError>> {
        let mut state = lock(&self.state);
        let result = match state.failures.pop_front() {
            Some(error) => Err(error),
            None => state
                .charges
                .get(&reference)
                .cloned()
                .ok_or_else(|| ProviderError::Rejected(format!("unknown charge {reference}"))),
        };
        futures::future::ready(result).boxed()
    }

    fn create_refund(
        &self,
        request: RefundRequest,
    ) -> BoxFuture<'_, Result<ProviderStatus, ProviderError>> {
        let mut state = lock(&self.state);
        let result = match state.failures.pop_front() {
            Some(error) => Err(error),
            None => {
                let status = state.refund_status.clone();
                if matches!(status, ProviderStatus::Succeeded | ProviderStatus::Pending) {
                    state.refunds.push(request);
                }
                Ok(status)
            },
        };
        futures::future::ready(result).boxed()
    }
}
