//! In-process job runner.
//!
//! Deferred jobs are actions of a [`Store`]: scheduling a job returns an
//! `Effect::Delay` that fires it, and firing re-checks the order before any
//! message goes out. A job whose order is no longer paid finishes as
//! [`JobOutcome::Suppressed`]; jobs are never removed explicitly.

use crate::fulfillment::{arrival_message, feedback_request_message};
use crate::order::{Order, OrderStatus};
use crate::providers::{
    BoxFuture, Catalog, JobScheduler, Notifier, OrderRepository, SchedulerError, UserRepository,
};
use crate::types::{EventId, OrderId, UserId};
use boxoffice_core::{SmallVec, effect::Effect, environment::Clock, reducer::Reducer, smallvec};
use boxoffice_runtime::{Store, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Jobs
// ============================================================================

/// Job identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random `JobId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job does when it fires
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// How to get to the venue, the day before
    ArrivalReminder,
    /// Ask for a rating after the event
    FeedbackRequest,
}

/// A deferred action tied to a paid order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Job id
    pub id: JobId,
    /// What to do
    pub kind: JobKind,
    /// Not before this instant
    pub fire_at: DateTime<Utc>,
    /// Recipient
    pub user_id: UserId,
    /// Event the message is about
    pub event_id: EventId,
    /// Order that must still be paid at fire time
    pub order_id: OrderId,
}

impl ScheduledJob {
    /// A job for `order`
    #[must_use]
    pub fn for_order(kind: JobKind, fire_at: DateTime<Utc>, order: &Order) -> Self {
        Self {
            id: JobId::new(),
            kind,
            fire_at,
            user_id: order.user_id,
            event_id: order.event_id,
            order_id: order.id,
        }
    }
}

/// How a fired job ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Message sent
    Delivered,
    /// Order no longer paid (or gone); nothing sent
    Suppressed {
        /// Order status at fire time
        status: Option<OrderStatus>,
    },
    /// Something failed while firing
    Failed(String),
}

// ============================================================================
// Reducer
// ============================================================================

/// Actions of the job runner
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobAction {
    /// Queue a job
    Schedule(ScheduledJob),
    /// Timer elapsed
    Fire(JobId),
    /// Firing finished
    Finished {
        /// The job
        job: ScheduledJob,
        /// Result
        outcome: JobOutcome,
    },
}

/// Fired jobs counted by outcome
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobTally {
    /// Message sent
    pub delivered: u64,
    /// Order no longer paid
    pub suppressed: u64,
    /// Firing failed
    pub failed: u64,
}

impl JobTally {
    /// Jobs that fired, whatever the outcome
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.delivered + self.suppressed + self.failed
    }
}

/// Jobs waiting for their timer, plus counts of fired ones
#[derive(Clone, Debug, Default)]
pub struct JobRegistry {
    /// Waiting for their timer
    pub pending: HashMap<JobId, ScheduledJob>,
    /// Outcomes so far
    pub tally: JobTally,
}

/// Environment dependencies for the job runner
#[derive(Clone)]
pub struct JobEnvironment {
    /// Order store, for the paid re-check
    pub orders: Arc<dyn OrderRepository>,
    /// User store, for the greeting
    pub users: Arc<dyn UserRepository>,
    /// Event catalog
    pub catalog: Arc<dyn Catalog>,
    /// Message sink
    pub notifier: Arc<dyn Notifier>,
    /// Clock used to turn fire times into delays
    pub clock: Arc<dyn Clock>,
    /// Venue address for arrival reminders
    pub venue_address: String,
}

/// Schedules and fires jobs
#[derive(Clone, Copy, Debug, Default)]
pub struct JobReducer;

impl Reducer for JobReducer {
    type State = JobRegistry;
    type Action = JobAction;
    type Environment = JobEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            JobAction::Schedule(job) => {
                // Fire times in the past fire immediately
                let delay = (job.fire_at - env.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tracing::debug!(job_id = %job.id, kind = ?job.kind, fire_at = %job.fire_at, "Job scheduled");
                let id = job.id;
                state.pending.insert(id, job);
                smallvec![Effect::delay(delay, JobAction::Fire(id))]
            },
            JobAction::Fire(id) => {
                let Some(job) = state.pending.remove(&id) else {
                    return SmallVec::new();
                };
                let env = env.clone();
                smallvec![Effect::future(async move {
                    let outcome = run_job(&job, &env).await;
                    Some(JobAction::Finished { job, outcome })
                })]
            },
            JobAction::Finished { job, outcome } => {
                match &outcome {
                    JobOutcome::Delivered => {
                        state.tally.delivered += 1;
                        metrics::counter!("booking.jobs.fired").increment(1);
                        tracing::info!(job_id = %job.id, order_id = %job.order_id, kind = ?job.kind, "Job delivered");
                    },
                    JobOutcome::Suppressed { status } => {
                        state.tally.suppressed += 1;
                        metrics::counter!("booking.jobs.suppressed").increment(1);
                        tracing::info!(job_id = %job.id, order_id = %job.order_id, ?status, "Job suppressed");
                    },
                    JobOutcome::Failed(reason) => {
                        state.tally.failed += 1;
                        metrics::counter!("booking.jobs.failed").increment(1);
                        tracing::warn!(job_id = %job.id, order_id = %job.order_id, %reason, "Job failed");
                    },
                }
                SmallVec::new()
            },
        }
    }
}

async fn run_job(job: &ScheduledJob, env: &JobEnvironment) -> JobOutcome {
    let order = match env.orders.get(job.order_id).await {
        Ok(order) => order,
        Err(error) => return JobOutcome::Failed(error.to_string()),
    };

    match order {
        Some(order) if order.status == OrderStatus::Paid => {},
        other => {
            return JobOutcome::Suppressed {
                status: other.map(|o| o.status),
            };
        },
    }

    let event = match env.catalog.get_by_id(job.event_id).await {
        Ok(Some(event)) => event,
        Ok(None) => return JobOutcome::Failed(format!("event {} not found", job.event_id)),
        Err(error) => return JobOutcome::Failed(error.to_string()),
    };

    let text = match job.kind {
        JobKind::ArrivalReminder => {
            let name = match env.users.get(job.user_id).await {
                Ok(Some(user)) => user.display_name().to_string(),
                _ => "guest".to_string(),
            };
            arrival_message(&name, &event, &env.venue_address)
        },
        JobKind::FeedbackRequest => feedback_request_message(&event),
    };

    match env.notifier.send_text(job.user_id, text).await {
        Ok(()) => JobOutcome::Delivered,
        Err(error) => JobOutcome::Failed(error.to_string()),
    }
}

// ============================================================================
// Runner
// ============================================================================

/// [`JobScheduler`] backed by a [`Store`] and tokio timers.
#[derive(Clone)]
pub struct JobRunner {
    store: Store<JobRegistry, JobAction, JobEnvironment, JobReducer>,
}

impl JobRunner {
    /// Start a runner with no jobs
    #[must_use]
    pub fn new(env: JobEnvironment) -> Self {
        Self {
            store: Store::new(JobRegistry::default(), JobReducer, env),
        }
    }

    /// Jobs still waiting for their timer
    pub async fn pending(&self) -> Vec<ScheduledJob> {
        self.store
            .state(|s| s.pending.values().cloned().collect())
            .await
    }

    /// Counts of fired jobs by outcome
    pub async fn tally(&self) -> JobTally {
        self.store.state(|s| s.tally).await
    }

    /// Receive every job action fed back by a timer or a finished job.
    ///
    /// Only actions produced after the call are seen; a slow receiver
    /// gets [`broadcast::error::RecvError::Lagged`] and skips ahead.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobAction> {
        self.store.subscribe_actions()
    }

    /// Stop accepting jobs and wait for running ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if timers are still pending
    /// after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.store.shutdown(timeout).await
    }
}

impl JobScheduler for JobRunner {
    fn schedule(&self, job: ScheduledJob) -> BoxFuture<'_, Result<(), SchedulerError>> {
        Box::pin(async move {
            self.store
                .send(JobAction::Schedule(job))
                .await
                .map(|_| ())
                .map_err(|e| SchedulerError(e.to_string()))
        })
    }
}
