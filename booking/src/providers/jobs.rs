//! Deferred job scheduling.

use super::BoxFuture;
use crate::scheduler::ScheduledJob;
use thiserror::Error;

/// The job could not be queued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Job scheduling failed: {0}")]
pub struct SchedulerError(pub String);

/// Runs jobs at (or after) their fire time.
pub trait JobScheduler: Send + Sync {
    /// Queue a job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the runner does not accept jobs.
    fn schedule(&self, job: ScheduledJob) -> BoxFuture<'_, Result<(), SchedulerError>>;
}
