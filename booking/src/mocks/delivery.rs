//! Renderer, notifier and scheduler doubles.

use super::lock;
use crate::providers::{
    BoxFuture, JobScheduler, Notifier, NotifyError, RenderError, SchedulerError, TicketAsset,
    TicketRenderer, TicketRequest,
};
use crate::scheduler::ScheduledJob;
use crate::types::UserId;
use futures::FutureExt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Renders a plain-text ticket.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubRenderer;

impl TicketRenderer for StubRenderer {
    fn render(&self, request: TicketRequest) -> BoxFuture<'_, Result<TicketAsset, RenderError>> {
        let body = format!(
            "{}\n{}\n{}\n{}",
            request.event_name,
            request.starts_at.format("%Y-%m-%d %H:%M"),
            request.venue_address,
            request.holder_name,
        );
        futures::future::ready(Ok(TicketAsset {
            file_name: "ticket.txt".to_string(),
            bytes: body.into_bytes(),
        }))
        .boxed()
    }
}

/// Renderer that always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingRenderer;

impl TicketRenderer for FailingRenderer {
    fn render(&self, _request: TicketRequest) -> BoxFuture<'_, Result<TicketAsset, RenderError>> {
        futures::future::ready(Err(RenderError("template missing".to_string()))).boxed()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Sent {
    Text(UserId, String),
    Asset(UserId, TicketAsset, String),
}

/// Records every message; can be switched to failing.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Make every send fail (`true`) or succeed again (`false`)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Texts delivered to `user`, oldest first
    #[must_use]
    pub fn texts_for(&self, user: UserId) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter_map(|sent| match sent {
                Sent::Text(to, text) if *to == user => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Assets delivered to `user` with their captions
    #[must_use]
    pub fn assets_for(&self, user: UserId) -> Vec<(TicketAsset, String)> {
        lock(&self.sent)
            .iter()
            .filter_map(|sent| match sent {
                Sent::Asset(to, asset, caption) if *to == user => {
                    Some((asset.clone(), caption.clone()))
                },
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) -> BoxFuture<'_, Result<(), NotifyError>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(NotifyError("chat unreachable".to_string()))
        } else {
            lock(&self.sent).push(sent);
            Ok(())
        };
        futures::future::ready(result).boxed()
    }
}

impl Notifier for RecordingNotifier {
    fn send_text(&self, user: UserId, text: String) -> BoxFuture<'_, Result<(), NotifyError>> {
        self.record(Sent::Text(user, text))
    }

    fn send_asset(
        &self,
        user: UserId,
        asset: TicketAsset,
        caption: String,
    ) -> BoxFuture<'_, Result<(), NotifyError>> {
        self.record(Sent::Asset(user, asset, caption))
    }
}

/// Accepts and records jobs without running them.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl RecordingScheduler {
    /// Jobs scheduled so far
    #[must_use]
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        lock(&self.jobs).clone()
    }
}

impl JobScheduler for RecordingScheduler {
    fn schedule(&self, job: ScheduledJob) -> BoxFuture<'_, Result<(), SchedulerError>> {
        lock(&self.jobs).push(job);
        futures::future::ready(Ok(())).boxed()
    }
}
