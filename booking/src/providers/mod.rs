//! Traits for the collaborators the booking engine talks to.
//!
//! Every adapter is used as `Arc<dyn Trait>`, so methods return boxed
//! futures rather than `impl Future`.

mod catalog;
mod codes;
mod feedback;
mod jobs;
mod notifier;
mod orders;
mod payments;
mod renderer;
mod users;

pub use catalog::Catalog;
pub use codes::CodeRepository;
pub use feedback::FeedbackRepository;
pub use jobs::{JobScheduler, SchedulerError};
pub use notifier::{NotifyError, Notifier};
pub use orders::OrderRepository;
pub use payments::{
    Charge, ChargeInfo, ChargeMetadata, ChargeRequest, PaymentProvider, ProviderError,
    ProviderStatus, RefundRequest,
};
pub use renderer::{RenderError, TicketAsset, TicketRenderer, TicketRequest};
pub use users::UserRepository;

/// Boxed future returned by adapter methods
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;
