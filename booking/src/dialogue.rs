//! Booking Dialogue.
//!
//! Per-user conversation state of the booking flow:
//!
//! ```text
//! Idle → AwaitingName → AwaitingPhone → AwaitingPromo ─┬─→ Confirming → Idle
//!                                                      └─→ AwaitingPromoCode ─┘
//! ```
//!
//! Input that does not fit the current step leaves the state untouched and
//! records a [`DialogueRejection`].

use crate::types::{EventId, UserId};
use boxoffice_core::environment::Clock;
use boxoffice_core::{SmallVec, effect::Effect, reducer::Reducer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Answers collected so far
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    /// Chosen event
    pub event_id: Option<EventId>,
    /// Full name
    pub full_name: Option<String>,
    /// Phone number
    pub phone: Option<String>,
    /// Promo code as typed
    pub promo_code: Option<String>,
}

/// Current step of the conversation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "draft", rename_all = "snake_case")]
pub enum Dialogue {
    /// No booking in progress
    #[default]
    Idle,
    /// Waiting for the full name
    AwaitingName(BookingDraft),
    /// Waiting for the phone number
    AwaitingPhone(BookingDraft),
    /// Asking whether the user has a promo code
    AwaitingPromo(BookingDraft),
    /// Waiting for the promo code itself
    AwaitingPromoCode(BookingDraft),
    /// Waiting for the final confirmation
    Confirming(BookingDraft),
}

impl Dialogue {
    /// Step name for logs
    #[must_use]
    pub const fn step(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingName(_) => "awaiting_name",
            Self::AwaitingPhone(_) => "awaiting_phone",
            Self::AwaitingPromo(_) => "awaiting_promo",
            Self::AwaitingPromoCode(_) => "awaiting_promo_code",
            Self::Confirming(_) => "confirming",
        }
    }

    /// The draft, if a booking is in progress
    #[must_use]
    pub const fn draft(&self) -> Option<&BookingDraft> {
        match self {
            Self::Idle => None,
            Self::AwaitingName(d)
            | Self::AwaitingPhone(d)
            | Self::AwaitingPromo(d)
            | Self::AwaitingPromoCode(d)
            | Self::Confirming(d) => Some(d),
        }
    }
}

/// User input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueAction {
    /// Event picked; starts over if a booking was in progress
    Start {
        /// The event
        event_id: EventId,
    },
    /// Name typed
    NameEntered(String),
    /// Phone typed
    PhoneEntered(String),
    /// Answer to "do you have a promo code?"
    PromoChosen {
        /// Whether the user wants to enter one
        has_code: bool,
    },
    /// Promo code typed
    PromoEntered(String),
    /// Booking confirmed
    Confirmed,
    /// Booking abandoned
    Reset,
}

impl DialogueAction {
    const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::NameEntered(_) => "name",
            Self::PhoneEntered(_) => "phone",
            Self::PromoChosen { .. } => "promo_choice",
            Self::PromoEntered(_) => "promo_code",
            Self::Confirmed => "confirm",
            Self::Reset => "reset",
        }
    }
}

/// Ignored input
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueRejection {
    /// Blank name
    #[error("Name cannot be empty")]
    EmptyName,

    /// Blank phone
    #[error("Phone cannot be empty")]
    EmptyPhone,

    /// Blank promo code
    #[error("Promo code cannot be empty")]
    EmptyPromoCode,

    /// Input for another step
    #[error("Unexpected {action} while {step}")]
    OutOfOrder {
        /// Current step
        step: String,
        /// Input received
        action: String,
    },
}

/// Conversation state of one user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueState {
    /// Current step
    pub dialogue: Dialogue,
    /// Why the last input was ignored
    pub last_rejection: Option<DialogueRejection>,
    /// Draft completed by the last `Confirmed`
    pub submitted: Option<BookingDraft>,
    /// Last accepted input
    pub updated_at: Option<DateTime<Utc>>,
}

/// Environment dependencies for the dialogue
#[derive(Clone)]
pub struct DialogueEnvironment {
    /// Clock for activity timestamps
    pub clock: Arc<dyn Clock>,
}

impl DialogueEnvironment {
    /// Creates a new `DialogueEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

enum Step {
    Accepted,
    Submitted(BookingDraft),
    Rejected(DialogueRejection),
}

/// Drives the booking conversation
#[derive(Clone, Copy, Debug, Default)]
pub struct DialogueReducer;

fn non_empty(input: &str, rejection: DialogueRejection) -> Result<String, DialogueRejection> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Err(rejection)
    } else {
        Ok(trimmed.to_string())
    }
}

impl DialogueReducer {
    fn step(dialogue: Dialogue, action: DialogueAction) -> (Dialogue, Step) {
        use Dialogue as D;
        use DialogueAction as A;

        match (dialogue, action) {
            (_, A::Start { event_id }) => (
                D::AwaitingName(BookingDraft {
                    event_id: Some(event_id),
                    ..BookingDraft::default()
                }),
                Step::Accepted,
            ),
            (_, A::Reset) => (D::Idle, Step::Accepted),
            (D::AwaitingName(mut draft), A::NameEntered(name)) => {
                match non_empty(&name, DialogueRejection::EmptyName) {
                    Ok(name) => {
                        draft.full_name = Some(name);
                        (D::AwaitingPhone(draft), Step::Accepted)
                    },
                    Err(rejection) => (D::AwaitingName(draft), Step::Rejected(rejection)),
                }
            },
            (D::AwaitingPhone(mut draft), A::PhoneEntered(phone)) => {
                match non_empty(&phone, DialogueRejection::EmptyPhone) {
                    Ok(phone) => {
                        draft.phone = Some(phone);
                        (D::AwaitingPromo(draft), Step::Accepted)
                    },
                    Err(rejection) => (D::AwaitingPhone(draft), Step::Rejected(rejection)),
                }
            },
            (D::AwaitingPromo(draft), A::PromoChosen { has_code: true }) => {
                (D::AwaitingPromoCode(draft), Step::Accepted)
            },
            (D::AwaitingPromo(draft), A::PromoChosen { has_code: false }) => {
                (D::Confirming(draft), Step::Accepted)
            },
            (D::AwaitingPromoCode(mut draft), A::PromoEntered(code)) => {
                match non_empty(&code, DialogueRejection::EmptyPromoCode) {
                    Ok(code) => {
                        draft.promo_code = Some(code);
                        (D::Confirming(draft), Step::Accepted)
                    },
                    Err(rejection) => (D::AwaitingPromoCode(draft), Step::Rejected(rejection)),
                }
            },
            (D::Confirming(draft), A::Confirmed) => (D::Idle, Step::Submitted(draft)),
            (dialogue, action) => {
                let rejection = DialogueRejection::OutOfOrder {
                    step: dialogue.step().to_string(),
                    action: action.name().to_string(),
                };
                (dialogue, Step::Rejected(rejection))
            },
        }
    }
}

impl Reducer for DialogueReducer {
    type State = DialogueState;
    type Action = DialogueAction;
    type Environment = DialogueEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let dialogue = std::mem::take(&mut state.dialogue);
        let (next, step) = Self::step(dialogue, action);
        match step {
            Step::Accepted => {
                state.submitted = None;
                state.last_rejection = None;
                state.updated_at = Some(env.clock.now());
            },
            Step::Submitted(draft) => {
                state.submitted = Some(draft);
                state.last_rejection = None;
                state.updated_at = Some(env.clock.now());
            },
            Step::Rejected(rejection) => {
                tracing::debug!(step = next.step(), %rejection, "Dialogue input ignored");
                state.last_rejection = Some(rejection);
            },
        }
        state.dialogue = next;
        SmallVec::new()
    }
}

/// Dialogue state of every user.
pub struct DialogueSessions {
    sessions: RwLock<HashMap<UserId, DialogueState>>,
    env: DialogueEnvironment,
}

impl DialogueSessions {
    /// Empty session table
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            env: DialogueEnvironment::new(clock),
        }
    }

    /// Feed input from `user` and return the resulting state
    pub async fn apply(&self, user: UserId, action: DialogueAction) -> DialogueState {
        let mut sessions = self.sessions.write().await;
        let state = sessions.entry(user).or_default();
        DialogueReducer.reduce(state, action, &self.env);
        let snapshot = state.clone();
        if snapshot.dialogue == Dialogue::Idle {
            sessions.remove(&user);
        }
        snapshot
    }

    /// Current state of `user`
    pub async fn get(&self, user: UserId) -> DialogueState {
        self.sessions
            .read()
            .await
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_testing::{ReducerTest, assertions, test_clock};

    fn env() -> DialogueEnvironment {
        DialogueEnvironment::new(Arc::new(test_clock()))
    }

    fn at(dialogue: Dialogue) -> DialogueState {
        DialogueState {
            dialogue,
            ..DialogueState::default()
        }
    }

    fn draft() -> BookingDraft {
        BookingDraft {
            event_id: Some(EventId::new(7)),
            full_name: Some("Ann Lee".into()),
            phone: Some("+100200".into()),
            promo_code: None,
        }
    }

    #[test]
    fn full_flow_with_promo_code() {
        ReducerTest::new(DialogueReducer)
            .with_env(env())
            .given_state(DialogueState::default())
            .when_action(DialogueAction::Start { event_id: EventId::new(7) })
            .when_action(DialogueAction::NameEntered(" Ann Lee ".into()))
            .when_action(DialogueAction::PhoneEntered("+100200".into()))
            .when_action(DialogueAction::PromoChosen { has_code: true })
            .when_action(DialogueAction::PromoEntered("friend-abc123".into()))
            .when_action(DialogueAction::Confirmed)
            .then_state(|state| {
                assert_eq!(state.dialogue, Dialogue::Idle);
                let submitted = state.submitted.as_ref().unwrap();
                assert_eq!(submitted.full_name.as_deref(), Some("Ann Lee"));
                assert_eq!(submitted.promo_code.as_deref(), Some("friend-abc123"));
                assert!(state.last_rejection.is_none());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn no_promo_goes_straight_to_confirmation() {
        ReducerTest::new(DialogueReducer)
            .with_env(env())
            .given_state(at(Dialogue::AwaitingPromo(draft())))
            .when_action(DialogueAction::PromoChosen { has_code: false })
            .then_state(|state| assert_eq!(state.dialogue, Dialogue::Confirming(draft())))
            .run();
    }

    #[test]
    fn blank_name_is_rejected() {
        ReducerTest::new(DialogueReducer)
            .with_env(env())
            .given_state(at(Dialogue::AwaitingName(BookingDraft::default())))
            .when_action(DialogueAction::NameEntered("   ".into()))
            .then_state(|state| {
                assert_eq!(state.dialogue.step(), "awaiting_name");
                assert_eq!(state.last_rejection, Some(DialogueRejection::EmptyName));
            })
            .run();
    }

    #[test]
    fn blank_phone_is_rejected() {
        ReducerTest::new(DialogueReducer)
            .with_env(env())
            .given_state(at(Dialogue::AwaitingPhone(draft())))
            .when_action(DialogueAction::PhoneEntered(String::new()))
            .then_state(|state| {
                assert_eq!(state.dialogue, Dialogue::AwaitingPhone(draft()));
                assert_eq!(state.last_rejection, Some(DialogueRejection::EmptyPhone));
            })
            .run();
    }

    #[test]
    fn out_of_order_input_is_ignored() {
        ReducerTest::new(DialogueReducer)
            .with_env(env())
            .given_state(at(Dialogue::AwaitingName(draft())))
            .when_action(DialogueAction::Confirmed)
            .then_state(|state| {
                assert_eq!(state.dialogue, Dialogue::AwaitingName(draft()));
                assert!(matches!(
                    state.last_rejection,
                    Some(DialogueRejection::OutOfOrder { .. })
                ));
                assert!(state.submitted.is_none());
            })
            .run();
    }

    #[test]
    fn accepted_input_clears_the_rejection() {
        ReducerTest::new(DialogueReducer)
            .with_env(env())
            .given_state(at(Dialogue::AwaitingName(BookingDraft::default())))
            .when_action(DialogueAction::NameEntered(String::new()))
            .when_action(DialogueAction::NameEntered("Bo".into()))
            .then_state(|state| {
                assert!(state.last_rejection.is_none());
                assert_eq!(state.dialogue.step(), "awaiting_phone");
            })
            .run();
    }

    #[test]
    fn reset_abandons_the_draft() {
        ReducerTest::new(DialogueReducer)
            .with_env(env())
            .given_state(at(Dialogue::Confirming(draft())))
            .when_action(DialogueAction::Reset)
            .then_state(|state| {
                assert_eq!(state.dialogue, Dialogue::Idle);
                assert!(state.submitted.is_none());
            })
            .run();
    }

    #[tokio::test]
    async fn sessions_are_kept_per_user() {
        let sessions = DialogueSessions::new(Arc::new(test_clock()));
        let ann = UserId::new(1);
        let bob = UserId::new(2);

        sessions
            .apply(ann, DialogueAction::Start { event_id: EventId::new(1) })
            .await;
        sessions
            .apply(ann, DialogueAction::NameEntered("Ann".into()))
            .await;

        assert_eq!(sessions.get(ann).await.dialogue.step(), "awaiting_phone");
        assert_eq!(sessions.get(bob).await.dialogue, Dialogue::Idle);

        let state = sessions.apply(ann, DialogueAction::Reset).await;
        assert_eq!(state.dialogue, Dialogue::Idle);
    }
}
