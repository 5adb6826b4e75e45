//! Declarative effects returned by command handlers and step callbacks.
//!
//! A command handler returns an [`Effect`]; a step's `and_then` callback
//! returns a [`TransitionalEffect`]. Neither performs anything by itself:
//! the state machine resolves them and the runtime interprets the result.
//!
//! ```ignore
//! Effects::update_state(state.with_status(Status::WithdrawSucceed))
//!     .transition_to("deposit", Deposit { to, amount })
//!     .then_reply(Message::new("transfer started"))
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::call::DeferredCall;

/// Encode a value, falling back to null. Failures are logged; they only
/// happen for types whose `Serialize` impl itself errors.
pub(crate) fn encode_value<T: Serialize + ?Sized>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode workflow value");
        serde_json::Value::Null
    })
}

/// Where the workflow goes next.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Make `step` the active step and invoke it with `input`.
    To {
        step: String,
        input: Option<serde_json::Value>,
    },
    /// Stop automatic progression until a command transitions again.
    Pause,
    /// Finish the workflow.
    End,
}

/// Key/value metadata attached to replies and deferred calls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Error classification carried by error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[default]
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorCode {
    /// HTTP status equivalent.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }
}

/// Reply part of an effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Acknowledge without a payload.
    Empty,
    /// Reply with a message.
    Message {
        payload: serde_json::Value,
        metadata: Metadata,
    },
    /// Reply with an error. Nothing is persisted.
    Error {
        description: String,
        code: ErrorCode,
    },
    /// Delegate the reply to a deferred call.
    Forward(DeferredCall),
}

impl Reply {
    /// Whether this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// State update plus transition, produced by step callbacks and usable as a
/// command effect.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionalEffect<S> {
    pub(crate) update: Option<S>,
    pub(crate) transition: Transition,
    pub(crate) encode_error: Option<String>,
}

impl<S> TransitionalEffect<S> {
    fn new(update: Option<S>, transition: Transition) -> Self {
        Self {
            update,
            transition,
            encode_error: None,
        }
    }

    fn to_step<I: Serialize>(update: Option<S>, step: String, input: Option<&I>) -> Self {
        let mut encode_error = None;
        let input = input.and_then(|i| match serde_json::to_value(i) {
            Ok(v) => Some(v),
            Err(e) => {
                encode_error = Some(format!("input for step '{}': {}", step, e));
                None
            }
        });
        Self {
            update,
            transition: Transition::To { step, input },
            encode_error,
        }
    }

    /// Reply to the command once the state is persisted.
    pub fn then_reply<R: Serialize>(self, message: R) -> Effect<S> {
        self.then_reply_with_metadata(message, Metadata::new())
    }

    /// Reply with metadata once the state is persisted.
    pub fn then_reply_with_metadata<R: Serialize>(self, message: R, metadata: Metadata) -> Effect<S> {
        let mut encode_error = self.encode_error;
        let payload = match serde_json::to_value(&message) {
            Ok(v) => v,
            Err(e) => {
                encode_error.get_or_insert(format!("reply: {}", e));
                serde_json::Value::Null
            }
        };
        Effect {
            update: self.update,
            transition: Some(self.transition),
            reply: Reply::Message { payload, metadata },
            encode_error,
        }
    }

    /// The transition.
    pub fn transition(&self) -> &Transition {
        &self.transition
    }

    /// The new user state, if any.
    pub fn updated_state(&self) -> Option<&S> {
        self.update.as_ref()
    }
}

impl<S> From<TransitionalEffect<S>> for Effect<S> {
    fn from(effect: TransitionalEffect<S>) -> Self {
        Effect {
            update: effect.update,
            transition: Some(effect.transition),
            reply: Reply::Empty,
            encode_error: effect.encode_error,
        }
    }
}

/// Result of a command handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect<S> {
    pub(crate) update: Option<S>,
    pub(crate) transition: Option<Transition>,
    pub(crate) reply: Reply,
    pub(crate) encode_error: Option<String>,
}

impl<S> Effect<S> {
    fn reply_only(reply: Reply) -> Self {
        Self {
            update: None,
            transition: None,
            reply,
            encode_error: None,
        }
    }

    /// The transition, if the effect changes the workflow.
    pub fn transition(&self) -> Option<&Transition> {
        self.transition.as_ref()
    }

    /// The reply.
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    /// The new user state, if any.
    pub fn updated_state(&self) -> Option<&S> {
        self.update.as_ref()
    }

    /// Whether the effect is an error reply.
    pub fn is_error(&self) -> bool {
        self.reply.is_error()
    }
}

/// Builder returned by [`Effects::update_state`]. A state update always
/// comes with a transition.
#[derive(Debug, Clone)]
pub struct PersistenceEffectBuilder<S> {
    state: S,
}

impl<S> PersistenceEffectBuilder<S> {
    /// Persist the state and move to `step` with `input`.
    pub fn transition_to<I: Serialize>(self, step: impl Into<String>, input: I) -> TransitionalEffect<S> {
        TransitionalEffect::to_step(Some(self.state), step.into(), Some(&input))
    }

    /// Persist the state and move to `step` without input.
    pub fn transition_to_step(self, step: impl Into<String>) -> TransitionalEffect<S> {
        TransitionalEffect::to_step::<()>(Some(self.state), step.into(), None)
    }

    /// Persist the state and pause.
    pub fn pause(self) -> TransitionalEffect<S> {
        TransitionalEffect::new(Some(self.state), Transition::Pause)
    }

    /// Persist the state and finish.
    pub fn end(self) -> TransitionalEffect<S> {
        TransitionalEffect::new(Some(self.state), Transition::End)
    }
}

/// Entry point for building effects.
pub struct Effects;

impl Effects {
    /// Start an effect that replaces the user state.
    pub fn update_state<S>(state: S) -> PersistenceEffectBuilder<S> {
        PersistenceEffectBuilder { state }
    }

    /// Move to `step` with `input`, keeping the current state.
    pub fn transition_to<S, I: Serialize>(step: impl Into<String>, input: I) -> TransitionalEffect<S> {
        TransitionalEffect::to_step(None, step.into(), Some(&input))
    }

    /// Move to `step` without input, keeping the current state.
    pub fn transition_to_step<S>(step: impl Into<String>) -> TransitionalEffect<S> {
        TransitionalEffect::to_step::<()>(None, step.into(), None)
    }

    /// Pause, keeping the current state.
    pub fn pause<S>() -> TransitionalEffect<S> {
        TransitionalEffect::new(None, Transition::Pause)
    }

    /// Finish, keeping the current state.
    pub fn end<S>() -> TransitionalEffect<S> {
        TransitionalEffect::new(None, Transition::End)
    }

    /// Reply without touching the workflow.
    pub fn reply<S, R: Serialize>(message: R) -> Effect<S> {
        Self::reply_with_metadata(message, Metadata::new())
    }

    /// Reply with metadata without touching the workflow.
    pub fn reply_with_metadata<S, R: Serialize>(message: R, metadata: Metadata) -> Effect<S> {
        match serde_json::to_value(&message) {
            Ok(payload) => Effect::reply_only(Reply::Message { payload, metadata }),
            Err(e) => Effect {
                encode_error: Some(format!("reply: {}", e)),
                ..Effect::reply_only(Reply::Empty)
            },
        }
    }

    /// Reply with a bad-request error.
    pub fn error<S>(description: impl Into<String>) -> Effect<S> {
        Self::error_with_code(description, ErrorCode::BadRequest)
    }

    /// Reply with an error of the given code.
    pub fn error_with_code<S>(description: impl Into<String>, code: ErrorCode) -> Effect<S> {
        Effect::reply_only(Reply::Error {
            description: description.into(),
            code,
        })
    }

    /// Let a deferred call produce the reply.
    pub fn forward<S>(call: DeferredCall) -> Effect<S> {
        Effect::reply_only(Reply::Forward(call))
    }
}
