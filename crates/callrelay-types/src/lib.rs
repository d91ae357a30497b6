//! Shared types for the call relay.
//!
//! Every crate in the workspace that needs to talk about a call's lifecycle,
//! its transfer outcome, or the parameters call-control attached to it uses
//! the definitions here, so the server, the transfer store and the tests all
//! agree on the same wire labels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Keypad digit that asks for a human agent.
pub const HANDOFF_DIGIT: &str = "0";

/// Outcome recorded for a session once the relay ends.
///
/// Call-control reads this after the media stream closes to decide between
/// hanging up and dialing out to the transfer number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDecision {
    /// The call ends with the relay.
    #[default]
    None,
    /// The caller asked for (or was routed to) a human agent.
    TransferToHuman,
}

impl TransferDecision {
    /// Returns the storage label for this decision.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::TransferToHuman => "TRANSFER_TO_HUMAN",
        }
    }
}

impl fmt::Display for TransferDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: {label}")]
pub struct UnknownLabel {
    kind: &'static str,
    label: String,
}

impl FromStr for TransferDecision {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "TRANSFER_TO_HUMAN" => Ok(Self::TransferToHuman),
            other => Err(UnknownLabel {
                kind: "transfer decision",
                label: other.to_string(),
            }),
        }
    }
}

/// Lifecycle phase of a call session.
///
/// Phases only move forward: `Connecting → Active → Draining → Closed`.
/// A session that fails during bootstrap may jump straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// Telephony socket accepted, engine connection being established.
    Connecting,
    /// Both pumps running.
    Active,
    /// Termination triggered; outstanding audio is being cancelled.
    Draining,
    /// All resources released.
    Closed,
}

impl CallPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// Why a session left the `Active` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainReason {
    /// The telephony leg sent `stop` or its socket closed.
    CallerHangup,
    /// The AI engine socket closed or could not be reached.
    EngineDisconnect,
    /// No activity for longer than the idle threshold.
    IdleTimeout,
    /// A handoff was requested by keypad digit or by the AI engine.
    TransferRequested,
    /// The start frame's parameters could not be resolved into a call.
    Rejected,
}

impl DrainReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::CallerHangup => "caller_hangup",
            Self::EngineDisconnect => "engine_disconnect",
            Self::IdleTimeout => "idle_timeout",
            Self::TransferRequested => "transfer_requested",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parameters call-control attaches to an inbound call.
///
/// They travel from the incoming-call webhook into the media stream's
/// start frame as custom parameters, keyed by the serde names below.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParameters {
    /// Knowledge-base project the retrieval tool is bound to. Mandatory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Credential override for the knowledge-retrieval service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Number to dial when the call is handed to a human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Phrase the assistant greets the caller with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    /// Caller's number, for logging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

impl CallParameters {
    /// Returns the parameters as `(name, value)` pairs, skipping empty ones.
    ///
    /// Blank strings are treated as absent so a webhook that forwards empty
    /// query parameters does not override configured defaults.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("project_id", self.project_id.as_deref()),
            ("api_key", self.api_key.as_deref()),
            ("phone_number", self.phone_number.as_deref()),
            ("introduction", self.introduction.as_deref()),
            ("caller", self.caller.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        })
        .collect()
    }

    /// Returns a copy with blank values replaced by `None`.
    pub fn normalized(&self) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Self {
            project_id: clean(&self.project_id),
            api_key: clean(&self.api_key),
            phone_number: clean(&self.phone_number),
            introduction: clean(&self.introduction),
            caller: clean(&self.caller),
        }
    }
}

impl fmt::Debug for CallParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallParameters")
            .field("project_id", &self.project_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("phone_number", &self.phone_number)
            .field("introduction", &self.introduction)
            .field("caller", &self.caller)
            .finish()
    }
}
