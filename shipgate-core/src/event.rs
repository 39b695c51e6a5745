//! Trigger payload and decision output for hook invocations.
//!
//! Every gate invocation reads a JSON payload from the host workflow and
//! answers with a single JSON decision. Both sides are tolerant: unknown
//! payload fields are ignored and a malformed payload defaults to approving.

use serde::{Deserialize, Serialize};

/// Trigger payload delivered by the host workflow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookEvent {
    /// Set when this event was itself produced by a prior gate decision.
    /// Approving immediately on this flag is the loop guard.
    #[serde(default)]
    pub stop_hook_active: bool,

    /// Location of the session transcript, when the host provides one.
    #[serde(default)]
    pub transcript_path: Option<String>,

    /// The submitted prompt, for prompt-triggered hooks.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl HookEvent {
    /// Parse a trigger payload.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// The gate's answer to a triggering event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    /// Let the workflow proceed, optionally with a status message.
    Approve {
        #[serde(rename = "systemMessage", skip_serializing_if = "Option::is_none")]
        system_message: Option<String>,
    },
    /// Stop the workflow with a diagnostic reason.
    Block { reason: String },
}

impl Decision {
    /// Approve with no message.
    pub fn approve() -> Self {
        Self::Approve {
            system_message: None,
        }
    }

    /// Approve with a status message.
    pub fn approve_with(message: impl Into<String>) -> Self {
        Self::Approve {
            system_message: Some(message.into()),
        }
    }

    /// Block with a reason.
    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block {
            reason: reason.into(),
        }
    }

    /// Whether this decision lets the workflow proceed.
    pub const fn is_approve(&self) -> bool {
        matches!(self, Self::Approve { .. })
    }

    /// Serialize for the host workflow. Serialization of these variants
    /// cannot fail, but the fallback keeps the gate fail-open regardless.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"decision":"approve"}"#.to_string())
    }
}
