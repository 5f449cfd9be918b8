//! Error types for realtime assistant sessions.
//!
//! The taxonomy mirrors the phases a call goes through: credential
//! acquisition, negotiation, signaling, the event protocol itself, and local
//! media capture. Negotiation-phase errors abort the whole session; protocol
//! errors only end the current turn.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of any message surfaced to the user.
pub const USER_MESSAGE_LIMIT: usize = 200;

/// Errors that can occur while running a realtime session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credential issuer returned a malformed or already-expiring token
    #[error("Credential error: {0}")]
    Credential(String),

    /// ICE gathering or data channel open did not complete in time
    #[error("Negotiation timed out: {0}")]
    NegotiationTimeout(String),

    /// Signaling endpoint answered with a non-2xx status
    #[error("Signaling failed with status {status}: {body}")]
    Signaling { status: u16, body: String },

    /// Server-sent `error` event
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// Camera or microphone could not be acquired
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Underlying peer connection failure
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Data channel failure
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Event encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A session is already live on this controller
    #[error("A session is already active")]
    AlreadyActive,

    /// No session is live
    #[error("Not connected")]
    NotConnected,

    /// The operation was cancelled by teardown
    #[error("Operation cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether the error belongs to the negotiation phase and therefore
    /// aborts the whole session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Protocol(_))
    }

    /// Short message suitable for display in the surrounding UI.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Protocol(err) => err.user_message(),
            other => truncate_message(&other.to_string(), USER_MESSAGE_LIMIT),
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Error reported by the realtime service over the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Error type (e.g. `invalid_request_error`)
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Machine-readable error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Parameter path that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Client event that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl ProtocolError {
    /// Whether the error points into the declared tool catalog.
    pub fn is_tool_error(&self) -> bool {
        self.param
            .as_deref()
            .is_some_and(|param| param.split(['.', '[']).any(|segment| segment == "tools"))
    }

    /// Diagnostic message for the UI, with a specific hint for tool errors.
    pub fn user_message(&self) -> String {
        let message = if self.is_tool_error() {
            format!(
                "Tool configuration rejected ({}): {}",
                self.param.as_deref().unwrap_or("tools"),
                self.message
            )
        } else if let Some(code) = &self.code {
            format!("{}: {}", code, self.message)
        } else {
            self.message.clone()
        };
        truncate_message(&message, USER_MESSAGE_LIMIT)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}): {}", self.error_type, code, self.message),
            None => write!(f, "{}: {}", self.error_type, self.message),
        }
    }
}

/// Truncate a message to at most `limit` characters, appending an ellipsis.
pub fn truncate_message(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(limit.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol_error(param: Option<&str>) -> ProtocolError {
        ProtocolError {
            error_type: "invalid_request_error".to_string(),
            code: Some("invalid_value".to_string()),
            message: "Bad value".to_string(),
            param: param.map(str::to_string),
            event_id: None,
        }
    }

    #[test]
    fn test_tool_error_detection() {
        assert!(protocol_error(Some("session.tools[0].name")).is_tool_error());
        assert!(protocol_error(Some("tools")).is_tool_error());
        assert!(!protocol_error(Some("session.voice")).is_tool_error());
        assert!(!protocol_error(Some("session.toolshed")).is_tool_error());
        assert!(!protocol_error(None).is_tool_error());
    }

    #[test]
    fn test_user_message_distinguishes_tool_errors() {
        let tool = protocol_error(Some("session.tools[1].parameters"));
        assert!(tool.user_message().starts_with("Tool configuration rejected"));

        let generic = protocol_error(Some("session.voice"));
        assert_eq!(generic.user_message(), "invalid_value: Bad value");
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        let long = "x".repeat(300);
        let truncated = truncate_message(&long, USER_MESSAGE_LIMIT);
        assert_eq!(truncated.chars().count(), USER_MESSAGE_LIMIT);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::Signaling {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Signaling failed with status 401: unauthorized"
        );
        assert_eq!(SessionError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_protocol_errors_are_not_fatal() {
        assert!(!SessionError::Protocol(protocol_error(None)).is_fatal());
        assert!(SessionError::Credential("expired".to_string()).is_fatal());
    }
}
