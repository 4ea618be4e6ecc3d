//! Message envelope exchanged between agents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{error_payload, ERROR_RESPONSE};

/// Payload of a message: a JSON object whose shape depends on `message_type`.
pub type Payload = Map<String, Value>;

/// Uniform envelope wrapping every agent-to-agent request and response.
///
/// Envelope keys outside the six below are rejected, like unknown keys in
/// an email payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    /// Identity of the agent that produced this message.
    pub agent_id: String,
    /// Declared message type, e.g. `email_send_request`.
    pub message_type: String,
    /// Creation time as an ISO-8601 string.
    pub timestamp: String,
    /// Type-specific body.
    pub payload: Payload,
    /// Caller-supplied token echoed back in the response.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Agent the message answers (responses only).
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl Message {
    /// Create a message stamped with the current UTC time.
    pub fn new(agent_id: impl Into<String>, message_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            agent_id: agent_id.into(),
            message_type: message_type.into(),
            timestamp: current_timestamp(),
            payload,
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Set correlation ID for request/response tracking.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Build the response to `request`, sent by `from_agent`.
    ///
    /// The correlation ID is copied verbatim and `reply_to` points at the
    /// requesting agent.
    pub fn reply(
        request: &Message,
        from_agent: impl Into<String>,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            agent_id: from_agent.into(),
            message_type: message_type.into(),
            timestamp: current_timestamp(),
            payload,
            correlation_id: request.correlation_id.clone(),
            reply_to: Some(request.agent_id.clone()),
        }
    }

    /// Uncorrelated `error_response`, used when the request could not be read.
    pub fn error(from_agent: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(from_agent, ERROR_RESPONSE, error_payload(error))
    }

    /// Parse a message from its wire form.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Compact wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Indented wire form, as printed by the CLI.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Whether this message is an `error_response`.
    pub fn is_error(&self) -> bool {
        self.message_type == ERROR_RESPONSE
    }
}

/// Current UTC time with microsecond precision and no offset suffix.
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
