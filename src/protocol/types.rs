//! Typed requests and responses carried in message payloads.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::message::{Message, Payload};

pub const EMAIL_SEND_REQUEST: &str = "email_send_request";
pub const HEALTH_CHECK: &str = "health_check";
pub const CAPABILITY_INQUIRY: &str = "capability_inquiry";
pub const EMAIL_SEND_RESPONSE: &str = "email_send_response";
pub const HEALTH_CHECK_RESPONSE: &str = "health_check_response";
pub const CAPABILITY_INQUIRY_RESPONSE: &str = "capability_inquiry_response";
pub const ERROR_RESPONSE: &str = "error_response";

/// Agent type reported by capability inquiries.
pub const AGENT_TYPE: &str = "gmail_agent";
/// Protocol version reported by capability inquiries.
pub const AGENT_VERSION: &str = "1.0";
pub const CAPABILITIES: [&str; 4] = ["email_send", "html_email", "attachments", "cc_bcc_support"];

/// Failure to turn a payload into a typed request.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("{0}")]
    Shape(#[from] serde_json::Error),

    #[error("email request must name at least one recipient in `to`")]
    NoRecipients,
}

/// A request decoded from its `message_type` and payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    EmailSend(EmailRequest),
    HealthCheck,
    CapabilityInquiry,
    /// Any type outside the known set, carrying the raw type string.
    Unknown(String),
}

impl Request {
    /// Decode the message type and, where it matters, the payload shape.
    pub fn decode(message: &Message) -> Result<Self, PayloadError> {
        match message.message_type.as_str() {
            EMAIL_SEND_REQUEST => {
                let request = EmailRequest::from_payload(&message.payload)?;
                Ok(Request::EmailSend(request))
            }
            HEALTH_CHECK => Ok(Request::HealthCheck),
            CAPABILITY_INQUIRY => Ok(Request::CapabilityInquiry),
            other => Ok(Request::Unknown(other.to_string())),
        }
    }

    /// Message type of the response this request produces.
    pub fn response_type(&self) -> &'static str {
        match self {
            Request::EmailSend(_) => EMAIL_SEND_RESPONSE,
            Request::HealthCheck => HEALTH_CHECK_RESPONSE,
            Request::CapabilityInquiry => CAPABILITY_INQUIRY_RESPONSE,
            Request::Unknown(_) => ERROR_RESPONSE,
        }
    }
}

/// Payload of an `email_send_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Option<Vec<String>>,
    #[serde(default)]
    pub bcc: Option<Vec<String>>,
    #[serde(default)]
    pub attachments: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub html_body: Option<String>,
}

impl EmailRequest {
    pub fn new(to: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            body: body.into(),
            cc: None,
            bcc: None,
            attachments: None,
            html_body: None,
        }
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = Some(cc);
        self
    }

    pub fn with_bcc(mut self, bcc: Vec<String>) -> Self {
        self.bcc = Some(bcc);
        self
    }

    pub fn with_html_body(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.get_or_insert_with(Vec::new).push(path.into());
        self
    }

    /// Coerce an open payload into the request shape.
    pub fn from_payload(payload: &Payload) -> Result<Self, PayloadError> {
        let request: EmailRequest = serde_json::from_value(Value::Object(payload.clone()))?;
        if request.to.is_empty() {
            return Err(PayloadError::NoRecipients);
        }
        Ok(request)
    }

    pub fn to_payload(&self) -> Payload {
        into_payload(self)
    }
}

/// Payload of an `email_send_response`.
///
/// Only constructible through [`EmailResponse::sent`] and
/// [`EmailResponse::failed`], so a successful response always carries a
/// message ID and a failed one always carries an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Payload>,
}

impl EmailResponse {
    pub fn sent(message_id: impl Into<String>, details: Payload) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
            details: if details.is_empty() { None } else { Some(details) },
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn details(&self) -> Option<&Payload> {
        self.details.as_ref()
    }

    pub fn to_payload(&self) -> Payload {
        into_payload(self)
    }
}

/// Payload of a `health_check_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub agent_id: String,
    pub authenticated: bool,
}

impl HealthReport {
    pub fn healthy(agent_id: impl Into<String>, authenticated: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            agent_id: agent_id.into(),
            authenticated,
        }
    }

    pub fn to_payload(&self) -> Payload {
        into_payload(self)
    }
}

/// Payload of a `capability_inquiry_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub capabilities: Vec<String>,
    pub agent_type: String,
    pub version: String,
}

impl CapabilityReport {
    pub fn current() -> Self {
        Self {
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            agent_type: AGENT_TYPE.to_string(),
            version: AGENT_VERSION.to_string(),
        }
    }

    pub fn to_payload(&self) -> Payload {
        into_payload(self)
    }
}

/// Payload of an `error_response`.
pub fn error_payload(error: impl Into<String>) -> Payload {
    let mut payload = Payload::new();
    payload.insert("error".to_string(), Value::String(error.into()));
    payload
}

fn into_payload<T: Serialize>(value: &T) -> Payload {
    // Every payload type here is a plain struct, so serialization yields an object.
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Payload::new(),
    }
}
