//! Observability port for the dispatcher.
//!
//! Handlers return values; anything worth logging is emitted here as a
//! structured event so the result path stays free of side channels.

use std::sync::Mutex;

/// Something that happened while answering a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Received { from: String, message_type: String },
    Authenticated { backend: String },
    AuthenticationFailed { error: String },
    SessionExpired { backend: String },
    AttachmentSkipped { path: String },
    EmailSent { message_id: String },
    DeliveryFailed { backend: String, error: String },
    Rejected { reason: String },
    Responded { response_type: String },
}

/// Receives dispatch events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DispatchEvent);
}

/// Forwards events to `tracing`, tagged with the emitting agent.
#[derive(Debug, Clone)]
pub struct TracingSink {
    agent_id: String,
}

impl TracingSink {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &DispatchEvent) {
        let agent = self.agent_id.as_str();
        match event {
            DispatchEvent::Received { from, message_type } => {
                tracing::info!(agent, from = %from, message_type = %message_type, "Processing message");
            }
            DispatchEvent::Authenticated { backend } => {
                tracing::info!(agent, backend = %backend, "Authenticated with delivery backend");
            }
            DispatchEvent::AuthenticationFailed { error } => {
                tracing::error!(agent, error = %error, "Authentication failed");
            }
            DispatchEvent::SessionExpired { backend } => {
                tracing::warn!(agent, backend = %backend, "Session rejected, will reconnect on next send");
            }
            DispatchEvent::AttachmentSkipped { path } => {
                tracing::warn!(agent, path = %path, "Attachment not found, skipping");
            }
            DispatchEvent::EmailSent { message_id } => {
                tracing::info!(agent, message_id = %message_id, "Email sent");
            }
            DispatchEvent::DeliveryFailed { backend, error } => {
                tracing::error!(agent, backend = %backend, error = %error, "Email delivery failed");
            }
            DispatchEvent::Rejected { reason } => {
                tracing::warn!(agent, reason = %reason, "Rejected message");
            }
            DispatchEvent::Responded { response_type } => {
                tracing::debug!(agent, response_type = %response_type, "Response ready");
            }
        }
    }
}

/// Keeps every event in memory. Useful in tests and for embedding callers
/// that want to inspect what happened.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<DispatchEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &DispatchEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
