//! Message dispatcher for the mail agent.
//!
//! Routes each incoming [`Message`] to a handler by its declared type and
//! always answers with exactly one correlated response. Nothing escapes
//! `handle`: bad payloads and delivery faults become response data.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::events::{DispatchEvent, EventSink, TracingSink};
use crate::mail::{DeliveryBackend, DeliveryError, SentEmail};
use crate::protocol::types::{error_payload, ERROR_RESPONSE};
use crate::protocol::{
    CapabilityReport, EmailRequest, EmailResponse, HealthReport, Message, Payload, Request,
};

/// Answers agent messages on behalf of one agent identity.
pub struct Dispatcher<B: DeliveryBackend> {
    agent_id: String,
    backend: B,
    session: Option<B::Session>,
    events: Arc<dyn EventSink>,
}

impl<B: DeliveryBackend> Dispatcher<B> {
    /// Create a dispatcher that logs through `tracing`.
    pub fn new(agent_id: impl Into<String>, backend: B) -> Self {
        let agent_id = agent_id.into();
        let events = Arc::new(TracingSink::new(agent_id.clone()));
        Self {
            agent_id,
            backend,
            session: None,
            events,
        }
    }

    /// Replace the event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether a backend session has been established.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Authenticate against the delivery backend and keep the session.
    ///
    /// Every failure is reported as [`DeliveryError::Auth`].
    pub async fn connect(&mut self) -> Result<(), DeliveryError> {
        match self.backend.connect().await {
            Ok(session) => {
                self.session = Some(session);
                self.events.emit(&DispatchEvent::Authenticated {
                    backend: self.backend.name().to_string(),
                });
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    DeliveryError::Auth(_) => e,
                    other => DeliveryError::Auth(other.to_string()),
                };
                self.events.emit(&DispatchEvent::AuthenticationFailed { error: e.to_string() });
                Err(e)
            }
        }
    }

    /// Answer one message.
    pub async fn handle(&mut self, message: &Message) -> Message {
        self.events.emit(&DispatchEvent::Received {
            from: message.agent_id.clone(),
            message_type: message.message_type.clone(),
        });

        let (response_type, payload) = match Request::decode(message) {
            Ok(request) => {
                let response_type = request.response_type();
                (response_type, self.answer(request).await)
            }
            Err(e) => {
                let reason = format!("Processing error: {}", e);
                self.events.emit(&DispatchEvent::Rejected { reason: reason.clone() });
                (ERROR_RESPONSE, error_payload(reason))
            }
        };

        let response = Message::reply(message, self.agent_id.as_str(), response_type, payload);
        self.events.emit(&DispatchEvent::Responded {
            response_type: response.message_type.clone(),
        });
        response
    }

    /// Answer a message in wire form, returning the response in wire form.
    ///
    /// Text that is not a readable message still yields an
    /// `error_response`, without correlation.
    pub async fn handle_json(&mut self, text: &str) -> String {
        let response = match Message::from_json(text) {
            Ok(message) => self.handle(&message).await,
            Err(e) => {
                let reason = if e.is_syntax() || e.is_eof() {
                    format!("Invalid JSON: {}", e)
                } else {
                    format!("Message handling error: {}", e)
                };
                self.events.emit(&DispatchEvent::Rejected { reason: reason.clone() });
                Message::error(self.agent_id.as_str(), reason)
            }
        };

        response
            .to_json_pretty()
            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
    }

    async fn answer(&mut self, request: Request) -> Payload {
        match request {
            Request::EmailSend(email) => self.send_email(&email).await.to_payload(),
            Request::HealthCheck => {
                HealthReport::healthy(self.agent_id.as_str(), self.is_authenticated()).to_payload()
            }
            Request::CapabilityInquiry => CapabilityReport::current().to_payload(),
            Request::Unknown(message_type) => {
                let reason = format!("Unknown message type: {}", message_type);
                self.events.emit(&DispatchEvent::Rejected { reason: reason.clone() });
                error_payload(reason)
            }
        }
    }

    async fn send_email(&mut self, request: &EmailRequest) -> EmailResponse {
        if self.session.is_none() {
            if let Err(e) = self.connect().await {
                return EmailResponse::failed(e.to_string());
            }
        }

        let outcome = match self.session.as_ref() {
            Some(session) => self.backend.send(session, request).await,
            None => return EmailResponse::failed("Authentication failed: no session"),
        };

        match outcome {
            Ok(sent) => self.report_sent(sent),
            Err(e) => {
                if e.is_session_expired() {
                    self.session = None;
                    self.events.emit(&DispatchEvent::SessionExpired {
                        backend: self.backend.name().to_string(),
                    });
                }
                let error = e.to_string();
                self.events.emit(&DispatchEvent::DeliveryFailed {
                    backend: self.backend.name().to_string(),
                    error: error.clone(),
                });
                EmailResponse::failed(error)
            }
        }
    }

    fn report_sent(&self, sent: SentEmail) -> EmailResponse {
        for path in &sent.skipped_attachments {
            self.events.emit(&DispatchEvent::AttachmentSkipped {
                path: path.display().to_string(),
            });
        }
        self.events.emit(&DispatchEvent::EmailSent {
            message_id: sent.message_id.clone(),
        });
        let details = send_details(&sent);
        EmailResponse::sent(sent.message_id, details)
    }
}

fn send_details(sent: &SentEmail) -> Payload {
    let mut details = Payload::new();
    if let Some(thread_id) = &sent.thread_id {
        details.insert("thread_id".to_string(), Value::String(thread_id.clone()));
    }
    if !sent.skipped_attachments.is_empty() {
        let skipped = sent
            .skipped_attachments
            .iter()
            .map(|p| Value::String(p.display().to_string()))
            .collect();
        details.insert("skipped_attachments".to_string(), Value::Array(skipped));
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::mail;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        refuse_auth: bool,
        reject_status: Option<u16>,
        skip: Vec<PathBuf>,
        connects: AtomicUsize,
        sent: Mutex<Vec<EmailRequest>>,
    }

    impl FakeBackend {
        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DeliveryBackend for FakeBackend {
        type Session = String;

        fn name(&self) -> &str {
            "fake"
        }

        async fn connect(&self) -> mail::Result<String> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse_auth {
                Err(DeliveryError::Auth("consent required".into()))
            } else {
                Ok("session-1".into())
            }
        }

        async fn send(&self, session: &String, request: &EmailRequest) -> mail::Result<SentEmail> {
            assert_eq!(session, "session-1");
            self.sent.lock().unwrap().push(request.clone());
            match self.reject_status {
                Some(status) => Err(DeliveryError::Api {
                    status,
                    body: "backendError".into(),
                }),
                None => Ok(SentEmail {
                    message_id: format!("msg-{}", self.sent_count()),
                    thread_id: Some("thread-1".into()),
                    skipped_attachments: self.skip.clone(),
                }),
            }
        }
    }

    fn request(message_type: &str, payload: Value) -> Message {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        Message::new("client-agent-001", message_type, payload)
    }

    fn email_payload() -> Value {
        json!({"to": ["a@example.com"], "subject": "Hello", "body": "Hi there"})
    }

    #[tokio::test]
    async fn test_health_check_before_any_send() {
        let mut dispatcher = Dispatcher::new("gmail-agent-001", FakeBackend::default());
        let msg = Message::from_json(r#"{"agent_id":"c1","message_type":"health_check","timestamp":"t","payload":{}}"#)
            .unwrap();

        let response = dispatcher.handle(&msg).await;

        assert_eq!(response.message_type, "health_check_response");
        assert_eq!(
            Value::Object(response.payload),
            json!({"status": "healthy", "agent_id": "gmail-agent-001", "authenticated": false})
        );
        assert_eq!(response.agent_id, "gmail-agent-001");
        assert_eq!(response.reply_to.as_deref(), Some("c1"));
        assert!(response.correlation_id.is_none());
        assert_eq!(dispatcher.backend().connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_email_send_success() {
        let mut dispatcher = Dispatcher::new("gmail-agent-001", FakeBackend::default());
        let msg = request("email_send_request", email_payload()).with_correlation_id("test-001");

        let response = dispatcher.handle(&msg).await;

        assert_eq!(response.message_type, "email_send_response");
        assert_eq!(response.correlation_id.as_deref(), Some("test-001"));
        assert_eq!(response.reply_to.as_deref(), Some("client-agent-001"));
        assert_eq!(response.payload["success"], json!(true));
        assert_eq!(response.payload["message_id"], json!("msg-1"));
        assert_eq!(response.payload["details"], json!({"thread_id": "thread-1"}));
        assert!(!response.payload.contains_key("error"));
        assert_eq!(dispatcher.backend().sent_count(), 1);
    }

    #[tokio::test]
    async fn test_session_is_reused_and_reported() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        dispatcher.handle(&request("email_send_request", email_payload())).await;
        dispatcher.handle(&request("email_send_request", email_payload())).await;

        assert_eq!(dispatcher.backend().connects.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.backend().sent_count(), 2);

        let health = dispatcher.handle(&request("health_check", json!({}))).await;
        assert_eq!(health.payload["authenticated"], json!(true));
    }

    #[tokio::test]
    async fn test_explicit_connect() {
        let events = Arc::new(RecordingSink::new());
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default()).with_events(events.clone());
        dispatcher.connect().await.unwrap();
        assert!(dispatcher.is_authenticated());
        assert_eq!(
            events.events(),
            vec![DispatchEvent::Authenticated {
                backend: "fake".into()
            }]
        );

        dispatcher.handle(&request("email_send_request", email_payload())).await;
        assert_eq!(dispatcher.backend().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_becomes_failed_response() {
        let backend = FakeBackend {
            refuse_auth: true,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new("agent", backend);

        let response = dispatcher.handle(&request("email_send_request", email_payload())).await;

        assert_eq!(response.message_type, "email_send_response");
        assert_eq!(response.payload["success"], json!(false));
        assert_eq!(response.payload["error"], json!("Authentication failed: consent required"));
        assert!(!response.payload.contains_key("message_id"));
        assert_eq!(dispatcher.backend().sent_count(), 0);
        assert!(!dispatcher.is_authenticated());
    }

    #[tokio::test]
    async fn test_delivery_failure_becomes_failed_response() {
        let backend = FakeBackend {
            reject_status: Some(500),
            ..Default::default()
        };
        let events = Arc::new(RecordingSink::new());
        let mut dispatcher = Dispatcher::new("agent", backend).with_events(events.clone());

        let response = dispatcher.handle(&request("email_send_request", email_payload())).await;

        assert_eq!(response.payload["success"], json!(false));
        let error = response.payload["error"].as_str().unwrap();
        assert!(error.contains("backendError"), "{}", error);
        assert!(events.events().iter().any(|e| matches!(
            e,
            DispatchEvent::DeliveryFailed { backend, .. } if backend == "fake"
        )));
        assert!(dispatcher.is_authenticated());
    }

    #[tokio::test]
    async fn test_rejected_session_is_dropped_and_renewed() {
        let backend = FakeBackend {
            reject_status: Some(401),
            ..Default::default()
        };
        let events = Arc::new(RecordingSink::new());
        let mut dispatcher = Dispatcher::new("agent", backend).with_events(events.clone());

        let response = dispatcher.handle(&request("email_send_request", email_payload())).await;
        assert_eq!(response.payload["success"], json!(false));
        assert!(!dispatcher.is_authenticated());
        assert!(events.events().contains(&DispatchEvent::SessionExpired {
            backend: "fake".into()
        }));

        let health = dispatcher.handle(&request("health_check", json!({}))).await;
        assert_eq!(health.payload["authenticated"], json!(false));

        dispatcher.handle(&request("email_send_request", email_payload())).await;
        assert_eq!(dispatcher.backend().connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_to_is_error_response() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        let msg = request("email_send_request", json!({"subject": "s", "body": "b"})).with_correlation_id("c-9");

        let response = dispatcher.handle(&msg).await;

        assert_eq!(response.message_type, "error_response");
        assert_eq!(response.correlation_id.as_deref(), Some("c-9"));
        let error = response.payload["error"].as_str().unwrap();
        assert!(error.starts_with("Processing error:"), "{}", error);
        assert!(error.contains("missing field `to`"), "{}", error);
        assert_eq!(dispatcher.backend().connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_error_response() {
        let events = Arc::new(RecordingSink::new());
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default()).with_events(events.clone());

        let response = dispatcher.handle(&request("calendar_invite", json!({}))).await;

        assert_eq!(response.message_type, "error_response");
        assert_eq!(response.payload["error"], json!("Unknown message type: calendar_invite"));
        assert_eq!(
            events.events().last(),
            Some(&DispatchEvent::Responded {
                response_type: "error_response".into()
            })
        );
    }

    #[tokio::test]
    async fn test_capability_inquiry_is_idempotent() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        let first = dispatcher.handle(&request("capability_inquiry", json!({}))).await;
        let second = dispatcher.handle(&request("capability_inquiry", json!({}))).await;

        assert_eq!(first.message_type, "capability_inquiry_response");
        assert_eq!(first.payload, second.payload);
        assert_eq!(first.payload["agent_type"], json!("gmail_agent"));
    }

    #[tokio::test]
    async fn test_skipped_attachments_are_reported() {
        let backend = FakeBackend {
            skip: vec![PathBuf::from("/nope/report.pdf")],
            ..Default::default()
        };
        let events = Arc::new(RecordingSink::new());
        let mut dispatcher = Dispatcher::new("agent", backend).with_events(events.clone());

        let response = dispatcher.handle(&request("email_send_request", email_payload())).await;

        assert_eq!(response.payload["success"], json!(true));
        assert_eq!(
            response.payload["details"]["skipped_attachments"],
            json!(["/nope/report.pdf"])
        );
        assert!(events.events().contains(&DispatchEvent::AttachmentSkipped {
            path: "/nope/report.pdf".into()
        }));
    }

    #[tokio::test]
    async fn test_handle_json_invalid_json() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        let out = dispatcher.handle_json("{oops").await;
        let response = Message::from_json(&out).unwrap();

        assert!(response.is_error());
        assert!(response.payload["error"].as_str().unwrap().starts_with("Invalid JSON:"));
        assert!(response.reply_to.is_none());
    }

    #[tokio::test]
    async fn test_handle_json_missing_envelope_field() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        let out = dispatcher
            .handle_json(r#"{"agent_id":"c1","message_type":"health_check","payload":{}}"#)
            .await;
        let response = Message::from_json(&out).unwrap();

        assert_eq!(response.message_type, "error_response");
        let error = response.payload["error"].as_str().unwrap();
        assert!(error.starts_with("Message handling error:"), "{}", error);
        assert!(error.contains("timestamp"), "{}", error);
    }

    #[tokio::test]
    async fn test_handle_json_round_trip() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        let msg = request("health_check", json!({})).with_correlation_id("x");
        let out = dispatcher.handle_json(&msg.to_json().unwrap()).await;
        let response = Message::from_json(&out).unwrap();

        assert_eq!(response.message_type, "health_check_response");
        assert!(!response.is_error());
        assert_eq!(response.correlation_id.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_handle_json_rejects_unknown_envelope_key() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        let out = dispatcher
            .handle_json(r#"{"agent_id":"c1","message_type":"health_check","timestamp":"t","payload":{},"priority":"high"}"#)
            .await;
        let response = Message::from_json(&out).unwrap();

        assert!(response.is_error());
        let error = response.payload["error"].as_str().unwrap();
        assert!(error.starts_with("Message handling error:"), "{}", error);
        assert!(error.contains("priority"), "{}", error);
    }

    #[tokio::test]
    async fn test_handle_json_non_object_message() {
        let mut dispatcher = Dispatcher::new("agent", FakeBackend::default());
        for text in ["[1]", r#""x""#, "42", "null"] {
            let out = dispatcher.handle_json(text).await;
            let response = Message::from_json(&out).unwrap();

            assert!(response.is_error(), "{}", text);
            let error = response.payload["error"].as_str().unwrap();
            assert!(error.starts_with("Message handling error:"), "{}: {}", text, error);
            assert!(response.reply_to.is_none());
        }
    }
}
