//! Email delivery backends.
//!
//! The dispatcher only sees the [`DeliveryBackend`] trait: an explicit
//! `connect` step producing a session, then one `send` per request.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::EmailRequest;

pub mod gmail;
pub mod mime;
pub mod token;

pub use gmail::{GmailBackend, GmailSession};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Failed to create email message: {0}")]
    Build(String),

    #[error("Gmail API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// The API refused the session's credentials; reconnecting may help.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, DeliveryError::Api { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub message_id: String,
    pub thread_id: Option<String>,
    /// Declared attachments that did not exist locally and were left out.
    pub skipped_attachments: Vec<PathBuf>,
}

/// An email-sending service.
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Authenticated handle reused across sends.
    type Session: Send + Sync;

    /// Backend name, attached to dispatch events.
    fn name(&self) -> &str;

    /// Acquire credentials and open a session.
    async fn connect(&self) -> Result<Self::Session>;

    /// Build and send one message. Exactly one API call per invocation.
    async fn send(&self, session: &Self::Session, request: &EmailRequest) -> Result<SentEmail>;
}
