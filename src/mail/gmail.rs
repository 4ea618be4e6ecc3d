//! Gmail REST API delivery backend.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use lettre::message::Mailbox;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::mime::{build_message, load_attachments};
use super::token::{self, AuthorizedUser};
use super::{DeliveryBackend, DeliveryError, Result, SentEmail};
use crate::config::GmailConfig;
use crate::protocol::EmailRequest;

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";
const SEND_TIMEOUT_SECS: u64 = 30;
const PROFILE_TIMEOUT_SECS: u64 = 10;

/// Authenticated Gmail session: the access token and the address mail is
/// sent from.
#[derive(Debug, Clone)]
pub struct GmailSession {
    access_token: String,
    sender: Mailbox,
}

impl GmailSession {
    pub fn new(access_token: impl Into<String>, sender: Mailbox) -> Self {
        Self {
            access_token: access_token.into(),
            sender,
        }
    }

    pub fn sender(&self) -> &Mailbox {
        &self.sender
    }
}

#[derive(Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

/// Sends mail as the authorized user through `users.messages.send`.
pub struct GmailBackend {
    client: Client,
    credentials_file: PathBuf,
    token_file: PathBuf,
    api_base: String,
    sender: Option<String>,
}

impl GmailBackend {
    pub fn new(credentials_file: impl Into<PathBuf>, token_file: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            credentials_file: credentials_file.into(),
            token_file: token_file.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            sender: None,
        }
    }

    pub fn from_config(config: &GmailConfig) -> Self {
        let mut backend =
            Self::new(&config.credentials_file, &config.token_file).with_api_base(config.api_base.clone());
        backend.sender = config.sender.clone();
        backend
    }

    /// Send as `sender` instead of asking Gmail for the account address.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Point the backend at another API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn send_url(&self) -> String {
        format!("{}/gmail/v1/users/me/messages/send", self.api_base)
    }

    fn profile_url(&self) -> String {
        format!("{}/gmail/v1/users/me/profile", self.api_base)
    }

    /// Address of the authorized account, from `users.getProfile`.
    async fn profile_address(&self, access_token: &str) -> Result<String> {
        let response = self
            .client
            .get(self.profile_url())
            .bearer_auth(access_token)
            .timeout(Duration::from_secs(PROFILE_TIMEOUT_SECS))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Auth(format!(
                "could not read the account address (HTTP {}); set gmail.sender in settings",
                status.as_u16()
            )));
        }

        let profile: Profile = response.json().await?;
        Ok(profile.email_address)
    }

    async fn authorized_user(&self) -> Result<AuthorizedUser> {
        let user = token::load_authorized_user(&self.token_file, &self.credentials_file)?;
        if user.is_valid(chrono::Utc::now()) {
            return Ok(user);
        }

        tracing::debug!("Cached Gmail token expired, refreshing");
        let refreshed = token::refresh(&self.client, &user).await?;
        token::save_authorized_user(&self.token_file, &refreshed)?;
        Ok(refreshed)
    }
}

#[async_trait]
impl DeliveryBackend for GmailBackend {
    type Session = GmailSession;

    fn name(&self) -> &str {
        "gmail"
    }

    async fn connect(&self) -> Result<GmailSession> {
        let user = self.authorized_user().await?;
        let access_token = user
            .token
            .ok_or_else(|| DeliveryError::Auth("token endpoint returned no access token".to_string()))?;

        let address = match &self.sender {
            Some(sender) => sender.clone(),
            None => self.profile_address(&access_token).await?,
        };
        let sender = address
            .parse::<Mailbox>()
            .map_err(|e| DeliveryError::Auth(format!("invalid sender address '{}': {}", address, e)))?;

        Ok(GmailSession::new(access_token, sender))
    }

    async fn send(&self, session: &GmailSession, request: &EmailRequest) -> Result<SentEmail> {
        let declared = request.attachments.as_deref().unwrap_or_default();
        let (attachments, skipped_attachments) = load_attachments(declared)
            .await
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        let message = build_message(request, &session.sender, &attachments)?;
        let body = SendRequest {
            raw: URL_SAFE.encode(message.formatted()),
        };

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(&session.access_token)
            .json(&body)
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let sent: SendResponse = response.json().await?;
        Ok(SentEmail {
            message_id: sent.id,
            thread_id: sent.thread_id,
            skipped_attachments,
        })
    }
}
