//! Cached OAuth2 credentials for the Gmail API.
//!
//! The token file uses Google's authorized-user JSON layout so a token
//! produced by any Google client library can be dropped in as-is.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{DeliveryError, Result};

pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens expiring within this window are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 60;
const REFRESH_TIMEOUT_SECS: u64 = 30;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Contents of `token.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizedUser {
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<String>,
    /// Fields we do not interpret, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthorizedUser {
    /// True when an access token is present and not about to expire.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_none() {
            return false;
        }
        match self.expiry.as_deref() {
            None => true,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(expiry) => expiry.with_timezone(&Utc) > now + Duration::seconds(EXPIRY_SKEW_SECS),
                Err(_) => false,
            },
        }
    }

    fn fill_client(&mut self, client: &ClientSecret) {
        if self.client_id.is_none() {
            self.client_id = Some(client.client_id.clone());
        }
        if self.client_secret.is_none() {
            self.client_secret = client.client_secret.clone();
        }
        if let Some(uri) = &client.token_uri {
            if self.token_uri == DEFAULT_TOKEN_URI {
                self.token_uri = uri.clone();
            }
        }
    }
}

/// The `installed`/`web` section of a downloaded `credentials.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Read the client secrets file, if present.
pub fn load_client_secret(path: &Path) -> Result<Option<ClientSecret>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let file: ClientSecretsFile = serde_json::from_str(&content)
        .map_err(|e| DeliveryError::Auth(format!("invalid credentials file {}: {}", path.display(), e)))?;
    Ok(file.installed.or(file.web))
}

/// Load the cached token, filling client details from the credentials file.
pub fn load_authorized_user(token_path: &Path, credentials_path: &Path) -> Result<AuthorizedUser> {
    if !token_path.exists() {
        return Err(DeliveryError::Auth(format!(
            "no cached token at {}; complete the OAuth consent for {} and save the authorized-user token there",
            token_path.display(),
            GMAIL_SEND_SCOPE
        )));
    }

    let content = std::fs::read_to_string(token_path)?;
    let mut user: AuthorizedUser = serde_json::from_str(&content)
        .map_err(|e| DeliveryError::Auth(format!("invalid token file {}: {}", token_path.display(), e)))?;

    if let Some(client) = load_client_secret(credentials_path)? {
        user.fill_client(&client);
    }

    Ok(user)
}

/// Exchange the refresh token for a new access token.
pub async fn refresh(http: &Client, user: &AuthorizedUser) -> Result<AuthorizedUser> {
    let refresh_token = user
        .refresh_token
        .as_deref()
        .ok_or_else(|| DeliveryError::Auth("token expired and no refresh token is cached".to_string()))?;
    let client_id = user
        .client_id
        .as_deref()
        .ok_or_else(|| DeliveryError::Auth("token refresh needs a client_id".to_string()))?;

    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];
    if let Some(secret) = user.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let response = http
        .post(&user.token_uri)
        .form(&form)
        .timeout(std::time::Duration::from_secs(REFRESH_TIMEOUT_SECS))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DeliveryError::Auth(format!("token refresh rejected (HTTP {}): {}", status.as_u16(), body)));
    }

    let refreshed: RefreshResponse = response.json().await?;
    let mut user = user.clone();
    user.token = Some(refreshed.access_token);
    user.expiry = refreshed
        .expires_in
        .map(|secs| (Utc::now() + Duration::seconds(secs)).to_rfc3339());
    if let Some(rotated) = refreshed.refresh_token {
        user.refresh_token = Some(rotated);
    }
    Ok(user)
}

/// Persist the token so later runs skip the refresh.
pub fn save_authorized_user(path: &Path, user: &AuthorizedUser) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(user)
        .map_err(|e| DeliveryError::Auth(format!("could not serialize token: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
