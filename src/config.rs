//! Configuration loading for cloudpost.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::mail::gmail::DEFAULT_API_BASE;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the cloudpost home directory (~/.cloudpost).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".cloudpost"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.cloudpost/settings.json
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_path()?)
}

/// Load settings from an explicit path.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;

    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.agent.agent_id.trim().is_empty() {
        return Err(Error::Config("agent.agent_id must not be empty".to_string()));
    }
    Ok(())
}

/// Load settings or return default if not found.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

/// Identity of the mail agent.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
}

fn default_agent_id() -> String {
    "gmail-agent-001".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
        }
    }
}

/// Gmail API configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GmailConfig {
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// `From` address; looked up from the Gmail profile when unset.
    #[serde(default)]
    pub sender: Option<String>,
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
            token_file: default_token_file(),
            api_base: default_api_base(),
            sender: None,
        }
    }
}

/// Recipients used by the gmail demonstration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DemoConfig {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
}

/// Nextcloud account configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct NextcloudConfig {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// cloudpost settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub gmail: GmailConfig,

    #[serde(default)]
    pub demo: DemoConfig,

    #[serde(default)]
    pub nextcloud: NextcloudConfig,
}
