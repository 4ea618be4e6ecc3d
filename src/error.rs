//! Error types for cloudpost.

use thiserror::Error;

use crate::nextcloud::WebDavError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebDAV error: {0}")]
    WebDav(#[from] WebDavError),
}
