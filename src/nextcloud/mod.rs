//! Nextcloud file operations over WebDAV.

use std::path::PathBuf;

use thiserror::Error;

pub mod client;
pub mod propfind;

pub use client::{FolderStatus, NextcloudClient};
pub use propfind::DavEntry;

#[derive(Error, Debug)]
pub enum WebDavError {
    #[error("Local file not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    #[error("{operation} failed with HTTP status {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(&'static str),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, WebDavError>;
