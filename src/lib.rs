//! cloudpost library root.
//!
//! Two independent pieces share this crate: a mail agent answering
//! agent-to-agent JSON messages through a Gmail delivery backend, and a
//! WebDAV client for Nextcloud file operations.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod mail;
pub mod nextcloud;
pub mod protocol;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use events::{DispatchEvent, EventSink};
pub use mail::{DeliveryBackend, DeliveryError, GmailBackend};
pub use nextcloud::{NextcloudClient, WebDavError};
pub use protocol::{EmailRequest, EmailResponse, Message};
