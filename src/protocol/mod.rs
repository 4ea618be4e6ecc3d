//! Agent-to-agent message protocol.
//!
//! This module defines the JSON envelope spoken by the mail agent:
//! - The `Message` envelope with correlation and reply linkage
//! - Typed request/response payloads decoded from `message_type`

pub mod message;
pub mod types;

pub use message::{current_timestamp, Message, Payload};
pub use types::{
    CapabilityReport, EmailRequest, EmailResponse, HealthReport, PayloadError, Request,
};
