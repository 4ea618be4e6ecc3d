//! RFC 5322 / MIME message construction.

use std::path::{Path, PathBuf};

use lettre::message::header::ContentType;
use lettre::message::{Attachment as AttachmentPart, Mailbox, MultiPart, SinglePart};

use super::{DeliveryError, Result};
use crate::protocol::EmailRequest;

const OCTET_STREAM: &str = "application/octet-stream";

/// A file ready to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Read declared attachments from disk.
///
/// Paths that do not exist are skipped and returned separately so the
/// caller can report them.
pub async fn load_attachments(paths: &[PathBuf]) -> std::io::Result<(Vec<Attachment>, Vec<PathBuf>)> {
    let mut loaded = Vec::new();
    let mut skipped = Vec::new();

    for path in paths {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            skipped.push(path.clone());
            continue;
        }
        let content = tokio::fs::read(path).await?;
        loaded.push(Attachment {
            filename: file_name(path),
            content,
        });
    }

    Ok((loaded, skipped))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}

/// Build the message for `request`, sent as `from`.
///
/// Plain text alone is a single `text/plain` body; an HTML body turns it
/// into `multipart/alternative`; attachments wrap everything in
/// `multipart/mixed`. `Bcc` stays in the headers because the Gmail API
/// takes its envelope from them.
pub fn build_message(request: &EmailRequest, from: &Mailbox, attachments: &[Attachment]) -> Result<lettre::Message> {
    let mut builder = lettre::Message::builder()
        .from(from.clone())
        .subject(single_line(&request.subject))
        .keep_bcc();

    for addr in &request.to {
        builder = builder.to(mailbox(addr)?);
    }
    for addr in request.cc.iter().flatten() {
        builder = builder.cc(mailbox(addr)?);
    }
    for addr in request.bcc.iter().flatten() {
        builder = builder.bcc(mailbox(addr)?);
    }

    let plain = normalize_newlines(&request.body);
    let html = request.html_body.as_deref().map(normalize_newlines);

    let email = if attachments.is_empty() {
        match html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(plain, html)),
            None => builder.singlepart(SinglePart::plain(plain)),
        }
    } else {
        let octet_stream = ContentType::parse(OCTET_STREAM).map_err(|e| DeliveryError::Build(e.to_string()))?;
        let mut mixed = match html {
            Some(html) => MultiPart::mixed().multipart(MultiPart::alternative_plain_html(plain, html)),
            None => MultiPart::mixed().singlepart(SinglePart::plain(plain)),
        };
        for attachment in attachments {
            mixed = mixed.singlepart(
                AttachmentPart::new(attachment.filename.clone())
                    .body(attachment.content.clone(), octet_stream.clone()),
            );
        }
        builder.multipart(mixed)
    };

    email.map_err(|e| DeliveryError::Build(e.to_string()))
}

fn mailbox(addr: &str) -> Result<Mailbox> {
    addr.parse()
        .map_err(|e| DeliveryError::Build(format!("invalid address '{}': {}", addr, e)))
}

// Header values never span lines; drop stray CR/LF from caller input.
fn single_line(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// CRLF line endings, with lone CR or LF treated as a line break.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}
