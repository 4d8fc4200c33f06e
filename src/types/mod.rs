//! Core request and result types.
//!
//! This module provides:
//! - The outbound mail request and its builder
//! - Attachment sources (filesystem path or inline content)
//! - Send results
//! - Syntactic address validation

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::errors::{MailError, MailResult};

/// Special characters allowed inside a local-part atom.
const ATOM_SPECIALS: &str = "!#$%&'*+-/=?^_`{|}~";

/// Validates an address shape: dot-separated atoms, an `@`, and a dotted
/// domain of letter-digit-hyphen labels.
///
/// No DNS or MX lookup is performed. Failures carry code `EINVALIDEMAIL`.
pub fn validate_address(address: &str) -> MailResult<()> {
    let invalid = || MailError::validation(format!("Invalid email address: {}", address));

    if address.is_empty()
        || address.chars().any(char::is_whitespace)
        || address.contains("..")
        || address.contains("@@")
        || address.starts_with('.')
        || address.ends_with('.')
    {
        return Err(invalid());
    }

    let mut parts = address.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(invalid());
    }

    for atom in local.split('.') {
        if !is_valid_atom(atom) {
            return Err(invalid());
        }
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid());
    }
    for label in labels {
        if !is_valid_label(label) {
            return Err(invalid());
        }
    }

    Ok(())
}

fn is_valid_atom(atom: &str) -> bool {
    let bytes = atom.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && atom
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || ATOM_SPECIALS.contains(c))
        }
        _ => false,
    }
}

fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        _ => false,
    }
}

/// Message priority. Accepted on requests; not currently emitted as a
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Urgent.
    High,
    /// Default.
    Normal,
    /// Bulk.
    Low,
}

/// Inline attachment content.
#[derive(Debug, Clone)]
pub enum AttachmentContent {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Text adopted as UTF-8 bytes.
    Text(String),
}

/// An attachment, sourced from a filesystem path or inline content.
///
/// A path takes precedence over inline content; an entry with neither is
/// skipped silently at composition time.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    /// Filesystem path, absolute or relative to the process CWD.
    pub path: Option<PathBuf>,
    /// Inline content.
    pub content: Option<AttachmentContent>,
    /// Filename presented to the recipient.
    pub filename: Option<String>,
    /// Explicit media type. Resolved from the filename extension when
    /// absent.
    pub content_type: Option<String>,
}

impl Attachment {
    /// Creates an attachment from a filesystem path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Creates an attachment from raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            content: Some(AttachmentContent::Bytes(data)),
            ..Default::default()
        }
    }

    /// Creates an attachment from text content.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: Some(AttachmentContent::Text(text.into())),
            ..Default::default()
        }
    }

    /// Sets the presented filename.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets an explicit media type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// An outbound mail request.
#[derive(Debug, Clone, Default)]
pub struct MailRequest {
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon-copy recipients.
    pub cc: Vec<String>,
    /// Blind-carbon-copy recipients. Never emitted in headers.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Attachments.
    pub attachments: Vec<Attachment>,
    /// Message priority. Accepted but not emitted.
    pub priority: Option<Priority>,
    /// Extra headers. Accepted but not emitted.
    pub headers: HashMap<String, String>,
}

impl MailRequest {
    /// Creates a new request builder.
    pub fn builder() -> MailRequestBuilder {
        MailRequestBuilder::default()
    }

    /// All recipients in To, Cc, Bcc order.
    pub fn all_recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Total recipient count.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

/// Builder for [`MailRequest`].
#[derive(Debug, Default)]
pub struct MailRequestBuilder {
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: String,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    priority: Option<Priority>,
    headers: HashMap<String, String>,
}

impl MailRequestBuilder {
    /// Adds a primary recipient.
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Adds multiple primary recipients.
    pub fn to_many<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Adds a carbon-copy recipient.
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    /// Adds a blind-carbon-copy recipient.
    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Adds an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Adds an extra header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Builds the request. At least one To recipient is required.
    pub fn build(self) -> MailResult<MailRequest> {
        if self.to.is_empty() {
            return Err(MailError::validation("At least one recipient is required"));
        }

        Ok(MailRequest {
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            text: self.text,
            html: self.html,
            attachments: self.attachments,
            priority: self.priority,
            headers: self.headers,
        })
    }
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Always true; failures surface as errors.
    pub success: bool,
    /// Locally synthesized message id (16 random bytes, hex-encoded).
    pub message_id: String,
    /// All recipients of this send, joined with `", "`.
    pub recipients: String,
    /// When the send completed.
    pub timestamp: DateTime<Utc>,
    /// How long the send took.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_addresses() {
        for address in ["a@b.co", "a.b@c.d.e", "a+b@c.d", "user123@sub.example.com"] {
            assert!(validate_address(address).is_ok(), "expected accept: {}", address);
        }
    }

    #[test]
    fn rejects_invalid_addresses() {
        for address in [
            "",
            "a b@c.d",
            "a..b@c.d",
            ".a@c.d",
            "a.@c.d",
            "a@@c.d",
            "notanemail",
            "a@domain",
            "a@-bad.com",
            "a@bad-.com",
        ] {
            assert!(validate_address(address).is_err(), "expected reject: {}", address);
        }
    }

    #[test]
    fn rejection_carries_code() {
        let err = validate_address("notanemail").unwrap_err();
        assert_eq!(err.code(), "EINVALIDEMAIL");
    }

    #[test]
    fn request_builder() {
        let request = MailRequest::builder()
            .to("a@b.co")
            .cc("c@d.co")
            .bcc("e@f.co")
            .subject("Hello")
            .text("Body")
            .build()
            .unwrap();

        let recipients: Vec<&String> = request.all_recipients().collect();
        assert_eq!(recipients, ["a@b.co", "c@d.co", "e@f.co"]);
        assert_eq!(request.recipient_count(), 3);
    }

    #[test]
    fn request_requires_recipient() {
        let result = MailRequest::builder().subject("x").text("y").build();
        assert!(result.is_err());
    }

    #[test]
    fn recipients_keep_input_order() {
        let request = MailRequest::builder()
            .to_many(["z@z.co", "a@a.co"])
            .cc("m@m.co")
            .subject("order")
            .build()
            .unwrap();
        let recipients: Vec<&String> = request.all_recipients().collect();
        assert_eq!(recipients, ["z@z.co", "a@a.co", "m@m.co"]);
    }

    #[test]
    fn attachment_constructors() {
        let a = Attachment::from_path("/tmp/report.pdf");
        assert!(a.path.is_some());
        assert!(a.content.is_none());

        let b = Attachment::from_bytes(vec![1, 2, 3])
            .filename("blob.bin")
            .content_type("application/octet-stream");
        assert!(b.path.is_none());
        assert_eq!(b.filename.as_deref(), Some("blob.bin"));
    }
}
