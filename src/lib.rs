//! # relaymail
//!
//! An outbound SMTP submission client with:
//! - RFC 5321 submission over implicit TLS (port 465) or STARTTLS
//! - RFC 4954 AUTH LOGIN authentication
//! - `multipart/mixed` MIME composition with header-injection defenses
//!   and base64 attachment encoding
//! - Per-recipient rate limiting, rapid-attempt detection, and
//!   time-bounded bans
//! - Delivery metrics (counters, latency histogram, failure ledger) and
//!   structured, secret-masking logs
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relaymail::{Mailer, MailerConfig, MailRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MailerConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .credentials("user@example.com", "password")
//!         .from("user@example.com")
//!         .build()?;
//!
//!     let mailer = Mailer::new(config)?;
//!
//!     let request = MailRequest::builder()
//!         .to("recipient@example.com")
//!         .subject("Hello from Rust!")
//!         .text("This is a test email.")
//!         .build()?;
//!
//!     let result = mailer.send_mail(request).await?;
//!     println!("Message sent with id {}", result.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Message construction
pub mod attachment;
pub mod mime;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Abuse control and observability
pub mod limiter;
pub mod logging;
pub mod metrics;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use attachment::LoadedAttachment;
pub use client::Mailer;
pub use config::{
    AuthConfig, LoggingConfig, MailerConfig, MailerConfigBuilder, RateLimitConfig, RetryConfig,
};
pub use errors::{ErrorKind, MailError, MailResult};
pub use logging::{LogFormat, LogLevel};
pub use metrics::{EmailStatus, FailureRecord, MetricsSnapshot};
pub use mime::{prepare_data, resolve_media_type, sanitize_header, MimeComposer};
pub use protocol::{SmtpCommand, SmtpResponse};
pub use transport::{SmtpTransport, TcpTransport};
pub use types::{
    validate_address, Attachment, AttachmentContent, MailRequest, MailRequestBuilder, Priority,
    SendResult,
};
