//! Error types for the mailer.
//!
//! Every failure path surfaces a [`MailError`] carrying a stable error
//! code, a kind used for metric classification, and transaction context
//! (the command in flight, the server reply, the attempt number).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for mailer operations.
pub type MailResult<T> = Result<T, MailError>;

/// Failure categories. Each kind maps onto one `errors_by_type` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// TCP connect, TLS handshake, or probe failure.
    Connection,
    /// AUTH LOGIN rejected by the server.
    Authentication,
    /// Local per-recipient rate limit or ban.
    RateLimit,
    /// Malformed address or request.
    Validation,
    /// Read or write deadline exceeded mid-transaction.
    Timeout,
    /// Attachment could not be resolved or read.
    Attachment,
    /// Server replied with a non-success code to an SMTP command.
    Command,
    /// Anything that fits no other bucket.
    Unknown,
}

impl ErrorKind {
    /// Stable code string for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "ECONNECTION",
            ErrorKind::Authentication => "EAUTH",
            ErrorKind::RateLimit => "ERATELIMIT",
            ErrorKind::Validation => "EINVALIDEMAIL",
            ErrorKind::Timeout => "ETIMEDOUT",
            ErrorKind::Attachment => "EATTACHMENT",
            ErrorKind::Command => "ECOMMAND",
            ErrorKind::Unknown => "EUNKNOWN",
        }
    }

    /// Key used in the `errors_by_type` metric map.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Attachment => "attachment",
            ErrorKind::Command => "command",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Returns true if a failed send with this kind is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Connection | ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_error", self.as_str())
    }
}

/// Mailer error with transaction context.
#[derive(Error, Debug)]
pub struct MailError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    context: HashMap<String, String>,
    timestamp: DateTime<Utc>,
    attempt_number: Option<u32>,
    socket_state: Option<String>,
    last_command: Option<String>,
    server_response: Option<String>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MailError {
    /// Creates a new error with the kind's default code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
            context: HashMap::new(),
            timestamp: Utc::now(),
            attempt_number: None,
            socket_state: None,
            last_command: None,
            server_response: None,
            cause: None,
        }
    }

    /// Overrides the error code (e.g. an underlying OS code).
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    /// Attaches a context key/value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Records which delivery attempt failed.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt_number = Some(attempt);
        self
    }

    /// Records the socket state at failure time.
    pub fn with_socket_state(mut self, state: impl Into<String>) -> Self {
        self.socket_state = Some(state.into());
        self
    }

    /// Records the SMTP command in flight when the failure occurred.
    pub fn with_last_command(mut self, command: impl Into<String>) -> Self {
        self.last_command = Some(command.into());
        self
    }

    /// Records the raw server reply that triggered the failure.
    pub fn with_server_response(mut self, response: impl Into<String>) -> Self {
        self.server_response = Some(response.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error code.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the context map.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Returns when the error was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the failing attempt number, if recorded.
    pub fn attempt_number(&self) -> Option<u32> {
        self.attempt_number
    }

    /// Returns the socket state, if recorded.
    pub fn socket_state(&self) -> Option<&str> {
        self.socket_state.as_deref()
    }

    /// Returns the command in flight at failure time, if recorded.
    pub fn last_command(&self) -> Option<&str> {
        self.last_command.as_deref()
    }

    /// Returns the server reply that triggered the failure, if recorded.
    pub fn server_response(&self) -> Option<&str> {
        self.server_response.as_deref()
    }

    /// Returns true if this failure is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    // Convenience constructors

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Creates a timeout error (code `ETIMEDOUT`).
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Creates a rate-limit rejection.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    /// Creates a validation error (code `EINVALIDEMAIL`).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates an attachment error.
    pub fn attachment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Attachment, message)
    }

    /// Creates a command error.
    pub fn command(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Command, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message).with_code("ECONFIG")
    }

    /// Classifies a failed SMTP reply into an error.
    ///
    /// 530/535 mean the server refused our credentials; everything else
    /// is a command failure. The full reply text rides along as
    /// `server_response`.
    pub fn from_reply(code: u16, response: impl Into<String>) -> Self {
        let kind = match code {
            530 | 535 => ErrorKind::Authentication,
            _ => ErrorKind::Command,
        };
        Self::new(kind, format!("Server returned {}", code)).with_server_response(response)
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.kind, self.code, self.message)?;
        if let Some(command) = &self.last_command {
            write!(f, " (during {})", command)?;
        }
        if let Some(response) = &self.server_response {
            write!(f, " (server: {})", response)?;
        }
        Ok(())
    }
}
