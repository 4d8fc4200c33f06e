//! SMTP protocol types.
//!
//! RFC 5321 commands and replies for the submission dialogue. Replies
//! are parsed from CRLF-delimited lines, honoring `XYZ-` continuation
//! markers, and classified by their 3-digit status code.

use std::fmt;

use crate::errors::{MailError, MailResult};

/// SMTP commands issued by the transaction engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Begin the AUTH LOGIN exchange.
    AuthLogin,
    /// MAIL FROM command.
    MailFrom {
        /// Envelope sender address.
        address: String,
    },
    /// RCPT TO command.
    RcptTo {
        /// Envelope recipient address.
        address: String,
    },
    /// DATA command.
    Data,
    /// No operation; used to probe cached connections.
    Noop,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for the wire (without the trailing CRLF).
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::AuthLogin => "AUTH LOGIN".to_string(),
            SmtpCommand::MailFrom { address } => format!("MAIL FROM:<{}>", address),
            SmtpCommand::RcptTo { address } => format!("RCPT TO:<{}>", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Noop => "NOOP".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// The command verb, used for failure context.
    pub fn name(&self) -> &'static str {
        match self {
            SmtpCommand::Ehlo(_) => "EHLO",
            SmtpCommand::StartTls => "STARTTLS",
            SmtpCommand::AuthLogin => "AUTH LOGIN",
            SmtpCommand::MailFrom { .. } => "MAIL FROM",
            SmtpCommand::RcptTo { .. } => "RCPT TO",
            SmtpCommand::Data => "DATA",
            SmtpCommand::Noop => "NOOP",
            SmtpCommand::Quit => "QUIT",
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_smtp_string())
    }
}

/// SMTP reply from the server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g. 250, 354, 550).
    pub code: u16,
    /// Reply text lines, one per wire line.
    pub message: Vec<String>,
    /// Whether the reply spanned multiple lines.
    pub is_multiline: bool,
}

impl SmtpResponse {
    /// Creates a single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![message.into()],
            is_multiline: false,
        }
    }

    /// Parses a reply from its raw lines.
    pub fn parse(lines: &[String]) -> MailResult<Self> {
        if lines.is_empty() {
            return Err(MailError::command("Empty server reply"));
        }

        let mut messages = Vec::new();
        let mut code = 0u16;

        for (i, line) in lines.iter().enumerate() {
            if line.len() < 3 {
                return Err(MailError::command(format!("Reply line too short: {}", line))
                    .with_server_response(line.clone()));
            }

            let parsed_code: u16 = line[..3].parse().map_err(|_| {
                MailError::command(format!("Invalid status code: {}", line))
                    .with_server_response(line.clone())
            })?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(MailError::command("Inconsistent status codes in multiline reply")
                    .with_server_response(lines.join("\n")));
            }

            messages.push(if line.len() > 4 {
                line[4..].to_string()
            } else {
                String::new()
            });
        }

        Ok(Self {
            code,
            message: messages,
            is_multiline: lines.len() > 1,
        })
    }

    /// Returns true for 2xx replies.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true for 3xx replies (334 mid-AUTH, 354 after DATA).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns true for 4xx replies.
    pub fn is_temporary_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Returns true for 5xx replies.
    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Returns the first reply line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(String::as_str).unwrap_or("")
    }

    /// Returns all reply lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts a failed reply into an error.
    pub fn to_error(&self) -> MailError {
        MailError::from_reply(self.code, format!("{} {}", self.code, self.full_message()))
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// Reply codes the engine checks for.
pub mod codes {
    /// Service ready (greeting, STARTTLS go-ahead).
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue the AUTH exchange.
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn command_formatting() {
        assert_eq!(
            SmtpCommand::Ehlo("relay.example.com".to_string()).to_smtp_string(),
            "EHLO relay.example.com"
        );
        assert_eq!(SmtpCommand::AuthLogin.to_smtp_string(), "AUTH LOGIN");
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "sender@example.com".to_string()
            }
            .to_smtp_string(),
            "MAIL FROM:<sender@example.com>"
        );
        assert_eq!(
            SmtpCommand::RcptTo {
                address: "rcpt@example.com".to_string()
            }
            .to_smtp_string(),
            "RCPT TO:<rcpt@example.com>"
        );
    }

    #[test]
    fn command_names() {
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "a@b.co".to_string()
            }
            .name(),
            "MAIL FROM"
        );
        assert_eq!(SmtpCommand::Data.name(), "DATA");
    }

    #[test]
    fn parse_single_line() {
        let response = SmtpResponse::parse(&["250 OK".to_string()]).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_success());
        assert_eq!(response.first_message(), "OK");
        assert!(!response.is_multiline);
    }

    #[test]
    fn parse_multiline() {
        let lines = vec![
            "250-smtp.example.com Hello".to_string(),
            "250-SIZE 10485760".to_string(),
            "250 STARTTLS".to_string(),
        ];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_multiline);
        assert_eq!(response.message.len(), 3);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SmtpResponse::parse(&[]).is_err());
        assert!(SmtpResponse::parse(&["hi".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["xyz nope".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["250-a".to_string(), "550 b".to_string()]).is_err());
    }

    #[test]
    fn classification() {
        assert!(SmtpResponse::new(235, "ok").is_success());
        assert!(SmtpResponse::new(354, "go ahead").is_intermediate());
        assert!(SmtpResponse::new(451, "try later").is_temporary_failure());
        assert!(SmtpResponse::new(550, "no such user").is_permanent_failure());
    }

    #[test]
    fn failed_reply_to_error() {
        let err = SmtpResponse::new(535, "Authentication credentials invalid").to_error();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.server_response().unwrap().contains("535"));

        let err = SmtpResponse::new(554, "Transaction failed").to_error();
        assert_eq!(err.kind(), ErrorKind::Command);
    }
}
