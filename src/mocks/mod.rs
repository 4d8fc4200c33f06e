//! Mock implementations for testing.
//!
//! A scripted transport that records every command and payload and
//! replays queued replies, plus canned replies and request fixtures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::{MailError, MailResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::SmtpTransport;
use crate::types::{Attachment, MailRequest};

/// Scripted SMTP transport for tests.
#[derive(Debug)]
pub struct MockTransport {
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    responses: Arc<Mutex<VecDeque<SmtpResponse>>>,
    default_response: SmtpResponse,
    data_received: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_next: Arc<Mutex<Option<MailError>>>,
    tls_enabled: bool,
    session_ready: bool,
    closed: bool,
}

impl MockTransport {
    /// Creates a mock that answers `250 OK` unless told otherwise.
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: SmtpResponse::new(codes::OK, "OK"),
            data_received: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(None)),
            tls_enabled: false,
            session_ready: false,
            closed: false,
        }
    }

    /// Queues a reply.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Queues a `250 OK` reply.
    pub fn queue_ok(&self) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues an error reply.
    pub fn queue_error(&self, code: u16, message: &str) -> &Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Makes the next transport call fail with `error`.
    pub fn fail_next_with(&self, error: MailError) -> &Self {
        *self.fail_next.lock().unwrap() = Some(error);
        self
    }

    /// Sets the TLS flag.
    pub fn set_tls(&mut self, enabled: bool) {
        self.tls_enabled = enabled;
    }

    /// Returns every command sent so far.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Returns every raw payload sent so far.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        self.data_received.lock().unwrap().clone()
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn next_response(&self) -> SmtpResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }

    fn take_failure(&self) -> Option<MailError> {
        self.fail_next.lock().unwrap().take()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.commands.lock().unwrap().push(command.clone());
        Ok(self.next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> MailResult<()> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.data_received.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> MailResult<SmtpResponse> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(self.next_response())
    }

    async fn upgrade_tls(&mut self, _host: &str) -> MailResult<()> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.tls_enabled = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    fn is_session_ready(&self) -> bool {
        self.session_ready
    }

    fn set_session_ready(&mut self, ready: bool) {
        self.session_ready = ready;
    }

    async fn close(&mut self) -> MailResult<()> {
        self.closed = true;
        self.session_ready = false;
        Ok(())
    }
}

/// A minimal text-only request.
pub fn test_request() -> MailRequest {
    MailRequest::builder()
        .to("recipient@example.com")
        .subject("Test Subject")
        .text("Test body")
        .build()
        .expect("fixture request must build")
}

/// A request with text, HTML, and an inline attachment.
pub fn test_request_with_attachment() -> MailRequest {
    MailRequest::builder()
        .to("recipient@example.com")
        .subject("Test with Attachment")
        .text("See attached")
        .html("<p>See attached</p>")
        .attachment(
            Attachment::from_bytes(b"Hello, World!".to_vec())
                .filename("hello.txt")
                .content_type("text/plain"),
        )
        .build()
        .expect("fixture request must build")
}

/// Canned `220` greeting.
pub fn greeting_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_READY, "relay.example.com ESMTP ready")
}

/// Canned `334` AUTH continuation.
pub fn auth_continue_response(challenge: &str) -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_CONTINUE, challenge)
}

/// Canned `235` AUTH success.
pub fn auth_success_response() -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_SUCCESS, "Authentication successful")
}

/// Canned `354` DATA go-ahead.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_commands_and_replays_responses() {
        let mut transport = MockTransport::new();
        transport.queue_ok();
        transport.queue_error(550, "no");

        let reply = transport
            .send_command(&SmtpCommand::Ehlo("test".to_string()))
            .await
            .unwrap();
        assert_eq!(reply.code, 250);

        let reply = transport.send_command(&SmtpCommand::Noop).await.unwrap();
        assert_eq!(reply.code, 550);

        // Queue drained; the default takes over.
        let reply = transport.send_command(&SmtpCommand::Quit).await.unwrap();
        assert_eq!(reply.code, 250);

        assert_eq!(transport.recorded_commands().len(), 3);
    }

    #[tokio::test]
    async fn programmed_failure_fires_once() {
        let mut transport = MockTransport::new();
        transport.fail_next_with(MailError::connection("scripted failure"));

        assert!(transport.send_command(&SmtpCommand::Noop).await.is_err());
        assert!(transport.send_command(&SmtpCommand::Noop).await.is_ok());
    }

    #[test]
    fn fixtures_build() {
        assert_eq!(test_request().recipient_count(), 1);
        assert_eq!(test_request_with_attachment().attachments.len(), 1);
        assert!(greeting_response().is_success());
        assert!(data_ready_response().is_intermediate());
    }
}
