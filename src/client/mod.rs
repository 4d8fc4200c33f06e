//! Mailer facade and SMTP transaction engine.
//!
//! [`Mailer`] owns the configuration, the per-recipient rate limiter,
//! the metrics accumulator, and the structured logger. A send validates
//! every recipient, consults the rate limiter, optionally probes the
//! relay, then runs the SMTP dialogue over a fresh or kept-alive
//! connection under the retry policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::attachment;
use crate::auth::Credentials;
use crate::config::{MailerConfig, RetryConfig};
use crate::errors::{MailError, MailResult};
use crate::limiter::RateLimiter;
use crate::logging::Logger;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::mime::{prepare_data, MimeComposer};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::{SmtpTransport, TcpTransport};
use crate::types::{validate_address, MailRequest, SendResult};

/// Outbound SMTP submission client.
pub struct Mailer {
    config: MailerConfig,
    metrics: Arc<Metrics>,
    limiter: RateLimiter,
    logger: Logger,
    composer: MimeComposer,
    /// Serializes sends and holds the kept-alive connection between them.
    connection: tokio::sync::Mutex<Option<TcpTransport>>,
}

impl Mailer {
    /// Creates a mailer from a validated configuration.
    pub fn new(config: MailerConfig) -> MailResult<Self> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());
        let limiter = RateLimiter::new(config.rate_limiting.clone(), Arc::clone(&metrics));
        let logger = Logger::new(&config.logging);

        Ok(Self {
            config,
            metrics,
            limiter,
            logger,
            composer: MimeComposer::new(),
            connection: tokio::sync::Mutex::new(None),
        })
    }

    /// Sends one message.
    ///
    /// Validation and rate-limit rejections return before any socket is
    /// opened and do not count into `emails_total`. Transaction
    /// failures count once against every recipient of the send.
    pub async fn send_mail(&self, request: MailRequest) -> MailResult<SendResult> {
        let mut connection = self.connection.lock().await;

        self.logger.debug(
            "Sending mail",
            json!({
                "to": request.to,
                "cc": request.cc,
                "subject": request.subject,
                "attachments": request.attachments.len(),
            }),
        );

        let recipients: Vec<String> = request.all_recipients().cloned().collect();
        if recipients.is_empty() {
            return Err(MailError::validation("At least one recipient is required"));
        }
        for recipient in &recipients {
            validate_address(recipient)?;
        }

        if self.config.rate_limiting.per_recipient {
            for recipient in &recipients {
                self.limiter.check(recipient)?;
            }
        }

        if self.config.verify_before_send && !self.verify_connection().await {
            return Err(MailError::connection(format!(
                "Relay {} is unreachable",
                self.config.address()
            )));
        }

        let mut loaded = Vec::new();
        for entry in &request.attachments {
            if let Some(att) = attachment::load(entry).await? {
                loaded.push(att);
            }
        }
        let payload = self.composer.compose(&self.config.from, &request, &loaded);

        let started = Instant::now();
        let outcome = self
            .deliver(&mut connection, &recipients, payload.as_bytes())
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(message_id) => {
                self.metrics.record_success(elapsed);
                self.limiter.record_success(&recipients);
                self.logger.info(
                    "Mail sent",
                    json!({
                        "message_id": message_id,
                        "recipients": recipients.join(", "),
                        "duration_ms": elapsed.as_millis() as u64,
                    }),
                );
                Ok(SendResult {
                    success: true,
                    message_id,
                    recipients: recipients.join(", "),
                    timestamp: Utc::now(),
                    duration: elapsed,
                })
            }
            Err(error) => {
                self.limiter.record_failure(&recipients);
                self.metrics.record_failure(elapsed, &recipients, &error);
                self.logger.error(
                    "Mail send failed",
                    json!({
                        "code": error.code(),
                        "kind": error.kind().as_str(),
                        "error": error.message(),
                        "recipients": recipients.join(", "),
                        "last_command": error.last_command(),
                        "server_response": error.server_response(),
                    }),
                );
                Err(error)
            }
        }
    }

    /// Probes the relay with a throwaway TCP connection.
    ///
    /// A failed probe flips `last_email_status` to failure and bumps the
    /// connection error counters.
    pub async fn verify_connection(&self) -> bool {
        let probe = timeout(
            self.config.timeout,
            TcpStream::connect(self.config.address()),
        )
        .await;

        match probe {
            Ok(Ok(_socket)) => true,
            _ => {
                self.metrics.record_connection_error();
                self.logger.warn(
                    "Connection probe failed",
                    json!({ "host": self.config.host, "port": self.config.port }),
                );
                false
            }
        }
    }

    /// Returns a point-in-time metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MailerConfig {
        &self.config
    }

    async fn deliver(
        &self,
        connection: &mut Option<TcpTransport>,
        recipients: &[String],
        payload: &[u8],
    ) -> MailResult<String> {
        let attempts = self.config.retry.attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match self.deliver_once(connection, recipients, payload).await {
                Ok(message_id) => {
                    if attempt > 1 {
                        self.metrics.record_successful_retry();
                    }
                    return Ok(message_id);
                }
                Err(error) if error.is_retryable() && attempt < attempts => {
                    self.metrics.record_retry_attempt();
                    let delay = retry_delay(&self.config.retry, attempt);
                    self.logger.warn(
                        "Retrying send",
                        json!({
                            "attempt": attempt,
                            "delay_ms": delay.as_millis() as u64,
                            "error": error.message(),
                        }),
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.with_attempt(attempt)),
            }
        }
    }

    async fn deliver_once(
        &self,
        connection: &mut Option<TcpTransport>,
        recipients: &[String],
        payload: &[u8],
    ) -> MailResult<String> {
        let mut transport = match connection.take() {
            // A kept-alive connection may have gone stale; probe it and
            // fall back to a fresh one.
            Some(mut cached) => match cached.send_command(&SmtpCommand::Noop).await {
                Ok(reply) if reply.is_success() => cached,
                _ => self.connect().await?,
            },
            None => self.connect().await?,
        };

        let outcome = self.run_transaction(&mut transport, recipients, payload).await;

        match outcome {
            Ok(message_id) => {
                if self.config.keep_alive {
                    *connection = Some(transport);
                } else {
                    let _ = transport.close().await;
                }
                Ok(message_id)
            }
            Err(error) => {
                let _ = transport.close().await;
                Err(error)
            }
        }
    }

    async fn connect(&self) -> MailResult<TcpTransport> {
        TcpTransport::connect(
            &self.config.host,
            self.config.port,
            self.config.timeout,
            self.config.secure,
        )
        .await
    }

    /// Runs the SMTP dialogue on an open connection whose greeting has
    /// been consumed: EHLO, STARTTLS + EHLO when TLS is not yet active,
    /// AUTH LOGIN, then the mail transaction itself.
    pub(crate) async fn run_transaction(
        &self,
        transport: &mut dyn SmtpTransport,
        recipients: &[String],
        payload: &[u8],
    ) -> MailResult<String> {
        if !transport.is_session_ready() {
            self.negotiate(transport).await?;
            transport.set_session_ready(true);
        }

        let mail_from = SmtpCommand::MailFrom {
            address: self.config.from.clone(),
        };
        expect_success(transport.send_command(&mail_from).await, &mail_from)?;

        for recipient in recipients {
            let rcpt_to = SmtpCommand::RcptTo {
                address: recipient.clone(),
            };
            expect_success(transport.send_command(&rcpt_to).await, &rcpt_to)?;
        }

        let data = SmtpCommand::Data;
        let reply = attach_command(transport.send_command(&data).await, &data)?;
        if reply.code != codes::START_MAIL_INPUT {
            return Err(reply.to_error().with_last_command(data.name()));
        }

        // Wire framing happens here, not in the composer: dot-stuff the
        // message and append the <CRLF>.<CRLF> terminator.
        let framed = prepare_data(payload);
        transport
            .send_data(&framed)
            .await
            .map_err(|e| e.with_last_command("DATA"))?;
        let reply = transport
            .read_response()
            .await
            .map_err(|e| e.with_last_command("DATA"))?;
        if !reply.is_success() {
            return Err(reply.to_error().with_last_command("DATA"));
        }

        Ok(generate_message_id())
    }

    async fn negotiate(&self, transport: &mut dyn SmtpTransport) -> MailResult<()> {
        let ehlo = SmtpCommand::Ehlo(self.config.host.clone());
        expect_success(transport.send_command(&ehlo).await, &ehlo)?;

        if !self.config.secure && !transport.is_tls() {
            let starttls = SmtpCommand::StartTls;
            expect_success(transport.send_command(&starttls).await, &starttls)?;
            transport
                .upgrade_tls(&self.config.host)
                .await
                .map_err(|e| e.with_last_command(starttls.name()))?;
            // Capabilities do not survive the TLS boundary.
            expect_success(transport.send_command(&ehlo).await, &ehlo)?;
        }

        if let Some(auth) = &self.config.auth {
            let credentials = Credentials::from(auth);
            let auth_login = SmtpCommand::AuthLogin;

            let reply = attach_command(transport.send_command(&auth_login).await, &auth_login)?;
            expect_auth_continue(&reply)?;

            transport
                .send_data(format!("{}\r\n", credentials.encoded_user()).as_bytes())
                .await
                .map_err(|e| e.with_last_command(auth_login.name()))?;
            let reply = transport
                .read_response()
                .await
                .map_err(|e| e.with_last_command(auth_login.name()))?;
            expect_auth_continue(&reply)?;

            transport
                .send_data(format!("{}\r\n", credentials.encoded_pass()).as_bytes())
                .await
                .map_err(|e| e.with_last_command(auth_login.name()))?;
            let reply = transport
                .read_response()
                .await
                .map_err(|e| e.with_last_command(auth_login.name()))?;
            if reply.code != codes::AUTH_SUCCESS {
                return Err(MailError::authentication("Authentication rejected by server")
                    .with_server_response(format!("{} {}", reply.code, reply.full_message()))
                    .with_last_command(auth_login.name()));
            }
        }

        Ok(())
    }
}

fn expect_success(
    result: MailResult<SmtpResponse>,
    command: &SmtpCommand,
) -> MailResult<SmtpResponse> {
    let reply = attach_command(result, command)?;
    if reply.is_success() {
        Ok(reply)
    } else {
        Err(reply.to_error().with_last_command(command.name()))
    }
}

fn attach_command(
    result: MailResult<SmtpResponse>,
    command: &SmtpCommand,
) -> MailResult<SmtpResponse> {
    result.map_err(|e| e.with_last_command(command.name()))
}

fn expect_auth_continue(reply: &SmtpResponse) -> MailResult<()> {
    if reply.code == codes::AUTH_CONTINUE {
        Ok(())
    } else {
        Err(MailError::authentication("Authentication rejected by server")
            .with_server_response(format!("{} {}", reply.code, reply.full_message()))
            .with_last_command("AUTH LOGIN"))
    }
}

/// Local telemetry id: 16 random bytes, hex-encoded. No Message-Id
/// header is derived from it.
fn generate_message_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_delay.as_millis() as f64
        * config.multiplier.powi(attempt as i32 - 1);
    let capped = base.min(config.max_delay.as_millis() as f64);
    let with_jitter = if config.jitter {
        capped + rand::random::<f64>() * 0.3 * capped
    } else {
        capped
    };
    Duration::from_millis(with_jitter as u64)
}
