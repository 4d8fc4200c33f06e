//! Configuration for the mailer.
//!
//! Provides builder-pattern configuration for:
//! - Relay connection settings (host, port, implicit TLS)
//! - Authentication credentials
//! - Idle-socket timeout and connection reuse
//! - Retry policy
//! - Per-recipient rate limiting and abuse controls
//! - Structured logging

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{MailError, MailResult};
use crate::logging::{LogFormat, LogLevel};
use crate::types::validate_address;

/// Default idle-socket timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Port on which TLS is implicit rather than negotiated via STARTTLS.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Mailer configuration, immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailerConfig {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Implicit TLS from the first byte. Forced on for port 465.
    #[serde(default)]
    pub secure: bool,
    /// Authentication credentials, if the relay requires them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Envelope sender address. Required.
    pub from: String,
    /// Idle-socket timeout applied to connects, reads, and writes.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Keep the connection open after a send and reuse it for the next.
    #[serde(default)]
    pub keep_alive: bool,
    /// Probe the relay with a throwaway connection before each send.
    #[serde(default = "default_true")]
    pub verify_before_send: bool,
    /// Retry policy for retryable transaction failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-recipient rate limiting and abuse controls.
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    /// Structured logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay credentials for AUTH LOGIN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Username.
    pub user: String,
    /// Password (never serialized).
    #[serde(skip, default = "empty_secret")]
    pub pass: SecretString,
}

impl AuthConfig {
    /// Creates credentials.
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: SecretString::new(pass.into()),
        }
    }
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

/// Retry policy. A send is attempted at most `attempts` times; only
/// connection and timeout failures are retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum delivery attempts per send.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomize delays to avoid thundering herds.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_attempts() -> u32 {
    3
}
fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

/// Per-recipient rate limiting and abuse controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enforce limits per recipient. When false, no limiting occurs.
    #[serde(default = "default_true")]
    pub per_recipient: bool,
    /// Maximum admissions per recipient within one cooldown window.
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,
    /// Window after which a recipient's admission count resets.
    #[serde(default = "default_cooldown_period", with = "humantime_serde")]
    pub cooldown_period: Duration,
    /// How long a ban lasts.
    #[serde(default = "default_ban_duration", with = "humantime_serde")]
    pub ban_duration: Duration,
    /// Consecutive failures that trigger the failure-cooldown check.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Failures within this window of the last failure escalate to a ban.
    #[serde(default = "default_failure_cooldown", with = "humantime_serde")]
    pub failure_cooldown: Duration,
    /// Attempts inside the rapid period that trigger a ban.
    #[serde(default = "default_max_rapid_attempts")]
    pub max_rapid_attempts: u32,
    /// Window for counting rapid attempts.
    #[serde(default = "default_rapid_period", with = "humantime_serde")]
    pub rapid_period: Duration,
    /// Cap on tracked recipients; least-recently-seen entries are evicted.
    #[serde(default = "default_max_tracked_recipients")]
    pub max_tracked_recipients: usize,
}

fn default_true() -> bool {
    true
}
fn default_burst_limit() -> u32 {
    5
}
fn default_cooldown_period() -> Duration {
    Duration::from_secs(1)
}
fn default_ban_duration() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_failure_cooldown() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_max_rapid_attempts() -> u32 {
    10
}
fn default_rapid_period() -> Duration {
    Duration::from_secs(10)
}
fn default_max_tracked_recipients() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_recipient: true,
            burst_limit: default_burst_limit(),
            cooldown_period: default_cooldown_period(),
            ban_duration: default_ban_duration(),
            max_consecutive_failures: default_max_consecutive_failures(),
            failure_cooldown: default_failure_cooldown(),
            max_rapid_attempts: default_max_rapid_attempts(),
            rapid_period: default_rapid_period(),
            max_tracked_recipients: default_max_tracked_recipients(),
        }
    }
}

/// Structured logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level to emit.
    #[serde(default)]
    pub level: LogLevel,
    /// Entry format.
    #[serde(default)]
    pub format: LogFormat,
    /// Payload fields copied verbatim into every entry.
    #[serde(default)]
    pub custom_fields: Vec<String>,
    /// Append-mode destination file. Absent means logging is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl MailerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> MailerConfigBuilder {
        MailerConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        if self.host.is_empty() {
            return Err(MailError::configuration("Host is required"));
        }
        if self.port == 0 {
            return Err(MailError::configuration("Port must be non-zero"));
        }
        if self.from.is_empty() {
            return Err(MailError::configuration("Sender address (from) is required"));
        }
        validate_address(&self.from)?;
        if self.retry.attempts == 0 {
            return Err(MailError::configuration("retry.attempts must be at least 1"));
        }
        if self.rate_limiting.max_tracked_recipients == 0 {
            return Err(MailError::configuration(
                "rate_limiting.max_tracked_recipients must be positive",
            ));
        }
        Ok(())
    }

    /// Returns the relay address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`MailerConfig`].
#[derive(Debug, Default)]
pub struct MailerConfigBuilder {
    host: Option<String>,
    port: u16,
    secure: bool,
    auth: Option<AuthConfig>,
    from: Option<String>,
    timeout: Option<Duration>,
    keep_alive: bool,
    verify_before_send: Option<bool>,
    retry: RetryConfig,
    rate_limiting: RateLimitConfig,
    logging: LoggingConfig,
}

impl MailerConfigBuilder {
    /// Sets the relay host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the relay port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables implicit TLS.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets AUTH LOGIN credentials.
    pub fn credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::new(user, pass));
        self
    }

    /// Sets the envelope sender.
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Sets the idle-socket timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keeps the connection open between sends.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Enables or disables the pre-send connection probe.
    pub fn verify_before_send(mut self, verify: bool) -> Self {
        self.verify_before_send = Some(verify);
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the rate-limiting policy.
    pub fn rate_limiting(mut self, rate_limiting: RateLimitConfig) -> Self {
        self.rate_limiting = rate_limiting;
        self
    }

    /// Sets the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> MailResult<MailerConfig> {
        let mut secure = self.secure;
        let port = self.port;
        if port == IMPLICIT_TLS_PORT && !secure {
            // Port 465 is TLS-from-the-first-byte; a cleartext dialogue
            // on it can never succeed.
            #[cfg(feature = "tracing")]
            tracing::warn!(port, "port 465 implies implicit TLS; forcing secure = true");
            secure = true;
        }

        let config = MailerConfig {
            host: self.host.ok_or_else(|| MailError::configuration("Host is required"))?,
            port,
            secure,
            auth: self.auth,
            from: self.from.ok_or_else(|| {
                MailError::configuration("Sender address (from) is required")
            })?,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            keep_alive: self.keep_alive,
            verify_before_send: self.verify_before_send.unwrap_or(true),
            retry: self.retry,
            rate_limiting: self.rate_limiting,
            logging: self.logging,
        };

        config.validate()?;
        Ok(config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_happy_path() {
        let config = MailerConfig::builder()
            .host("smtp.example.com")
            .port(587)
            .credentials("user", "pass")
            .from("sender@example.com")
            .build()
            .unwrap();

        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 587);
        assert!(!config.secure);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.verify_before_send);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.rate_limiting.burst_limit, 5);
    }

    #[test]
    fn missing_from_fails() {
        let result = MailerConfig::builder()
            .host("smtp.example.com")
            .port(587)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn port_465_forces_secure() {
        let config = MailerConfig::builder()
            .host("smtp.example.com")
            .port(465)
            .from("sender@example.com")
            .build()
            .unwrap();
        assert!(config.secure);
    }

    #[test]
    fn invalid_from_rejected() {
        let result = MailerConfig::builder()
            .host("smtp.example.com")
            .port(587)
            .from("notanemail")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rate_limit_defaults() {
        let limits = RateLimitConfig::default();
        assert!(limits.per_recipient);
        assert_eq!(limits.burst_limit, 5);
        assert_eq!(limits.cooldown_period, Duration::from_secs(1));
        assert_eq!(limits.ban_duration, Duration::from_secs(7200));
        assert_eq!(limits.max_consecutive_failures, 3);
        assert_eq!(limits.failure_cooldown, Duration::from_secs(300));
        assert_eq!(limits.max_rapid_attempts, 10);
        assert_eq!(limits.rapid_period, Duration::from_secs(10));
    }
}
