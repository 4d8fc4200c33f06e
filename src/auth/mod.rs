//! AUTH LOGIN credentials and encoding.
//!
//! The submission dialogue authenticates with RFC 4954 AUTH LOGIN: the
//! mechanism name, then the base64-encoded username and password, each
//! in response to a 334 continuation.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use crate::config::AuthConfig;

/// Relay credentials.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub user: String,
    /// Password (protected).
    pub pass: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: SecretString::new(pass.into()),
        }
    }

    /// Base64-encoded username line for the first 334 continuation.
    pub fn encoded_user(&self) -> String {
        BASE64.encode(&self.user)
    }

    /// Base64-encoded password line for the second 334 continuation.
    pub fn encoded_pass(&self) -> String {
        BASE64.encode(self.pass.expose_secret())
    }
}

impl From<&AuthConfig> for Credentials {
    fn from(config: &AuthConfig) -> Self {
        Self {
            user: config.user.clone(),
            pass: config.pass.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_encoding() {
        let credentials = Credentials::new("user@example.com", "secret");
        assert_eq!(
            BASE64.decode(credentials.encoded_user()).unwrap(),
            b"user@example.com"
        );
        assert_eq!(BASE64.decode(credentials.encoded_pass()).unwrap(), b"secret");
    }

    #[test]
    fn debug_redacts_password() {
        let credentials = Credentials::new("user", "hunter2");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
