//! SSH session configuration types
//!
//! The session configuration as edited by the user, and the resolved
//! parameters handed to the transport on every connection attempt.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::cipher::{CipherConstraint, CipherPreference};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Keepalive interval in milliseconds (0 = disabled)
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 0;

/// Time allowed for connect + handshake + authentication, in milliseconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 20_000;

/// Fixed delay before a reconnect attempt, in milliseconds
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1_000;

/// SSH session configuration
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Remote hostname or IP address; no connection is made while unset
    pub host: Option<String>,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Password for password / keyboard-interactive authentication
    pub password: Option<String>,

    /// Path of the private key, read only when no password is set
    pub private_key_path: Option<PathBuf>,

    /// Passphrase protecting the private key
    pub passphrase: Option<String>,

    /// Keepalive interval in milliseconds (0 = disabled)
    pub keepalive_interval_ms: u64,

    /// Handshake timeout in milliseconds
    pub handshake_timeout_ms: u64,

    /// Preferred cipher family
    pub cipher: CipherPreference,

    /// Delay before reconnecting after a failure, in milliseconds
    pub reconnect_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            username: String::new(),
            password: None,
            private_key_path: None,
            passphrase: None,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            cipher: CipherPreference::Auto,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// Create a new session configuration with minimal required fields
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            username: username.into(),
            ..Self::default()
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the private key file used for key-based authentication
    pub fn with_private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set the private key passphrase
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set the keepalive interval in milliseconds
    pub fn with_keepalive_interval_ms(mut self, ms: u64) -> Self {
        self.keepalive_interval_ms = ms;
        self
    }

    /// Set the handshake timeout in milliseconds
    pub fn with_handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    /// Set the preferred cipher family
    pub fn with_cipher(mut self, cipher: CipherPreference) -> Self {
        self.cipher = cipher;
        self
    }

    /// Set the reconnect delay in milliseconds
    pub fn with_reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.reconnect_interval_ms = ms;
        self
    }

    /// Host to connect to, if one is configured
    pub fn active_host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    /// Key-based authentication is used whenever the password is absent or empty
    pub fn uses_key_auth(&self) -> bool {
        self.password.as_deref().is_none_or(str::is_empty)
    }

    /// Reconnect delay as a duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("cipher", &self.cipher)
            .field("reconnect_interval_ms", &self.reconnect_interval_ms)
            .finish()
    }
}

/// Parameters for one connection attempt
#[derive(Clone)]
pub struct TransportParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// Private key text; empty when none was loaded
    pub private_key: String,
    pub passphrase: Option<String>,
    /// Zero disables keepalives
    pub keepalive_interval: Duration,
    pub cipher: Option<CipherConstraint>,
    pub handshake_timeout: Duration,
}

impl TransportParams {
    /// Resolve the parameters for `host` from a session configuration
    pub fn resolve(config: &SessionConfig, host: &str, private_key: String) -> Self {
        Self {
            host: host.to_string(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone().filter(|p| !p.is_empty()),
            private_key,
            passphrase: config.passphrase.clone().filter(|p| !p.is_empty()),
            keepalive_interval: Duration::from_millis(config.keepalive_interval_ms),
            cipher: super::cipher::resolve(config.cipher),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
        }
    }
}

impl fmt::Debug for TransportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_len", &self.private_key.len())
            .field("keepalive_interval", &self.keepalive_interval)
            .field("cipher", &self.cipher)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}
