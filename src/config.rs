//! Configuration and CLI argument parsing for ssh-dispatch

use clap::Parser;
use std::path::PathBuf;

use crate::error::{Result, SshDispatchError};
use crate::ssh::config::{
    DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_KEEPALIVE_INTERVAL_MS, DEFAULT_PORT,
    DEFAULT_RECONNECT_INTERVAL_MS,
};
use crate::ssh::{CipherPreference, SessionConfig};

/// Names under which the error state is published to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateKeys {
    /// Variable holding the error flag of the last dispatch
    pub error_variable: &'static str,
    /// Boolean indicator derived from the error flag
    pub error_feedback: &'static str,
}

pub const STATE_KEYS: StateKeys = StateKeys {
    error_variable: "returnedError",
    error_feedback: "commandErrorState",
};

/// ssh-dispatch CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-dispatch")]
#[command(version)]
#[command(about = "MCP server dispatching command strings to a persistent SSH connection")]
pub struct Args {
    /// SSH host to connect to; without one the client stays idle
    #[arg(long, env = "SSH_DISPATCH_HOST")]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SSH_DISPATCH_PORT")]
    pub port: u16,

    /// SSH username
    #[arg(long, default_value = "", env = "SSH_DISPATCH_USER")]
    pub user: String,

    /// SSH password; also answers a "Password: " keyboard-interactive prompt
    #[arg(long, env = "SSH_DISPATCH_PASSWORD")]
    pub password: Option<String>,

    /// Path to SSH private key file; used when no password is given
    #[arg(long, env = "SSH_DISPATCH_KEY")]
    pub key: Option<PathBuf>,

    /// Passphrase for the private key
    #[arg(long, env = "SSH_DISPATCH_PASSPHRASE")]
    pub passphrase: Option<String>,

    /// Keepalive interval in milliseconds (0 disables keepalives)
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_INTERVAL_MS, env = "SSH_DISPATCH_KEEPALIVE_INTERVAL")]
    pub keepalive_interval: u64,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_MS, env = "SSH_DISPATCH_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout: u64,

    /// Preferred cipher family: auto, aes256, aes192 or aes128.
    /// Unknown values fall back to auto.
    #[arg(long, default_value = "auto", env = "SSH_DISPATCH_CIPHER")]
    pub cipher: String,

    /// Delay before reconnecting after a failure, in milliseconds
    #[arg(long, default_value_t = DEFAULT_RECONNECT_INTERVAL_MS, env = "SSH_DISPATCH_RECONNECT_INTERVAL")]
    pub reconnect_interval: u64,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Session parameters handed to the SSH client
    pub session: SessionConfig,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let mut session = SessionConfig {
            host: args.host,
            username: args.user,
            ..SessionConfig::default()
        }
        .with_port(args.port)
        .with_keepalive_interval_ms(args.keepalive_interval)
        .with_handshake_timeout_ms(args.handshake_timeout)
        .with_cipher(CipherPreference::from_name(&args.cipher))
        .with_reconnect_interval_ms(args.reconnect_interval);

        if let Some(password) = sanitize_secret(args.password) {
            session = session.with_password(password);
        }
        if let Some(key) = args.key {
            session = session.with_private_key_path(key);
        }
        if let Some(passphrase) = sanitize_secret(args.passphrase) {
            session = session.with_passphrase(passphrase);
        }

        Ok(Config { session })
    }

    /// Human-readable connection target for logs
    pub fn target(&self) -> String {
        match self.session.active_host() {
            Some(host) => format!("{}@{}:{}", self.session.username, host, self.session.port),
            None => "(no host configured)".to_string(),
        }
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if let Some(ref host) = args.host {
        if host.chars().any(char::is_whitespace) {
            errors.push(format!("Invalid --host: {:?}", host));
        }
    }

    if args.handshake_timeout == 0 {
        errors.push("--handshake-timeout must be greater than 0".to_string());
    }

    if args.reconnect_interval == 0 {
        errors.push("--reconnect-interval must be greater than 0".to_string());
    }

    if !errors.is_empty() {
        return Err(SshDispatchError::config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Return None if the secret is empty
fn sanitize_secret(secret: Option<String>) -> Option<String> {
    secret.filter(|s| !s.is_empty())
}
