//! Error types for ssh-dispatch

use thiserror::Error;

use crate::ssh::ConnectionStatus;

/// Main error type for ssh-dispatch
#[derive(Debug, Error)]
pub enum SshDispatchError {
    /// SSH connection failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication failed (password, key, or keyboard-interactive)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A dispatch was requested while the connection was not ready
    #[error("Connection not ready (status: {0})")]
    NotReady(ConnectionStatus),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// Channel-level transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The client event loop is gone
    #[error("SSH client is closed")]
    Closed,
}

/// Result type alias using SshDispatchError
pub type Result<T> = std::result::Result<T, SshDispatchError>;

impl SshDispatchError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        SshDispatchError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        SshDispatchError::Authentication(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        SshDispatchError::Config(msg.into())
    }

    /// Create a transport error from a string
    pub fn transport(msg: impl Into<String>) -> Self {
        SshDispatchError::Transport(msg.into())
    }
}
