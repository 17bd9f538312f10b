//! SSH connection management module
//!
//! This module keeps one SSH connection alive per configured host,
//! reconnecting on failure, and dispatches command strings over it either
//! as separate exec channels or as one shell session.

pub mod cipher;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod handler;
#[cfg(test)]
pub(crate) mod mock;
pub mod session;
pub mod split;
pub mod transport;

// Re-exports
pub use cipher::{CipherConstraint, CipherPreference};
pub use client::{ClientSnapshot, SshClient};
pub use config::{SessionConfig, TransportParams};
pub use connection::ConnectionStatus;
pub use dispatch::{DispatchMode, DispatchReceipt, ErrorFlag};
pub use handler::SshHandler;
pub use session::{RusshSession, RusshTransport};
pub use split::{join_commands, session_script, split_commands};
pub use transport::{
    EventSink, InteractivePrompt, InteractiveRequest, SessionHandle, SshTransport, StreamEvent,
    StreamOrigin, StreamSink, TransportEvent,
};
