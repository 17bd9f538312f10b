//! ssh-dispatch - persistent SSH command dispatch over the Model Context Protocol
//!
//! This crate keeps one SSH connection alive to a configured host and
//! dispatches command strings over it. A command string holds several
//! commands separated by the two-character sequence `\n`; they are run
//! either as independent exec requests or in order inside one interactive
//! shell session. Any stderr output or non-zero exit status raises an error
//! flag that the host can poll.
//!
//! # Features
//!
//! - Automatic reconnection at a fixed interval after failures
//! - Password, keyboard-interactive, and private key authentication
//! - Cipher family preference (aes256 / aes192 / aes128)
//! - Stale connection and dispatch events are ignored
//!
//! # MCP Tools
//!
//! - `exec` - Run each command on its own exec channel
//! - `shell-exec` - Run all commands in one shell session
//! - `status` - Connection status and error state
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-dispatch --host=192.168.1.100 --user=admin --password=secret
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use ssh_dispatch::{RusshTransport, SessionConfig, SshClient};
//!
//! # async fn run() -> ssh_dispatch::Result<()> {
//! let config = SessionConfig::new("192.168.1.100", "admin").with_password("secret");
//! let client = SshClient::spawn(RusshTransport::new(), config);
//! client.execute("uptime\\nwhoami").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod ssh;
pub mod tools;

// Re-exports for convenience
pub use config::{Args, Config, StateKeys, STATE_KEYS};
pub use error::{Result, SshDispatchError};
pub use server::SshDispatchServer;
pub use ssh::{
    join_commands, session_script, split_commands, CipherPreference, ClientSnapshot,
    ConnectionStatus, DispatchMode, DispatchReceipt, RusshTransport, SessionConfig, SshClient,
    SshHandler,
};
pub use tools::ExecParams;
