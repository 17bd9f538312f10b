//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait and forwards the
//! connection-level callbacks to the client event loop.

use russh::client::{DisconnectReason, Session};
use russh::keys::HashAlg;
use tracing::debug;

use super::transport::{EventSink, TransportEvent};

/// SSH client handler for russh
///
/// Reports the host key as handshake details, the authentication banner as
/// the server greeting, and the end of the session as `End` or `Error`.
/// Server keys are accepted without verification.
#[derive(Debug, Clone)]
pub struct SshHandler {
    events: EventSink,
}

impl SshHandler {
    /// Create a new SSH handler reporting to `events`
    pub fn new(events: EventSink) -> Self {
        Self { events }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key
    ///
    /// # Security Note
    /// Currently accepts all server keys, the same trust model as the
    /// automation hosts this client is driven from.
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.events.emit(TransportEvent::Handshake(format!(
            "host key {} {}",
            server_public_key.algorithm().as_str(),
            server_public_key.fingerprint(HashAlg::Sha256)
        )));
        Ok(true)
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.events.emit(TransportEvent::Greeting(banner.to_string()));
        Ok(())
    }

    async fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        match reason {
            DisconnectReason::ReceivedDisconnect(_) => {
                debug!("Server sent disconnect");
                self.events.emit(TransportEvent::End);
            }
            DisconnectReason::Error(e) => {
                self.events.emit(TransportEvent::Error(e.to_string()));
            }
        }
        Ok(())
    }
}
