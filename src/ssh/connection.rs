//! Connection lifecycle state machine
//!
//! Owns at most one live transport handle and at most one pending reconnect
//! timer. Every method runs on the client event loop, so transitions never
//! interleave.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{SessionConfig, TransportParams};
use super::transport::{
    EventSink, Inbound, InteractivePrompt, InteractiveRequest, SessionHandle, SshTransport,
    TransportEvent,
};
use crate::error::{Result, SshDispatchError};

/// Label of the only keyboard-interactive prompt answered automatically
pub const PASSWORD_PROMPT: &str = "Password: ";

/// Externally observable connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Ok,
    ConnectionFailure,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Ok => "Ok",
            Self::ConnectionFailure => "ConnectionFailure",
        };
        f.write_str(name)
    }
}

/// Keyboard-interactive prompt shapes we know how to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptShape {
    /// Exactly one prompt asking for the password
    Password,
    /// Anything else; left unanswered
    Unrecognized,
}

impl PromptShape {
    pub fn classify(prompts: &[InteractivePrompt]) -> Self {
        match prompts {
            [only] if only.prompt == PASSWORD_PROMPT => Self::Password,
            _ => Self::Unrecognized,
        }
    }
}

struct PendingTimer {
    id: u64,
    task: JoinHandle<()>,
}

/// Single-slot reconnect timer.
///
/// A fire message carries the id of the timer that produced it; a message
/// from a cancelled timer no longer matches the slot and is ignored.
pub(crate) struct ReconnectTimer {
    pending: Option<PendingTimer>,
    next_id: u64,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl ReconnectTimer {
    pub(crate) fn new(inbox: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            pending: None,
            next_id: 0,
            inbox,
        }
    }

    /// Cancel any pending timer and start a new one
    pub(crate) fn schedule(&mut self, delay: Duration) {
        self.cancel();

        self.next_id += 1;
        let id = self.next_id;
        let inbox = self.inbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(Inbound::ReconnectDue { timer: id });
        });
        self.pending = Some(PendingTimer { id, task });
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.task.abort();
        }
    }

    /// Consume the slot if `id` is the pending timer
    pub(crate) fn fire(&mut self, id: u64) -> bool {
        match self.pending {
            Some(ref timer) if timer.id == id => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

struct LiveHandle<H> {
    generation: u64,
    handle: H,
}

/// Connection state machine over a transport `T`
pub(crate) struct ConnectionMachine<T: SshTransport> {
    config: SessionConfig,
    transport: T,
    live: Option<LiveHandle<T::Handle>>,
    generation: u64,
    reconnect: ReconnectTimer,
    status: watch::Sender<ConnectionStatus>,
    inbox: mpsc::UnboundedSender<Inbound>,
    /// Set when the server demands a password change; suppresses reconnects
    auth_blocked: bool,
}

impl<T: SshTransport> ConnectionMachine<T> {
    pub(crate) fn new(
        config: SessionConfig,
        transport: T,
        inbox: mpsc::UnboundedSender<Inbound>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            config,
            transport,
            live: None,
            generation: 0,
            reconnect: ReconnectTimer::new(inbox.clone()),
            status,
            inbox,
            auth_blocked: false,
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn has_pending_reconnect(&self) -> bool {
        self.reconnect.is_pending()
    }

    pub(crate) fn has_live_handle(&self) -> bool {
        self.live.is_some()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `generation` is the handle currently held
    pub(crate) fn is_live(&self, generation: u64) -> bool {
        matches!(self.live, Some(ref live) if live.generation == generation)
    }

    /// The live handle, provided the connection is ready for commands
    pub(crate) fn ready_handle(&mut self) -> Result<&mut T::Handle> {
        let status = self.status();
        match self.live {
            Some(ref mut live) if status == ConnectionStatus::Ok => Ok(&mut live.handle),
            _ => Err(SshDispatchError::NotReady(status)),
        }
    }

    /// Start a fresh connection attempt, destroying the previous handle and
    /// any pending retry
    pub(crate) fn connect(&mut self) {
        self.destroy_handle();
        self.reconnect.cancel();

        let host = match self.config.active_host() {
            Some(host) => host.to_string(),
            None => {
                debug!("No host configured, staying disconnected");
                self.set_status(ConnectionStatus::Disconnected);
                return;
            }
        };

        let private_key = if self.config.uses_key_auth() {
            self.load_private_key()
        } else {
            String::new()
        };

        let params = TransportParams::resolve(&self.config, &host, private_key);
        debug!("Connecting with {:?}", params);

        self.generation += 1;
        let events = EventSink::new(self.generation, self.inbox.clone());

        match self.transport.connect(params, events) {
            Ok(handle) => {
                self.live = Some(LiveHandle {
                    generation: self.generation,
                    handle,
                });
                info!("Connecting to {}@{}:{}", self.config.username, host, self.config.port);
                self.set_status(ConnectionStatus::Connecting);
            }
            Err(e) => {
                error!("initiating connection failed, error: {}", e);
                self.set_status(ConnectionStatus::ConnectionFailure);
            }
        }
    }

    fn load_private_key(&self) -> String {
        let Some(ref path) = self.config.private_key_path else {
            error!("private-key file load error: no private key path configured");
            return String::new();
        };

        match std::fs::read_to_string(path) {
            Ok(key) => {
                debug!("private-key file loaded successfully!");
                key
            }
            Err(e) => {
                error!("private-key file load error: {}: {}", path.display(), e);
                String::new()
            }
        }
    }

    /// React to a transport event; events of replaced handles are dropped
    pub(crate) fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        if !self.is_live(generation) {
            debug!("Ignoring event from stale connection #{}: {:?}", generation, event);
            return;
        }

        match event {
            TransportEvent::Connect => {
                debug!("Server connection successful!");
                self.set_status(ConnectionStatus::Connecting);
            }
            TransportEvent::Ready => {
                debug!("Server connection ready!");
                self.set_status(ConnectionStatus::Ok);
            }
            TransportEvent::ChangePasswordRequired(message) => {
                error!(
                    "Server requests that you change your password, please do this manually and reconfigure: {}",
                    message
                );
                self.auth_blocked = true;
                self.set_status(ConnectionStatus::ConnectionFailure);
            }
            TransportEvent::KeyboardInteractive(request) => self.answer_interactive(request),
            TransportEvent::Error(e) => {
                error!("Server connection error: {}", e);
                self.fail(ConnectionStatus::ConnectionFailure);
            }
            TransportEvent::End => {
                error!("Server ended connection");
                self.fail(ConnectionStatus::Disconnected);
            }
            TransportEvent::Timeout => {
                error!("Server connection timed out");
                self.fail(ConnectionStatus::ConnectionFailure);
            }
            TransportEvent::Greeting(text) => debug!("Server greeting: {}", text),
            TransportEvent::Handshake(details) => debug!("Server handshake: {}", details),
        }
    }

    fn answer_interactive(&mut self, request: InteractiveRequest) {
        debug!(
            "Interactive triggered: name={:?} instructions={:?} lang={:?} prompts={:?}",
            request.name, request.instructions, request.language, request.prompts
        );

        match PromptShape::classify(&request.prompts) {
            PromptShape::Password => {
                let password = self.config.password.clone().unwrap_or_default();
                request.respond(vec![password]);
            }
            PromptShape::Unrecognized => {
                warn!("Unrecognized keyboard-interactive prompts, leaving them unanswered");
            }
        }
    }

    /// Terminal failure of the current handle: release it and retry later
    fn fail(&mut self, status: ConnectionStatus) {
        self.release_handle();
        self.set_status(status);
        self.schedule_reconnect();
    }

    /// Tear the connection down after a fatal channel error
    pub(crate) fn force_close(&mut self, reason: &str) {
        if self.live.is_none() {
            return;
        }
        warn!("Closing connection: {}", reason);
        self.fail(ConnectionStatus::Disconnected);
    }

    pub(crate) fn schedule_reconnect(&mut self) {
        if self.auth_blocked {
            warn!("Not reconnecting until the configuration is updated");
            return;
        }
        let delay = self.config.reconnect_interval();
        debug!("Reconnecting in {}ms", delay.as_millis());
        self.reconnect.schedule(delay);
    }

    pub(crate) fn on_reconnect_due(&mut self, timer: u64) {
        if self.reconnect.fire(timer) {
            self.connect();
        } else {
            debug!("Ignoring cancelled reconnect timer #{}", timer);
        }
    }

    /// Destroy the handle and cancel any pending reconnect
    pub(crate) fn teardown(&mut self) {
        debug!("destroy");
        self.destroy_handle();
        self.reconnect.cancel();
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Replace the configuration and reconnect with it
    pub(crate) fn reconfigure(&mut self, config: SessionConfig) {
        self.config = config;
        self.auth_blocked = false;
        self.connect();
    }

    fn destroy_handle(&mut self) {
        if self.release_handle() {
            self.set_status(ConnectionStatus::Disconnected);
        }
    }

    fn release_handle(&mut self) -> bool {
        match self.live.take() {
            Some(mut live) => {
                live.handle.destroy();
                true
            }
            None => false,
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            match status {
                ConnectionStatus::ConnectionFailure => {
                    error!("Connection status: {} -> {}", previous, status)
                }
                _ => debug!("Connection status: {} -> {}", previous, status),
            }
        }
    }
}

impl<T: SshTransport> Drop for ConnectionMachine<T> {
    fn drop(&mut self) {
        self.release_handle();
        self.reconnect.cancel();
    }
}
