//! SSH client event loop
//!
//! [`SshClient`] is a cheap, cloneable handle to a background task that owns
//! the connection state machine and the dispatcher. API requests, transport
//! events, command output, and reconnect timers are all processed by that one
//! task, in arrival order, which keeps every state transition sequential.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::config::SessionConfig;
use super::connection::{ConnectionMachine, ConnectionStatus};
use super::dispatch::{DispatchMode, DispatchReceipt, Dispatcher, ErrorFlag};
use super::transport::{Inbound, SshTransport};
use crate::error::{Result, SshDispatchError};

/// Point-in-time view of the client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub status: ConnectionStatus,
    /// Whether the last dispatch reported an error
    pub returned_error: bool,
    pub reconnect_pending: bool,
}

enum Request {
    Reconfigure(SessionConfig),
    Dispatch {
        mode: DispatchMode,
        command: String,
        reply: oneshot::Sender<Result<DispatchReceipt>>,
    },
    Teardown {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<ClientSnapshot>,
    },
}

/// Handle to a persistent SSH client
#[derive(Clone)]
pub struct SshClient {
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ConnectionStatus>,
    error: watch::Receiver<bool>,
}

impl SshClient {
    /// Start the client and make the first connection attempt with `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T: SshTransport>(transport: T, config: SessionConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let flag = ErrorFlag::new();
        let error_rx = flag.subscribe();

        let event_loop = EventLoop {
            connection: ConnectionMachine::new(config, transport, inbox_tx.clone(), status_tx),
            dispatcher: Dispatcher::new(flag, inbox_tx),
        };
        tokio::spawn(event_loop.run(requests_rx, inbox_rx));

        Self {
            requests: requests_tx,
            status: status_rx,
            error: error_rx,
        }
    }

    /// Replace the configuration and reconnect
    pub fn reconfigure(&self, config: SessionConfig) -> Result<()> {
        self.requests
            .send(Request::Reconfigure(config))
            .map_err(|_| SshDispatchError::Closed)
    }

    /// Execute each command of `command` as its own remote exec request
    pub async fn execute(&self, command: &str) -> Result<DispatchReceipt> {
        self.dispatch(DispatchMode::Discrete, command).await
    }

    /// Execute all commands of `command` sequentially in one shell session
    pub async fn execute_in_session(&self, command: &str) -> Result<DispatchReceipt> {
        self.dispatch(DispatchMode::Session, command).await
    }

    pub async fn dispatch(&self, mode: DispatchMode, command: &str) -> Result<DispatchReceipt> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Dispatch {
                mode,
                command: command.to_string(),
                reply,
            })
            .map_err(|_| SshDispatchError::Closed)?;
        rx.await.map_err(|_| SshDispatchError::Closed)?
    }

    /// Disconnect and cancel any pending reconnect.
    ///
    /// The client stays usable; [`SshClient::reconfigure`] connects again.
    pub async fn teardown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::Teardown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Consistent view of status, error flag, and reconnect timer
    pub async fn snapshot(&self) -> Result<ClientSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Snapshot { reply })
            .map_err(|_| SshDispatchError::Closed)?;
        rx.await.map_err(|_| SshDispatchError::Closed)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Whether the last dispatch reported an error
    pub fn has_error(&self) -> bool {
        *self.error.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<bool> {
        self.error.clone()
    }
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("status", &self.status())
            .field("has_error", &self.has_error())
            .finish()
    }
}

struct EventLoop<T: SshTransport> {
    connection: ConnectionMachine<T>,
    dispatcher: Dispatcher,
}

impl<T: SshTransport> EventLoop<T> {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut inbox: mpsc::UnboundedReceiver<Inbound>,
    ) {
        self.connection.connect();

        loop {
            tokio::select! {
                // events emitted before a request are handled before it
                biased;
                Some(message) = inbox.recv() => self.on_inbound(message),
                request = requests.recv() => match request {
                    Some(request) => self.on_request(request),
                    None => break,
                },
            }
        }

        info!("All client handles dropped, shutting down SSH client");
        self.connection.teardown();
    }

    fn on_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Transport { generation, event } => {
                self.connection.on_transport_event(generation, event)
            }
            Inbound::Stream { origin, event } => {
                self.dispatcher
                    .on_stream_event(origin, event, &mut self.connection)
            }
            Inbound::ReconnectDue { timer } => self.connection.on_reconnect_due(timer),
        }
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Reconfigure(config) => {
                debug!("Configuration updated: {:?}", config);
                self.connection.reconfigure(config);
            }
            Request::Dispatch {
                mode,
                command,
                reply,
            } => {
                let result = self.dispatcher.dispatch(mode, &command, &mut self.connection);
                if let Err(ref e) = result {
                    debug!("Rejected {} dispatch of {:?}: {}", mode, command, e);
                }
                let _ = reply.send(result);
            }
            Request::Teardown { reply } => {
                self.connection.teardown();
                let _ = reply.send(());
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(ClientSnapshot {
                    status: self.connection.status(),
                    returned_error: self.dispatcher.flag().get(),
                    reconnect_pending: self.connection.has_pending_reconnect(),
                });
            }
        }
    }
}
