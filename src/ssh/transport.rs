//! Transport capability interface
//!
//! The connection state machine talks to the secure transport only through
//! [`SshTransport`] and [`SessionHandle`]. Everything the transport reports
//! later (handshake progress, failures, command output) comes back as events
//! pushed into the client's inbox through an [`EventSink`] or a
//! [`StreamSink`], so all reactions run on the client's single event loop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::config::TransportParams;
use super::dispatch::DispatchMode;
use crate::error::Result;

/// Connection-level events reported by a transport
#[derive(Debug)]
pub enum TransportEvent {
    /// Network-level connection established, not yet authenticated
    Connect,
    /// Authentication complete, the session is usable
    Ready,
    /// Connection error
    Error(String),
    /// The server ended the connection
    End,
    /// The handshake did not complete in time
    Timeout,
    /// Text sent by the server before authentication
    Greeting(String),
    /// Negotiated handshake details
    Handshake(String),
    /// The server demands a password change before login
    ChangePasswordRequired(String),
    /// The server asks keyboard-interactive questions
    KeyboardInteractive(InteractiveRequest),
}

/// One keyboard-interactive question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractivePrompt {
    pub prompt: String,
    pub echo: bool,
}

impl InteractivePrompt {
    pub fn new(prompt: impl Into<String>, echo: bool) -> Self {
        Self {
            prompt: prompt.into(),
            echo,
        }
    }
}

/// A keyboard-interactive info request and the means to answer it.
///
/// Dropping the request without calling [`InteractiveRequest::respond`]
/// leaves the questions unanswered.
#[derive(Debug)]
pub struct InteractiveRequest {
    pub name: String,
    pub instructions: String,
    pub language: String,
    pub prompts: Vec<InteractivePrompt>,
    responder: oneshot::Sender<Vec<String>>,
}

impl InteractiveRequest {
    /// Create a request; the receiver yields the answers if any are given
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        language: impl Into<String>,
        prompts: Vec<InteractivePrompt>,
    ) -> (Self, oneshot::Receiver<Vec<String>>) {
        let (responder, answers) = oneshot::channel();
        let request = Self {
            name: name.into(),
            instructions: instructions.into(),
            language: language.into(),
            prompts,
            responder,
        };
        (request, answers)
    }

    /// Answer the prompts, in order
    pub fn respond(self, answers: Vec<String>) {
        // the transport may have given up on the exchange already
        let _ = self.responder.send(answers);
    }
}

/// Per-channel events reported for a dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Standard output data
    Data(Vec<u8>),
    /// Standard error data
    Stderr(Vec<u8>),
    /// Exit status of the remote command
    Exit(u32),
    /// The remote command was terminated by a signal
    Signal(String),
    /// The channel closed, with the exit status if one was received
    Close(Option<u32>),
    /// Channel-level failure
    Error(String),
}

/// Identifies which dispatch and command a stream belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOrigin {
    pub dispatch: u64,
    /// Generation of the connection the stream was opened on
    pub connection: u64,
    pub mode: DispatchMode,
    pub command: Arc<str>,
}

/// Everything that arrives at the client event loop besides API requests
#[derive(Debug)]
pub(crate) enum Inbound {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Stream {
        origin: StreamOrigin,
        event: StreamEvent,
    },
    ReconnectDue {
        timer: u64,
    },
}

/// Sender for connection events of one connection attempt
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { generation, tx }
    }

    /// Connection attempt this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; returns false once the client is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Sender for the events of one command channel
#[derive(Debug, Clone)]
pub struct StreamSink {
    origin: StreamOrigin,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl StreamSink {
    pub(crate) fn new(origin: StreamOrigin, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { origin, tx }
    }

    pub fn origin(&self) -> &StreamOrigin {
        &self.origin
    }

    /// Report an event; returns false once the client is gone
    pub fn emit(&self, event: StreamEvent) -> bool {
        self.tx
            .send(Inbound::Stream {
                origin: self.origin.clone(),
                event,
            })
            .is_ok()
    }
}

/// Factory for connection handles
pub trait SshTransport: Send + 'static {
    type Handle: SessionHandle;

    /// Start a connection attempt.
    ///
    /// An `Err` means the attempt could not even be started; nothing will be
    /// reported on `events` in that case. Network and authentication
    /// failures are reported later through `events`.
    fn connect(&mut self, params: TransportParams, events: EventSink) -> Result<Self::Handle>;
}

/// A live (or in-progress) transport session
pub trait SessionHandle: Send + 'static {
    /// Run one command on its own channel
    fn exec(&mut self, command: &str, stream: StreamSink) -> Result<()>;

    /// Open an interactive shell, write `script` as its whole input and close
    /// the input side
    fn shell(&mut self, script: String, stream: StreamSink) -> Result<()>;

    /// Tear the session down; calling it again is a no-op
    fn destroy(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        assert!(sink.emit(TransportEvent::Ready));

        match rx.try_recv().unwrap() {
            Inbound::Transport { generation, event } => {
                assert_eq!(generation, 7);
                assert!(matches!(event, TransportEvent::Ready));
            }
            other => panic!("unexpected inbound message: {:?}", other),
        }
    }

    #[test]
    fn test_stream_sink_tags_origin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let origin = StreamOrigin {
            dispatch: 3,
            connection: 1,
            mode: DispatchMode::Discrete,
            command: Arc::from("uptime"),
        };
        let sink = StreamSink::new(origin.clone(), tx);
        assert!(sink.emit(StreamEvent::Exit(0)));

        match rx.try_recv().unwrap() {
            Inbound::Stream { origin: got, event } => {
                assert_eq!(got, origin);
                assert_eq!(event, StreamEvent::Exit(0));
            }
            other => panic!("unexpected inbound message: {:?}", other),
        }
    }

    #[test]
    fn test_emit_after_client_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!EventSink::new(1, tx).emit(TransportEvent::End));
    }

    #[tokio::test]
    async fn test_interactive_request_answers() {
        let (request, answers) = InteractiveRequest::new(
            "",
            "",
            "",
            vec![InteractivePrompt::new("Password: ", false)],
        );
        request.respond(vec!["secret".to_string()]);
        assert_eq!(answers.await.unwrap(), vec!["secret".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_interactive_request_is_unanswered() {
        let (request, answers) = InteractiveRequest::new("", "", "", Vec::new());
        drop(request);
        assert!(answers.await.is_err());
    }
}
