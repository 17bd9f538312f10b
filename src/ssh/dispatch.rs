//! Command dispatch and outcome tracking
//!
//! Turns a raw command string into remote executions and folds their
//! results into a single "last execution had an error" flag.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use super::connection::ConnectionMachine;
use super::split::{session_script, split_commands};
use super::transport::{Inbound, SessionHandle, SshTransport, StreamEvent, StreamOrigin, StreamSink};
use crate::error::Result;

/// How a raw command string is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One independent exec request per command
    Discrete,
    /// One shell session fed all commands as a script
    Session,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrete => f.write_str("discrete"),
            Self::Session => f.write_str("session"),
        }
    }
}

/// What was submitted for an accepted dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub id: u64,
    pub mode: DispatchMode,
    /// Number of parsed commands
    pub commands: usize,
}

/// Shared "last execution had an error" state
#[derive(Debug)]
pub struct ErrorFlag {
    tx: watch::Sender<bool>,
}

impl ErrorFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub(crate) fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub(crate) fn raise(&self) {
        self.tx.send_if_modified(|flag| !std::mem::replace(flag, true));
    }
}

impl Default for ErrorFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Issues dispatches and tracks the outcome of the most recent one
pub(crate) struct Dispatcher {
    flag: ErrorFlag,
    current: u64,
    /// Connection generation the current dispatch was issued on
    issued_on: u64,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl Dispatcher {
    pub(crate) fn new(flag: ErrorFlag, inbox: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            flag,
            current: 0,
            issued_on: 0,
            inbox,
        }
    }

    pub(crate) fn flag(&self) -> &ErrorFlag {
        &self.flag
    }

    /// Execute `raw` over the connection.
    ///
    /// Rejected without touching the error flag unless the connection is
    /// ready. Results arrive later as stream events.
    pub(crate) fn dispatch<T: SshTransport>(
        &mut self,
        mode: DispatchMode,
        raw: &str,
        connection: &mut ConnectionMachine<T>,
    ) -> Result<DispatchReceipt> {
        let generation = connection.generation();
        let handle = connection.ready_handle()?;

        self.current += 1;
        self.issued_on = generation;
        self.flag.reset();

        let commands = match mode {
            DispatchMode::Discrete => self.run_discrete(raw, handle),
            DispatchMode::Session => self.run_session(raw, handle),
        };

        Ok(DispatchReceipt {
            id: self.current,
            mode,
            commands,
        })
    }

    fn run_discrete<H: SessionHandle>(&self, raw: &str, handle: &mut H) -> usize {
        let commands = split_commands(raw);

        for command in &commands {
            debug!("Executing command: {}", command);
            let sink = self.sink(DispatchMode::Discrete, command);
            if let Err(e) = handle.exec(command, sink) {
                error!("Command: {} could not be started: {}", command, e);
                self.flag.raise();
            }
        }

        commands.len()
    }

    fn run_session<H: SessionHandle>(&self, raw: &str, handle: &mut H) -> usize {
        debug!("Executing advanced command: {}", raw);

        let count = split_commands(raw).len();
        let script = session_script(raw);
        debug!("Executing command: {}", script);

        let sink = self.sink(DispatchMode::Session, raw);
        if let Err(e) = handle.shell(script, sink) {
            error!("Shell session could not be started: {}", e);
            self.flag.raise();
        }

        count
    }

    fn sink(&self, mode: DispatchMode, command: &str) -> StreamSink {
        let origin = StreamOrigin {
            dispatch: self.current,
            connection: self.issued_on,
            mode,
            command: Arc::from(command),
        };
        StreamSink::new(origin, self.inbox.clone())
    }

    /// Fold a stream event into the error flag
    pub(crate) fn on_stream_event<T: SshTransport>(
        &mut self,
        origin: StreamOrigin,
        event: StreamEvent,
        connection: &mut ConnectionMachine<T>,
    ) {
        if origin.dispatch != self.current {
            // a broken shell channel breaks its connection whatever ran since
            if let (DispatchMode::Session, StreamEvent::Error(e)) = (origin.mode, &event) {
                if connection.is_live(origin.connection) {
                    error!("Stream error of superseded dispatch #{}: {}", origin.dispatch, e);
                    connection.force_close(&format!("shell stream error: {}", e));
                    return;
                }
            }
            debug!(
                "Ignoring output of superseded dispatch #{} ({}): {:?}",
                origin.dispatch, origin.command, event
            );
            return;
        }

        match (origin.mode, event) {
            (_, StreamEvent::Data(chunk)) => debug!("{}", String::from_utf8_lossy(&chunk)),
            (DispatchMode::Discrete, StreamEvent::Stderr(chunk)) => {
                self.flag.raise();
                error!(
                    "Command: {} wrote to STDERR: {}",
                    origin.command,
                    String::from_utf8_lossy(&chunk)
                );
            }
            (DispatchMode::Session, StreamEvent::Stderr(chunk)) => {
                debug!("{}", String::from_utf8_lossy(&chunk))
            }
            (DispatchMode::Discrete, StreamEvent::Exit(code)) => {
                if code != 0 {
                    self.flag.raise();
                    error!(
                        "Command: {} exited with error code: {}",
                        origin.command, code
                    );
                }
            }
            (DispatchMode::Session, StreamEvent::Exit(code)) => {
                debug!("shell exited with code: {}", code)
            }
            (DispatchMode::Discrete, StreamEvent::Signal(signal)) => {
                self.flag.raise();
                error!(
                    "Command: {} was terminated by signal: {}",
                    origin.command, signal
                );
            }
            (DispatchMode::Session, StreamEvent::Signal(signal)) => {
                debug!("shell terminated by signal: {}", signal)
            }
            (DispatchMode::Discrete, StreamEvent::Close(code)) => {
                debug!("Command: {} channel closed ({:?})", origin.command, code)
            }
            (DispatchMode::Session, StreamEvent::Close(code)) => {
                debug!("stream closed with code: {:?}", code);
                if code != Some(0) {
                    self.flag.raise();
                }
            }
            (DispatchMode::Discrete, StreamEvent::Error(e)) => {
                self.flag.raise();
                error!("Command: {} failed: {}", origin.command, e);
            }
            (DispatchMode::Session, StreamEvent::Error(e)) => {
                error!("Stream error: {}", e);
                self.flag.raise();
                if connection.is_live(origin.connection) {
                    connection.force_close(&format!("shell stream error: {}", e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SshDispatchError;
    use crate::ssh::config::SessionConfig;
    use crate::ssh::connection::ConnectionStatus;
    use crate::ssh::mock::MockTransport;
    use crate::ssh::transport::TransportEvent;

    struct Fixture {
        dispatcher: Dispatcher,
        connection: ConnectionMachine<MockTransport>,
        transport: MockTransport,
        _inbox: mpsc::UnboundedReceiver<Inbound>,
    }

    fn ready() -> Fixture {
        let transport = MockTransport::default();
        let (tx, inbox) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let config = SessionConfig::new("10.0.0.1", "admin").with_password("secret");
        let mut connection = ConnectionMachine::new(config, transport.clone(), tx.clone(), status);
        connection.connect();
        let generation = connection.generation();
        connection.on_transport_event(generation, TransportEvent::Ready);

        Fixture {
            dispatcher: Dispatcher::new(ErrorFlag::new(), tx),
            connection,
            transport,
            _inbox: inbox,
        }
    }

    impl Fixture {
        fn dispatch(&mut self, mode: DispatchMode, raw: &str) -> Result<DispatchReceipt> {
            self.dispatcher.dispatch(mode, raw, &mut self.connection)
        }

        fn feed(&mut self, origin: &StreamOrigin, event: StreamEvent) {
            self.dispatcher
                .on_stream_event(origin.clone(), event, &mut self.connection);
        }
    }

    #[tokio::test]
    async fn test_discrete_executes_every_command() {
        let mut f = ready();
        let receipt = f.dispatch(DispatchMode::Discrete, r"uptime\nwhoami\nhostname").unwrap();
        assert_eq!(receipt.commands, 3);
        assert_eq!(receipt.mode, DispatchMode::Discrete);
        assert_eq!(f.transport.exec_commands(), vec!["uptime", "whoami", "hostname"]);
    }

    #[tokio::test]
    async fn test_one_failing_command_sets_flag_without_stopping_siblings() {
        for failure in [StreamEvent::Stderr(b"oops".to_vec()), StreamEvent::Exit(2)] {
            let mut f = ready();
            f.dispatch(DispatchMode::Discrete, r"a\nb\nc").unwrap();
            let origins = f.transport.exec_origins();
            assert_eq!(origins.len(), 3);

            // completion order differs from submission order
            f.feed(&origins[2], StreamEvent::Exit(0));
            f.feed(&origins[1], failure.clone());
            f.feed(&origins[0], StreamEvent::Exit(0));

            assert!(f.dispatcher.flag().get());
            assert_eq!(f.transport.exec_commands().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_successful_commands_leave_flag_clear() {
        let mut f = ready();
        f.dispatch(DispatchMode::Discrete, r"a\nb").unwrap();
        for origin in f.transport.exec_origins() {
            f.feed(&origin, StreamEvent::Data(b"fine\n".to_vec()));
            f.feed(&origin, StreamEvent::Exit(0));
            f.feed(&origin, StreamEvent::Close(Some(0)));
        }
        assert!(!f.dispatcher.flag().get());
    }

    #[tokio::test]
    async fn test_new_dispatch_resets_flag() {
        let mut f = ready();
        f.dispatch(DispatchMode::Discrete, "false").unwrap();
        let origin = f.transport.exec_origins().remove(0);
        f.feed(&origin, StreamEvent::Exit(1));
        assert!(f.dispatcher.flag().get());

        f.dispatch(DispatchMode::Discrete, "true").unwrap();
        assert!(!f.dispatcher.flag().get());

        // late output from the first dispatch does not leak into the second
        f.feed(&origin, StreamEvent::Stderr(b"late".to_vec()));
        assert!(!f.dispatcher.flag().get());
    }

    #[tokio::test]
    async fn test_escaped_delimiter_is_one_command() {
        let mut f = ready();
        f.dispatch(DispatchMode::Discrete, r"echo hi\\necho bye").unwrap();
        assert_eq!(f.transport.exec_commands(), vec![r"echo hi\necho bye"]);
    }

    #[tokio::test]
    async fn test_synchronous_exec_failure_is_isolated() {
        let mut f = ready();
        f.transport.fail_exec_of("bad");
        f.dispatch(DispatchMode::Discrete, r"good\nbad\nalso good").unwrap();
        assert!(f.dispatcher.flag().get());
        assert_eq!(f.transport.exec_commands(), vec!["good", "also good"]);
        assert_eq!(f.connection.status(), ConnectionStatus::Ok);
    }

    #[tokio::test]
    async fn test_discrete_stream_error_keeps_connection() {
        let mut f = ready();
        f.dispatch(DispatchMode::Discrete, "ls").unwrap();
        let origin = f.transport.exec_origins().remove(0);
        f.feed(&origin, StreamEvent::Error("channel open failed".into()));
        assert!(f.dispatcher.flag().get());
        assert_eq!(f.connection.status(), ConnectionStatus::Ok);
    }

    #[tokio::test]
    async fn test_session_sends_ordered_script() {
        let mut f = ready();
        let receipt = f.dispatch(DispatchMode::Session, r"ls\nexit 3").unwrap();
        assert_eq!(receipt.commands, 2);
        assert_eq!(f.transport.shell_scripts(), vec!["ls\nexit 3\nexit\n"]);
    }

    #[tokio::test]
    async fn test_session_close_code_sets_flag() {
        let mut f = ready();
        f.dispatch(DispatchMode::Session, r"ls\nexit 3").unwrap();
        let origin = f.transport.shell_origins().remove(0);
        f.feed(&origin, StreamEvent::Data(b"file.txt\n".to_vec()));
        f.feed(&origin, StreamEvent::Close(Some(3)));
        assert!(f.dispatcher.flag().get());
    }

    #[tokio::test]
    async fn test_session_clean_close_and_stderr_keep_flag_clear() {
        let mut f = ready();
        f.dispatch(DispatchMode::Session, "ls").unwrap();
        let origin = f.transport.shell_origins().remove(0);
        f.feed(&origin, StreamEvent::Stderr(b"motd noise".to_vec()));
        f.feed(&origin, StreamEvent::Exit(0));
        f.feed(&origin, StreamEvent::Close(Some(0)));
        assert!(!f.dispatcher.flag().get());
    }

    #[tokio::test]
    async fn test_session_close_without_status_counts_as_failure() {
        let mut f = ready();
        f.dispatch(DispatchMode::Session, "ls").unwrap();
        let origin = f.transport.shell_origins().remove(0);
        f.feed(&origin, StreamEvent::Close(None));
        assert!(f.dispatcher.flag().get());
    }

    #[tokio::test]
    async fn test_session_error_tears_connection_down() {
        let mut f = ready();
        f.dispatch(DispatchMode::Session, "ls").unwrap();
        let origin = f.transport.shell_origins().remove(0);
        f.feed(&origin, StreamEvent::Error("broken pipe".into()));

        assert!(f.dispatcher.flag().get());
        assert_eq!(f.transport.live_handles(), 0);
        assert_eq!(f.connection.status(), ConnectionStatus::Disconnected);
        assert!(f.connection.has_pending_reconnect());
    }

    #[tokio::test]
    async fn test_signal_killed_command_sets_flag() {
        let mut f = ready();
        f.dispatch(DispatchMode::Discrete, r"sleep 60\nuptime").unwrap();
        let origins = f.transport.exec_origins();

        f.feed(&origins[1], StreamEvent::Exit(0));
        f.feed(&origins[1], StreamEvent::Close(Some(0)));
        f.feed(&origins[0], StreamEvent::Signal("KILL".into()));
        f.feed(&origins[0], StreamEvent::Close(None));

        assert!(f.dispatcher.flag().get());
        assert_eq!(f.connection.status(), ConnectionStatus::Ok);
    }

    #[tokio::test]
    async fn test_superseded_session_error_still_tears_connection_down() {
        let mut f = ready();
        f.dispatch(DispatchMode::Session, "sleep 5").unwrap();
        let shell = f.transport.shell_origins().remove(0);
        f.dispatch(DispatchMode::Discrete, "uptime").unwrap();

        f.feed(&shell, StreamEvent::Error("channel failure".into()));

        // the newer dispatch's outcome is untouched
        assert!(!f.dispatcher.flag().get());
        assert_eq!(f.transport.live_handles(), 0);
        assert_eq!(f.connection.status(), ConnectionStatus::Disconnected);
        assert!(f.connection.has_pending_reconnect());
    }

    #[tokio::test]
    async fn test_superseded_session_error_from_replaced_connection_is_ignored() {
        let mut f = ready();
        f.dispatch(DispatchMode::Session, "sleep 5").unwrap();
        let shell = f.transport.shell_origins().remove(0);

        f.connection.connect();
        let generation = f.connection.generation();
        f.connection
            .on_transport_event(generation, TransportEvent::Ready);
        f.dispatch(DispatchMode::Discrete, "uptime").unwrap();

        f.feed(&shell, StreamEvent::Error("channel failure".into()));

        assert_eq!(f.transport.live_handles(), 1);
        assert_eq!(f.connection.status(), ConnectionStatus::Ok);
        assert!(!f.connection.has_pending_reconnect());
    }

    #[tokio::test]
    async fn test_superseded_output_is_ignored() {
        let mut f = ready();
        f.dispatch(DispatchMode::Discrete, "false").unwrap();
        let stale = f.transport.exec_origins().remove(0);
        f.dispatch(DispatchMode::Discrete, "true").unwrap();

        f.feed(&stale, StreamEvent::Exit(1));
        f.feed(&stale, StreamEvent::Signal("TERM".into()));
        f.feed(&stale, StreamEvent::Error("reset".into()));

        assert!(!f.dispatcher.flag().get());
        assert_eq!(f.connection.status(), ConnectionStatus::Ok);
    }

    #[tokio::test]
    async fn test_dispatch_rejected_when_not_ready() {
        let mut f = ready();
        f.dispatch(DispatchMode::Discrete, "false").unwrap();
        let origin = f.transport.exec_origins().remove(0);
        f.feed(&origin, StreamEvent::Exit(1));

        f.connection.teardown();
        let err = f.dispatch(DispatchMode::Session, "ls").unwrap_err();
        assert!(matches!(
            err,
            SshDispatchError::NotReady(ConnectionStatus::Disconnected)
        ));
        // rejected requests leave the previous outcome in place
        assert!(f.dispatcher.flag().get());
        assert!(f.transport.shell_scripts().is_empty());
    }

    #[test]
    fn test_error_flag_notifies_only_on_change() {
        let flag = ErrorFlag::new();
        let mut rx = flag.subscribe();
        flag.raise();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        flag.raise();
        assert!(!rx.has_changed().unwrap());
        flag.reset();
        assert!(!*rx.borrow_and_update());
    }
}
