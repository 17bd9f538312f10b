//! In-memory transport used by the unit tests
//!
//! Records every connection attempt and channel request so tests can play
//! the remote side by emitting events through the recorded sinks.

use std::sync::{Arc, Mutex, MutexGuard};

use super::config::TransportParams;
use super::transport::{
    EventSink, SessionHandle, SshTransport, StreamOrigin, StreamSink, TransportEvent,
};
use crate::error::{Result, SshDispatchError};

#[derive(Default)]
struct Recorded {
    params: Vec<TransportParams>,
    events: Vec<EventSink>,
    live: usize,
    execs: Vec<(String, StreamSink)>,
    shells: Vec<(String, StreamSink)>,
    fail_initiation: bool,
    fail_exec_of: Option<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    recorded: Arc<Mutex<Recorded>>,
}

impl MockTransport {
    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap()
    }

    pub(crate) fn fail_initiation(&self, fail: bool) {
        self.recorded().fail_initiation = fail;
    }

    pub(crate) fn fail_exec_of(&self, command: &str) {
        self.recorded().fail_exec_of = Some(command.to_string());
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.recorded().params.len()
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.recorded().live
    }

    pub(crate) fn last_params(&self) -> Option<TransportParams> {
        self.recorded().params.last().cloned()
    }

    /// Emit a connection event as the most recent connection attempt
    pub(crate) fn emit(&self, event: TransportEvent) {
        let sink = self.recorded().events.last().cloned();
        sink.expect("no connection attempt yet").emit(event);
    }

    pub(crate) fn exec_commands(&self) -> Vec<String> {
        self.recorded().execs.iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn exec_sinks(&self) -> Vec<StreamSink> {
        self.recorded().execs.iter().map(|(_, s)| s.clone()).collect()
    }

    pub(crate) fn exec_origins(&self) -> Vec<StreamOrigin> {
        self.exec_sinks().iter().map(|s| s.origin().clone()).collect()
    }

    pub(crate) fn shell_scripts(&self) -> Vec<String> {
        self.recorded().shells.iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn shell_sinks(&self) -> Vec<StreamSink> {
        self.recorded().shells.iter().map(|(_, s)| s.clone()).collect()
    }

    pub(crate) fn shell_origins(&self) -> Vec<StreamOrigin> {
        self.shell_sinks().iter().map(|s| s.origin().clone()).collect()
    }
}

impl SshTransport for MockTransport {
    type Handle = MockHandle;

    fn connect(&mut self, params: TransportParams, events: EventSink) -> Result<MockHandle> {
        let mut recorded = self.recorded();
        recorded.params.push(params);
        if recorded.fail_initiation {
            return Err(SshDispatchError::connection("initiation refused"));
        }
        recorded.events.push(events);
        recorded.live += 1;
        Ok(MockHandle {
            recorded: self.recorded.clone(),
            alive: true,
        })
    }
}

pub(crate) struct MockHandle {
    recorded: Arc<Mutex<Recorded>>,
    alive: bool,
}

impl SessionHandle for MockHandle {
    fn exec(&mut self, command: &str, stream: StreamSink) -> Result<()> {
        let mut recorded = self.recorded.lock().unwrap();
        if recorded.fail_exec_of.as_deref() == Some(command) {
            return Err(SshDispatchError::transport("exec refused"));
        }
        recorded.execs.push((command.to_string(), stream));
        Ok(())
    }

    fn shell(&mut self, script: String, stream: StreamSink) -> Result<()> {
        self.recorded.lock().unwrap().shells.push((script, stream));
        Ok(())
    }

    fn destroy(&mut self) {
        if std::mem::replace(&mut self.alive, false) {
            self.recorded.lock().unwrap().live -= 1;
        }
    }
}
