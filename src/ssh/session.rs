//! russh-backed transport
//!
//! Connects, authenticates, and runs commands with `russh`, reporting
//! progress and results through the sinks of the transport interface.

use std::borrow::Cow;
use std::sync::Arc;

use russh::client::{self, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg, Preferred};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::cipher::CipherConstraint;
use super::config::TransportParams;
use super::handler::SshHandler;
use super::transport::{
    EventSink, InteractivePrompt, InteractiveRequest, SessionHandle, SshTransport, StreamEvent,
    StreamSink, TransportEvent,
};
use crate::error::{Result, SshDispatchError};

type SharedHandle = Arc<Mutex<Option<Arc<Handle<SshHandler>>>>>;

/// Transport creating one russh session per connection attempt
#[derive(Debug, Clone, Default)]
pub struct RusshTransport;

impl RusshTransport {
    pub fn new() -> Self {
        Self
    }
}

impl SshTransport for RusshTransport {
    type Handle = RusshSession;

    fn connect(&mut self, params: TransportParams, events: EventSink) -> Result<RusshSession> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SshDispatchError::connection(format!("no async runtime: {}", e)))?;

        let key = decode_private_key(&params)?;
        let config = Arc::new(client_config(&params));
        let slot: SharedHandle = Arc::new(Mutex::new(None));

        let driver = runtime.spawn(establish(params, key, config, events, slot.clone()));

        Ok(RusshSession {
            slot,
            driver: Some(driver),
        })
    }
}

/// Decode the private key, if one was loaded
fn decode_private_key(params: &TransportParams) -> Result<Option<PrivateKey>> {
    if params.private_key.trim().is_empty() {
        return Ok(None);
    }
    russh::keys::decode_secret_key(&params.private_key, params.passphrase.as_deref())
        .map(Some)
        .map_err(|e| SshDispatchError::SshKey(format!("Failed to parse private key: {}", e)))
}

fn client_config(params: &TransportParams) -> client::Config {
    let keepalive_interval = if params.keepalive_interval.is_zero() {
        None
    } else {
        Some(params.keepalive_interval)
    };

    client::Config {
        keepalive_interval,
        preferred: preferred_algorithms(params.cipher.as_ref()),
        ..Default::default()
    }
}

/// Default algorithm preferences with the cipher list reordered
fn preferred_algorithms(cipher: Option<&CipherConstraint>) -> Preferred {
    let mut preferred = Preferred::default();
    if let Some(constraint) = cipher {
        preferred.cipher = Cow::Owned(constraint.order(&preferred.cipher[..]));
    }
    preferred
}

/// Connect, authenticate, and publish the handle; bounded by the handshake timeout
async fn establish(
    params: TransportParams,
    key: Option<PrivateKey>,
    config: Arc<client::Config>,
    events: EventSink,
    slot: SharedHandle,
) {
    let handshake_timeout = params.handshake_timeout;
    let attempt = timeout(
        handshake_timeout,
        connect_and_authenticate(&params, key, config, &events),
    )
    .await;

    match attempt {
        Ok(Ok(handle)) => {
            *slot.lock().await = Some(Arc::new(handle));
            info!(
                "Successfully connected to {}@{}:{}",
                params.username, params.host, params.port
            );
            events.emit(TransportEvent::Ready);
        }
        Ok(Err(e)) => {
            events.emit(TransportEvent::Error(e.to_string()));
        }
        Err(_) => {
            warn!(
                "SSH handshake timeout after {}ms",
                handshake_timeout.as_millis()
            );
            events.emit(TransportEvent::Timeout);
        }
    }
}

async fn connect_and_authenticate(
    params: &TransportParams,
    key: Option<PrivateKey>,
    config: Arc<client::Config>,
    events: &EventSink,
) -> Result<Handle<SshHandler>> {
    info!("Connecting to SSH server {}:{}...", params.host, params.port);

    let stream = TcpStream::connect((params.host.as_str(), params.port))
        .await
        .map_err(|e| SshDispatchError::connection(e.to_string()))?;
    events.emit(TransportEvent::Connect);

    let mut session = client::connect_stream(config, stream, SshHandler::new(events.clone()))
        .await
        .map_err(|e| SshDispatchError::connection(e.to_string()))?;

    authenticate(&mut session, params, key, events).await?;
    Ok(session)
}

/// Authenticate with the SSH server
async fn authenticate(
    session: &mut Handle<SshHandler>,
    params: &TransportParams,
    key: Option<PrivateKey>,
    events: &EventSink,
) -> Result<()> {
    let username = params.username.as_str();

    // Try password authentication first
    if let Some(ref password) = params.password {
        debug!("Attempting password authentication for user '{}'", username);
        let auth_result = session
            .authenticate_password(username, password)
            .await
            .map_err(|e| SshDispatchError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Password authentication successful");
            return Ok(());
        }

        debug!("Password rejected, falling back to keyboard-interactive");
        return authenticate_interactive(session, username, events).await;
    }

    // Try key authentication
    if let Some(key) = key {
        debug!("Attempting key authentication for user '{}'", username);
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth_result = session
            .authenticate_publickey(username, key_with_alg)
            .await
            .map_err(|e| SshDispatchError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful");
            return Ok(());
        }
        return Err(SshDispatchError::auth("Key authentication rejected"));
    }

    Err(SshDispatchError::auth(
        "No authentication method available (require password or private key)",
    ))
}

/// Keyboard-interactive exchange; the answers come from the event loop
async fn authenticate_interactive(
    session: &mut Handle<SshHandler>,
    username: &str,
    events: &EventSink,
) -> Result<()> {
    let mut response = session
        .authenticate_keyboard_interactive_start(username, None::<String>)
        .await
        .map_err(|e| SshDispatchError::auth(e.to_string()))?;

    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => {
                info!("Keyboard-interactive authentication successful");
                return Ok(());
            }
            KeyboardInteractiveAuthResponse::Failure { .. } => {
                return Err(SshDispatchError::auth(
                    "Keyboard-interactive authentication rejected",
                ));
            }
            KeyboardInteractiveAuthResponse::InfoRequest {
                name,
                instructions,
                prompts,
            } => {
                let prompts = prompts
                    .into_iter()
                    .map(|p| InteractivePrompt::new(p.prompt, p.echo))
                    .collect();
                let (request, answers) = InteractiveRequest::new(name, instructions, "", prompts);
                events.emit(TransportEvent::KeyboardInteractive(request));

                let answers = answers.await.map_err(|_| {
                    SshDispatchError::auth("Keyboard-interactive prompts left unanswered")
                })?;
                response = session
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(|e| SshDispatchError::auth(e.to_string()))?;
            }
        }
    }
}

/// A russh session owned by the connection state machine
pub struct RusshSession {
    slot: SharedHandle,
    driver: Option<JoinHandle<()>>,
}

impl RusshSession {
    /// Run `work` on a fresh session channel in the background
    fn spawn_channel<F, Fut>(&self, stream: StreamSink, work: F) -> Result<()>
    where
        F: FnOnce(Channel<client::Msg>, StreamSink) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if self.driver.is_none() {
            return Err(SshDispatchError::connection("SSH session destroyed"));
        }

        let slot = self.slot.clone();
        tokio::spawn(async move {
            let opened = open_channel(&slot).await;
            let outcome = match opened {
                Ok(channel) => work(channel, stream.clone()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                stream.emit(StreamEvent::Error(e.to_string()));
            }
        });
        Ok(())
    }
}

impl SessionHandle for RusshSession {
    fn exec(&mut self, command: &str, stream: StreamSink) -> Result<()> {
        let command = command.to_string();
        self.spawn_channel(stream, move |channel, stream| async move {
            channel
                .exec(true, command.as_str())
                .await
                .map_err(|e| SshDispatchError::transport(format!("Failed to exec command: {}", e)))?;
            pump_channel(channel, &stream).await;
            Ok::<(), SshDispatchError>(())
        })
    }

    fn shell(&mut self, script: String, stream: StreamSink) -> Result<()> {
        self.spawn_channel(stream, move |channel, stream| async move {
            channel
                .request_shell(true)
                .await
                .map_err(|e| SshDispatchError::transport(format!("Failed to request shell: {}", e)))?;
            channel
                .data(script.as_bytes())
                .await
                .map_err(|e| SshDispatchError::transport(format!("Failed to write script: {}", e)))?;
            channel
                .eof()
                .await
                .map_err(|e| SshDispatchError::transport(format!("Failed to close input: {}", e)))?;
            pump_channel(channel, &stream).await;
            Ok::<(), SshDispatchError>(())
        })
    }

    fn destroy(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        driver.abort();

        let slot = self.slot.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Some(handle) = slot.lock().await.take() {
                    let _ = handle
                        .disconnect(russh::Disconnect::ByApplication, "", "")
                        .await;
                    debug!("SSH connection closed");
                }
            });
        }
    }
}

async fn open_channel(slot: &SharedHandle) -> Result<Channel<client::Msg>> {
    let handle = slot
        .lock()
        .await
        .clone()
        .ok_or_else(|| SshDispatchError::connection("SSH connection not established"))?;

    handle
        .channel_open_session()
        .await
        .map_err(|e| SshDispatchError::transport(format!("Failed to open channel: {}", e)))
}

/// Forward channel messages until the channel closes
async fn pump_channel(mut channel: Channel<client::Msg>, stream: &StreamSink) {
    let mut exit_code = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                stream.emit(StreamEvent::Data(data.to_vec()));
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                let event = if ext == 1 {
                    StreamEvent::Stderr(data.to_vec())
                } else {
                    StreamEvent::Data(data.to_vec())
                };
                stream.emit(event);
            }
            ChannelMsg::ExitStatus { exit_status } => {
                exit_code = Some(exit_status);
                stream.emit(StreamEvent::Exit(exit_status));
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                stream.emit(StreamEvent::Signal(format!("{:?}", signal_name)));
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    stream.emit(StreamEvent::Close(exit_code));
}
