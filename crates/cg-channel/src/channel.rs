//! The reconnecting consumer channel.
//!
//! A background task owns the socket and runs the connection loop:
//!
//! ```text
//! loop {
//!     dial ─► wait for `connected` ─► Open ─► session until it fails
//!     emit Diagnostic, go back to Connecting
//!     sleep(backoff.next_delay())
//! }
//! ```
//!
//! The backoff resets every time a session reaches `Open`. Cancellation
//! (from [`ReconnectingChannel::disconnect`] or drop) is checked at every
//! await in the loop, so it also cuts short a pending reconnect delay.

use std::sync::Arc;
use std::time::Duration;

use cg_broadcast::{ClientMessage, Envelope, ServerMessage};
use cg_core::{ChannelConfig, FxHashSet};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::ConnectionError;
use crate::events::ChannelEvent;
use crate::heartbeat::{Beat, Heartbeat};
use crate::state::ChannelState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the handle and the connection task.
struct Shared {
    /// Desired topics. Empty means everything.
    ///
    /// Held while queueing a topic command so the task never sees a set
    /// change without its matching command, or the reverse.
    topics: Mutex<FxHashSet<String>>,
    state: watch::Sender<ChannelState>,
}

/// Emits events from the connection task.
struct Reporter {
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Reporter {
    fn emit(&self, event: ChannelEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ChannelState) {
        let changed = self.shared.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(state = %state, "Channel state changed");
            self.emit(ChannelEvent::StateChanged(state));
        }
    }
}

/// How a session ended without an error.
enum SessionEnd {
    Cancelled,
    HandleDropped,
}

/// A resilient connection to a broadcast server.
///
/// # Examples
///
/// ```no_run
/// use cg_channel::{ChannelEvent, ReconnectingChannel};
/// use cg_core::ChannelConfig;
///
/// # async fn example() {
/// let mut channel = ReconnectingChannel::connect(ChannelConfig::new("ws://127.0.0.1:4455/ws")).await;
/// channel.subscribe_topics(["changes"]);
///
/// while let Some(event) = channel.recv().await {
///     if let ChannelEvent::Change(change) = event {
///         println!("{} {}", change.kind, change.path);
///     }
/// }
/// # }
/// ```
pub struct ReconnectingChannel {
    config: ChannelConfig,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ReconnectingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingChannel")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ReconnectingChannel {
    /// Starts connecting to `config.url` in the background.
    ///
    /// Returns immediately in [`ChannelState::Connecting`]. Topics from
    /// `config.topics` are subscribed on every handshake.
    #[allow(clippy::unused_async)] // Async to guarantee a runtime for the connection task
    pub async fn connect(config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        let shared = Arc::new(Shared {
            topics: Mutex::new(config.topics.iter().cloned().collect()),
            state,
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let reporter = Reporter {
            shared: Arc::clone(&shared),
            events: event_tx,
        };
        let task = tokio::spawn(run(config.clone(), reporter, command_rx, cancel.clone()));

        Self {
            config,
            shared,
            commands,
            events,
            cancel,
            task: Some(task),
        }
    }

    /// Receives the next event. Returns `None` after [`disconnect`](Self::disconnect)
    /// once everything queued has been drained.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Returns a mutable reference to the event receiver, for `tokio::select!`.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<ChannelEvent> {
        &mut self.events
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Returns the URL this channel dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Returns the desired topics, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.shared.topics.lock().iter().cloned().collect();
        topics.sort_unstable();
        topics
    }

    /// Adds topics. Sent now if open, and again after every reconnect.
    pub fn subscribe_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        let mut desired = self.shared.topics.lock();
        desired.extend(topics.iter().cloned());
        let _ = self.commands.send(ClientMessage::Subscribe { topics });
    }

    /// Removes topics. With none left the server sends everything.
    pub fn unsubscribe_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        let mut desired = self.shared.topics.lock();
        for topic in &topics {
            desired.remove(topic);
        }
        let _ = self.commands.send(ClientMessage::Unsubscribe { topics });
    }

    /// Closes the connection and cancels any pending reconnect.
    ///
    /// The channel ends in [`ChannelState::Closed`] and never dials again.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Channel task failed");
            }
        }
        self.shared.state.send_replace(ChannelState::Closed);
        tracing::info!(url = %self.config.url, "Channel disconnected");
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    config: ChannelConfig,
    reporter: Reporter,
    mut commands: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::from_config(&config);
    let mut rng = StdRng::from_entropy();

    loop {
        reporter.set_state(ChannelState::Connecting);
        tracing::debug!(url = %config.url, attempt = backoff.attempt(), "Dialing");

        let dial = tokio::time::timeout(config.connect_timeout(), connect_async(config.url.as_str()));
        let dialed = tokio::select! {
            () = cancel.cancelled() => break,
            result = dial => result,
        };

        let outcome = match dialed {
            Ok(Ok((ws, _))) => {
                session(ws, &config, &reporter, &mut commands, &mut backoff, &cancel).await
            }
            Ok(Err(e)) => Err(ConnectionError::connect(&config.url, e)),
            Err(_elapsed) => Err(ConnectionError::ConnectTimeout {
                url: config.url.clone(),
                after: config.connect_timeout(),
            }),
        };

        match outcome {
            Ok(SessionEnd::Cancelled | SessionEnd::HandleDropped) => break,
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "Connection lost");
                reporter.emit(ChannelEvent::Diagnostic(e.to_string()));
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        reporter.set_state(ChannelState::Connecting);

        let delay = backoff.next_delay(&mut rng);
        let attempt = backoff.attempt();
        tracing::info!(
            url = %config.url,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting"
        );
        reporter.emit(ChannelEvent::Reconnecting { attempt, delay });

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    reporter.set_state(ChannelState::Closed);
}

/// Runs one connection until it fails or the channel is told to stop.
async fn session(
    ws: WsStream,
    config: &ChannelConfig,
    reporter: &Reporter,
    commands: &mut mpsc::UnboundedReceiver<ClientMessage>,
    backoff: &mut Backoff,
    cancel: &CancellationToken,
) -> Result<SessionEnd, ConnectionError> {
    let (mut sink, mut stream) = ws.split();

    let client_id = tokio::select! {
        () = cancel.cancelled() => {
            let _ = sink.send(Message::Close(None)).await;
            return Ok(SessionEnd::Cancelled);
        }
        handshake = tokio::time::timeout(config.pong_timeout(), await_connected(&mut stream)) => {
            handshake.map_err(|_elapsed| {
                ConnectionError::Protocol("no connected frame from server".to_owned())
            })??
        }
    };

    backoff.reset();
    reporter.emit(ChannelEvent::Connected { client_id });
    reporter.set_state(ChannelState::Open);
    tracing::info!(url = %config.url, client_id = %client_id, "Channel open");

    // Commands queued before this point are covered by the full set.
    let topics: Vec<String> = {
        let desired = reporter.shared.topics.lock();
        while commands.try_recv().is_ok() {}
        let mut topics: Vec<String> = desired.iter().cloned().collect();
        topics.sort_unstable();
        topics
    };
    if !topics.is_empty() {
        send(&mut sink, ClientMessage::Subscribe { topics }).await?;
    }

    let mut heartbeat = Heartbeat::new(config.ping_interval(), config.pong_timeout());

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(SessionEnd::Cancelled);
            }

            beat = heartbeat.next() => match beat {
                Beat::Ping => send(&mut sink, ClientMessage::Ping).await?,
                Beat::Expired => return Err(ConnectionError::HeartbeatTimeout(config.pong_timeout())),
            },

            command = commands.recv() => match command {
                Some(message) => send(&mut sink, message).await?,
                None => return Ok(SessionEnd::HandleDropped),
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match Envelope::<ServerMessage>::decode(&text) {
                    Ok(envelope) => match envelope.message {
                        ServerMessage::Pong { .. } => heartbeat.on_pong(),
                        ServerMessage::Change(change) => reporter.emit(ChannelEvent::Change(change)),
                        ServerMessage::Error { code, message } => {
                            tracing::warn!(code = %code, message = %message, "Server rejected a frame");
                            reporter.emit(ChannelEvent::ServerError { code, message });
                        }
                        ServerMessage::Connected { .. } => {
                            tracing::debug!("Ignoring repeated connected frame");
                        }
                    },
                    Err(e) => {
                        let err = ConnectionError::Protocol(e.to_string());
                        tracing::debug!(error = %err, "Skipping undecodable frame");
                        reporter.emit(ChannelEvent::Diagnostic(err.to_string()));
                    }
                },
                Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

/// Reads until the server's `connected` frame.
async fn await_connected<S>(stream: &mut S) -> Result<uuid::Uuid, ConnectionError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let envelope = Envelope::<ServerMessage>::decode(&text)
                    .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
                if let ServerMessage::Connected { client_id, .. } = envelope.message {
                    return Ok(client_id);
                }
                return Err(ConnectionError::Protocol(
                    "first frame was not connected".to_owned(),
                ));
            }
            Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn send<S>(sink: &mut S, message: ClientMessage) -> Result<(), ConnectionError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = Envelope::now(message)
        .encode()
        .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}
