//! WebSocket endpoint serving a [`ChangeBroadcaster`].
//!
//! One task per connection. The task registers a subscription, greets the
//! client with `connected`, then multiplexes three sources until one of
//! them ends the connection:
//!
//! - outbound frames from the broadcaster
//! - inbound client frames (`subscribe`, `unsubscribe`, `ping`)
//! - an idle deadline, pushed back by every ping
//!
//! Server shutdown also closes every open connection.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use cg_core::BroadcastConfig;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broadcaster::ChangeBroadcaster;
use crate::error::BroadcastError;
use crate::protocol::{ClientMessage, Envelope, INVALID_MESSAGE, ServerMessage, now_millis};

#[derive(Clone)]
struct AppState {
    broadcaster: ChangeBroadcaster,
    idle_timeout: Duration,
    shutdown: CancellationToken,
}

/// Builds a router serving the WebSocket endpoint at `config.path`.
///
/// Connections are closed when `shutdown` is cancelled.
pub fn router(
    broadcaster: ChangeBroadcaster,
    config: &BroadcastConfig,
    shutdown: CancellationToken,
) -> Router {
    let state = AppState {
        broadcaster,
        idle_timeout: config.client_idle_timeout(),
        shutdown,
    };
    Router::new()
        .route(&config.path, get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut subscription = state.broadcaster.register();
    let client_id = subscription.client_id();
    tracing::info!(client_id = %client_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();

    let connected = ServerMessage::Connected {
        client_id,
        server_time: now_millis(),
    };
    if !send_message(&mut sender, connected).await {
        return;
    }

    let idle = tokio::time::sleep(state.idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            () = &mut idle => {
                tracing::info!(client_id = %client_id, "Evicting idle client");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match Envelope::<ClientMessage>::decode(&text) {
                            Ok(envelope) => match envelope.message {
                                ClientMessage::Subscribe { topics } => {
                                    state.broadcaster.subscribe_topics(client_id, topics);
                                    None
                                }
                                ClientMessage::Unsubscribe { topics } => {
                                    state.broadcaster.unsubscribe_topics(client_id, topics);
                                    None
                                }
                                ClientMessage::Ping => {
                                    idle.as_mut().reset(Instant::now() + state.idle_timeout);
                                    Some(ServerMessage::Pong { server_time: now_millis() })
                                }
                            },
                            Err(e) => {
                                tracing::debug!(client_id = %client_id, error = %e, "Rejected client frame");
                                Some(ServerMessage::error(INVALID_MESSAGE, e.to_string()))
                            }
                        };
                        if let Some(reply) = reply {
                            if !send_message(&mut sender, reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::error(INVALID_MESSAGE, "binary frames are not supported");
                        if !send_message(&mut sender, reply).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        idle.as_mut().reset(Instant::now() + state.idle_timeout);
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(client_id = %client_id, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(client_id = %client_id, "Client disconnected");
}

/// Sends one envelope. Returns `false` if the connection is gone.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: ServerMessage) -> bool {
    match Envelope::now(message).encode() {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server message");
            true
        }
    }
}

/// A running broadcast server.
///
/// # Examples
///
/// ```no_run
/// use cg_broadcast::{BroadcastServer, ChangeBroadcaster};
/// use cg_core::BroadcastConfig;
///
/// # async fn example() -> Result<(), cg_broadcast::BroadcastError> {
/// let broadcaster = ChangeBroadcaster::default();
/// let server = BroadcastServer::bind(broadcaster, &BroadcastConfig::default()).await?;
/// println!("listening on {}", server.url());
/// server.shutdown().await
/// # }
/// ```
#[derive(Debug)]
pub struct BroadcastServer {
    local_addr: SocketAddr,
    path: String,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), BroadcastError>>,
}

impl BroadcastServer {
    /// Binds `config.bind` and starts serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Bind`] if the address cannot be bound.
    pub async fn bind(
        broadcaster: ChangeBroadcaster,
        config: &BroadcastConfig,
    ) -> Result<Self, BroadcastError> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|e| BroadcastError::bind(&config.bind, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BroadcastError::bind(&config.bind, e))?;

        let shutdown = CancellationToken::new();
        let app = router(broadcaster, config, shutdown.clone());
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
                .map_err(BroadcastError::Serve)
        });

        tracing::info!(addr = %local_addr, path = %config.path, "Broadcast server listening");

        Ok(Self {
            local_addr,
            path: config.path.clone(),
            shutdown,
            handle,
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the `ws://` URL clients should connect to.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.path)
    }

    /// Stops accepting, closes every connection, and waits for the server task.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Serve`] if the server failed or its task panicked.
    pub async fn shutdown(self) -> Result<(), BroadcastError> {
        self.shutdown.cancel();
        let result = match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(BroadcastError::Serve(std::io::Error::other(e))),
        };
        tracing::info!(addr = %self.local_addr, "Broadcast server stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_watcher::{ChangeEvent, ChangeKind};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start(idle_ms: u64) -> (ChangeBroadcaster, BroadcastServer) {
        let config = BroadcastConfig {
            bind: "127.0.0.1:0".to_owned(),
            client_idle_timeout_ms: idle_ms,
            ..BroadcastConfig::default()
        };
        let broadcaster = ChangeBroadcaster::new(config.outbound_buffer);
        let server = BroadcastServer::bind(broadcaster.clone(), &config).await.unwrap();
        (broadcaster, server)
    }

    async fn connect(server: &BroadcastServer) -> Client {
        let (ws, _) = connect_async(server.url()).await.unwrap();
        ws
    }

    async fn next_message(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(WAIT, ws.next()).await.unwrap();
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    return Envelope::<ServerMessage>::decode(&text).unwrap().message;
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended: {other:?}"),
            }
        }
    }

    async fn send(ws: &mut Client, message: ClientMessage) {
        let text = Envelope::now(message).encode().unwrap();
        ws.send(WsMessage::Text(text)).await.unwrap();
    }

    #[tokio::test]
    async fn test_connected_is_first_frame() {
        let (broadcaster, server) = start(60_000).await;
        let mut ws = connect(&server).await;

        let ServerMessage::Connected { server_time, .. } = next_message(&mut ws).await else {
            panic!("expected connected");
        };
        assert!(server_time > 0);
        assert_eq!(broadcaster.subscriber_count(), 1);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_change_is_pushed_to_client() {
        let (broadcaster, server) = start(60_000).await;
        let mut ws = connect(&server).await;
        next_message(&mut ws).await;

        let event = ChangeEvent::new("/data/orders.json".into(), ChangeKind::Add);
        assert_eq!(broadcaster.publish(&event).unwrap().delivered, 1);

        let ServerMessage::Change(change) = next_message(&mut ws).await else {
            panic!("expected change");
        };
        assert_eq!(change.path, "/data/orders.json");
        assert_eq!(change.kind, ChangeKind::Add);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_and_topic_subscription() {
        let (broadcaster, server) = start(60_000).await;
        let mut ws = connect(&server).await;
        next_message(&mut ws).await;

        send(&mut ws, ClientMessage::Subscribe { topics: vec!["orders".to_owned()] }).await;
        send(&mut ws, ClientMessage::Ping).await;
        assert!(matches!(next_message(&mut ws).await, ServerMessage::Pong { .. }));

        let event = ChangeEvent::new("/data/a".into(), ChangeKind::Change);
        assert_eq!(broadcaster.publish(&event).unwrap().filtered, 1);
        broadcaster.publish_to("orders", &event).unwrap();

        let ServerMessage::Change(change) = next_message(&mut ws).await else {
            panic!("expected change");
        };
        assert_eq!(change.topic, "orders");

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_message_keeps_connection_open() {
        let (_broadcaster, server) = start(60_000).await;
        let mut ws = connect(&server).await;
        next_message(&mut ws).await;

        ws.send(WsMessage::Text("not json".to_owned())).await.unwrap();
        let ServerMessage::Error { code, .. } = next_message(&mut ws).await else {
            panic!("expected error");
        };
        assert_eq!(code, INVALID_MESSAGE);

        send(&mut ws, ClientMessage::Ping).await;
        assert!(matches!(next_message(&mut ws).await, ServerMessage::Pong { .. }));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_client_is_evicted() {
        let (broadcaster, server) = start(200).await;
        let mut ws = connect(&server).await;
        next_message(&mut ws).await;

        let ended = tokio::time::timeout(WAIT, async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(ended.is_ok());

        tokio::time::timeout(WAIT, async {
            while broadcaster.subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (broadcaster, server) = start(60_000).await;
        let mut ws = connect(&server).await;
        next_message(&mut ws).await;

        server.shutdown().await.unwrap();

        let ended = tokio::time::timeout(WAIT, async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(ended.is_ok());
        drop(broadcaster);
    }

    #[tokio::test]
    async fn test_bind_error() {
        let config = BroadcastConfig {
            bind: "not-an-address".to_owned(),
            ..BroadcastConfig::default()
        };
        let err = BroadcastServer::bind(ChangeBroadcaster::default(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::Bind { .. }));
    }
}
