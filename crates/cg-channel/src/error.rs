//! Error types for the cg-channel crate.
//!
//! A [`ConnectionError`] never reaches event consumers as an `Err`. It ends
//! the current connection, starts the reconnect cycle, and is reported as a
//! [`ChannelEvent::Diagnostic`](crate::ChannelEvent::Diagnostic).

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Transport-level failures on the broadcast channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Dialing or the WebSocket handshake failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// The URL being dialed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: Box<tungstenite::Error>,
    },

    /// Dialing or the upgrade did not finish in time.
    #[error("connect to {url} timed out after {}ms", .after.as_millis())]
    ConnectTimeout {
        /// The URL being dialed.
        url: String,
        /// The limit that elapsed.
        after: Duration,
    },

    /// Reading or writing an established connection failed.
    #[error("transport error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),

    /// No pong arrived within the grace window after a ping.
    #[error("no pong within {}ms", .0.as_millis())]
    HeartbeatTimeout(Duration),

    /// The server sent something the channel cannot use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,
}

impl ConnectionError {
    /// Creates a new [`ConnectionError::Connect`] error.
    pub fn connect(url: impl Into<String>, source: tungstenite::Error) -> Self {
        Self::Connect {
            url: url.into(),
            source: Box::new(source),
        }
    }

    /// Returns `true` if the connection was up when this happened.
    #[must_use]
    pub const fn was_connected(&self) -> bool {
        !matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }
}

impl From<tungstenite::Error> for ConnectionError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ConnectionError::HeartbeatTimeout(Duration::from_millis(5000));
        assert_eq!(err.to_string(), "no pong within 5000ms");
        assert!(err.was_connected());

        let err = ConnectionError::connect("ws://127.0.0.1:1/ws", tungstenite::Error::ConnectionClosed);
        assert!(err.to_string().starts_with("failed to connect to ws://127.0.0.1:1/ws"));
        assert!(!err.was_connected());

        let err = ConnectionError::ConnectTimeout {
            url: "ws://10.0.0.1/ws".to_owned(),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "connect to ws://10.0.0.1/ws timed out after 250ms");
        assert!(!err.was_connected());
    }
}
