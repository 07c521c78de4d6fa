//! Items delivered to channel consumers.

use std::time::Duration;

use cg_broadcast::ChangeMessage;
use uuid::Uuid;

use crate::state::ChannelState;

/// Everything a [`ReconnectingChannel`](crate::ReconnectingChannel) reports,
/// in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The server accepted the connection.
    Connected {
        /// Id the server assigned to this connection.
        client_id: Uuid,
    },
    /// A file change pushed by the server.
    Change(ChangeMessage),
    /// The server rejected one of our frames.
    ServerError {
        /// Machine-readable code.
        code: String,
        /// Human-readable detail.
        message: String,
    },
    /// The channel moved to a new state.
    StateChanged(ChannelState),
    /// A reconnect is scheduled.
    Reconnecting {
        /// Consecutive failed attempts so far, starting at 1.
        attempt: u32,
        /// Wait before dialing again.
        delay: Duration,
    },
    /// A connection failure, for observability only.
    Diagnostic(String),
}

impl ChannelEvent {
    /// Returns the change if this is a [`ChannelEvent::Change`].
    #[must_use]
    pub const fn as_change(&self) -> Option<&ChangeMessage> {
        match self {
            Self::Change(change) => Some(change),
            _ => None,
        }
    }
}
