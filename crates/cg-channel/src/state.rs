//! Connection state of a [`ReconnectingChannel`](crate::ReconnectingChannel).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the channel is in its lifecycle.
///
/// ```text
///            handshake ok
/// Connecting ───────────► Open
///     ▲                    │
///     └────────────────────┘  unexpected close / heartbeat timeout
///
/// Connecting | Open ──disconnect()──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Dialing, handshaking, or waiting out a backoff delay.
    Connecting,
    /// Handshake complete; changes are flowing.
    Open,
    /// Disconnected on request. Terminal.
    Closed,
}

impl ChannelState {
    /// Returns the lowercase name used on the wire and in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` once the channel can never reconnect.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for state in [ChannelState::Connecting, ChannelState::Open, ChannelState::Closed] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
        assert!(ChannelState::Closed.is_terminal());
        assert!(!ChannelState::Connecting.is_terminal());
    }
}
