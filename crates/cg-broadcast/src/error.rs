//! Error types for the cg-broadcast crate.
//!
//! Delivery problems with individual subscribers are never errors here.
//! A full or closed subscriber queue is logged and counted in the
//! [`DeliveryReport`](crate::DeliveryReport); only server lifecycle and
//! (de)serialization failures are returned.

/// Errors that can occur while serving or encoding broadcast traffic.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// The server could not bind its listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address from configuration.
        addr: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A frame was not a valid protocol message.
    #[error("invalid message: {0}")]
    Decode(#[source] serde_json::Error),
}

impl BroadcastError {
    /// Creates a new [`BroadcastError::Bind`] error.
    #[inline]
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Returns `true` if the error concerns one frame rather than the server.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = BroadcastError::bind(
            "127.0.0.1:1",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:1: in use");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_decode_is_recoverable() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(BroadcastError::Decode(source).is_recoverable());
    }
}
