//! Error types for the cg-gateway crate.
//!
//! This module provides the [`GatewayError`] type returned by
//! [`CommandGateway::execute`](crate::CommandGateway::execute).
//!
//! A process that runs and exits with a non-zero code is *not* an error at
//! this layer; it is an `Ok(CommandResult)` whose `exit_code` the caller
//! inspects. Only process-level failures land here.

use std::time::Duration;

/// Errors that can reject an execution request.
///
/// # Breaker Classification
///
/// - **Circuit open** ([`GatewayError::CircuitOpen`]): rejected before spawning, not a failure
/// - **Queue cleared** ([`GatewayError::QueueCleared`]): discarded before starting, not a failure
/// - **Timeout**, **Spawn**, **Killed**, **Io**: the execution path failed, counted by the breaker
///
/// # Examples
///
/// ```
/// use cg_gateway::GatewayError;
/// use std::time::Duration;
///
/// let err = GatewayError::CircuitOpen { remaining: Duration::from_millis(1500) };
/// assert!(err.to_string().contains("1500ms"));
/// assert!(!err.counts_as_failure());
/// ```
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The circuit breaker is open and the request was rejected without spawning.
    #[error("circuit breaker is open; retry in {}ms", .remaining.as_millis())]
    CircuitOpen {
        /// Time left until a half-open trial will be admitted.
        remaining: Duration,
    },

    /// The process exceeded its allotted time and was killed.
    #[error("command '{command}' timed out after {}ms and was killed", .after.as_millis())]
    Timeout {
        /// The executable that timed out.
        command: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The executable was missing or could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        /// The executable that failed to start.
        command: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The process was terminated by a signal instead of exiting.
    #[error("command '{command}' was terminated before exiting (signal {signal:?})")]
    Killed {
        /// The executable that was terminated.
        command: String,
        /// The terminating signal, when the platform reports one.
        signal: Option<i32>,
    },

    /// Waiting on the process or collecting its output failed after spawn.
    #[error("I/O error while supervising '{command}': {source}")]
    Io {
        /// The executable being supervised.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The request was still queued when the queue was flushed.
    #[error("request was discarded from the queue before it started")]
    QueueCleared,
}

impl GatewayError {
    /// Returns `true` if this error counts toward opening the circuit.
    #[inline]
    #[must_use]
    pub const fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Spawn { .. } | Self::Killed { .. } | Self::Io { .. }
        )
    }

    /// Returns `true` if the request was turned away without running.
    #[inline]
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::QueueCleared)
    }

    /// Returns the remaining cool-down for [`GatewayError::CircuitOpen`].
    #[must_use]
    pub const fn remaining_cooldown(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { remaining } => Some(*remaining),
            _ => None,
        }
    }

    /// Returns `true` for [`GatewayError::Timeout`].
    #[inline]
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_circuit_open_carries_cooldown() {
        let err = GatewayError::CircuitOpen {
            remaining: Duration::from_millis(250),
        };
        assert_eq!(err.remaining_cooldown(), Some(Duration::from_millis(250)));
        assert_eq!(err.to_string(), "circuit breaker is open; retry in 250ms");
        assert!(err.is_rejection());
        assert!(!err.counts_as_failure());
    }

    #[test]
    fn test_timeout_counts_as_failure() {
        let err = GatewayError::Timeout {
            command: "store".to_owned(),
            after: Duration::from_secs(30),
        };
        assert!(err.counts_as_failure());
        assert!(err.is_timeout());
        assert!(err.to_string().contains("30000ms"));
    }

    #[test]
    fn test_spawn_counts_as_failure() {
        let err = GatewayError::Spawn {
            command: "missing-binary".to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.counts_as_failure());
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("missing-binary"));
    }

    #[test]
    fn test_queue_cleared_is_not_failure() {
        let err = GatewayError::QueueCleared;
        assert!(!err.counts_as_failure());
        assert!(err.is_rejection());
        assert!(err.remaining_cooldown().is_none());
    }

    #[test]
    fn test_killed_display() {
        let err = GatewayError::Killed {
            command: "store".to_owned(),
            signal: Some(9),
        };
        assert!(err.counts_as_failure());
        assert!(err.to_string().contains("Some(9)"));
    }
}
