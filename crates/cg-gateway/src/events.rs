//! Lifecycle notifications published by the gateway.
//!
//! The gateway never persists or exports these. Observability collaborators
//! subscribe through [`CommandGateway::events`](crate::CommandGateway::events)
//! and each gets an independent [`broadcast`](tokio::sync::broadcast)
//! receiver, so a lagging or failing consumer cannot hold up the others or
//! the gateway itself.

use std::time::Duration;

use crate::breaker::CircuitState;
use crate::request::RequestId;

/// Capacity of the lifecycle broadcast channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A gateway lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayEvent {
    /// A request was submitted.
    Submitted {
        /// Request id.
        id: RequestId,
        /// The executable requested.
        command: String,
    },

    /// A request acquired a concurrency slot and is about to spawn.
    Started {
        /// Request id.
        id: RequestId,
        /// Time spent queued before starting.
        waited: Duration,
    },

    /// A process exited with a code. Non-zero codes land here too.
    Completed {
        /// Request id.
        id: RequestId,
        /// Exit code reported by the process.
        exit_code: i32,
        /// Wall-clock time from spawn to exit.
        duration_ms: u64,
    },

    /// A request ended with an error.
    Failed {
        /// Request id.
        id: RequestId,
        /// Rendered error.
        reason: String,
        /// Whether the breaker counted it as a failure.
        counted: bool,
    },

    /// The circuit breaker changed state.
    CircuitStateChanged {
        /// Previous state.
        from: CircuitState,
        /// New state.
        to: CircuitState,
    },

    /// The number of queued requests changed.
    QueueDepthChanged {
        /// Current queue depth.
        depth: usize,
    },
}

impl GatewayEvent {
    /// Returns the request id for per-request events.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Submitted { id, .. }
            | Self::Started { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. } => Some(*id),
            Self::CircuitStateChanged { .. } | Self::QueueDepthChanged { .. } => None,
        }
    }
}
