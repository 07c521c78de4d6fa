//! Gateway statistics.
//!
//! [`GatewayCounters`] holds cumulative totals on atomics with relaxed
//! ordering; they are informational and need no ordering guarantees.
//! [`GatewayStats`] combines them with the live breaker and queue state into
//! a serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitState;

/// Cumulative request counters.
#[derive(Debug, Default)]
pub struct GatewayCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl GatewayCounters {
    /// Creates zeroed counters.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a submission.
    #[inline]
    pub fn increment_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a process that exited with a code.
    #[inline]
    pub fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an execution failure (spawn, timeout, kill).
    #[inline]
    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request turned away without running.
    #[inline]
    pub fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) -> (u64, u64, u64, u64) {
        (
            self.submitted.load(Ordering::Relaxed),
            self.completed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
        )
    }
}

/// A point-in-time view of the gateway.
///
/// # Examples
///
/// ```
/// use cg_gateway::{CircuitState, GatewayStats};
///
/// let stats = GatewayStats::default();
/// assert_eq!(stats.state, CircuitState::Closed);
/// assert!(stats.is_idle());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    /// Circuit breaker state.
    pub state: CircuitState,
    /// Consecutive execution failures.
    pub failures: u32,
    /// Executions currently running.
    pub active: usize,
    /// Requests waiting for a slot.
    pub queued: usize,
    /// Requests submitted since creation.
    pub submitted: u64,
    /// Processes that exited with a code.
    pub completed: u64,
    /// Executions that failed at the process level.
    pub failed: u64,
    /// Requests rejected by the breaker or discarded from the queue.
    pub rejected: u64,
}

impl GatewayStats {
    /// Returns `true` if nothing is running or queued.
    #[inline]
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.active == 0 && self.queued == 0
    }
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            active: 0,
            queued: 0,
            submitted: 0,
            completed: 0,
            failed: 0,
            rejected: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = GatewayCounters::new();
        counters.increment_submitted();
        counters.increment_submitted();
        counters.increment_completed();
        counters.increment_failed();
        counters.increment_rejected();
        assert_eq!(counters.load(), (2, 1, 1, 1));
    }

    #[test]
    fn test_stats_wire_shape() {
        let stats = GatewayStats {
            state: CircuitState::HalfOpen,
            active: 1,
            ..GatewayStats::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["state"], "half-open");
        assert_eq!(json["active"], 1);
        assert!(!stats.is_idle());
    }
}
