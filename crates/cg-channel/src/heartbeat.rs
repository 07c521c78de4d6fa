//! Client-side liveness check.
//!
//! While a connection is open the channel pings every `interval`. After a
//! ping, the next beat waits for the pong deadline instead of the interval;
//! if no pong clears it first, the beat reports [`Beat::Expired`] and the
//! connection is treated as dead even though the socket never closed.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// What the connection should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a ping now.
    Ping,
    /// The last ping went unanswered for the grace window.
    Expired,
}

/// Ping schedule plus the outstanding pong deadline.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
    pong_timeout: Duration,
    deadline: Option<Instant>,
}

impl Heartbeat {
    /// Starts a schedule whose first ping is one `interval` from now.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(interval: Duration, pong_timeout: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + interval, interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            pong_timeout,
            deadline: None,
        }
    }

    /// Waits for the next beat.
    ///
    /// Cancel safe, so it can sit in a `tokio::select!` loop.
    pub async fn next(&mut self) -> Beat {
        if let Some(deadline) = self.deadline {
            tokio::time::sleep_until(deadline).await;
            self.deadline = None;
            return Beat::Expired;
        }

        self.interval.tick().await;
        self.deadline = Some(Instant::now() + self.pong_timeout);
        Beat::Ping
    }

    /// Records a pong, clearing the outstanding deadline.
    pub fn on_pong(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` while a ping is unanswered.
    #[must_use]
    pub const fn awaiting_pong(&self) -> bool {
        self.deadline.is_some()
    }
}
