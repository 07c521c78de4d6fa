//! Reconnect delay schedule.
//!
//! The delay for attempt `n` (counting from zero) is
//! `min(initial * multiplier^n, max)` plus a random jitter of up to
//! `jitter_ratio` of that value. Jitter could otherwise make a later delay
//! shorter than an earlier one, so each delay is floored at the previous.
//! [`Backoff::reset`] starts the schedule over after a successful connect.

use std::time::Duration;

use cg_core::ChannelConfig;
use rand::Rng;

/// Exponential backoff with jitter.
///
/// # Examples
///
/// ```
/// use cg_channel::Backoff;
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 2.0, 0.0);
/// let mut rng = StdRng::seed_from_u64(7);
///
/// assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(100));
/// assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(200));
/// assert_eq!(backoff.attempt(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter_ratio: f64,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    /// Creates a schedule. `multiplier` below 1 is treated as 1 and
    /// `jitter_ratio` is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter_ratio: f64) -> Self {
        Self {
            initial: initial.min(max),
            max,
            multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
            jitter_ratio: if jitter_ratio.is_finite() { jitter_ratio.clamp(0.0, 1.0) } else { 0.0 },
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Builds the schedule from channel settings.
    #[must_use]
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.backoff_multiplier,
            config.jitter_ratio,
        )
    }

    /// Returns the delay before the next attempt and advances the counter.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let base = self.base_delay();
        let jitter = if self.jitter_ratio > 0.0 {
            base.mul_f64(rng.gen_range(0.0..=self.jitter_ratio))
        } else {
            Duration::ZERO
        };

        let delay = (base + jitter).max(self.last);
        self.last = delay;
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Starts the schedule over.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }

    /// Returns how many delays have been handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the un-jittered delay for the current attempt.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn base_delay(&self) -> Duration {
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let scaled_ms = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        // NaN and infinity both fall through to the cap.
        if scaled_ms.is_finite() && scaled_ms < self.max.as_millis() as f64 {
            Duration::from_millis(scaled_ms.round() as u64)
        } else {
            self.max
        }
    }
}
