//! The command gateway.
//!
//! [`CommandGateway`] is the single entry point for running external
//! commands. Each call passes through three gates:
//!
//! ```text
//! execute() ──► CircuitBreaker ──► concurrency slot ──► CommandRunner
//!                  │ open              │ full
//!                  ▼                   ▼
//!            CircuitOpen          FIFO queue ──(slot freed)──► CommandRunner
//! ```
//!
//! # Synchronization
//!
//! Breaker state, the active count, and the queue live together behind one
//! [`parking_lot::Mutex`]. Admission (breaker check, half-open promotion,
//! slot reservation or enqueue) and completion (outcome recording, slot
//! hand-off) are each one critical section, so two callers can never both
//! become the half-open trial. The lock is never held across an `.await`.
//!
//! # Cancellation
//!
//! Dropping an `execute()` future is always safe:
//!
//! - while queued, the entry is withdrawn and never starts;
//! - while running, the child process is killed (`kill_on_drop`) and the slot
//!   passes to the next queued request.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cg_core::GatewayConfig;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::breaker::{Admission, CircuitBreaker, CircuitState, Transition};
use crate::error::GatewayError;
use crate::events::{EVENT_CHANNEL_CAPACITY, GatewayEvent};
use crate::request::{CommandRequest, CommandResult, RequestId};
use crate::runner::{CommandRunner, ProcessRunner, RunLimits};
use crate::stats::{GatewayCounters, GatewayStats};

/// Resilient front door for an external command-line data store.
///
/// Cloning is cheap and every clone shares the same breaker, slots, and
/// queue. Construct one per external dependency and hand clones to the
/// code that needs it.
///
/// # Examples
///
/// ```no_run
/// use cg_core::GatewayConfig;
/// use cg_gateway::{CommandGateway, GatewayError};
///
/// # async fn example() -> Result<(), GatewayError> {
/// let gateway = CommandGateway::new(GatewayConfig::default());
///
/// let result = gateway.execute("git", ["status", "--short"]).await?;
/// if result.exit_code != 0 {
///     eprintln!("git reported: {}", result.stderr);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CommandGateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

struct Inner {
    config: GatewayConfig,
    runner: Arc<dyn CommandRunner>,
    shared: Mutex<Shared>,
    counters: GatewayCounters,
    events: broadcast::Sender<GatewayEvent>,
    next_id: AtomicU64,
}

/// State guarded by the gateway mutex.
struct Shared {
    breaker: CircuitBreaker,
    active: usize,
    queue: VecDeque<QueueEntry>,
}

/// A request waiting for a concurrency slot.
struct QueueEntry {
    id: RequestId,
    admission: Admission,
    enqueued_at: Instant,
    grant: oneshot::Sender<Result<(), GatewayError>>,
}

enum Grant {
    Immediate(Admission),
    Queued(QueueTicket),
}

impl CommandGateway {
    /// Creates a gateway that runs commands as OS processes.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_runner(config, ProcessRunner)
    }

    /// Creates a gateway with a custom [`CommandRunner`].
    #[must_use]
    pub fn with_runner(config: GatewayConfig, runner: impl CommandRunner) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    breaker: CircuitBreaker::new(config.circuit_breaker),
                    active: 0,
                    queue: VecDeque::new(),
                }),
                config,
                runner: Arc::new(runner),
                counters: GatewayCounters::new(),
                events,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the gateway configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Runs `command` with `args` and returns its process-level outcome.
    ///
    /// A process that exits with any code, including non-zero, resolves to
    /// `Ok`. The breaker counts it as a success.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::CircuitOpen`] if the breaker rejects the call; nothing is spawned
    /// - [`GatewayError::QueueCleared`] if [`clear_queue`](Self::clear_queue) discards it while queued
    /// - [`GatewayError::Spawn`], [`GatewayError::Timeout`], [`GatewayError::Killed`],
    ///   [`GatewayError::Io`] if execution fails; these count toward opening the circuit
    pub async fn execute<I, S>(
        &self,
        command: impl Into<String>,
        args: I,
    ) -> Result<CommandResult, GatewayError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = RequestId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.run_request(CommandRequest::new(id, command, args)).await
    }

    /// Runs a prepared request. See [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn run_request(&self, request: CommandRequest) -> Result<CommandResult, GatewayError> {
        let inner = &self.inner;
        inner.counters.increment_submitted();
        inner.emit(GatewayEvent::Submitted {
            id: request.id,
            command: request.command.clone(),
        });

        let submitted_at = Instant::now();
        let admission = match inner.admit(request.id) {
            Ok(Grant::Immediate(admission)) => admission,
            Ok(Grant::Queued(mut ticket)) => {
                if let Err(error) = ticket.wait().await {
                    inner.reject(request.id, &error);
                    return Err(error);
                }
                ticket.admission
            }
            Err(error) => {
                inner.reject(request.id, &error);
                return Err(error);
            }
        };

        let slot = ActiveSlot {
            inner: Arc::clone(inner),
            admission,
            settled: false,
        };

        inner.emit(GatewayEvent::Started {
            id: request.id,
            waited: submitted_at.elapsed(),
        });
        let trial = admission == Admission::Trial;
        tracing::debug!(id = %request.id, command = %request, trial, "Executing command");

        let limits = RunLimits {
            timeout: inner.config.timeout(),
            max_output_bytes: inner.config.max_output_bytes,
        };
        let outcome = inner.runner.run(&request, limits).await;
        slot.settle(request.id, &outcome);
        outcome
    }

    /// Rejects every queued request with [`GatewayError::QueueCleared`].
    ///
    /// Running executions are unaffected. Returns the number discarded.
    pub fn clear_queue(&self) -> usize {
        let inner = &self.inner;
        let mut shared = inner.shared.lock();
        let drained: Vec<QueueEntry> = shared.queue.drain(..).collect();
        let count = drained.len();

        for entry in drained {
            if entry.admission == Admission::Trial {
                let transition = shared.breaker.abandon_trial();
                inner.emit_transition(transition);
            }
            // A dropped receiver already withdrew; nothing to notify.
            let _ = entry.grant.send(Err(GatewayError::QueueCleared));
        }

        if count > 0 {
            tracing::info!(discarded = count, "Cleared command queue");
            inner.emit(GatewayEvent::QueueDepthChanged { depth: 0 });
        }
        count
    }

    /// Forces the circuit closed and zeroes its failure counter.
    pub fn reset_circuit(&self) {
        let mut shared = self.inner.shared.lock();
        let transition = shared.breaker.reset();
        if transition.is_some() {
            tracing::info!("Circuit breaker manually reset");
        }
        self.inner.emit_transition(transition);
    }

    /// Returns the current breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.inner.shared.lock().breaker.state()
    }

    /// Returns a snapshot of breaker, slot, queue, and counter state.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        let (state, failures, active, queued) = {
            let shared = self.inner.shared.lock();
            (
                shared.breaker.state(),
                shared.breaker.failure_count(),
                shared.active,
                shared.queue.len(),
            )
        };
        let (submitted, completed, failed, rejected) = self.inner.counters.load();
        GatewayStats {
            state,
            failures,
            active,
            queued,
            submitted,
            completed,
            failed,
            rejected,
        }
    }

    /// Subscribes to lifecycle notifications.
    ///
    /// Only events published after this call are received.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    /// Breaker check plus slot reservation, as one critical section.
    fn admit(self: &Arc<Self>, id: RequestId) -> Result<Grant, GatewayError> {
        let mut shared = self.shared.lock();

        let (admission, transition) = shared
            .breaker
            .try_acquire(now())
            .map_err(|rejected| GatewayError::CircuitOpen {
                remaining: rejected.remaining,
            })?;
        if transition.is_some() {
            tracing::info!(id = %id, "Circuit half-open, admitting trial call");
        }
        self.emit_transition(transition);

        if shared.active < self.config.max_concurrent {
            shared.active += 1;
            return Ok(Grant::Immediate(admission));
        }

        let (grant, receiver) = oneshot::channel();
        shared.queue.push_back(QueueEntry {
            id,
            admission,
            enqueued_at: Instant::now(),
            grant,
        });
        let depth = shared.queue.len();
        tracing::debug!(id = %id, depth, "All slots busy, request queued");
        self.emit(GatewayEvent::QueueDepthChanged { depth });

        Ok(Grant::Queued(QueueTicket {
            inner: Arc::clone(self),
            id,
            admission,
            receiver: Some(receiver),
        }))
    }

    /// Frees one slot, handing it straight to the oldest live queued entry.
    fn release_slot(&self, shared: &mut Shared) {
        while let Some(entry) = shared.queue.pop_front() {
            let depth = shared.queue.len();
            let waited = entry.enqueued_at.elapsed();
            if entry.grant.send(Ok(())).is_ok() {
                tracing::trace!(id = %entry.id, waited_ms = waited.as_millis(), "Dequeued request");
                self.emit(GatewayEvent::QueueDepthChanged { depth });
                return;
            }
            if entry.admission == Admission::Trial {
                let transition = shared.breaker.abandon_trial();
                self.emit_transition(transition);
            }
            self.emit(GatewayEvent::QueueDepthChanged { depth });
        }
        shared.active = shared.active.saturating_sub(1);
    }

    /// Removes a queued entry whose caller went away.
    fn withdraw(&self, id: RequestId) {
        let mut shared = self.shared.lock();
        let Some(position) = shared.queue.iter().position(|entry| entry.id == id) else {
            return;
        };
        if let Some(entry) = shared.queue.remove(position) {
            if entry.admission == Admission::Trial {
                let transition = shared.breaker.abandon_trial();
                self.emit_transition(transition);
            }
            tracing::debug!(id = %id, "Queued request cancelled by caller");
            self.emit(GatewayEvent::QueueDepthChanged {
                depth: shared.queue.len(),
            });
        }
    }

    fn reject(&self, id: RequestId, error: &GatewayError) {
        self.counters.increment_rejected();
        tracing::debug!(id = %id, error = %error, "Request rejected");
        self.emit(GatewayEvent::Failed {
            id,
            reason: error.to_string(),
            counted: false,
        });
    }

    fn emit(&self, event: GatewayEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_transition(&self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            self.emit(GatewayEvent::CircuitStateChanged { from, to });
        }
    }
}

/// A reserved concurrency slot. Dropping it unsettled releases the slot.
struct ActiveSlot {
    inner: Arc<Inner>,
    admission: Admission,
    settled: bool,
}

impl ActiveSlot {
    fn settle(mut self, id: RequestId, outcome: &Result<CommandResult, GatewayError>) {
        let inner = Arc::clone(&self.inner);
        let mut shared = inner.shared.lock();

        let transition = match outcome {
            Ok(result) => {
                inner.counters.increment_completed();
                inner.emit(GatewayEvent::Completed {
                    id,
                    exit_code: result.exit_code,
                    duration_ms: result.duration_ms,
                });
                shared.breaker.on_success(self.admission)
            }
            Err(error) => {
                let counted = error.counts_as_failure();
                inner.counters.increment_failed();
                inner.emit(GatewayEvent::Failed {
                    id,
                    reason: error.to_string(),
                    counted,
                });
                let transition = if counted {
                    shared.breaker.on_failure(self.admission, now())
                } else {
                    None
                };
                tracing::warn!(id = %id, error = %error, failures = shared.breaker.failure_count(), "Command execution failed");
                transition
            }
        };

        if let Some(Transition { from, to }) = transition {
            if to == CircuitState::Open {
                tracing::warn!(%from, %to, "Circuit breaker opened");
            } else {
                tracing::info!(%from, %to, "Circuit breaker state changed");
            }
        }
        inner.emit_transition(transition);
        inner.release_slot(&mut shared);
        self.settled = true;
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut shared = self.inner.shared.lock();
        if self.admission == Admission::Trial {
            let transition = shared.breaker.abandon_trial();
            self.inner.emit_transition(transition);
        }
        self.inner.release_slot(&mut shared);
    }
}

/// A caller's place in the queue.
struct QueueTicket {
    inner: Arc<Inner>,
    id: RequestId,
    admission: Admission,
    receiver: Option<oneshot::Receiver<Result<(), GatewayError>>>,
}

impl QueueTicket {
    /// Waits until a slot is handed over or the queue is cleared.
    async fn wait(&mut self) -> Result<(), GatewayError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(GatewayError::QueueCleared);
        };
        let granted = receiver.await;
        self.receiver = None;
        granted.unwrap_or(Err(GatewayError::QueueCleared))
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        // After close() no grant can arrive, so the entry is either still
        // queued or its grant is already sitting in the receiver.
        receiver.close();
        if let Ok(Ok(())) = receiver.try_recv() {
            let mut shared = self.inner.shared.lock();
            if self.admission == Admission::Trial {
                let transition = shared.breaker.abandon_trial();
                self.inner.emit_transition(transition);
            }
            self.inner.release_slot(&mut shared);
        } else {
            self.inner.withdraw(self.id);
        }
    }
}

/// Breaker clock. Follows tokio's clock so paused-time tests can drive it.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
