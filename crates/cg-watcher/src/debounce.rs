//! Per-path trailing-edge debouncing.
//!
//! Every path with pending activity owns exactly one timer task in an
//! arena keyed by path. A new raw event for that path aborts the old timer,
//! merges its kind into the pending one, and schedules a fresh timer
//! `delay` after *this* event. When a timer fires it removes its own entry
//! and emits a single [`ChangeEvent`].
//!
//! Aborting a task only takes effect at its next await point, so a timer
//! that already woke could still be racing for the lock. Each entry carries
//! a generation number; a timer whose generation no longer matches the map
//! does nothing.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cg_core::{FxHashMap, fx_hash_map};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::events::{ChangeEvent, ChangeKind, WatchEvent};

struct PendingTimer {
    generation: u64,
    kind: ChangeKind,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: FxHashMap<Utf8PathBuf, PendingTimer>,
}

/// Collapses bursts of raw events into one [`ChangeEvent`] per path.
///
/// Cloning shares the same timer arena.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    timers: Arc<Mutex<Timers>>,
    output: mpsc::Sender<WatchEvent>,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl Debouncer {
    /// Creates a debouncer that emits onto `output` after `delay` of quiet per path.
    #[must_use]
    pub fn new(delay: Duration, output: mpsc::Sender<WatchEvent>) -> Self {
        Self {
            delay,
            timers: Arc::new(Mutex::new(Timers {
                next_generation: 0,
                pending: fx_hash_map(),
            })),
            output,
        }
    }

    /// Records a raw event for `path`, restarting its timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn observe(&self, path: Utf8PathBuf, kind: ChangeKind) {
        let deadline = Instant::now() + self.delay;
        let mut timers = self.timers.lock();

        let merged = match timers.pending.remove(&path) {
            Some(previous) => {
                previous.handle.abort();
                previous.kind.merge(kind)
            }
            None => kind,
        };

        timers.next_generation += 1;
        let generation = timers.next_generation;

        let handle = tokio::spawn(fire(
            Arc::clone(&self.timers),
            self.output.clone(),
            path.clone(),
            generation,
            deadline,
        ));

        tracing::trace!(path = %path, kind = %merged, "Debounce timer armed");
        timers.pending.insert(
            path,
            PendingTimer {
                generation,
                kind: merged,
                handle,
            },
        );
    }

    /// Aborts every pending timer without emitting. Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingTimer> = {
            let mut timers = self.timers.lock();
            timers.pending.drain().map(|(_, timer)| timer).collect()
        };
        for timer in &drained {
            timer.handle.abort();
        }
        drained.len()
    }

    /// Returns the number of paths with a pending timer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.timers.lock().pending.len()
    }

    /// Returns `true` if `path` has a pending timer.
    #[must_use]
    pub fn is_pending(&self, path: &Utf8Path) -> bool {
        self.timers.lock().pending.contains_key(path)
    }
}

async fn fire(
    timers: Arc<Mutex<Timers>>,
    output: mpsc::Sender<WatchEvent>,
    path: Utf8PathBuf,
    generation: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;

    let kind = {
        let mut timers = timers.lock();
        match timers.pending.get(&path) {
            Some(timer) if timer.generation == generation => {
                timers.pending.remove(&path).map(|timer| timer.kind)
            }
            _ => None,
        }
    };

    if let Some(kind) = kind {
        tracing::debug!(path = %path, kind = %kind, "Emitting debounced change");
        if output
            .send(WatchEvent::Changed(ChangeEvent::new(path, kind)))
            .await
            .is_err()
        {
            tracing::debug!("Event channel closed, dropping change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(100);

    fn debouncer() -> (Debouncer, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Debouncer::new(DELAY, tx), rx)
    }

    fn path(p: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(p)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_event() {
        let (debouncer, mut rx) = debouncer();

        for _ in 0..5 {
            debouncer.observe(path("/data/a.json"), ChangeKind::Change);
            tokio::time::advance(Duration::from_millis(30)).await;
        }
        let last = Instant::now() - Duration::from_millis(30);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            WatchEvent::Changed(ChangeEvent::new(path("/data/a.json"), ChangeKind::Change))
        );
        assert_eq!(Instant::now() - last, DELAY);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_event_fires_after_delay() {
        let (debouncer, mut rx) = debouncer();
        let start = Instant::now();

        debouncer.observe(path("/data/a.json"), ChangeKind::Add);
        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(rx.try_recv().is_err());
        assert!(debouncer.is_pending(Utf8Path::new("/data/a.json")));

        rx.recv().await.unwrap();
        assert_eq!(Instant::now() - start, DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_are_debounced_independently() {
        let (debouncer, mut rx) = debouncer();

        debouncer.observe(path("/data/a"), ChangeKind::Change);
        tokio::time::advance(Duration::from_millis(50)).await;
        debouncer.observe(path("/data/b"), ChangeKind::Change);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.as_change().unwrap().path, "/data/a");
        assert_eq!(second.as_change().unwrap().path, "/data/b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_merged_within_window() {
        let (debouncer, mut rx) = debouncer();

        debouncer.observe(path("/data/new"), ChangeKind::Add);
        debouncer.observe(path("/data/new"), ChangeKind::Change);
        debouncer.observe(path("/data/swapped"), ChangeKind::Unlink);
        debouncer.observe(path("/data/swapped"), ChangeKind::Add);

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort_by(|a, b| a.as_change().unwrap().path.cmp(&b.as_change().unwrap().path));
        assert_eq!(seen[0].as_change().unwrap().kind, ChangeKind::Add);
        assert_eq!(seen[1].as_change().unwrap().kind, ChangeKind::Change);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_leaves_no_timers() {
        let (debouncer, mut rx) = debouncer();

        debouncer.observe(path("/data/a"), ChangeKind::Change);
        debouncer.observe(path("/data/b"), ChangeKind::Change);
        debouncer.observe(path("/data/c"), ChangeKind::Change);
        assert_eq!(debouncer.cancel_all(), 3);
        assert_eq!(debouncer.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
