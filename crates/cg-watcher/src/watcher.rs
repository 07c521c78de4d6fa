//! File watcher with async event streaming.
//!
//! This module provides the [`FileWatcher`] type that bridges the synchronous
//! `notify` watcher to the tokio runtime and debounces per path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │ RecommendedWatcher       │  notify backend thread
//! │ (callback: send raw)     │
//! └────────────┬─────────────┘
//!              │ unbounded mpsc (never blocks the backend)
//!              ▼
//! ┌──────────────────────────┐    ┌──────────────┐
//! │ pump task                │ -> │ Debouncer    │ -> mpsc::Receiver<WatchEvent>
//! │ classify, UTF-8, filter  │    │ (per path)   │
//! └──────────────────────────┘    └──────────────┘
//! ```
//!
//! Backend errors skip the debouncer and go straight out as
//! [`WatchEvent::Diagnostic`].

use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cg_core::WatchConfig;

use crate::debounce::Debouncer;
use crate::error::WatchError;
use crate::events::{WatchEvent, classify};
use crate::filter::{FileFilter, PatternFilter};

/// Default channel capacity for watch events.
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Watches a directory tree and streams debounced [`WatchEvent`]s.
///
/// # Lifecycle
///
/// 1. **Creation**: [`FileWatcher::new`] validates the root, installs the
///    notify watcher, and starts the pump task.
/// 2. **Event Reception**: [`recv`](FileWatcher::recv) yields one event per
///    path per quiet period.
/// 3. **Shutdown**: [`stop`](FileWatcher::stop) halts the pump, cancels every
///    pending timer, and only then releases the notify watcher. Dropping the
///    watcher does the same without waiting for the pump.
///
/// # Examples
///
/// ```no_run
/// use cg_watcher::{FileWatcher, WatchEvent};
/// use cg_core::WatchConfig;
///
/// # async fn example() -> Result<(), cg_watcher::WatchError> {
/// let config = WatchConfig {
///     patterns: vec!["*.json".to_owned()],
///     ..WatchConfig::new("./data")
/// };
/// let mut watcher = FileWatcher::from_config(&config).await?;
///
/// while let Some(event) = watcher.recv().await {
///     match event {
///         WatchEvent::Changed(change) => println!("{} {}", change.kind, change.path),
///         WatchEvent::Diagnostic(message) => eprintln!("watch error: {message}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct FileWatcher {
    /// The notify handle. Dropping it releases the OS watches.
    watcher: Option<RecommendedWatcher>,

    /// Per-path timer arena, shared with the pump.
    debouncer: Debouncer,

    /// Stops the pump task.
    cancel: CancellationToken,

    /// Handle to the pump task.
    pump: Option<JoinHandle<()>>,

    /// Debounced output.
    event_rx: mpsc::Receiver<WatchEvent>,

    /// The canonical root being watched.
    watch_path: Utf8PathBuf,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watch_path", &self.watch_path)
            .field("is_running", &self.is_running())
            .field("pending", &self.debouncer.pending_count())
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Starts watching `config.root`, keeping paths that pass `filter`.
    ///
    /// `config.patterns` is not consulted here; see
    /// [`from_config`](Self::from_config).
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if the root doesn't exist, or
    /// [`WatchError::Notify`] if the backend fails to initialize.
    #[allow(clippy::unused_async)] // Async to guarantee a runtime for the pump task
    pub async fn new<F: FileFilter>(config: &WatchConfig, filter: F) -> Result<Self, WatchError> {
        Self::with_capacity(config, filter, DEFAULT_CHANNEL_CAPACITY).await
    }

    /// Starts watching with a [`PatternFilter`] built from `config.patterns`.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new), plus [`WatchError::InvalidPattern`].
    pub async fn from_config(config: &WatchConfig) -> Result<Self, WatchError> {
        let root = resolve_root(&config.root)?;
        let filter = PatternFilter::new(&root, &config.patterns)?;
        Self::new(config, filter).await
    }

    /// Creates a file watcher with a custom output channel capacity.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    #[allow(clippy::unused_async)] // Async to guarantee a runtime for the pump task
    pub async fn with_capacity<F: FileFilter>(
        config: &WatchConfig,
        filter: F,
        channel_capacity: usize,
    ) -> Result<Self, WatchError> {
        let watch_path = resolve_root(&config.root)?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(channel_capacity);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // A closed receiver means the watcher is shutting down.
            let _ = raw_tx.send(res);
        })?;

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(watch_path.as_std_path(), mode)?;

        let debouncer = Debouncer::new(config.debounce(), event_tx.clone());
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            raw_rx,
            debouncer.clone(),
            event_tx,
            filter,
            cancel.clone(),
        ));

        tracing::info!(
            path = %watch_path,
            recursive = config.recursive,
            debounce_ms = config.debounce_ms,
            "File watcher started"
        );

        Ok(Self {
            watcher: Some(watcher),
            debouncer,
            cancel,
            pump: Some(pump),
            event_rx,
            watch_path,
        })
    }

    /// Receives the next event. Returns `None` once the watcher is stopped.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Tries to receive an event without waiting.
    ///
    /// # Errors
    ///
    /// `TryRecvError::Empty` if nothing is ready, `Disconnected` once stopped.
    pub fn try_recv(&mut self) -> Result<WatchEvent, mpsc::error::TryRecvError> {
        self.event_rx.try_recv()
    }

    /// Returns a mutable reference to the event receiver, for `tokio::select!`.
    pub fn events(&mut self) -> &mut mpsc::Receiver<WatchEvent> {
        &mut self.event_rx
    }

    /// Returns the canonical root being watched.
    #[must_use]
    pub fn watch_path(&self) -> &Utf8Path {
        &self.watch_path
    }

    /// Returns the number of paths waiting out their debounce window.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.debouncer.pending_count()
    }

    /// Returns `true` until [`stop`](Self::stop) is called or the pump exits.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.pump.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops watching.
    ///
    /// Pending timers are cancelled before the notify watcher is released, so
    /// no debounced event is emitted after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelClosed`] if the pump task panicked.
    pub async fn stop(mut self) -> Result<(), WatchError> {
        self.cancel.cancel();
        let pump_result = match self.pump.take() {
            Some(handle) => handle.await.map_err(|_join_error| WatchError::ChannelClosed),
            None => Ok(()),
        };

        let cancelled = self.debouncer.cancel_all();
        self.watcher.take();
        self.event_rx.close();

        tracing::info!(path = %self.watch_path, cancelled_timers = cancelled, "File watcher stopped");
        pump_result
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.debouncer.cancel_all();
        self.watcher.take();
    }
}

fn resolve_root(root: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
    if !root.exists() {
        return Err(WatchError::path_not_found(root));
    }
    root.canonicalize_utf8().map_err(WatchError::Io)
}

async fn run_pump<F: FileFilter>(
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    debouncer: Debouncer,
    diagnostics: mpsc::Sender<WatchEvent>,
    filter: F,
    cancel: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            () = cancel.cancelled() => break,
            raw = raw_rx.recv() => raw,
        };

        match raw {
            Some(Ok(event)) => {
                for (path, kind) in classify(&event) {
                    let path = match Utf8PathBuf::try_from(path) {
                        Ok(path) => path,
                        Err(e) => {
                            let err = WatchError::non_utf8_path(e.into_path_buf());
                            tracing::warn!(error = %err, "Skipping file event");
                            continue;
                        }
                    };

                    if !filter.should_process(&path) {
                        tracing::trace!(path = %path, "Filtered out file event");
                        continue;
                    }
                    debouncer.observe(path, kind);
                }
            }
            Some(Err(error)) => {
                tracing::warn!(error = %error, paths = ?error.paths, "Watch backend error");
                let message = WatchError::Notify(error).to_string();
                if diagnostics.send(WatchEvent::Diagnostic(message)).await.is_err() {
                    break;
                }
            }
            None => break,
        }
    }
    tracing::debug!("Watch pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeKind;
    use crate::filter::AcceptAllFilter;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> WatchConfig {
        WatchConfig {
            debounce_ms: 50,
            ..WatchConfig::new(Utf8Path::from_path(dir.path()).unwrap())
        }
    }

    /// Waits for the first change whose file name is `name`.
    async fn next_change_for(watcher: &mut FileWatcher, name: &str) -> Option<ChangeKind> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = watcher.recv().await {
                if let WatchEvent::Changed(change) = event {
                    if change.file_name() == Some(name) {
                        return Some(change.kind);
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    #[tokio::test]
    async fn test_watcher_creation() {
        let dir = TempDir::new().unwrap();
        let watcher = FileWatcher::new(&config(&dir), AcceptAllFilter).await.unwrap();

        assert!(watcher.is_running());
        assert!(!watcher.watch_path().as_str().is_empty());
    }

    #[tokio::test]
    async fn test_watcher_path_not_found() {
        let config = WatchConfig::new("/nonexistent/path/that/does/not/exist");
        let result = FileWatcher::new(&config, AcceptAllFilter).await;

        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_from_config_rejects_bad_pattern() {
        let dir = TempDir::new().unwrap();
        let config = WatchConfig {
            patterns: vec!["a[".to_owned()],
            ..config(&dir)
        };

        let result = FileWatcher::from_config(&config).await;
        assert!(matches!(result, Err(WatchError::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn test_new_file_is_reported_once() {
        let dir = TempDir::new().unwrap();
        let mut watcher = FileWatcher::new(&config(&dir), AcceptAllFilter).await.unwrap();

        let file = dir.path().join("orders.json");
        fs::write(&file, "{}").unwrap();
        fs::write(&file, "{\"a\":1}").unwrap();

        let kind = next_change_for(&mut watcher, "orders.json").await;
        assert!(matches!(kind, Some(ChangeKind::Add | ChangeKind::Change)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let repeated = std::iter::from_fn(|| watcher.try_recv().ok())
            .filter_map(|event| event.as_change().cloned())
            .any(|change| change.file_name() == Some("orders.json"));
        assert!(!repeated);

        watcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_removed_file_is_unlink() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.json");
        fs::write(&file, "{}").unwrap();

        let mut watcher = FileWatcher::new(&config(&dir), AcceptAllFilter).await.unwrap();
        fs::remove_file(&file).unwrap();

        assert_eq!(next_change_for(&mut watcher, "gone.json").await, Some(ChangeKind::Unlink));
        watcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_patterns_filter_events() {
        let dir = TempDir::new().unwrap();
        let config = WatchConfig {
            patterns: vec!["*.json".to_owned()],
            ..config(&dir)
        };
        let mut watcher = FileWatcher::from_config(&config).await.unwrap();

        fs::write(dir.path().join("skip.txt"), "x").unwrap();
        fs::write(dir.path().join("keep.json"), "{}").unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_change().unwrap().file_name(), Some("keep.json"));
        watcher.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_is_diagnostic_and_watching_continues() {
        use notify::EventKind;
        use notify::event::CreateKind;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let debouncer = Debouncer::new(Duration::from_millis(50), event_tx.clone());
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            raw_rx,
            debouncer,
            event_tx,
            AcceptAllFilter,
            cancel.clone(),
        ));

        let overflow = notify::Error::generic("event queue overflow").add_path("/data/lost".into());
        raw_tx.send(Err(overflow)).unwrap();
        let created = notify::Event::new(EventKind::Create(CreateKind::File)).add_path("/data/after.json".into());
        raw_tx.send(Ok(created)).unwrap();

        let WatchEvent::Diagnostic(message) = event_rx.recv().await.unwrap() else {
            unreachable!()
        };
        assert!(message.contains("event queue overflow"), "{message}");

        let change = event_rx.recv().await.unwrap();
        let change = change.as_change().unwrap();
        assert_eq!(change.path, "/data/after.json");
        assert_eq!(change.kind, ChangeKind::Add);

        cancel.cancel();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_timers() {
        let dir = TempDir::new().unwrap();
        let config = WatchConfig {
            debounce_ms: 60_000,
            ..config(&dir)
        };
        let watcher = FileWatcher::new(&config, AcceptAllFilter).await.unwrap();
        let debouncer = watcher.debouncer.clone();

        fs::write(dir.path().join("pending.json"), "{}").unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while debouncer.pending_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        watcher.stop().await.unwrap();
        assert_eq!(debouncer.pending_count(), 0);
    }
}
