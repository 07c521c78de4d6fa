//! Error types for the cg-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while setting up or running a [`FileWatcher`](crate::FileWatcher).
//!
//! Errors raised by the platform backend *after* watching has started are
//! not returned to the caller. They travel down the event stream as
//! [`WatchEvent::Diagnostic`](crate::WatchEvent::Diagnostic) so that one bad
//! path never stops the others.

use camino::Utf8PathBuf;

/// Errors that can occur during file watching operations.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): Fatal at startup; reported as diagnostics afterwards
/// - **Path not found** ([`WatchError::PathNotFound`]): Fatal - the root must exist
/// - **Invalid pattern** ([`WatchError::InvalidPattern`]): Fatal - fix the configuration
/// - **Channel closed** ([`WatchError::ChannelClosed`]): Fatal - communication broken
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): Recoverable - skip and continue
/// - **I/O errors** ([`WatchError::Io`]): Fatal - propagate immediately
///
/// # Examples
///
/// ```
/// use cg_watcher::WatchError;
///
/// fn handle_error(err: WatchError) {
///     if err.is_fatal() {
///         eprintln!("watcher stopped: {err}");
///     } else {
///         eprintln!("skipping: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize or operate the notify watcher.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The watch root does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// A match pattern could not be compiled.
    #[error("invalid watch pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending glob.
        pattern: String,
        /// The underlying glob error.
        #[source]
        source: ignore::Error,
    },

    /// The event channel was closed unexpectedly.
    #[error("event channel closed unexpectedly")]
    ChannelClosed,

    /// A path is not valid UTF-8.
    ///
    /// This crate uses UTF-8 paths throughout. Non-UTF-8 paths seen in raw
    /// events are logged and skipped.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred while resolving the watch root.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Creates a new [`WatchError::InvalidPattern`] error.
    #[inline]
    pub fn invalid_pattern(pattern: impl Into<String>, source: ignore::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }

    /// Returns `true` if this error is recoverable (watching can continue).
    ///
    /// Only non-UTF-8 path errors are recoverable as they can be skipped.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonUtf8Path(_))
    }

    /// Returns `true` if this error is fatal (watching should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) => Some(path),
            Self::Notify(_)
            | Self::InvalidPattern { .. }
            | Self::ChannelClosed
            | Self::NonUtf8Path(_)
            | Self::Io(_) => None,
        }
    }
}
