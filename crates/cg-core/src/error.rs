//! Error types for the cg-core crate.
//!
//! [`ConfigError`] covers the three ways a configuration file can be
//! unusable: it cannot be read, it is not the right JSON shape, or a value
//! is out of range for the runtime.

use camino::{Utf8Path, Utf8PathBuf};

/// Errors that can occur during configuration loading and validation.
///
/// # Examples
///
/// ```
/// use cg_core::ConfigError;
///
/// let error = ConfigError::invalid_option("gateway.maxConcurrent", "must be at least 1");
/// assert_eq!(error.option(), Some("gateway.maxConcurrent"));
/// assert!(error.path().is_none());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// The file that was requested.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for [`Config`](crate::Config).
    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        /// The file being parsed.
        path: Utf8PathBuf,
        /// The underlying JSON error, with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration option has a value the runtime cannot honor.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// Dotted JSON name of the option, e.g. `channel.pongTimeoutMs`.
        option: String,
        /// What the value must satisfy.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a new [`ConfigError::Read`] error.
    pub fn read(path: impl AsRef<Utf8Path>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.as_ref().to_owned(),
            source,
        }
    }

    /// Creates a new [`ConfigError::Parse`] error.
    pub fn parse(path: impl AsRef<Utf8Path>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.as_ref().to_owned(),
            source,
        }
    }

    /// Creates a new [`ConfigError::InvalidOption`] error.
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Returns the option name for [`ConfigError::InvalidOption`].
    #[must_use]
    pub fn option(&self) -> Option<&str> {
        match self {
            Self::InvalidOption { option, .. } => Some(option),
            Self::Read { .. } | Self::Parse { .. } => None,
        }
    }

    /// Returns the file involved, if the error came from loading one.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::InvalidOption { .. } => None,
        }
    }
}
