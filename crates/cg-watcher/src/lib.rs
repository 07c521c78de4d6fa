//! File watcher with per-path debouncing and async event streaming.
//!
//! This crate observes a data directory through the `notify` crate and turns
//! the raw, bursty OS notifications into one [`ChangeEvent`] per path per
//! quiet period.
//!
//! # Overview
//!
//! - Map raw events to `add` / `change` / `unlink` and merge them per path
//! - Debounce each path independently (100ms by default)
//! - Drop non-matching paths before they reach a timer ([`PatternFilter`])
//! - Report backend errors as [`WatchEvent::Diagnostic`] without stopping
//!
//! # Crate Dependencies
//!
//! ```text
//! cg-cli ──► cg-broadcast ──► cg-watcher ──► cg-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use cg_watcher::{FileWatcher, WatchEvent};
//! use cg_core::WatchConfig;
//! use tokio::time::{Duration, interval};
//!
//! # async fn example() -> Result<(), cg_watcher::WatchError> {
//! let mut watcher = FileWatcher::from_config(&WatchConfig::new("./data")).await?;
//! let mut tick = interval(Duration::from_secs(10));
//!
//! loop {
//!     tokio::select! {
//!         Some(event) = watcher.recv() => {
//!             if let WatchEvent::Changed(change) = event {
//!                 println!("{} {}", change.kind, change.path);
//!             }
//!         }
//!         _ = tick.tick() => {
//!             println!("{} paths settling", watcher.pending_count());
//!         }
//!     }
//! }
//! # }
//! ```
//!
//! # Shutdown
//!
//! [`FileWatcher::stop`] cancels every pending per-path timer before it
//! releases the OS watch, so nothing fires after shutdown.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod debounce;
pub mod error;
pub mod events;
pub mod filter;
pub mod watcher;

// Re-export debouncer
pub use debounce::Debouncer;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use events::{ChangeEvent, ChangeKind, WatchEvent};

// Re-export filter types
pub use filter::{AcceptAllFilter, CompositeFilter, ExtensionFilter, FileFilter, PatternFilter};

// Re-export watcher types
pub use watcher::FileWatcher;
