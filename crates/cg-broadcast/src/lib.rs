//! WebSocket fan-out of debounced file changes.
//!
//! This crate takes [`ChangeEvent`](cg_watcher::ChangeEvent)s from a
//! [`FileWatcher`](cg_watcher::FileWatcher) and pushes them to every
//! connected client as JSON envelopes.
//!
//! # Overview
//!
//! - [`ChangeBroadcaster`] holds the subscriber set and publishes without blocking
//! - [`BroadcastServer`] serves the axum WebSocket endpoint
//! - [`protocol`] defines the `{type, payload, timestamp}` frames both sides speak
//!
//! # Crate Dependencies
//!
//! ```text
//! cg-cli ──► cg-broadcast ──► cg-watcher ──► cg-core
//!   │             ▲
//!   └──► cg-channel (speaks the protocol defined here)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use cg_broadcast::{BroadcastServer, ChangeBroadcaster};
//! use cg_core::{BroadcastConfig, WatchConfig};
//! use cg_watcher::FileWatcher;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BroadcastConfig::default();
//! let broadcaster = ChangeBroadcaster::new(config.outbound_buffer);
//! let server = BroadcastServer::bind(broadcaster.clone(), &config).await?;
//!
//! let mut watcher = FileWatcher::from_config(&WatchConfig::new("./data")).await?;
//! broadcaster.pump(&mut watcher, CancellationToken::new()).await;
//!
//! watcher.stop().await?;
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod broadcaster;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export broadcaster types
pub use broadcaster::{ChangeBroadcaster, DEFAULT_OUTBOUND_BUFFER, DeliveryReport, Subscription};

// Re-export error types
pub use error::BroadcastError;

// Re-export protocol types
pub use protocol::{
    ChangeMessage, ClientMessage, DEFAULT_TOPIC, Envelope, INVALID_MESSAGE, ServerMessage,
};

// Re-export server types
pub use server::{BroadcastServer, router};
