//! Reconnecting consumer for the change broadcast.
//!
//! [`ReconnectingChannel`] keeps a WebSocket open to a broadcast server and
//! turns everything that happens on it into an ordered stream of
//! [`ChannelEvent`]s. Transport failures never surface as errors to the
//! consumer; they restart the connection cycle and show up as
//! [`ChannelEvent::Diagnostic`].
//!
//! # Overview
//!
//! - States: `Connecting` → `Open` → back to `Connecting` on failure, `Closed` only on request
//! - Reconnect delays from [`Backoff`]: exponential, capped, jittered, never decreasing
//! - [`Heartbeat`] pings while open and forces a reconnect on a missing pong
//! - Desired topics are re-sent after every handshake
//!
//! # Usage
//!
//! ```no_run
//! use cg_channel::{ChannelEvent, ChannelState, ReconnectingChannel};
//! use cg_core::ChannelConfig;
//!
//! # async fn example() {
//! let mut channel = ReconnectingChannel::connect(ChannelConfig::default()).await;
//!
//! while let Some(event) = channel.recv().await {
//!     match event {
//!         ChannelEvent::Change(change) => println!("{} {}", change.kind, change.path),
//!         ChannelEvent::StateChanged(ChannelState::Open) => println!("connected"),
//!         ChannelEvent::Diagnostic(message) => eprintln!("{message}"),
//!         _ => {}
//!     }
//! }
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod backoff;
pub mod channel;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod state;

// Re-export channel types
pub use backoff::Backoff;
pub use channel::ReconnectingChannel;
pub use heartbeat::{Beat, Heartbeat};
pub use state::ChannelState;

// Re-export event and error types
pub use error::ConnectionError;
pub use events::ChannelEvent;
