//! Shared building blocks for the cmdgate workspace.
//!
//! Every other crate depends on this one for:
//!
//! - Configuration structures ([`Config`] and the per-component sections)
//! - The [`ConfigError`] type raised while loading or validating them
//! - `FxHashMap`/`FxHashSet` aliases used for the keyed registries
//!   (debounce timers, broadcast subscriptions)
//!
//! # Crate Dependencies
//!
//! ```text
//! cg-cli ──► cg-broadcast ──► cg-watcher ──► cg-core
//!        ├─► cg-channel ───► cg-broadcast
//!        └─► cg-gateway ──────────────────► cg-core
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;

pub use config::{
    BreakerConfig, BroadcastConfig, ChannelConfig, Config, GatewayConfig, WatchConfig,
};
pub use error::ConfigError;
pub use hash::{FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
