//! Resilient gateway for running external commands.
//!
//! Every call to an external command-line data store goes through a
//! [`CommandGateway`], which protects the host process from a slow, hung, or
//! failing dependency.
//!
//! # Overview
//!
//! - **Circuit breaker**: after `threshold` consecutive execution failures the
//!   circuit opens and calls fail fast with [`GatewayError::CircuitOpen`];
//!   after the cool-down a single trial call decides whether it closes again
//! - **Concurrency cap**: at most `maxConcurrent` processes run at once
//! - **FIFO queue**: excess calls wait in submission order and can be flushed
//!   with [`CommandGateway::clear_queue`]
//! - **Timeouts**: processes that outlive `timeoutMs` are killed
//!
//! # Crate Dependencies
//!
//! ```text
//! cg-cli ──► cg-gateway ──► cg-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use cg_core::GatewayConfig;
//! use cg_gateway::{CommandGateway, GatewayError};
//!
//! # async fn example() -> Result<(), GatewayError> {
//! let gateway = CommandGateway::new(GatewayConfig::default());
//!
//! match gateway.execute("store", ["get", "key"]).await {
//!     Ok(result) => println!("exit {}: {}", result.exit_code, result.stdout),
//!     Err(GatewayError::CircuitOpen { remaining }) => {
//!         eprintln!("store unavailable, retry in {remaining:?}");
//!     }
//!     Err(err) => return Err(err),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Observability
//!
//! The gateway logs through `tracing` and publishes [`GatewayEvent`]s on a
//! broadcast channel. [`CommandGateway::stats`] returns a [`GatewayStats`]
//! snapshot at any time.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod breaker;
pub mod error;
pub mod events;
pub mod gateway;
pub mod request;
pub mod runner;
pub mod stats;

// Re-export breaker types
pub use breaker::{Admission, CircuitBreaker, CircuitState, Rejected, Transition};

// Re-export error types
pub use error::GatewayError;

// Re-export event types
pub use events::GatewayEvent;

// Re-export gateway types
pub use gateway::CommandGateway;
pub use request::{CommandRequest, CommandResult, RequestId};
pub use runner::{CommandRunner, ProcessRunner, RunLimits};
pub use stats::{GatewayCounters, GatewayStats};
