//! Configuration structures for cmdgate.
//!
//! This module provides configuration types for every component:
//!
//! - [`GatewayConfig`] - Command gateway settings (timeout, concurrency, breaker)
//! - [`WatchConfig`] - File watcher settings (root, patterns, debouncing)
//! - [`BroadcastConfig`] - WebSocket broadcaster settings (bind address, idle eviction)
//! - [`ChannelConfig`] - Reconnecting client settings (heartbeat, backoff)
//! - [`Config`] - Root configuration combining all settings
//!
//! All types implement [`Default`] and deserialize with `#[serde(default)]`,
//! so a configuration file only needs to name the values it changes.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Circuit breaker thresholds for the command gateway.
///
/// # Examples
///
/// ```
/// use cg_core::BreakerConfig;
///
/// let config = BreakerConfig::default();
/// assert_eq!(config.threshold, 5);
/// assert_eq!(config.reset_timeout_ms, 60_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Consecutive execution failures that open the circuit.
    pub threshold: u32,

    /// Cool-down after the last failure before a half-open trial is allowed.
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    /// Returns the cool-down as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

/// Configuration for the command gateway.
///
/// # Examples
///
/// ```
/// use cg_core::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.timeout_ms, 30_000);
/// assert_eq!(config.max_concurrent, 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Per-call timeout in milliseconds. The process is killed when it elapses.
    pub timeout_ms: u64,

    /// Maximum number of processes running at once.
    pub max_concurrent: usize,

    /// Cap on buffered bytes per output stream (stdout and stderr separately).
    pub max_output_bytes: usize,

    /// Circuit breaker thresholds.
    pub circuit_breaker: BreakerConfig,
}

impl GatewayConfig {
    /// Returns the per-call timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_concurrent: 5,
            max_output_bytes: 10 * 1024 * 1024,
            circuit_breaker: BreakerConfig::default(),
        }
    }
}

/// Configuration for the file watcher.
///
/// # Examples
///
/// ```
/// use cg_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.debounce_ms, 100);
/// assert!(config.recursive);
/// assert!(config.patterns.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchConfig {
    /// Directory to watch.
    pub root: Utf8PathBuf,

    /// Glob patterns, relative to `root`, selecting the paths to report.
    ///
    /// Empty means every path under the root.
    pub patterns: Vec<String>,

    /// Quiet period per path before its change event is emitted.
    pub debounce_ms: u64,

    /// Whether to watch subdirectories recursively.
    pub recursive: bool,
}

impl WatchConfig {
    /// Creates a watch configuration for `root` with default settings.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Returns the debounce window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            patterns: Vec::new(),
            debounce_ms: 100,
            recursive: true,
        }
    }
}

/// Configuration for the change broadcaster and its WebSocket endpoint.
///
/// # Examples
///
/// ```
/// use cg_core::BroadcastConfig;
///
/// let config = BroadcastConfig::default();
/// assert_eq!(config.path, "/ws");
/// assert_eq!(config.client_idle_timeout_ms, 60_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BroadcastConfig {
    /// Socket address the server binds to.
    pub bind: String,

    /// HTTP path that upgrades to the WebSocket protocol.
    pub path: String,

    /// Clients that send no ping for this long are dropped.
    pub client_idle_timeout_ms: u64,

    /// Per-client outbound queue length. A full queue drops the message for
    /// that client only.
    pub outbound_buffer: usize,
}

impl BroadcastConfig {
    /// Returns the idle eviction window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn client_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.client_idle_timeout_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4455".to_owned(),
            path: "/ws".to_owned(),
            client_idle_timeout_ms: 60_000,
            outbound_buffer: 256,
        }
    }
}

/// Configuration for the reconnecting consumer channel.
///
/// # Examples
///
/// ```
/// use cg_core::ChannelConfig;
///
/// let config = ChannelConfig::default();
/// assert_eq!(config.ping_interval_ms, 30_000);
/// assert_eq!(config.pong_timeout_ms, 5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    /// WebSocket URL of the broadcaster.
    pub url: String,

    /// Topics to subscribe to after each handshake. Empty means all topics.
    pub topics: Vec<String>,

    /// Interval between heartbeat pings while open.
    pub ping_interval_ms: u64,

    /// Grace window for the pong answering a ping.
    pub pong_timeout_ms: u64,

    /// Limit on dialing plus the WebSocket upgrade for one attempt.
    pub connect_timeout_ms: u64,

    /// Delay before the first reconnect attempt.
    pub initial_backoff_ms: u64,

    /// Upper bound on the reconnect delay, before jitter.
    pub max_backoff_ms: u64,

    /// Growth factor applied per consecutive failed attempt.
    pub backoff_multiplier: f64,

    /// Maximum random jitter as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl ChannelConfig {
    /// Creates a channel configuration for `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Returns the heartbeat interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Returns the pong grace window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Returns the per-attempt dial limit as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4455/ws".to_owned(),
            topics: Vec::new(),
            ping_interval_ms: 30_000,
            pong_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.25,
        }
    }
}

/// Root configuration for cmdgate.
///
/// # Examples
///
/// ```
/// use cg_core::Config;
///
/// let config = Config::default();
/// assert!(config.validate().is_ok());
///
/// let json = serde_json::to_string_pretty(&config).unwrap();
/// assert!(json.contains("maxConcurrent"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command gateway configuration.
    pub gateway: GatewayConfig,

    /// File watcher configuration.
    pub watch: WatchConfig,

    /// Broadcaster configuration.
    pub broadcast: BroadcastConfig,

    /// Consumer channel configuration.
    pub channel: ChannelConfig,
}

impl Config {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON for this structure, and
    /// [`ConfigError::InvalidOption`] if a value fails validation.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::parse(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section for values the runtime cannot honor.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidOption`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gateway = &self.gateway;
        if gateway.max_concurrent == 0 {
            return Err(ConfigError::invalid_option(
                "gateway.maxConcurrent",
                "must be at least 1",
            ));
        }
        if gateway.timeout_ms == 0 {
            return Err(ConfigError::invalid_option(
                "gateway.timeoutMs",
                "must be positive",
            ));
        }
        if gateway.circuit_breaker.threshold == 0 {
            return Err(ConfigError::invalid_option(
                "gateway.circuitBreaker.threshold",
                "must be at least 1",
            ));
        }

        if self.watch.debounce_ms == 0 {
            return Err(ConfigError::invalid_option(
                "watch.debounceMs",
                "must be positive",
            ));
        }

        if self.broadcast.outbound_buffer == 0 {
            return Err(ConfigError::invalid_option(
                "broadcast.outboundBuffer",
                "must be at least 1",
            ));
        }

        let channel = &self.channel;
        if channel.ping_interval_ms == 0 {
            return Err(ConfigError::invalid_option(
                "channel.pingIntervalMs",
                "must be positive",
            ));
        }
        if channel.pong_timeout_ms >= channel.ping_interval_ms {
            return Err(ConfigError::invalid_option(
                "channel.pongTimeoutMs",
                "must be shorter than the ping interval",
            ));
        }
        if channel.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid_option(
                "channel.connectTimeoutMs",
                "must be positive",
            ));
        }
        if channel.initial_backoff_ms > channel.max_backoff_ms {
            return Err(ConfigError::invalid_option(
                "channel.initialBackoffMs",
                "must not exceed maxBackoffMs",
            ));
        }
        if channel.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid_option(
                "channel.backoffMultiplier",
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&channel.jitter_ratio) {
            return Err(ConfigError::invalid_option(
                "channel.jitterRatio",
                "must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.circuit_breaker.threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_watch_config_defaults() {
        let config = WatchConfig::new("/srv/store");
        assert_eq!(config.root.as_str(), "/srv/store");
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert!(config.recursive);
    }

    #[test]
    fn test_channel_config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.pong_timeout(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.topics.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let json = r#"{"gateway": {"maxConcurrent": 2, "circuitBreaker": {"threshold": 3}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.gateway.max_concurrent, 2);
        assert_eq!(config.gateway.circuit_breaker.threshold, 3);
        assert_eq!(config.gateway.circuit_breaker.reset_timeout_ms, 60_000);
        assert_eq!(config.gateway.timeout_ms, 30_000);
        assert_eq!(config.watch.debounce_ms, 100);
    }

    #[test]
    fn test_gateway_section_snapshot() {
        insta::assert_json_snapshot!(GatewayConfig::default(), @r###"
        {
          "timeoutMs": 30000,
          "maxConcurrent": 5,
          "maxOutputBytes": 10485760,
          "circuitBreaker": {
            "threshold": 5,
            "resetTimeoutMs": 60000
          }
        }
        "###);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.gateway.max_concurrent = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.option(), Some("gateway.maxConcurrent"));
    }

    #[test]
    fn test_validate_rejects_pong_timeout_longer_than_ping() {
        let mut config = Config::default();
        config.channel.pong_timeout_ms = config.channel.ping_interval_ms;
        let err = config.validate().unwrap_err();
        assert_eq!(err.option(), Some("channel.pongTimeoutMs"));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.channel.initial_backoff_ms = 60_000;
        config.channel.max_backoff_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_jitter() {
        let mut config = Config::default();
        config.channel.jitter_ratio = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.option(), Some("channel.jitterRatio"));
    }

    #[test]
    fn test_load_reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cmdgate.json")).unwrap();
        std::fs::write(&path, r#"{"watch": {"debounceMs": 250, "patterns": ["**/*.md"]}}"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.watch.patterns, vec!["**/*.md"]);
        assert_eq!(config.gateway, GatewayConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cmdgate.json")).unwrap();
        std::fs::write(&path, r#"{"watch": {"debounceMs": 0}}"#).unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let result = Config::load(Utf8Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(ConfigError::Read { ref path, .. }) if path == "/definitely/not/here.json"));
    }
}
