//! Global configuration parsing and validation.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Session window and liveness limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Pull requests issued ahead of acknowledgment when a remote is accepted.
    #[serde(default = "default_prewarm_amount")]
    pub prewarm_amount: u64,
    /// Sweep ticks a session may stay silent before it is removed.
    #[serde(default = "default_max_inactive_ticks")]
    pub max_inactive_ticks: u32,
    /// Consecutive unanswered heartbeats tolerated before disconnecting.
    #[serde(default = "default_max_heartbeat_probe")]
    pub max_heartbeat_probe: u32,
    /// Maximum outbound messages packed into one response.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_prewarm_amount() -> u64 {
    5
}

fn default_max_inactive_ticks() -> u32 {
    5
}

fn default_max_heartbeat_probe() -> u32 {
    3
}

fn default_max_batch() -> usize {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prewarm_amount: default_prewarm_amount(),
            max_inactive_ticks: default_max_inactive_ticks(),
            max_heartbeat_probe: default_max_heartbeat_probe(),
            max_batch: default_max_batch(),
        }
    }
}

/// Timer periods and request lifetimes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimerConfig {
    /// Interval between heartbeat probes (also the heartbeat request lifetime).
    #[serde(default = "default_period_ms")]
    pub heartbeat_period_ms: u64,
    /// Interval between inactivity sweeps.
    #[serde(default = "default_period_ms")]
    pub sweep_period_ms: u64,
    /// Lifetime of data pull requests.
    #[serde(default = "default_request_lifetime_seconds")]
    pub request_lifetime_seconds: u64,
    /// Pause between answering a handshake and prewarming the window.
    #[serde(default = "default_prewarm_delay_ms")]
    pub prewarm_delay_ms: u64,
    /// Freshness period attached to every response.
    #[serde(default = "default_period_ms")]
    pub freshness_ms: u64,
}

fn default_period_ms() -> u64 {
    1000
}

fn default_request_lifetime_seconds() -> u64 {
    3600
}

fn default_prewarm_delay_ms() -> u64 {
    10
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: default_period_ms(),
            sweep_period_ms: default_period_ms(),
            request_lifetime_seconds: default_request_lifetime_seconds(),
            prewarm_delay_ms: default_prewarm_delay_ms(),
            freshness_ms: default_period_ms(),
        }
    }
}

impl TimerConfig {
    /// Heartbeat tick period.
    #[must_use]
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    /// Inactivity sweep tick period.
    #[must_use]
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms)
    }

    /// Lifetime given to each data pull request.
    #[must_use]
    pub fn request_lifetime(&self) -> Duration {
        Duration::from_secs(self.request_lifetime_seconds)
    }

    /// Delay between the handshake answer and the prewarm burst.
    #[must_use]
    pub fn prewarm_delay(&self) -> Duration {
        Duration::from_millis(self.prewarm_delay_ms)
    }

    /// Freshness period for emitted responses.
    #[must_use]
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}

/// UDP face addressing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NetworkConfig {
    /// Local socket address the face binds to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Peer every request is forwarded to.
    #[serde(default = "default_upstream")]
    pub upstream: SocketAddr,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6363))
}

fn default_upstream() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6364))
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upstream: default_upstream(),
        }
    }
}

fn default_topology_prefix() -> String {
    "/topo-prefix".into()
}

fn default_stream_id() -> String {
    "midi-ndn".into()
}

fn default_project() -> String {
    "tmp-proj".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Routable prefix every name starts with.
    #[serde(default = "default_topology_prefix")]
    pub topology_prefix: String,
    /// Stream identifier component following the peer id.
    #[serde(default = "default_stream_id")]
    pub stream_id: String,
    /// Project (session group) name.
    #[serde(default = "default_project")]
    pub project: String,
    /// Window and liveness limits.
    #[serde(default)]
    pub session: SessionConfig,
    /// Timer periods.
    #[serde(default)]
    pub timers: TimerConfig,
    /// UDP face addresses.
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            topology_prefix: default_topology_prefix(),
            stream_id: default_stream_id(),
            project: default_project(),
            session: SessionConfig::default(),
            timers: TimerConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the session core relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if !self.topology_prefix.starts_with('/') {
            return Err(AppError::Config(
                "topology_prefix must start with '/'".into(),
            ));
        }

        for (field, value) in [("stream_id", &self.stream_id), ("project", &self.project)] {
            if value.is_empty() || value.contains('/') {
                return Err(AppError::Config(format!(
                    "{field} must be a single non-empty name component"
                )));
            }
        }

        if self.session.prewarm_amount == 0 {
            return Err(AppError::Config(
                "session.prewarm_amount must be greater than zero".into(),
            ));
        }

        if self.session.max_batch == 0 {
            return Err(AppError::Config(
                "session.max_batch must be greater than zero".into(),
            ));
        }

        if self.timers.heartbeat_period_ms == 0 || self.timers.sweep_period_ms == 0 {
            return Err(AppError::Config(
                "timer periods must be greater than zero".into(),
            ));
        }

        if self.timers.request_lifetime_seconds == 0 {
            return Err(AppError::Config(
                "timers.request_lifetime_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
