//! Bridge configuration.
//!
//! Config file lives at `~/.config/rtcbridge/bridge.toml` unless a path is
//! given. Every field is optional in the file; `RTCBRIDGE_*` environment
//! variables override what the file says.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const ENV_DRAIN_INTERVAL_MS: &str = "RTCBRIDGE_DRAIN_INTERVAL_MS";
pub const ENV_TEARDOWN_TIMEOUT_MS: &str = "RTCBRIDGE_TEARDOWN_TIMEOUT_MS";
pub const ENV_SEND_TIMEOUT_MS: &str = "RTCBRIDGE_SEND_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Sleep between drain ticks while flushing pending work.
    pub drain_interval_ms: u64,
    /// Flush budget when an engine context is torn down.
    pub teardown_timeout_ms: u64,
    /// Upper bound for blocking submissions from foreign threads. Unbounded when unset.
    pub send_timeout_ms: Option<u64>,
    /// Re-emit native engine log lines through `tracing`.
    pub forward_native_logs: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: 1,
            teardown_timeout_ms: 5_000,
            send_timeout_ms: None,
            forward_native_logs: true,
        }
    }
}

impl BridgeConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rtcbridge")
            .join("bridge.toml")
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Load from `path`. A missing file yields the defaults; an unreadable or
    /// malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("can't read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
            .map_err(|e| BridgeError::Config(format!("bad config file {}: {e}", path.display())))
    }

    /// Apply `RTCBRIDGE_*` overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_millis(&lookup, ENV_DRAIN_INTERVAL_MS) {
            self.drain_interval_ms = ms;
        }
        if let Some(ms) = parse_millis(&lookup, ENV_TEARDOWN_TIMEOUT_MS) {
            self.teardown_timeout_ms = ms;
        }
        if let Some(ms) = parse_millis(&lookup, ENV_SEND_TIMEOUT_MS) {
            self.send_timeout_ms = Some(ms);
        }
        self
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(ms) => Some(ms),
        Err(e) => {
            tracing::warn!("ignoring {key}={raw:?}: {e}");
            None
        }
    }
}
