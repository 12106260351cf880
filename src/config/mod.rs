//! Configuration loading and management.
//!
//! Loads daemon configuration from `./applock.toml` (or
//! `$APPLOCK_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::gate::DEFAULT_GRACE_WINDOW_SECS;
use crate::monitor::DEFAULT_POLL_INTERVAL_SECS;

// ── Top-level config ────────────────────────────────────────────

/// Top-level applock configuration loaded from TOML.
///
/// Path: `./applock.toml` or `$APPLOCK_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppLockConfig {
    /// Gate settings (`[gate]`).
    pub gate: GateConfig,
    /// Foreground monitor settings (`[monitor]`).
    pub monitor: MonitorConfig,
    /// Filesystem paths for persistent state (`[paths]`).
    pub paths: PathsConfig,
    /// Host bridge settings (`[bridge]`).
    pub bridge: BridgeConfig,
}

/// Gate settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Grace window after a successful unlock, in seconds.
    pub grace_window_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            grace_window_secs: DEFAULT_GRACE_WINDOW_SECS,
        }
    }
}

/// Foreground monitor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval, in seconds.
    pub poll_interval_secs: u64,
    /// The daemon host's own package identifier, exempt from gating.
    pub self_package: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            self_package: "org.applock.host".to_owned(),
        }
    }
}

/// Filesystem paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite database holding the lock registry and unlock ledger.
    pub state_db: String,
    /// Directory for rotated daemon logs.
    pub logs_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_db: "applock.db".to_owned(),
            logs_dir: "logs".to_owned(),
        }
    }
}

/// Host bridge settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Unix socket the platform shim connects to.
    pub socket_path: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: "applock.sock".to_owned(),
        }
    }
}

impl AppLockConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$APPLOCK_CONFIG_PATH` or `./applock.toml`.
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: AppLockConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(AppLockConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("APPLOCK_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("applock.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var`
    /// in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("APPLOCK_GRACE_SECS") {
            match v.parse() {
                Ok(n) => self.gate.grace_window_secs = n,
                Err(_) => tracing::warn!(
                    var = "APPLOCK_GRACE_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("APPLOCK_POLL_SECS") {
            match v.parse() {
                Ok(n) => self.monitor.poll_interval_secs = n,
                Err(_) => tracing::warn!(
                    var = "APPLOCK_POLL_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("APPLOCK_SELF_PACKAGE") {
            self.monitor.self_package = v;
        }
        if let Some(v) = env("APPLOCK_STATE_DB") {
            self.paths.state_db = v;
        }
        if let Some(v) = env("APPLOCK_LOGS_DIR") {
            self.paths.logs_dir = v;
        }
        if let Some(v) = env("APPLOCK_SOCKET") {
            self.bridge.socket_path = v;
        }
    }
}
