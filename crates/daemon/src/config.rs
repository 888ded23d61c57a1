// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Read from `<state_dir>/zaplined.toml`. The file is optional and every
//! field has a default, so an empty or missing file yields the stock
//! intervals.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zl_core::VaultKey;

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "zaplined.toml";
pub const KEY_FILE_NAME: &str = "credentials.key";

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Presence heartbeat interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Connection-state poll interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay before a scheduled reconnect.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Upper bound on every remote call.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    /// Consecutive heartbeat failures before a session is declared dead.
    #[serde(default = "default_heartbeat_failure_threshold")]
    pub heartbeat_failure_threshold: u32,
    /// Connect attempts per episode (0 = unlimited).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_queue_drain_interval_ms")]
    pub queue_drain_interval_ms: u64,
    #[serde(default = "default_sync_max_retries")]
    pub sync_max_retries: u32,
    #[serde(default = "default_sync_fetch_limit")]
    pub sync_fetch_limit: usize,
    #[serde(default = "default_heartbeat_fetch_limit")]
    pub heartbeat_fetch_limit: usize,
    /// Recently active conversations refreshed per successful heartbeat.
    #[serde(default = "default_heartbeat_conversations")]
    pub heartbeat_conversations: usize,
    /// Worker cap across connections.
    #[serde(default = "default_max_concurrent_syncs")]
    pub max_concurrent_syncs: usize,
    #[serde(default = "default_full_sync_debounce_ms")]
    pub full_sync_debounce_ms: u64,
    #[serde(default = "default_full_sync_conversations")]
    pub full_sync_conversations: usize,
    #[serde(default = "default_gap_threshold_secs")]
    pub gap_threshold_secs: u64,
    /// WebSocket URL of the protocol bridge.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Bind address for the notification push server (absent = disabled).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_bind: Option<SocketAddr>,
    /// Hex-encoded AES-256 key for credentials at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_key: Option<String>,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    20_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_failure_threshold() -> u32 {
    3
}

fn default_queue_drain_interval_ms() -> u64 {
    5_000
}

fn default_sync_max_retries() -> u32 {
    3
}

fn default_sync_fetch_limit() -> usize {
    50
}

fn default_heartbeat_fetch_limit() -> usize {
    10
}

fn default_heartbeat_conversations() -> usize {
    5
}

fn default_max_concurrent_syncs() -> usize {
    5
}

fn default_full_sync_debounce_ms() -> u64 {
    10_000
}

fn default_full_sync_conversations() -> usize {
    50
}

fn default_gap_threshold_secs() -> u64 {
    300
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:7900".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            remote_timeout_ms: default_remote_timeout_ms(),
            heartbeat_failure_threshold: default_heartbeat_failure_threshold(),
            max_reconnect_attempts: 0,
            queue_drain_interval_ms: default_queue_drain_interval_ms(),
            sync_max_retries: default_sync_max_retries(),
            sync_fetch_limit: default_sync_fetch_limit(),
            heartbeat_fetch_limit: default_heartbeat_fetch_limit(),
            heartbeat_conversations: default_heartbeat_conversations(),
            max_concurrent_syncs: default_max_concurrent_syncs(),
            full_sync_debounce_ms: default_full_sync_debounce_ms(),
            full_sync_conversations: default_full_sync_conversations(),
            gap_threshold_secs: default_gap_threshold_secs(),
            bridge_url: default_bridge_url(),
            notify_bind: None,
            credentials_key: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate TOML content.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("remote_timeout_ms", self.remote_timeout_ms),
            ("queue_drain_interval_ms", self.queue_drain_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.heartbeat_failure_threshold == 0 {
            return Err(Error::Config(
                "heartbeat_failure_threshold must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_syncs == 0 {
            return Err(Error::Config(
                "max_concurrent_syncs must be greater than zero".to_string(),
            ));
        }
        if self.sync_fetch_limit == 0 {
            return Err(Error::Config(
                "sync_fetch_limit must be greater than zero".to_string(),
            ));
        }
        if !(self.bridge_url.starts_with("ws://") || self.bridge_url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "invalid bridge_url '{}': must be ws:// or wss://",
                self.bridge_url
            )));
        }
        if let Some(key) = &self.credentials_key {
            VaultKey::from_hex(key).map_err(|e| Error::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn queue_drain_interval(&self) -> Duration {
        Duration::from_millis(self.queue_drain_interval_ms)
    }

    pub fn full_sync_debounce(&self) -> Duration {
        Duration::from_millis(self.full_sync_debounce_ms)
    }

    pub fn gap_threshold(&self) -> chrono::Duration {
        i64::try_from(self.gap_threshold_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Resolve the credential key.
///
/// Precedence: environment override, then the config value, then the key
/// file in the state directory (generated on first run).
pub fn resolve_vault_key(
    env_key: Option<String>,
    config_key: Option<&str>,
    key_path: &Path,
) -> Result<VaultKey> {
    if let Some(hex) = env_key.as_deref().or(config_key) {
        return VaultKey::from_hex(hex).map_err(|e| Error::Config(e.to_string()));
    }
    if key_path.exists() {
        let hex = fs::read_to_string(key_path)?;
        return VaultKey::from_hex(&hex).map_err(|e| {
            Error::Config(format!("invalid key file {}: {}", key_path.display(), e))
        });
    }
    let key = VaultKey::generate();
    write_key_file(key_path, &key)?;
    tracing::info!(path = %key_path.display(), "generated new credentials key");
    Ok(key)
}

fn write_key_file(path: &Path, key: &VaultKey) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(key.to_hex().as_bytes())?;
    Ok(())
}

/// Default config path within a state directory.
pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join(CONFIG_FILE_NAME)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
