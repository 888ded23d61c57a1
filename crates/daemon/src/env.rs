// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon.

use std::path::PathBuf;

/// Environment variable names read by the daemon.
pub mod names {
    pub const ZAPLINE_STATE_DIR: &str = "ZAPLINE_STATE_DIR";
    pub const ZAPLINE_CREDENTIALS_KEY: &str = "ZAPLINE_CREDENTIALS_KEY";
    pub const XDG_STATE_HOME: &str = "XDG_STATE_HOME";
    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Returns the value of `ZAPLINE_STATE_DIR` if set.
pub fn state_dir() -> Option<PathBuf> {
    std::env::var(names::ZAPLINE_STATE_DIR)
        .ok()
        .map(PathBuf::from)
}

/// Returns the value of `XDG_STATE_HOME` if set.
pub fn xdg_state_home() -> Option<PathBuf> {
    std::env::var(names::XDG_STATE_HOME).ok().map(PathBuf::from)
}

/// Returns the hex credential key from `ZAPLINE_CREDENTIALS_KEY` if set and non-empty.
pub fn credentials_key() -> Option<String> {
    std::env::var(names::ZAPLINE_CREDENTIALS_KEY)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Resolve the default state directory: env override, then XDG, then home.
pub fn default_state_dir() -> PathBuf {
    if let Some(dir) = state_dir() {
        return dir;
    }
    if let Some(dir) = xdg_state_home() {
        return dir.join("zapline");
    }
    dirs::home_dir()
        .map(|h| h.join(".local/state/zapline"))
        .unwrap_or_else(|| PathBuf::from(".local/state/zapline"))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
