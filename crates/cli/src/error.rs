// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors surfaced by the `zap` CLI.
#[derive(Debug, Error)]
pub enum Error {
    #[error("daemon not running at {0}\n  hint: start it with 'zaplined --state-dir <dir>'")]
    DaemonNotRunning(String),

    #[error("{0}")]
    Daemon(String),

    #[error("unexpected response from daemon: {0}")]
    UnexpectedResponse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
