// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the daemon.

use thiserror::Error;

/// Failures reported by a protocol session or its connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The remote refused the stored credentials.
    #[error("credentials rejected")]
    AuthRejected,

    #[error("timed out")]
    Timeout,

    #[error("session closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// All errors surfaced by daemon operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] zl_core::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

/// A specialized Result type for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;
