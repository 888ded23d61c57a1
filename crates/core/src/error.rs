// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for zl-core operations.

use thiserror::Error;

/// All possible errors that can occur in zl-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("connection already exists: {0}")]
    ConnectionExists(String),

    #[error("invalid status transition: cannot go from {from} to {to}\n  hint: from '{from}' you can go to: {valid_targets}")]
    InvalidTransition {
        from: String,
        to: String,
        valid_targets: String,
    },

    #[error("invalid status: '{0}'\n  hint: valid statuses are: disconnected, connecting, awaiting_qr, connected, error")]
    InvalidStatus(String),

    #[error("invalid priority: '{0}'\n  hint: valid priorities are: low, normal, high, urgent")]
    InvalidPriority(String),

    #[error("invalid sync reason: '{0}'\n  hint: valid reasons are: gap_detected, manual_request, periodic_sync, reconnected")]
    InvalidReason(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

/// A specialized Result type for zl-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
