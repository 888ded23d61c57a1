// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection status and the persisted connection record.
//!
//! A connection is one tenant's binding to a WhatsApp account. Its status is
//! a closed set of states; all transitions go through
//! [`ConnectionStatus::can_transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Lifecycle status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No live session. Initial state, and the landing state after a reset.
    Disconnected,
    /// A session is being established.
    Connecting,
    /// The session is waiting for the operator to scan a QR code or pair.
    AwaitingQr,
    /// The session is authenticated and usable (subject to liveness).
    Connected,
    /// Unrecoverable failure; requires operator action or a reset.
    Error,
}

impl ConnectionStatus {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::AwaitingQr => "awaiting_qr",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }

    /// Check if a transition from this status to target is valid.
    ///
    /// Self-transitions are never valid; callers treat them as no-ops.
    pub fn can_transition_to(&self, target: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        match (self, target) {
            (Disconnected, Connecting | Error) => true,
            (Connecting, AwaitingQr | Connected | Disconnected | Error) => true,
            (AwaitingQr, Connected | Disconnected | Error) => true,
            (Connected, Disconnected | Error) => true,
            (Error, Disconnected | Connecting) => true,
            (Disconnected, _) | (Connecting, _) | (AwaitingQr, _) | (Connected, _) | (Error, _) => {
                false
            }
        }
    }

    /// Get valid transition targets as a formatted string.
    pub fn valid_targets(&self) -> String {
        match self {
            ConnectionStatus::Disconnected => "connecting, error".to_string(),
            ConnectionStatus::Connecting => {
                "awaiting_qr, connected, disconnected, error".to_string()
            }
            ConnectionStatus::AwaitingQr => "connected, disconnected, error".to_string(),
            ConnectionStatus::Connected => "disconnected, error".to_string(),
            ConnectionStatus::Error => "disconnected, connecting".to_string(),
        }
    }

    /// Validate a transition, returning an error describing the valid targets.
    pub fn check_transition(&self, target: ConnectionStatus) -> Result<()> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
                valid_targets: self.valid_targets(),
            })
        }
    }

    /// Returns true while a session handle is expected to exist.
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::AwaitingQr
                | ConnectionStatus::Connected
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disconnected" => Ok(ConnectionStatus::Disconnected),
            "connecting" => Ok(ConnectionStatus::Connecting),
            "awaiting_qr" => Ok(ConnectionStatus::AwaitingQr),
            "connected" => Ok(ConnectionStatus::Connected),
            "error" => Ok(ConnectionStatus::Error),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// A connection row as persisted in the store.
///
/// Credentials are deliberately absent; they are only read through
/// [`crate::Database::load_credentials`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub phone_number: Option<String>,
    pub status: ConnectionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub has_credentials: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Create a fresh, disconnected record.
    pub fn new(id: String, created_at: DateTime<Utc>) -> Self {
        ConnectionRecord {
            id,
            phone_number: None,
            status: ConnectionStatus::Disconnected,
            last_connected_at: None,
            last_heartbeat_at: None,
            reconnect_attempts: 0,
            has_credentials: false,
            created_at,
            updated_at: created_at,
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
