// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync request classification: priority bands and cause tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Priority band of a queued sync request.
///
/// Ordering follows urgency: `Low < Normal < High < Urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl SyncPriority {
    /// All priorities, highest first.
    pub const ALL: [SyncPriority; 4] = [
        SyncPriority::Urgent,
        SyncPriority::High,
        SyncPriority::Normal,
        SyncPriority::Low,
    ];

    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPriority::Low => "low",
            SyncPriority::Normal => "normal",
            SyncPriority::High => "high",
            SyncPriority::Urgent => "urgent",
        }
    }

    /// One band lower, saturating at `Low`.
    pub fn demote(self) -> SyncPriority {
        match self {
            SyncPriority::Urgent => SyncPriority::High,
            SyncPriority::High => SyncPriority::Normal,
            SyncPriority::Normal | SyncPriority::Low => SyncPriority::Low,
        }
    }
}

impl fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(SyncPriority::Low),
            "normal" => Ok(SyncPriority::Normal),
            "high" => Ok(SyncPriority::High),
            "urgent" => Ok(SyncPriority::Urgent),
            _ => Err(Error::InvalidPriority(s.to_string())),
        }
    }
}

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// Inbound traffic suggested missed messages.
    GapDetected,
    /// An operator asked for it.
    ManualRequest,
    /// Opportunistic refresh from the heartbeat.
    PeriodicSync,
    /// Catch-up after a session (re)connected.
    Reconnected,
}

impl SyncReason {
    /// Returns the string representation used in logs and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::GapDetected => "gap_detected",
            SyncReason::ManualRequest => "manual_request",
            SyncReason::PeriodicSync => "periodic_sync",
            SyncReason::Reconnected => "reconnected",
        }
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gap_detected" => Ok(SyncReason::GapDetected),
            "manual_request" => Ok(SyncReason::ManualRequest),
            "periodic_sync" => Ok(SyncReason::PeriodicSync),
            "reconnected" => Ok(SyncReason::Reconnected),
            _ => Err(Error::InvalidReason(s.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
