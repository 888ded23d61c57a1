// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Notification payloads pushed to the UI layer.
//!
//! Serialized as `{connectionId, type, counts, message}`.

use serde::{Deserialize, Serialize};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusChanged,
    Qr,
    SyncComplete,
    SyncAbandoned,
    MessageReceived,
    ReconnectRequired,
}

/// Message counts attached to sync notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// A single notification event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub connection_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<SyncCounts>,
    pub message: String,
}

impl Notification {
    /// Create a notification without counts.
    pub fn new(connection_id: &str, kind: NotificationKind, message: impl Into<String>) -> Self {
        Notification {
            connection_id: connection_id.to_string(),
            kind,
            counts: None,
            message: message.into(),
        }
    }

    /// Attach sync counts.
    pub fn with_counts(mut self, counts: SyncCounts) -> Self {
        self.counts = Some(counts);
        self
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[path = "notification_tests.rs"]
mod tests;
