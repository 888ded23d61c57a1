// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted messages and per-conversation sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message as persisted, keyed by `(connection_id, external_id)`.
///
/// `external_id` is assigned by the remote protocol and is the only identity
/// used for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub connection_id: String,
    pub external_id: String,
    pub counterpart: String,
    /// True when the message was sent by the connected account.
    pub from_me: bool,
    pub body: Option<String>,
    /// Protocol-provided timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Sort messages by protocol timestamp, breaking ties by external id.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.external_id.cmp(&b.external_id))
    });
}

/// Last known position of a conversation.
///
/// The position only ever moves forward; see
/// [`crate::Database::advance_conversation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub connection_id: String,
    pub counterpart: String,
    pub last_external_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// An empty state for a conversation never seen before.
    pub fn empty(connection_id: &str, counterpart: &str) -> Self {
        ConversationState {
            connection_id: connection_id.to_string(),
            counterpart: counterpart.to_string(),
            last_external_id: None,
            last_message_at: None,
            unread_count: 0,
            last_synced_at: None,
        }
    }

    /// Returns true if `message` sorts after the stored position.
    pub fn is_behind(&self, message: &Message) -> bool {
        match (self.last_message_at, &self.last_external_id) {
            (None, _) => true,
            (Some(at), last_id) => {
                message.timestamp > at
                    || (message.timestamp == at
                        && last_id
                            .as_deref()
                            .map_or(true, |id| message.external_id.as_str() > id))
            }
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
