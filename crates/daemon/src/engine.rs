// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Message sync engine.
//!
//! Fetches recent history for one conversation and reconciles it against the
//! store. Messages are upserted by external id, so running the same sync
//! twice never produces duplicates, and conversation positions only move
//! forward.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use zl_core::{sort_messages, ConversationState, Message, NotificationKind, SyncCounts};

use crate::context::Context;
use crate::error::{Result, SessionError};

/// Whether a sync ran, and how it ended.
///
/// `NotAttempted` means the sync never got a fair try: the connection was
/// not usable or its work was cancelled. It must not count against retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    Failed,
    #[default]
    NotAttempted,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub counts: SyncCounts,
}

impl SyncReport {
    fn failed(counts: SyncCounts) -> Self {
        SyncReport {
            outcome: SyncOutcome::Failed,
            counts,
        }
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    ctx: Arc<Context>,
}

impl SyncEngine {
    pub fn new(ctx: Arc<Context>) -> Self {
        SyncEngine { ctx }
    }

    /// Sync one conversation. `Synced` only if the full fetch succeeded and
    /// every message was stored.
    pub async fn sync(
        &self,
        connection_id: &str,
        counterpart: &str,
        fetch_limit: usize,
    ) -> SyncOutcome {
        self.run(connection_id, counterpart, fetch_limit)
            .await
            .outcome
    }

    /// Sync one conversation and report the counts.
    pub async fn run(&self, connection_id: &str, counterpart: &str, fetch_limit: usize) -> SyncReport {
        let ctx = &self.ctx;
        if !ctx.registry.is_usable(connection_id) {
            debug!(connection_id, counterpart, "sync skipped, connection not usable");
            return SyncReport::default();
        }
        let Some(handle) = ctx.registry.get(connection_id) else {
            return SyncReport::default();
        };

        let fetched =
            tokio::time::timeout(ctx.config.remote_timeout(), handle.fetch_messages(counterpart, fetch_limit))
                .await;
        drop(handle);
        let (batch, failure) = match fetched {
            Ok(Ok(batch)) => (batch, None),
            Ok(Err(e)) => (e.partial, Some(e.source)),
            Err(_) => (Vec::new(), Some(SessionError::Timeout)),
        };

        let fetched = batch.len();
        let messages: Vec<Message> = batch
            .into_iter()
            .map(|m| m.into_message(connection_id))
            .collect();
        let inserted = match ingest(ctx, connection_id, messages).await {
            Ok(inserted) => inserted.len(),
            Err(e) => {
                warn!(connection_id, counterpart, error = %e, "sync failed to store messages");
                return SyncReport::failed(SyncCounts::default());
            }
        };
        let counts = SyncCounts {
            fetched,
            inserted,
            duplicates: fetched - inserted,
        };

        if let Some(err) = failure {
            warn!(
                connection_id,
                counterpart,
                inserted,
                error = %err,
                "sync fetch failed"
            );
            return SyncReport::failed(counts);
        }

        if let Err(e) = ctx
            .db
            .lock()
            .await
            .mark_conversation_synced(connection_id, counterpart, Utc::now())
        {
            warn!(connection_id, counterpart, error = %e, "failed to record sync time");
            return SyncReport::failed(counts);
        }

        info!(
            connection_id,
            counterpart,
            fetched,
            inserted,
            duplicates = counts.duplicates,
            "sync complete"
        );
        ctx.hub
            .notify_counts(connection_id, NotificationKind::SyncComplete, counts, counterpart);
        SyncReport {
            outcome: SyncOutcome::Synced,
            counts,
        }
    }
}

/// Store messages and advance their conversations.
///
/// Shared by the sync engine and live message delivery. Returns the messages
/// that were not already stored, in protocol order.
pub async fn ingest(
    ctx: &Context,
    connection_id: &str,
    mut messages: Vec<Message>,
) -> Result<Vec<Message>> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }
    sort_messages(&mut messages);

    let mut db = ctx.db.lock().await;
    let inserted = db.upsert_messages(&messages)?;

    let mut by_counterpart: BTreeMap<&str, Vec<&Message>> = BTreeMap::new();
    for message in &messages {
        by_counterpart
            .entry(message.counterpart.as_str())
            .or_default()
            .push(message);
    }

    for (counterpart, group) in by_counterpart {
        let Some(last) = group.last() else { continue };
        let state = db
            .get_conversation(connection_id, counterpart)?
            .unwrap_or_else(|| ConversationState::empty(connection_id, counterpart));
        let unread = inserted
            .iter()
            .filter(|m| m.counterpart == counterpart && !m.from_me && state.is_behind(m))
            .count();
        db.advance_conversation(
            connection_id,
            counterpart,
            &last.external_id,
            last.timestamp,
            u32::try_from(unread).unwrap_or(u32::MAX),
        )?;
    }
    Ok(inserted)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
