// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound session event processing.
//!
//! One pump task per live session consumes its [`SessionEvent`]s. The pump
//! stops when the session token is cancelled, which happens whenever the
//! registry replaces or tears down the handle.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zl_core::{vault, ConnectionStatus, ConversationState, Message, NotificationKind};
use zl_core::{SyncPriority, SyncReason};

use crate::context::Context;
use crate::engine::ingest;
use crate::error::Result;
use crate::reconnect::ReconnectController;
use crate::session::SessionEvent;

/// Whether the pump keeps running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Spawn the event pump for a freshly installed session.
pub fn spawn_pump(
    controller: ReconnectController,
    connection_id: String,
    mut events: mpsc::Receiver<SessionEvent>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            match handle_event(&controller, &connection_id, event).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => warn!(connection_id = %connection_id, error = %e, "event handling failed"),
            }
        }
        debug!(connection_id = %connection_id, "event pump stopped");
    })
}

async fn handle_event(
    controller: &ReconnectController,
    connection_id: &str,
    event: SessionEvent,
) -> Result<Flow> {
    let ctx = controller.context();
    match event {
        SessionEvent::Message(remote) => {
            on_message(ctx, remote.into_message(connection_id)).await?;
            Ok(Flow::Continue)
        }
        SessionEvent::Qr(code) => {
            controller.on_qr(connection_id, code).await?;
            Ok(Flow::Continue)
        }
        SessionEvent::Opened { phone_number } => {
            controller
                .on_connected(connection_id, phone_number.as_deref())
                .await?;
            Ok(Flow::Continue)
        }
        SessionEvent::Closed { reason } => {
            info!(connection_id, reason = %reason, "session closed");
            ctx.registry.detach(connection_id);
            ctx.transition(connection_id, ConnectionStatus::Disconnected)
                .await?;
            controller.schedule_reconnect(connection_id, ctx.config.reconnect_delay());
            Ok(Flow::Stop)
        }
        SessionEvent::CredentialsUpdated(credentials) => {
            let sealed = vault::seal(&ctx.key, &credentials)?;
            ctx.db
                .lock()
                .await
                .store_credentials(connection_id, &sealed)?;
            debug!(connection_id, "credentials stored");
            Ok(Flow::Continue)
        }
        SessionEvent::AuthRejected => {
            controller.reset(connection_id, "credentials rejected").await?;
            Ok(Flow::Stop)
        }
    }
}

/// Store a live message, notify, and check it for a history gap.
pub async fn on_message(ctx: &Context, message: Message) -> Result<bool> {
    let connection_id = message.connection_id.clone();
    let counterpart = message.counterpart.clone();
    let timestamp = message.timestamp;

    let before = ctx
        .db
        .lock()
        .await
        .get_conversation(&connection_id, &counterpart)?;
    let inserted = ingest(ctx, &connection_id, vec![message]).await?;
    if inserted.is_empty() {
        debug!(connection_id = %connection_id, counterpart = %counterpart, "duplicate live message");
        return Ok(false);
    }
    ctx.hub.notify(
        &connection_id,
        NotificationKind::MessageReceived,
        counterpart.as_str(),
    );

    let suspected = before.is_some_and(|state| {
        suspect_gap(
            &state,
            timestamp,
            ctx.registry.connected_at(&connection_id),
            ctx.config.gap_threshold(),
        )
    });
    if suspected {
        info!(connection_id = %connection_id, counterpart = %counterpart, "history gap suspected");
        ctx.queue.enqueue(
            &connection_id,
            &counterpart,
            SyncPriority::High,
            SyncReason::GapDetected,
        );
    }
    Ok(true)
}

/// Decide whether a live message suggests missed history.
///
/// A gap is suspected when the message is older than the stored position
/// (out-of-order delivery), or when it lands more than `threshold` after the
/// stored position and the session reconnected since the conversation was
/// last synced.
pub fn suspect_gap(
    state: &ConversationState,
    message_at: DateTime<Utc>,
    reconnected_at: Option<DateTime<Utc>>,
    threshold: Duration,
) -> bool {
    let Some(last) = state.last_message_at else {
        return false;
    };
    if message_at < last {
        return true;
    }
    if message_at - last <= threshold {
        return false;
    }
    match (reconnected_at, state.last_synced_at) {
        (Some(reconnected), Some(synced)) => reconnected > synced,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
