// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Session heartbeat and liveness monitor.
//!
//! Two periodic checks per connection:
//! - the heartbeat sends presence through the session and counts
//!   consecutive failures; a success also queues a small history pull for
//!   recently active conversations.
//! - the state poll catches sessions whose status says `connected` while the
//!   transport says closed.
//!
//! Either check declaring a session dead moves it to `disconnected` and
//! schedules one reconnect after the configured delay.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use zl_core::{ConnectionStatus, SyncPriority, SyncReason};

use crate::context::Context;
use crate::error::SessionError;
use crate::reconnect::ReconnectController;

/// Result of one heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The connection was not in a state to heartbeat.
    Skipped,
    Alive,
    /// Presence failed; carries the consecutive failure count.
    Failed(u32),
    /// The failure threshold was reached and the session torn down.
    Dead,
}

#[derive(Clone)]
pub struct LivenessMonitor {
    controller: ReconnectController,
    permits: Arc<Semaphore>,
}

impl LivenessMonitor {
    pub fn new(controller: ReconnectController) -> Self {
        let workers = controller.context().config.max_concurrent_syncs;
        LivenessMonitor {
            controller,
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    fn ctx(&self) -> &Arc<Context> {
        self.controller.context()
    }

    /// Send one presence heartbeat for a connection.
    pub async fn heartbeat_one(&self, connection_id: &str) -> HeartbeatOutcome {
        let ctx = self.ctx();
        if ctx.registry.status(connection_id) != Some(ConnectionStatus::Connected) {
            return HeartbeatOutcome::Skipped;
        }
        let (Some(handle), Some(token)) = (
            ctx.registry.get(connection_id),
            ctx.registry.connection_token(connection_id),
        ) else {
            return HeartbeatOutcome::Skipped;
        };

        let result = tokio::select! {
            _ = token.cancelled() => return HeartbeatOutcome::Skipped,
            result = tokio::time::timeout(ctx.config.remote_timeout(), handle.send_presence()) => {
                result.unwrap_or(Err(SessionError::Timeout))
            }
        };
        drop(handle);

        match result {
            Ok(()) => {
                ctx.registry.reset_heartbeat_failures(connection_id);
                self.after_heartbeat(connection_id).await;
                HeartbeatOutcome::Alive
            }
            Err(e) => {
                let failures = ctx.registry.record_heartbeat_failure(connection_id);
                let threshold = ctx.config.heartbeat_failure_threshold;
                warn!(connection_id, failures, threshold, error = %e, "heartbeat failed");
                if failures >= threshold {
                    self.declare_dead(connection_id, "heartbeat failures").await;
                    HeartbeatOutcome::Dead
                } else {
                    HeartbeatOutcome::Failed(failures)
                }
            }
        }
    }

    /// Record the heartbeat and queue a small pull of recent conversations.
    async fn after_heartbeat(&self, connection_id: &str) {
        let ctx = self.ctx();
        let recent = {
            let db = ctx.db.lock().await;
            if let Err(e) = db.touch_heartbeat(connection_id, Utc::now()) {
                warn!(connection_id, error = %e, "failed to record heartbeat");
            }
            db.recent_conversations(connection_id, ctx.config.heartbeat_conversations)
        };
        match recent {
            Ok(conversations) => {
                for conversation in conversations {
                    ctx.queue.enqueue(
                        connection_id,
                        &conversation.counterpart,
                        SyncPriority::Low,
                        SyncReason::PeriodicSync,
                    );
                }
            }
            Err(e) => warn!(connection_id, error = %e, "failed to list recent conversations"),
        }
    }

    /// Correct a session whose status says connected but whose transport is
    /// closed. Returns true if a correction was made.
    pub async fn poll_one(&self, connection_id: &str) -> bool {
        if !self.ctx().registry.is_stale(connection_id) {
            return false;
        }
        warn!(connection_id, "session reports connected but transport is closed");
        self.declare_dead(connection_id, "transport closed").await;
        true
    }

    async fn declare_dead(&self, connection_id: &str, reason: &str) {
        let ctx = self.ctx();
        ctx.registry.detach(connection_id);
        if let Err(e) = ctx
            .transition(connection_id, ConnectionStatus::Disconnected)
            .await
        {
            error!(connection_id, reason, error = %e, "failed to record disconnect");
        }
        self.controller
            .schedule_reconnect(connection_id, ctx.config.reconnect_delay());
    }

    /// Heartbeat every connected session each interval until cancelled.
    pub async fn run_heartbeat_loop(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.ctx().config.heartbeat_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            for connection_id in self.ctx().registry.ids_with_status(ConnectionStatus::Connected) {
                let this = self.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = this.permits.acquire().await else { return };
                    let outcome = this.heartbeat_one(&connection_id).await;
                    debug!(connection_id = %connection_id, ?outcome, "heartbeat");
                });
            }
        }
        debug!("heartbeat loop stopped");
    }

    /// Poll connection state each interval until cancelled.
    pub async fn run_poll_loop(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.ctx().config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            for connection_id in self.ctx().registry.ids_with_status(ConnectionStatus::Connected) {
                self.poll_one(&connection_id).await;
            }
        }
        debug!("poll loop stopped");
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
