// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnection controller.
//!
//! Drives a connection through `disconnected -> connecting -> awaiting_qr ->
//! connected`. Attempts for one connection are serialized by a per-id lock;
//! different connections connect concurrently.
//!
//! Credential corruption and auth rejection take the reset path: stored
//! credentials are cleared, the connection passes through `error` to
//! `disconnected`, and the operator is told a reconnect is required.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use zl_core::{
    vault, ConnectionRecord, ConnectionStatus, NotificationKind, SyncPriority, SyncReason,
};

use crate::context::Context;
use crate::error::{Result, SessionError};
use crate::events;
use crate::queue::EnqueueOutcome;
use crate::session::{Connected, InitialState};

/// How a connect attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The session is open and authenticated.
    Connected,
    /// The session is waiting for the operator to pair.
    AwaitingQr,
    /// The attempt failed; another one is scheduled.
    Retrying,
    /// The attempt limit was reached; the connection is in `error`.
    GaveUp,
    /// Credentials were rejected or unreadable and have been cleared.
    Reset,
    /// The connection was already usable.
    AlreadyConnected,
    /// The attempt was cancelled by a disconnect or shutdown.
    Cancelled,
}

struct Inner {
    ctx: Arc<Context>,
    scheduled: Mutex<HashSet<String>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    last_full_sync: Mutex<HashMap<String, Instant>>,
}

/// Cloneable handle to the controller.
#[derive(Clone)]
pub struct ReconnectController {
    inner: Arc<Inner>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ReconnectController {
    pub fn new(ctx: Arc<Context>) -> Self {
        ReconnectController {
            inner: Arc::new(Inner {
                ctx,
                scheduled: Mutex::new(HashSet::new()),
                locks: Mutex::new(HashMap::new()),
                last_full_sync: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.ctx
    }

    fn lock_for(&self, connection_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            guard(&self.inner.locks)
                .entry(connection_id.to_string())
                .or_default(),
        )
    }

    /// Register a new connection in `disconnected`.
    pub async fn create(&self, connection_id: &str) -> Result<ConnectionRecord> {
        let ctx = &self.inner.ctx;
        let record = ctx.db.lock().await.create_connection(connection_id)?;
        ctx.registry.register(connection_id, record.status);
        info!(connection_id, "connection created");
        Ok(record)
    }

    /// Attempt to bring a connection up.
    ///
    /// `manual` marks an operator request, which starts a fresh episode.
    pub async fn connect(&self, connection_id: &str, manual: bool) -> Result<ConnectOutcome> {
        let lock = self.lock_for(connection_id);
        let _serial = lock.lock().await;
        let ctx = &self.inner.ctx;

        let record = ctx.db.lock().await.get_connection(connection_id)?;
        ctx.registry.register(connection_id, record.status);
        if ctx.registry.is_usable(connection_id) {
            debug!(connection_id, "already connected");
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        let Some(token) = ctx.registry.connection_token(connection_id) else {
            return Ok(ConnectOutcome::Cancelled);
        };
        if token.is_cancelled() {
            return Ok(ConnectOutcome::Cancelled);
        }

        let attempt = if manual {
            1
        } else {
            record.reconnect_attempts.saturating_add(1)
        };
        let max = ctx.config.max_reconnect_attempts;
        if max > 0 && attempt > max {
            warn!(connection_id, attempts = attempt - 1, max, "giving up on reconnect");
            ctx.registry.detach(connection_id);
            ctx.transition(connection_id, ConnectionStatus::Error).await?;
            return Ok(ConnectOutcome::GaveUp);
        }
        ctx.db
            .lock()
            .await
            .set_reconnect_attempts(connection_id, attempt)?;

        // A pending QR or stale session is replaced by the new attempt.
        ctx.registry.detach(connection_id);
        if ctx
            .registry
            .status(connection_id)
            .is_some_and(|s| s.has_session())
        {
            ctx.transition(connection_id, ConnectionStatus::Disconnected)
                .await?;
        }
        ctx.transition(connection_id, ConnectionStatus::Connecting)
            .await?;
        info!(connection_id, attempt, "connecting");

        let sealed = ctx.db.lock().await.load_credentials(connection_id)?;
        let credentials = match sealed.map(|s| vault::open(&ctx.key, &s)).transpose() {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(connection_id, error = %e, "stored credentials unreadable");
                self.reset_locked(connection_id, "stored credentials are corrupted")
                    .await?;
                return Ok(ConnectOutcome::Reset);
            }
        };

        let attempt_result = tokio::select! {
            _ = token.cancelled() => None,
            result = tokio::time::timeout(
                ctx.config.remote_timeout(),
                ctx.connector.connect(connection_id, credentials),
            ) => Some(result.unwrap_or(Err(SessionError::Timeout))),
        };
        let Some(result) = attempt_result else {
            info!(connection_id, "connect cancelled");
            if ctx.registry.contains(connection_id) {
                ctx.transition(connection_id, ConnectionStatus::Disconnected)
                    .await?;
            }
            return Ok(ConnectOutcome::Cancelled);
        };

        match result {
            Ok(connected) => self.install(connection_id, connected).await,
            Err(SessionError::AuthRejected) => {
                self.reset_locked(connection_id, "credentials rejected")
                    .await?;
                Ok(ConnectOutcome::Reset)
            }
            Err(e) => {
                warn!(connection_id, attempt, error = %e, "connect failed");
                ctx.transition(connection_id, ConnectionStatus::Disconnected)
                    .await?;
                self.schedule_reconnect(connection_id, ctx.config.reconnect_delay());
                Ok(ConnectOutcome::Retrying)
            }
        }
    }

    async fn install(&self, connection_id: &str, connected: Connected) -> Result<ConnectOutcome> {
        let ctx = &self.inner.ctx;
        let Connected {
            handle,
            events,
            initial,
        } = connected;
        let session_token = ctx.registry.set(connection_id, handle);
        events::spawn_pump(self.clone(), connection_id.to_string(), events, session_token);

        match initial {
            InitialState::Open { phone_number } => {
                self.on_connected(connection_id, phone_number.as_deref())
                    .await?;
                Ok(ConnectOutcome::Connected)
            }
            InitialState::AwaitingQr(code) => {
                self.on_qr(connection_id, code).await?;
                Ok(ConnectOutcome::AwaitingQr)
            }
        }
    }

    /// The session wants the operator to pair.
    pub async fn on_qr(&self, connection_id: &str, code: String) -> Result<()> {
        let ctx = &self.inner.ctx;
        ctx.transition(connection_id, ConnectionStatus::AwaitingQr)
            .await?;
        ctx.hub.notify(connection_id, NotificationKind::Qr, code);
        Ok(())
    }

    /// The session authenticated: record it and schedule a full sync.
    pub async fn on_connected(&self, connection_id: &str, phone_number: Option<&str>) -> Result<()> {
        let ctx = &self.inner.ctx;
        ctx.db
            .lock()
            .await
            .mark_connected(connection_id, phone_number, Utc::now())?;
        ctx.registry.reset_heartbeat_failures(connection_id);
        ctx.transition(connection_id, ConnectionStatus::Connected)
            .await?;
        self.schedule_full_sync(connection_id).await?;
        Ok(())
    }

    /// Queue every recently active conversation, at most once per debounce
    /// window. Returns how many conversations were queued.
    pub async fn schedule_full_sync(&self, connection_id: &str) -> Result<usize> {
        let ctx = &self.inner.ctx;
        let now = Instant::now();
        {
            let mut last = guard(&self.inner.last_full_sync);
            if let Some(prev) = last.get(connection_id) {
                if now.duration_since(*prev) < ctx.config.full_sync_debounce() {
                    debug!(connection_id, "full sync debounced");
                    return Ok(0);
                }
            }
            last.insert(connection_id.to_string(), now);
        }

        let conversations = ctx
            .db
            .lock()
            .await
            .recent_conversations(connection_id, ctx.config.full_sync_conversations)?;
        let queued = conversations
            .iter()
            .filter(|c| {
                ctx.queue.enqueue(
                    connection_id,
                    &c.counterpart,
                    SyncPriority::Normal,
                    SyncReason::Reconnected,
                ) != EnqueueOutcome::Ignored
            })
            .count();
        info!(connection_id, conversations = queued, "full sync scheduled");
        Ok(queued)
    }

    /// Clear credentials and return to `disconnected`.
    pub async fn reset(&self, connection_id: &str, reason: &str) -> Result<()> {
        let ctx = &self.inner.ctx;
        ctx.db.lock().await.get_connection(connection_id)?;
        // Stop any in-flight attempt before taking the lock it holds.
        ctx.registry.cancel_work(connection_id);
        let lock = self.lock_for(connection_id);
        let _serial = lock.lock().await;
        self.reset_locked(connection_id, reason).await
    }

    async fn reset_locked(&self, connection_id: &str, reason: &str) -> Result<()> {
        let ctx = &self.inner.ctx;
        warn!(connection_id, reason, "resetting connection");
        {
            let db = ctx.db.lock().await;
            db.clear_credentials(connection_id)?;
            db.set_reconnect_attempts(connection_id, 0)?;
        }
        ctx.registry.detach(connection_id);
        ctx.queue.remove_connection(connection_id);
        ctx.transition(connection_id, ConnectionStatus::Error).await?;
        ctx.transition(connection_id, ConnectionStatus::Disconnected)
            .await?;
        ctx.hub
            .notify(connection_id, NotificationKind::ReconnectRequired, reason);
        Ok(())
    }

    /// Operator disconnect: tear down, cancel pending work, stay disconnected.
    pub async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let ctx = &self.inner.ctx;
        let record = ctx.db.lock().await.get_connection(connection_id)?;
        ctx.registry.register(connection_id, record.status);
        ctx.registry.cancel_work(connection_id);
        let lock = self.lock_for(connection_id);
        let _serial = lock.lock().await;
        ctx.db
            .lock()
            .await
            .set_reconnect_attempts(connection_id, 0)?;
        ctx.transition(connection_id, ConnectionStatus::Disconnected)
            .await?;
        info!(connection_id, "disconnected by operator");
        Ok(())
    }

    /// Tear down and forget a connection along with its history.
    pub async fn delete(&self, connection_id: &str) -> Result<bool> {
        let ctx = &self.inner.ctx;
        ctx.registry.cancel_work(connection_id);
        let lock = self.lock_for(connection_id);
        let _serial = lock.lock().await;
        ctx.registry.remove(connection_id);
        ctx.queue.remove_connection(connection_id);
        guard(&self.inner.last_full_sync).remove(connection_id);
        // Waiters already holding the old lock see a missing row and bail.
        guard(&self.inner.locks).remove(connection_id);
        let deleted = ctx.db.lock().await.delete_connection(connection_id)?;
        if deleted {
            info!(connection_id, "connection deleted");
        }
        Ok(deleted)
    }

    /// Schedule a reconnect after `delay`.
    ///
    /// Returns false if one is already pending for the connection. The
    /// pending reconnect is dropped if the connection's work is cancelled.
    pub fn schedule_reconnect(&self, connection_id: &str, delay: Duration) -> bool {
        let ctx = &self.inner.ctx;
        let Some(token) = ctx.registry.connection_token(connection_id) else {
            return false;
        };
        if !guard(&self.inner.scheduled).insert(connection_id.to_string()) {
            debug!(connection_id, "reconnect already scheduled");
            return false;
        }
        info!(
            connection_id,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        let this = self.clone();
        let connection_id = connection_id.to_string();
        tokio::spawn(async move {
            let cancelled = tokio::select! {
                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            guard(&this.inner.scheduled).remove(&connection_id);
            if cancelled {
                info!(connection_id = %connection_id, "scheduled reconnect cancelled");
                return;
            }
            match this.connect(&connection_id, false).await {
                Ok(outcome) => debug!(connection_id = %connection_id, ?outcome, "reconnect finished"),
                Err(e) => error!(connection_id = %connection_id, error = %e, "reconnect failed"),
            }
        });
        true
    }

    #[cfg(test)]
    pub fn has_lock(&self, connection_id: &str) -> bool {
        guard(&self.inner.locks).contains_key(connection_id)
    }

    #[cfg(test)]
    pub fn is_reconnect_scheduled(&self, connection_id: &str) -> bool {
        guard(&self.inner.scheduled).contains(connection_id)
    }

    /// Load every stored connection and recover ones left mid-session.
    ///
    /// A row persisted as `connected`, `connecting` or `awaiting_qr` has no
    /// live session after a restart, so it is moved to `disconnected` and
    /// reconnected. Returns how many were scheduled.
    pub async fn reconcile_on_startup(&self) -> Result<usize> {
        let ctx = &self.inner.ctx;
        let records = ctx.db.lock().await.list_connections()?;
        let mut scheduled = 0;
        for record in records {
            if !record.status.has_session() {
                ctx.registry.register(&record.id, record.status);
                continue;
            }
            info!(
                connection_id = %record.id,
                status = %record.status,
                "recovering connection after restart"
            );
            ctx.db
                .lock()
                .await
                .update_connection_status(&record.id, ConnectionStatus::Disconnected)?;
            ctx.registry
                .register(&record.id, ConnectionStatus::Disconnected);
            if self.schedule_reconnect(&record.id, Duration::ZERO) {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }
}

#[cfg(test)]
#[path = "reconnect_tests.rs"]
mod tests;
