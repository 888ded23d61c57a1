// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon state handed to every component.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use zl_core::{ConnectionStatus, Database, NotificationKind, VaultKey};

use crate::config::Config;
use crate::error::Result;
use crate::notify::NotificationHub;
use crate::queue::SyncQueue;
use crate::registry::Registry;
use crate::session::Connector;

/// Everything the background tasks and the IPC handler share.
///
/// The registry is injected here rather than living in a global so tests can
/// build isolated daemons side by side.
pub struct Context {
    pub config: Config,
    pub db: Mutex<Database>,
    pub registry: Registry,
    pub queue: SyncQueue,
    pub hub: NotificationHub,
    pub key: VaultKey,
    pub connector: Arc<dyn Connector>,
    /// Root token; cancelling it stops every loop and connection.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl Context {
    pub fn new(
        config: Config,
        db: Database,
        key: VaultKey,
        connector: Arc<dyn Connector>,
        shutdown: CancellationToken,
    ) -> Self {
        let queue = SyncQueue::new(config.sync_max_retries);
        Context {
            registry: Registry::new(shutdown.clone()),
            queue,
            hub: NotificationHub::new(),
            db: Mutex::new(db),
            config,
            key,
            connector,
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Apply a status change to the registry and the store, and notify.
    ///
    /// Returns false when the status was already `status`.
    pub async fn transition(&self, connection_id: &str, status: ConnectionStatus) -> Result<bool> {
        if self.registry.set_status(connection_id, status).is_none() {
            return Ok(false);
        }
        self.db
            .lock()
            .await
            .update_connection_status(connection_id, status)?;
        self.hub
            .notify(connection_id, NotificationKind::StatusChanged, status.as_str());
        Ok(true)
    }
}


#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
