// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry.
//!
//! In-memory map of connection id to live session handle and status. It is
//! the only owner of session handles: other components resolve a handle by
//! id for the duration of one call and never keep it.
//!
//! Each connection carries two cancellation tokens:
//! - a connection token (child of the daemon's root token) that stops every
//!   background task for the connection, including scheduled reconnects;
//! - a session token (child of the connection token) that stops work tied to
//!   the current handle, such as its event pump. It is replaced with the
//!   handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use zl_core::ConnectionStatus;

use crate::session::SessionHandle;

struct Entry {
    status: ConnectionStatus,
    handle: Option<Arc<dyn SessionHandle>>,
    connection_token: CancellationToken,
    session_token: CancellationToken,
    heartbeat_failures: u32,
    /// When the current session last reached `connected`.
    connected_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(status: ConnectionStatus, root: &CancellationToken) -> Self {
        let connection_token = root.child_token();
        let session_token = connection_token.child_token();
        Entry {
            status,
            handle: None,
            connection_token,
            session_token,
            heartbeat_failures: 0,
            connected_at: None,
        }
    }

    /// Signal teardown of the current handle and stop its session-scoped work.
    fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        self.session_token.cancel();
        self.session_token = self.connection_token.child_token();
    }
}

/// Registry of live sessions, keyed by connection id.
pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    root: CancellationToken,
}

impl Registry {
    /// Create a registry whose connection tokens descend from `root`.
    pub fn new(root: CancellationToken) -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
            root,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a connection known to the registry. No-op if it already is.
    pub fn register(&self, connection_id: &str, status: ConnectionStatus) {
        let mut entries = self.lock();
        if !entries.contains_key(connection_id) {
            entries.insert(connection_id.to_string(), Entry::new(status, &self.root));
        }
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.lock().contains_key(connection_id)
    }

    /// Known connection ids, sorted.
    #[cfg(test)]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of connections currently in `status`.
    pub fn ids_with_status(&self, status: ConnectionStatus) -> Vec<String> {
        let mut ids: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, e)| e.status == status)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The live handle, if any.
    pub fn get(&self, connection_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.lock()
            .get(connection_id)
            .and_then(|e| e.handle.as_ref().map(Arc::clone))
    }

    /// Install a new handle, tearing down any previous one first.
    ///
    /// Returns the session token scoped to the new handle.
    pub fn set(&self, connection_id: &str, handle: Arc<dyn SessionHandle>) -> CancellationToken {
        let mut entries = self.lock();
        let entry = entries
            .entry(connection_id.to_string())
            .or_insert_with(|| Entry::new(ConnectionStatus::Disconnected, &self.root));
        if entry.handle.is_some() {
            debug!(connection_id, "replacing session handle");
        }
        entry.teardown();
        entry.handle = Some(handle);
        entry.heartbeat_failures = 0;
        entry.session_token.clone()
    }

    /// Tear down the current handle but keep the connection known.
    pub fn detach(&self, connection_id: &str) {
        if let Some(entry) = self.lock().get_mut(connection_id) {
            entry.teardown();
            entry.heartbeat_failures = 0;
        }
    }

    /// Cancel all background work for a connection and start a fresh token.
    ///
    /// Used when the operator disconnects: scheduled reconnects and in-flight
    /// syncs stop, but the connection stays registered.
    pub fn cancel_work(&self, connection_id: &str) {
        if let Some(entry) = self.lock().get_mut(connection_id) {
            entry.teardown();
            entry.connection_token.cancel();
            entry.connection_token = self.root.child_token();
            entry.session_token = entry.connection_token.child_token();
            entry.heartbeat_failures = 0;
        }
    }

    /// Tear down and forget a connection. Returns false if it was unknown.
    pub fn remove(&self, connection_id: &str) -> bool {
        match self.lock().remove(connection_id) {
            Some(mut entry) => {
                entry.teardown();
                entry.connection_token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, connection_id: &str) -> Option<ConnectionStatus> {
        self.lock().get(connection_id).map(|e| e.status)
    }

    /// Record a status change.
    ///
    /// Returns the previous status when the status actually changed. A
    /// transition the state machine does not allow is logged as an invariant
    /// violation and applied anyway so the registry never disagrees with
    /// what the caller observed.
    pub fn set_status(
        &self,
        connection_id: &str,
        status: ConnectionStatus,
    ) -> Option<ConnectionStatus> {
        let mut entries = self.lock();
        let entry = entries.get_mut(connection_id)?;
        let old = entry.status;
        if old == status {
            return None;
        }
        if let Err(e) = old.check_transition(status) {
            error!(connection_id, old = %old, new = %status, "{}", e);
        }
        info!(connection_id, old = %old, new = %status, "status transition");
        entry.status = status;
        if status == ConnectionStatus::Connected {
            entry.connected_at = Some(Utc::now());
        }
        Some(old)
    }

    /// True only if the status is `connected` and the transport reports open.
    pub fn is_usable(&self, connection_id: &str) -> bool {
        self.lock().get(connection_id).is_some_and(|e| {
            e.status == ConnectionStatus::Connected
                && e.handle.as_ref().is_some_and(|h| h.is_open())
        })
    }

    /// Status says connected but the transport does not.
    pub fn is_stale(&self, connection_id: &str) -> bool {
        self.lock().get(connection_id).is_some_and(|e| {
            e.status == ConnectionStatus::Connected
                && !e.handle.as_ref().is_some_and(|h| h.is_open())
        })
    }

    /// Count usable connections.
    pub fn usable_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| {
                e.status == ConnectionStatus::Connected
                    && e.handle.as_ref().is_some_and(|h| h.is_open())
            })
            .count()
    }

    pub fn connection_token(&self, connection_id: &str) -> Option<CancellationToken> {
        self.lock()
            .get(connection_id)
            .map(|e| e.connection_token.clone())
    }

    pub fn connected_at(&self, connection_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(connection_id).and_then(|e| e.connected_at)
    }

    /// Record a failed heartbeat and return the consecutive failure count.
    pub fn record_heartbeat_failure(&self, connection_id: &str) -> u32 {
        match self.lock().get_mut(connection_id) {
            Some(entry) => {
                entry.heartbeat_failures = entry.heartbeat_failures.saturating_add(1);
                entry.heartbeat_failures
            }
            None => 0,
        }
    }

    pub fn reset_heartbeat_failures(&self, connection_id: &str) {
        if let Some(entry) = self.lock().get_mut(connection_id) {
            entry.heartbeat_failures = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
