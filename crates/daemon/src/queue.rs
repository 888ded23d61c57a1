// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Prioritized, de-duplicated sync queue.
//!
//! At most one pending item exists per `(connection, counterpart)` pair. A
//! duplicate enqueue at lower or equal priority is ignored; a higher one
//! upgrades the pending item in place and keeps its retry count.
//!
//! Items pop highest priority first, FIFO within a band. A popped item is
//! in flight until it is finished or requeued, and only one item per
//! connection may be in flight at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use zl_core::{SyncPriority, SyncReason};
use zl_ipc::QueueStats;

type Key = (String, String);

/// A pending resynchronization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub connection_id: String,
    pub counterpart: String,
    pub priority: SyncPriority,
    pub retries: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub reason: SyncReason,
    seq: u64,
}

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    Upgraded { from: SyncPriority },
    Ignored,
}

/// Result of a failed attempt being returned to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued { priority: SyncPriority, retries: u32 },
    Abandoned(SyncItem),
}

#[derive(Default)]
struct Inner {
    pending: HashMap<Key, SyncItem>,
    in_flight: HashSet<String>,
    next_seq: u64,
}

impl Inner {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Insert or merge an item that already carries retry state.
    fn merge(&mut self, mut item: SyncItem) {
        let key = (item.connection_id.clone(), item.counterpart.clone());
        match self.pending.get_mut(&key) {
            Some(existing) => {
                if item.priority > existing.priority {
                    existing.priority = item.priority;
                }
                existing.retries = existing.retries.max(item.retries);
            }
            None => {
                item.seq = self.seq();
                self.pending.insert(key, item);
            }
        }
    }
}

/// The sync work queue. Every operation holds the lock only briefly.
pub struct SyncQueue {
    inner: Mutex<Inner>,
    max_retries: u32,
}

impl SyncQueue {
    pub fn new(max_retries: u32) -> Self {
        SyncQueue {
            inner: Mutex::new(Inner::default()),
            max_retries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a sync request, honoring de-duplication.
    pub fn enqueue(
        &self,
        connection_id: &str,
        counterpart: &str,
        priority: SyncPriority,
        reason: SyncReason,
    ) -> EnqueueOutcome {
        let mut inner = self.lock();
        let key = (connection_id.to_string(), counterpart.to_string());
        if let Some(existing) = inner.pending.get_mut(&key) {
            if priority <= existing.priority {
                return EnqueueOutcome::Ignored;
            }
            let from = existing.priority;
            existing.priority = priority;
            existing.reason = reason;
            info!(
                connection_id,
                counterpart,
                from = %from,
                priority = %priority,
                "sync upgraded"
            );
            return EnqueueOutcome::Upgraded { from };
        }
        let seq = inner.seq();
        inner.pending.insert(
            key,
            SyncItem {
                connection_id: connection_id.to_string(),
                counterpart: counterpart.to_string(),
                priority,
                retries: 0,
                last_attempt_at: None,
                reason,
                seq,
            },
        );
        debug!(connection_id, counterpart, priority = %priority, reason = %reason, "sync enqueued");
        EnqueueOutcome::Added
    }

    /// Pop the next runnable item.
    ///
    /// Skips connections that already have an item in flight.
    pub fn pop_next(&self) -> Option<SyncItem> {
        let mut inner = self.lock();
        let key = inner
            .pending
            .iter()
            .filter(|(_, item)| !inner.in_flight.contains(&item.connection_id))
            .min_by(|(_, a), (_, b)| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)))
            .map(|(key, _)| key.clone())?;
        let mut item = inner.pending.remove(&key)?;
        inner.in_flight.insert(item.connection_id.clone());
        item.last_attempt_at = Some(Utc::now());
        Some(item)
    }

    /// Mark the connection's in-flight item done.
    pub fn finish(&self, connection_id: &str) {
        self.lock().in_flight.remove(connection_id);
    }

    /// Return a failed item, demoted one band with its retry count bumped.
    ///
    /// Drops it once the retry count reaches the limit.
    pub fn requeue_failed(&self, mut item: SyncItem) -> RetryOutcome {
        let mut inner = self.lock();
        inner.in_flight.remove(&item.connection_id);
        item.retries = item.retries.saturating_add(1);
        if item.retries >= self.max_retries {
            warn!(
                connection_id = %item.connection_id,
                counterpart = %item.counterpart,
                retries = item.retries,
                reason = %item.reason,
                "sync abandoned"
            );
            return RetryOutcome::Abandoned(item);
        }
        item.priority = item.priority.demote();
        let outcome = RetryOutcome::Requeued {
            priority: item.priority,
            retries: item.retries,
        };
        debug!(
            connection_id = %item.connection_id,
            counterpart = %item.counterpart,
            retries = item.retries,
            priority = %item.priority,
            "sync requeued after failure"
        );
        inner.merge(item);
        outcome
    }

    /// Return an item that could not run, at the same priority and without
    /// penalty. It goes to the back of its band.
    pub fn requeue_skipped(&self, item: SyncItem) {
        let mut inner = self.lock();
        inner.in_flight.remove(&item.connection_id);
        inner.merge(item);
    }

    /// Drop everything pending for a connection. Returns how many were removed.
    pub fn remove_connection(&self, connection_id: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.pending.len();
        inner.pending.retain(|(conn, _), _| conn != connection_id);
        before - inner.pending.len()
    }

    /// The pending item for a pair, if any.
    #[cfg(test)]
    pub fn get(&self, connection_id: &str, counterpart: &str) -> Option<SyncItem> {
        self.lock()
            .pending
            .get(&(connection_id.to_string(), counterpart.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue length and per-priority breakdown.
    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let mut stats = QueueStats {
            length: inner.pending.len(),
            in_flight: inner.in_flight.len(),
            ..QueueStats::default()
        };
        for item in inner.pending.values() {
            match item.priority {
                SyncPriority::Urgent => stats.urgent += 1,
                SyncPriority::High => stats.high += 1,
                SyncPriority::Normal => stats.normal += 1,
                SyncPriority::Low => stats.low += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
