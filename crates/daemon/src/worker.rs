// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync queue drain loop.
//!
//! Each tick pops up to the worker cap of items, at most one per connection,
//! and runs them concurrently through the sync engine. All of them finish
//! within the tick.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use zl_core::{NotificationKind, SyncReason};

use crate::context::Context;
use crate::engine::{SyncEngine, SyncOutcome};
use crate::queue::{RetryOutcome, SyncItem};

/// What one drain tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub abandoned: usize,
}

#[derive(Clone)]
pub struct SyncWorker {
    ctx: Arc<Context>,
    engine: SyncEngine,
}

impl SyncWorker {
    pub fn new(ctx: Arc<Context>) -> Self {
        SyncWorker {
            engine: SyncEngine::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Heartbeat pulls are small; everything else fetches the full window.
    fn fetch_limit(&self, item: &SyncItem) -> usize {
        match item.reason {
            SyncReason::PeriodicSync => self.ctx.config.heartbeat_fetch_limit,
            SyncReason::GapDetected | SyncReason::ManualRequest | SyncReason::Reconnected => {
                self.ctx.config.sync_fetch_limit
            }
        }
    }

    /// Run one drain tick.
    pub async fn drain_once(&self) -> DrainReport {
        let ctx = &self.ctx;
        let mut report = DrainReport::default();
        let mut skipped = Vec::new();
        let mut running = JoinSet::new();
        let mut started = Vec::new();

        while running.len() < ctx.config.max_concurrent_syncs {
            let Some(item) = ctx.queue.pop_next() else {
                break;
            };
            if !ctx.registry.is_usable(&item.connection_id) {
                skipped.push(item);
                continue;
            }
            let Some(token) = ctx.registry.connection_token(&item.connection_id) else {
                skipped.push(item);
                continue;
            };
            started.push(item.connection_id.clone());
            let engine = self.engine.clone();
            let limit = self.fetch_limit(&item);
            running.spawn(async move {
                let outcome = tokio::select! {
                    _ = token.cancelled() => SyncOutcome::NotAttempted,
                    outcome = engine.sync(&item.connection_id, &item.counterpart, limit) => outcome,
                };
                (item, outcome)
            });
        }

        // Requeued only now so this tick does not pop them again.
        for item in skipped {
            self.defer(item, &mut report);
        }

        while let Some(joined) = running.join_next().await {
            let (item, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "sync task failed");
                    continue;
                }
            };
            match outcome {
                SyncOutcome::Synced => {
                    ctx.queue.finish(&item.connection_id);
                    report.succeeded += 1;
                }
                SyncOutcome::NotAttempted => {
                    ctx.queue.finish(&item.connection_id);
                    self.defer(item, &mut report);
                }
                SyncOutcome::Failed if !ctx.registry.contains(&item.connection_id) => {
                    // Deleted while syncing.
                    ctx.queue.finish(&item.connection_id);
                }
                SyncOutcome::Failed => {
                    report.failed += 1;
                    if let RetryOutcome::Abandoned(item) = ctx.queue.requeue_failed(item) {
                        report.abandoned += 1;
                        ctx.hub.notify(
                            &item.connection_id,
                            NotificationKind::SyncAbandoned,
                            item.counterpart.as_str(),
                        );
                    }
                }
            }
        }
        // Release connections whose task died without reporting back.
        for connection_id in started {
            ctx.queue.finish(&connection_id);
        }
        report
    }

    /// Put back an item that was never tried, keeping its priority and
    /// retry count. Items of deleted connections are dropped.
    fn defer(&self, item: SyncItem, report: &mut DrainReport) {
        if !self.ctx.registry.contains(&item.connection_id) {
            debug!(
                connection_id = %item.connection_id,
                counterpart = %item.counterpart,
                "sync dropped, connection deleted"
            );
            return;
        }
        debug!(
            connection_id = %item.connection_id,
            counterpart = %item.counterpart,
            "sync deferred, connection not usable"
        );
        report.skipped += 1;
        self.ctx.queue.requeue_skipped(item);
    }

    /// Drain the queue each interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.ctx.config.queue_drain_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let report = tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.drain_once() => report,
            };
            if report != DrainReport::default() {
                debug!(?report, "queue drained");
            }
        }
        debug!("sync worker stopped");
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
