// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use zl_core::{ConnectionStatus, SyncPriority};

use super::*;
use crate::config::Config;
use crate::context::testing::{add_connection, context};
use crate::error::SessionError;
use crate::session::mock::{remote, MockSession};
use crate::session::{FetchError, SessionHandle};

async fn with_sessions(config: Config, ids: &[&str]) -> (Arc<Context>, Vec<Arc<MockSession>>) {
    let (ctx, _) = context(config);
    let mut sessions = Vec::new();
    for id in ids {
        add_connection(&ctx, id, ConnectionStatus::Connected).await;
        let session = MockSession::open();
        ctx.registry
            .set(id, Arc::clone(&session) as Arc<dyn SessionHandle>);
        sessions.push(session);
    }
    (ctx, sessions)
}

fn fetch_failure() -> Result<Vec<crate::session::RemoteMessage>, FetchError> {
    Err(FetchError::from(SessionError::Protocol("boom".to_string())))
}

#[tokio::test]
async fn successful_sync_is_removed_from_queue() {
    let (ctx, sessions) = with_sessions(Config::default(), &["c1"]).await;
    sessions[0].set_history(vec![remote("a", "alice", 1), remote("b", "alice", 2)]);
    ctx.queue
        .enqueue("c1", "alice", SyncPriority::High, SyncReason::GapDetected);

    let report = SyncWorker::new(Arc::clone(&ctx)).drain_once().await;

    assert_eq!(report.succeeded, 1);
    assert!(ctx.queue.is_empty());
    assert_eq!(ctx.queue.stats().in_flight, 0);
    assert_eq!(
        ctx.db
            .lock()
            .await
            .count_messages("c1", Some("alice"))
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn unusable_connection_is_skipped_without_penalty() {
    let (ctx, sessions) = with_sessions(Config::default(), &["c1"]).await;
    sessions[0].set_open(false);
    ctx.queue
        .enqueue("c1", "alice", SyncPriority::High, SyncReason::GapDetected);

    let report = SyncWorker::new(Arc::clone(&ctx)).drain_once().await;

    assert_eq!(report.skipped, 1);
    assert_eq!(sessions[0].fetch_calls(), 0);
    let item = ctx.queue.get("c1", "alice").unwrap();
    assert_eq!(item.priority, SyncPriority::High);
    assert_eq!(item.retries, 0);
}

#[tokio::test]
async fn teardown_cancels_in_flight_sync_without_penalty() {
    let (ctx, sessions) = with_sessions(Config::default(), &["c1"]).await;
    sessions[0].hang_fetch();
    ctx.queue
        .enqueue("c1", "alice", SyncPriority::Urgent, SyncReason::ManualRequest);
    let worker = SyncWorker::new(Arc::clone(&ctx));
    let drain = tokio::spawn(async move { worker.drain_once().await });

    while sessions[0].fetch_calls() == 0 {
        tokio::task::yield_now().await;
    }
    ctx.registry.cancel_work("c1");
    let report = drain.await.unwrap();

    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 1);
    let item = ctx.queue.get("c1", "alice").unwrap();
    assert_eq!(item.priority, SyncPriority::Urgent);
    assert_eq!(item.retries, 0);
    assert_eq!(ctx.queue.stats().in_flight, 0);
}

#[tokio::test]
async fn removed_connection_during_sync_drops_item() {
    let (ctx, sessions) = with_sessions(Config::default(), &["c1"]).await;
    sessions[0].hang_fetch();
    ctx.queue
        .enqueue("c1", "alice", SyncPriority::High, SyncReason::GapDetected);
    let worker = SyncWorker::new(Arc::clone(&ctx));
    let drain = tokio::spawn(async move { worker.drain_once().await });

    while sessions[0].fetch_calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(ctx.registry.remove("c1"));
    let report = drain.await.unwrap();

    assert_eq!(report, DrainReport::default());
    assert!(ctx.queue.is_empty());
    assert_eq!(ctx.queue.stats().in_flight, 0);
}

#[tokio::test]
async fn item_for_unknown_connection_is_dropped_not_deferred() {
    let (ctx, _) = with_sessions(Config::default(), &["c1"]).await;
    ctx.queue
        .enqueue("gone", "alice", SyncPriority::Normal, SyncReason::ManualRequest);

    let report = SyncWorker::new(Arc::clone(&ctx)).drain_once().await;

    assert_eq!(report.skipped, 0);
    assert!(ctx.queue.is_empty());
}

#[tokio::test]
async fn repeated_failure_demotes_then_abandons() {
    let (ctx, sessions) = with_sessions(Config::default(), &["c1"]).await;
    for _ in 0..3 {
        sessions[0].push_fetch(fetch_failure());
    }
    ctx.queue
        .enqueue("c1", "alice", SyncPriority::Urgent, SyncReason::ManualRequest);
    let mut rx = ctx.hub.subscribe();
    let worker = SyncWorker::new(Arc::clone(&ctx));

    let first = worker.drain_once().await;
    assert_eq!(first.failed, 1);
    let item = ctx.queue.get("c1", "alice").unwrap();
    assert_eq!(item.priority, SyncPriority::High);
    assert_eq!(item.retries, 1);

    worker.drain_once().await;
    let last = worker.drain_once().await;
    assert_eq!(last.abandoned, 1);
    assert!(ctx.queue.is_empty());
    assert_eq!(sessions[0].fetch_calls(), 3);

    let abandoned = std::iter::from_fn(|| rx.try_recv().ok())
        .find(|n| n.kind == NotificationKind::SyncAbandoned)
        .unwrap();
    assert_eq!(abandoned.message, "alice");
}

#[tokio::test]
async fn one_sync_per_connection_per_tick() {
    let (ctx, sessions) = with_sessions(Config::default(), &["c1"]).await;
    ctx.queue
        .enqueue("c1", "alice", SyncPriority::High, SyncReason::GapDetected);
    ctx.queue
        .enqueue("c1", "bob", SyncPriority::Normal, SyncReason::ManualRequest);
    let worker = SyncWorker::new(Arc::clone(&ctx));

    assert_eq!(worker.drain_once().await.succeeded, 1);
    assert_eq!(ctx.queue.len(), 1);
    assert!(ctx.queue.get("c1", "bob").is_some());
    assert_eq!(worker.drain_once().await.succeeded, 1);
    assert_eq!(sessions[0].fetch_calls(), 2);
}

#[tokio::test]
async fn worker_cap_bounds_syncs_per_tick() {
    let config = Config {
        max_concurrent_syncs: 2,
        ..Config::default()
    };
    let (ctx, _) = with_sessions(config, &["c1", "c2", "c3"]).await;
    for id in ["c1", "c2", "c3"] {
        ctx.queue
            .enqueue(id, "alice", SyncPriority::Normal, SyncReason::ManualRequest);
    }

    let report = SyncWorker::new(Arc::clone(&ctx)).drain_once().await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(ctx.queue.len(), 1);
}

#[tokio::test]
async fn periodic_pull_uses_small_fetch_limit() {
    let config = Config {
        heartbeat_fetch_limit: 3,
        sync_fetch_limit: 8,
        ..Config::default()
    };
    let (ctx, sessions) = with_sessions(config, &["c1"]).await;
    sessions[0].set_history((0..20).map(|i| remote(&format!("m{i:02}"), "alice", i)).collect());
    let worker = SyncWorker::new(Arc::clone(&ctx));

    ctx.queue
        .enqueue("c1", "alice", SyncPriority::Low, SyncReason::PeriodicSync);
    worker.drain_once().await;
    let count = || async {
        ctx.db
            .lock()
            .await
            .count_messages("c1", Some("alice"))
            .unwrap()
    };
    assert_eq!(count().await, 3);

    ctx.queue
        .enqueue("c1", "alice", SyncPriority::High, SyncReason::GapDetected);
    worker.drain_once().await;
    assert_eq!(count().await, 8);
}

#[tokio::test(start_paused = true)]
async fn run_drains_each_interval_until_cancelled() {
    let (ctx, sessions) = with_sessions(Config::default(), &["c1"]).await;
    sessions[0].set_history(vec![remote("a", "alice", 1)]);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(SyncWorker::new(Arc::clone(&ctx)).run(cancel.clone()));

    ctx.queue
        .enqueue("c1", "alice", SyncPriority::Normal, SyncReason::ManualRequest);
    tokio::time::sleep(ctx.config.queue_drain_interval() + Duration::from_millis(1)).await;
    assert!(ctx.queue.is_empty());
    assert_eq!(sessions[0].fetch_calls(), 1);

    cancel.cancel();
    task.await.unwrap();
}
