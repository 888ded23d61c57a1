// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use zl_core::{Notification, Sealed};

use super::*;
use crate::config::Config;
use crate::context::testing::{add_connection, context};
use crate::session::mock::{remote, MockConnector, MockOutcome, MockSession};

async fn setup(config: Config) -> (Arc<Context>, Arc<MockConnector>, ReconnectController) {
    let (ctx, connector) = context(config);
    add_connection(&ctx, "c1", ConnectionStatus::Disconnected).await;
    let controller = ReconnectController::new(Arc::clone(&ctx));
    (ctx, connector, controller)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<Notification> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn statuses(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter(|n| n.kind == NotificationKind::StatusChanged)
        .map(|n| n.message.clone())
        .collect()
}

async fn store_credentials(ctx: &Context, plaintext: &[u8]) {
    let sealed = vault::seal(&ctx.key, plaintext).unwrap();
    ctx.db
        .lock()
        .await
        .store_credentials("c1", &sealed)
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn manual_connect_reaches_connected() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    connector.push(MockOutcome::Open(
        MockSession::open(),
        Some("+15550001".to_string()),
    ));
    let mut rx = ctx.hub.subscribe();

    let outcome = controller.connect("c1", true).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Connected);
    assert!(ctx.registry.is_usable("c1"));
    assert_eq!(statuses(&drain(&mut rx)), vec!["connecting", "connected"]);
    let record = ctx.db.lock().await.get_connection("c1").unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.phone_number.as_deref(), Some("+15550001"));
    assert_eq!(record.reconnect_attempts, 0);
    assert!(record.last_connected_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn connect_when_usable_is_a_no_op() {
    let (_ctx, connector, controller) = setup(Config::default()).await;
    controller.connect("c1", true).await.unwrap();
    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::AlreadyConnected
    );
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_unknown_connection_is_an_error() {
    let (_ctx, _connector, controller) = setup(Config::default()).await;
    let err = controller.connect("nope", true).await.unwrap_err();
    assert!(matches!(
        err,
        crate::error::Error::Core(zl_core::Error::ConnectionNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn credential_rejection_while_connecting_resets() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    store_credentials(&ctx, b"stale").await;
    connector.push(MockOutcome::Fail(SessionError::AuthRejected));
    let mut rx = ctx.hub.subscribe();

    let outcome = controller.connect("c1", true).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Reset);
    assert_eq!(connector.last_credentials(), Some(b"stale".to_vec()));
    assert!(ctx.db.lock().await.load_credentials("c1").unwrap().is_none());
    assert_eq!(
        ctx.registry.status("c1"),
        Some(ConnectionStatus::Disconnected)
    );
    let notifications = drain(&mut rx);
    assert_eq!(
        statuses(&notifications),
        vec!["connecting", "error", "disconnected"]
    );
    assert_eq!(
        notifications.last().map(|n| n.kind),
        Some(NotificationKind::ReconnectRequired)
    );
    assert!(!controller.is_reconnect_scheduled("c1"));
}

#[tokio::test(start_paused = true)]
async fn unreadable_credentials_reset_without_connecting() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    let garbage = Sealed {
        ciphertext: vec![1, 2, 3, 4],
        nonce: vec![0; 12],
    };
    ctx.db
        .lock()
        .await
        .store_credentials("c1", &garbage)
        .unwrap();

    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::Reset
    );
    assert_eq!(connector.connect_count(), 0);
    assert!(ctx.db.lock().await.load_credentials("c1").unwrap().is_none());
    assert_eq!(
        ctx.registry.status("c1"),
        Some(ConnectionStatus::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failure_schedules_retry() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    connector.push(MockOutcome::Fail(SessionError::ConnectFailed(
        "refused".to_string(),
    )));

    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::Retrying
    );
    assert_eq!(
        ctx.registry.status("c1"),
        Some(ConnectionStatus::Disconnected)
    );
    assert!(controller.is_reconnect_scheduled("c1"));

    tokio::time::sleep(ctx.config.reconnect_delay()).await;
    settle().await;

    assert_eq!(connector.connect_count(), 2);
    assert!(ctx.registry.is_usable("c1"));
    assert!(!controller.is_reconnect_scheduled("c1"));
    let record = ctx.db.lock().await.get_connection("c1").unwrap();
    assert_eq!(record.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn attempts_are_bounded_per_episode() {
    let config = Config {
        max_reconnect_attempts: 2,
        ..Config::default()
    };
    let (ctx, connector, controller) = setup(config).await;
    for _ in 0..3 {
        connector.push(MockOutcome::Fail(SessionError::Timeout));
    }

    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::Retrying
    );
    for _ in 0..3 {
        tokio::time::sleep(ctx.config.reconnect_delay()).await;
        settle().await;
    }

    assert_eq!(connector.connect_count(), 2);
    assert_eq!(ctx.registry.status("c1"), Some(ConnectionStatus::Error));
    assert!(!controller.is_reconnect_scheduled("c1"));

    // An operator connect starts a new episode.
    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::Retrying
    );
    assert_eq!(connector.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn reconnect_replaces_and_tears_down_previous_handle() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    controller.connect("c1", true).await.unwrap();
    let first = connector.sessions()[0].clone();
    first.set_open(false);

    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::Connected
    );
    assert_eq!(first.close_count(), 1);
    let second = connector.sessions()[1].clone();
    assert_eq!(second.close_count(), 0);
    assert!(ctx.registry.is_usable("c1"));
}

#[tokio::test(start_paused = true)]
async fn qr_connect_replaced_by_new_attempt() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    let pairing = MockSession::open();
    connector.push(MockOutcome::Qr(Arc::clone(&pairing), "2@abc".to_string()));

    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::AwaitingQr
    );
    assert_eq!(ctx.registry.status("c1"), Some(ConnectionStatus::AwaitingQr));
    assert!(!ctx.registry.is_usable("c1"));

    assert_eq!(
        controller.connect("c1", true).await.unwrap(),
        ConnectOutcome::Connected
    );
    assert_eq!(pairing.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_scheduled_reconnect() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    connector.push(MockOutcome::Fail(SessionError::Timeout));
    controller.connect("c1", true).await.unwrap();
    assert!(controller.is_reconnect_scheduled("c1"));

    controller.disconnect("c1").await.unwrap();
    settle().await;
    tokio::time::sleep(ctx.config.reconnect_delay() * 2).await;
    settle().await;

    assert_eq!(connector.connect_count(), 1);
    assert!(!controller.is_reconnect_scheduled("c1"));
    assert_eq!(
        ctx.registry.status("c1"),
        Some(ConnectionStatus::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_tears_down_live_session() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    controller.connect("c1", true).await.unwrap();
    let session = connector.sessions()[0].clone();

    controller.disconnect("c1").await.unwrap();

    assert_eq!(session.close_count(), 1);
    assert!(ctx.registry.get("c1").is_none());
    assert_eq!(
        ctx.db.lock().await.get_connection("c1").unwrap().status,
        ConnectionStatus::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn schedule_reconnect_is_deduplicated() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    assert!(controller.schedule_reconnect("c1", ctx.config.reconnect_delay()));
    assert!(!controller.schedule_reconnect("c1", ctx.config.reconnect_delay()));
    assert!(!controller.schedule_reconnect("unknown", Duration::ZERO));

    tokio::time::sleep(ctx.config.reconnect_delay()).await;
    settle().await;
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connected_schedules_debounced_full_sync() {
    let (ctx, _connector, controller) = setup(Config::default()).await;
    crate::engine::ingest(
        &ctx,
        "c1",
        vec![
            remote("a", "alice", 1).into_message("c1"),
            remote("b", "bob", 2).into_message("c1"),
        ],
    )
    .await
    .unwrap();

    controller.connect("c1", true).await.unwrap();
    let item = ctx.queue.get("c1", "alice").unwrap();
    assert_eq!(item.priority, SyncPriority::Normal);
    assert_eq!(item.reason, SyncReason::Reconnected);
    assert_eq!(ctx.queue.len(), 2);

    ctx.queue.remove_connection("c1");
    assert_eq!(controller.schedule_full_sync("c1").await.unwrap(), 0);

    tokio::time::sleep(ctx.config.full_sync_debounce()).await;
    assert_eq!(controller.schedule_full_sync("c1").await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn startup_reconciliation_reconnects_stale_rows() {
    let (ctx, connector) = context(Config::default());
    {
        let db = ctx.db.lock().await;
        for (id, status) in [
            ("live", ConnectionStatus::Connected),
            ("pairing", ConnectionStatus::AwaitingQr),
            ("idle", ConnectionStatus::Disconnected),
            ("broken", ConnectionStatus::Error),
        ] {
            db.create_connection(id).unwrap();
            db.update_connection_status(id, status).unwrap();
        }
    }
    let controller = ReconnectController::new(Arc::clone(&ctx));

    assert_eq!(controller.reconcile_on_startup().await.unwrap(), 2);
    assert_eq!(ctx.registry.len(), 4);
    assert_eq!(ctx.registry.status("broken"), Some(ConnectionStatus::Error));
    assert_eq!(
        ctx.db.lock().await.get_connection("live").unwrap().status,
        ConnectionStatus::Disconnected
    );

    settle().await;
    assert_eq!(connector.connect_count(), 2);
    assert!(ctx.registry.is_usable("live"));
    assert!(ctx.registry.is_usable("pairing"));
    assert_eq!(ctx.registry.status("idle"), Some(ConnectionStatus::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn delete_forgets_everything() {
    let (ctx, connector, controller) = setup(Config::default()).await;
    controller.connect("c1", true).await.unwrap();
    ctx.queue
        .enqueue("c1", "alice", SyncPriority::High, SyncReason::ManualRequest);
    let session = connector.sessions()[0].clone();

    assert!(controller.delete("c1").await.unwrap());

    assert_eq!(session.close_count(), 1);
    assert!(!ctx.registry.contains("c1"));
    assert!(ctx.queue.is_empty());
    assert!(!ctx.db.lock().await.connection_exists("c1").unwrap());
    assert!(!controller.delete("c1").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn delete_releases_the_connection_lock() {
    let (_ctx, _connector, controller) = setup(Config::default()).await;
    controller.connect("c1", true).await.unwrap();
    assert!(controller.has_lock("c1"));

    controller.delete("c1").await.unwrap();
    assert!(!controller.has_lock("c1"));
}

#[tokio::test(start_paused = true)]
async fn operator_reset_clears_credentials() {
    let (ctx, _connector, controller) = setup(Config::default()).await;
    controller.connect("c1", true).await.unwrap();
    store_credentials(&ctx, b"creds").await;

    controller.reset("c1", "operator reset").await.unwrap();

    assert!(ctx.db.lock().await.load_credentials("c1").unwrap().is_none());
    assert!(ctx.registry.get("c1").is_none());
    assert_eq!(
        ctx.registry.status("c1"),
        Some(ConnectionStatus::Disconnected)
    );
}
