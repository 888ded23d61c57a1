// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::vault::{self, VaultKey};
use chrono::{Duration, TimeZone};
use yare::parameterized;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn msg(conn: &str, id: &str, counterpart: &str, secs: i64) -> Message {
    Message {
        connection_id: conn.to_string(),
        external_id: id.to_string(),
        counterpart: counterpart.to_string(),
        from_me: false,
        body: Some(format!("body {id}")),
        timestamp: at(secs),
    }
}

fn db_with(ids: &[&str]) -> Database {
    let db = Database::open_in_memory().unwrap();
    for id in ids {
        db.create_connection(id).unwrap();
    }
    db
}

#[test]
fn open_creates_file_and_parent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("zapline.db");
    let db = Database::open(&path).unwrap();
    db.create_connection("c1").unwrap();
    drop(db);

    let reopened = Database::open(&path).unwrap();
    assert!(reopened.connection_exists("c1").unwrap());
}

#[test]
fn create_and_get_connection() {
    let db = db_with(&["c1"]);
    let record = db.get_connection("c1").unwrap();
    assert_eq!(record.id, "c1");
    assert_eq!(record.status, ConnectionStatus::Disconnected);
    assert_eq!(record.reconnect_attempts, 0);
    assert!(!record.has_credentials);
    assert!(record.phone_number.is_none());
}

#[test]
fn create_duplicate_connection_fails() {
    let db = db_with(&["c1"]);
    let err = db.create_connection("c1").unwrap_err();
    assert!(matches!(err, Error::ConnectionExists(id) if id == "c1"));
}

#[parameterized(
    empty = { "" },
    blank = { "   " },
)]
fn create_rejects_blank_id(id: &str) {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
        db.create_connection(id),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn get_missing_connection_is_not_found() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
        db.get_connection("nope"),
        Err(Error::ConnectionNotFound(_))
    ));
}

#[test]
fn list_connections_orders_by_id() {
    let db = db_with(&["b", "a", "c"]);
    let ids: Vec<_> = db
        .list_connections()
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn list_connections_with_status_filters() {
    let db = db_with(&["a", "b", "c"]);
    db.update_connection_status("a", ConnectionStatus::Connected)
        .unwrap();
    db.update_connection_status("c", ConnectionStatus::Connected)
        .unwrap();

    let connected = db
        .list_connections_with_status(ConnectionStatus::Connected)
        .unwrap();
    let ids: Vec<_> = connected.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
}

#[test]
fn update_status_of_missing_connection_fails() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
        db.update_connection_status("x", ConnectionStatus::Connecting),
        Err(Error::ConnectionNotFound(_))
    ));
}

#[test]
fn mark_connected_resets_attempts_and_keeps_phone() {
    let db = db_with(&["c1"]);
    db.set_reconnect_attempts("c1", 4).unwrap();
    db.mark_connected("c1", Some("+15550001"), at(0)).unwrap();

    let record = db.get_connection("c1").unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.reconnect_attempts, 0);
    assert_eq!(record.last_connected_at, Some(at(0)));
    assert_eq!(record.phone_number.as_deref(), Some("+15550001"));

    // A later connect without a phone number keeps the known one
    db.mark_connected("c1", None, at(10)).unwrap();
    let record = db.get_connection("c1").unwrap();
    assert_eq!(record.phone_number.as_deref(), Some("+15550001"));
    assert_eq!(record.last_connected_at, Some(at(10)));
}

#[test]
fn touch_heartbeat_records_time() {
    let db = db_with(&["c1"]);
    db.touch_heartbeat("c1", at(5)).unwrap();
    assert_eq!(db.get_connection("c1").unwrap().last_heartbeat_at, Some(at(5)));
}

#[test]
fn credentials_round_trip_through_store() {
    let db = db_with(&["c1"]);
    let key = VaultKey::from_bytes([7u8; 32]);
    let sealed = vault::seal(&key, b"session-blob").unwrap();

    db.store_credentials("c1", &sealed).unwrap();
    assert!(db.get_connection("c1").unwrap().has_credentials);

    let loaded = db.load_credentials("c1").unwrap().unwrap();
    assert_eq!(vault::open(&key, &loaded).unwrap(), b"session-blob");

    db.clear_credentials("c1").unwrap();
    assert!(db.load_credentials("c1").unwrap().is_none());
    assert!(!db.get_connection("c1").unwrap().has_credentials);
}

#[test]
fn load_credentials_for_missing_connection_fails() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
        db.load_credentials("x"),
        Err(Error::ConnectionNotFound(_))
    ));
}

#[test]
fn upsert_message_is_idempotent() {
    let db = db_with(&["c1"]);
    let m = msg("c1", "m1", "alice", 0);
    assert!(db.upsert_message(&m).unwrap());
    assert!(!db.upsert_message(&m).unwrap());
    assert_eq!(db.count_messages("c1", None).unwrap(), 1);
}

#[test]
fn upsert_message_requires_connection() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.upsert_message(&msg("ghost", "m1", "alice", 0)).is_err());
}

#[test]
fn upsert_messages_returns_only_new_rows() {
    let mut db = db_with(&["c1"]);
    db.upsert_message(&msg("c1", "m2", "alice", 2)).unwrap();

    let batch = vec![
        msg("c1", "m1", "alice", 1),
        msg("c1", "m2", "alice", 2),
        msg("c1", "m3", "alice", 3),
    ];
    let inserted = db.upsert_messages(&batch).unwrap();
    let ids: Vec<_> = inserted.iter().map(|m| m.external_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m3"]);
    assert_eq!(db.count_messages("c1", Some("alice")).unwrap(), 3);
}

#[test]
fn same_external_id_on_different_connections_is_distinct() {
    let db = db_with(&["c1", "c2"]);
    assert!(db.upsert_message(&msg("c1", "m1", "alice", 0)).unwrap());
    assert!(db.upsert_message(&msg("c2", "m1", "alice", 0)).unwrap());
}

#[test]
fn get_messages_orders_by_timestamp_then_id() {
    let db = db_with(&["c1"]);
    db.upsert_message(&msg("c1", "b", "alice", 5)).unwrap();
    db.upsert_message(&msg("c1", "a", "alice", 5)).unwrap();
    db.upsert_message(&msg("c1", "z", "alice", 1)).unwrap();
    db.upsert_message(&msg("c1", "other", "bob", 0)).unwrap();

    let ids: Vec<_> = db
        .get_messages("c1", "alice")
        .unwrap()
        .into_iter()
        .map(|m| m.external_id)
        .collect();
    assert_eq!(ids, vec!["z", "a", "b"]);
}

#[test]
fn advance_conversation_creates_row() {
    let db = db_with(&["c1"]);
    let state = db
        .advance_conversation("c1", "alice", "m1", at(10), 1)
        .unwrap();
    assert_eq!(state.last_external_id.as_deref(), Some("m1"));
    assert_eq!(state.last_message_at, Some(at(10)));
    assert_eq!(state.unread_count, 1);
}

#[test]
fn advance_conversation_never_moves_backward() {
    let db = db_with(&["c1"]);
    db.advance_conversation("c1", "alice", "m5", at(50), 0)
        .unwrap();
    let state = db
        .advance_conversation("c1", "alice", "m1", at(10), 0)
        .unwrap();
    assert_eq!(state.last_external_id.as_deref(), Some("m5"));
    assert_eq!(state.last_message_at, Some(at(50)));
}

#[test]
fn advance_conversation_breaks_ties_by_external_id() {
    let db = db_with(&["c1"]);
    db.advance_conversation("c1", "alice", "b", at(10), 0)
        .unwrap();
    let state = db
        .advance_conversation("c1", "alice", "a", at(10), 0)
        .unwrap();
    assert_eq!(state.last_external_id.as_deref(), Some("b"));
    let state = db
        .advance_conversation("c1", "alice", "c", at(10), 0)
        .unwrap();
    assert_eq!(state.last_external_id.as_deref(), Some("c"));
}

#[test]
fn advance_conversation_accumulates_unread() {
    let db = db_with(&["c1"]);
    db.advance_conversation("c1", "alice", "m1", at(1), 2)
        .unwrap();
    let state = db
        .advance_conversation("c1", "alice", "m2", at(2), 3)
        .unwrap();
    assert_eq!(state.unread_count, 5);
}

#[test]
fn advance_after_sync_mark_sets_position() {
    let db = db_with(&["c1"]);
    db.mark_conversation_synced("c1", "alice", at(0)).unwrap();
    let state = db
        .advance_conversation("c1", "alice", "m1", at(3), 0)
        .unwrap();
    assert_eq!(state.last_message_at, Some(at(3)));
    assert_eq!(state.last_synced_at, Some(at(0)));
}

#[test]
fn mark_conversation_synced_preserves_position() {
    let db = db_with(&["c1"]);
    db.advance_conversation("c1", "alice", "m1", at(3), 1)
        .unwrap();
    db.mark_conversation_synced("c1", "alice", at(9)).unwrap();
    let state = db.get_conversation("c1", "alice").unwrap().unwrap();
    assert_eq!(state.last_external_id.as_deref(), Some("m1"));
    assert_eq!(state.unread_count, 1);
    assert_eq!(state.last_synced_at, Some(at(9)));
}

#[test]
fn recent_conversations_orders_by_activity() {
    let db = db_with(&["c1"]);
    db.advance_conversation("c1", "old", "m1", at(1), 0).unwrap();
    db.advance_conversation("c1", "new", "m2", at(9), 0).unwrap();
    db.advance_conversation("c1", "mid", "m3", at(5), 0).unwrap();
    db.mark_conversation_synced("c1", "empty", at(0)).unwrap();

    let names: Vec<_> = db
        .recent_conversations("c1", 3)
        .unwrap()
        .into_iter()
        .map(|c| c.counterpart)
        .collect();
    assert_eq!(names, vec!["new", "mid", "old"]);
}

#[test]
fn delete_connection_cascades() {
    let db = db_with(&["c1", "c2"]);
    db.upsert_message(&msg("c1", "m1", "alice", 0)).unwrap();
    db.advance_conversation("c1", "alice", "m1", at(0), 1)
        .unwrap();
    db.upsert_message(&msg("c2", "m1", "alice", 0)).unwrap();

    assert!(db.delete_connection("c1").unwrap());
    assert!(!db.connection_exists("c1").unwrap());
    assert_eq!(db.count_messages("c1", None).unwrap(), 0);
    assert!(db.get_conversation("c1", "alice").unwrap().is_none());
    assert_eq!(db.count_messages("c2", None).unwrap(), 1);

    assert!(!db.delete_connection("c1").unwrap());
}

#[test]
fn timestamps_survive_millisecond_precision() {
    let db = db_with(&["c1"]);
    let mut m = msg("c1", "m1", "alice", 0);
    m.timestamp += Duration::milliseconds(123);
    db.upsert_message(&m).unwrap();
    let loaded = db.get_messages("c1", "alice").unwrap();
    assert_eq!(loaded[0].timestamp, m.timestamp);
}
