// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! zl-core: Shared library for the zapline connection core
//!
//! This crate provides the domain types, SQLite store, and credential vault
//! used by both the `zap` operator CLI and the `zaplined` daemon.

pub mod connection;
pub mod db;
pub mod error;
pub mod message;
pub mod notification;
pub mod sync;
pub mod vault;

pub use connection::{ConnectionRecord, ConnectionStatus};
pub use db::Database;
pub use error::{Error, Result};
pub use message::{sort_messages, ConversationState, Message};
pub use notification::{Notification, NotificationKind, SyncCounts};
pub use sync::{SyncPriority, SyncReason};
pub use vault::{Sealed, VaultKey};
