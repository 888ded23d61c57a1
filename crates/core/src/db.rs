// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed store for connections, messages, and conversation state.
//!
//! The [`Database`] struct provides all data access operations used by the
//! daemon. Message writes are idempotent upserts keyed by the protocol's
//! external id so that sync and live inbound processing can race safely.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::connection::{ConnectionRecord, ConnectionStatus};
use crate::error::{Error, Result};
use crate::message::{ConversationState, Message};
use crate::vault::Sealed;

/// SQL schema for the connection store.
pub const SCHEMA: &str = r#"
-- One row per tenant connection
CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    phone_number TEXT,
    status TEXT NOT NULL DEFAULT 'disconnected',
    last_connected_at TEXT,
    last_heartbeat_at TEXT,
    reconnect_attempts INTEGER NOT NULL DEFAULT 0,
    credentials BLOB,
    credentials_nonce BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Messages keyed by the protocol-assigned id
CREATE TABLE IF NOT EXISTS messages (
    connection_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    counterpart TEXT NOT NULL,
    from_me INTEGER NOT NULL DEFAULT 0,
    body TEXT,
    timestamp INTEGER NOT NULL,      -- unix millis, protocol-provided
    created_at TEXT NOT NULL,
    PRIMARY KEY (connection_id, external_id),
    FOREIGN KEY (connection_id) REFERENCES connections(id) ON DELETE CASCADE
);

-- Forward-only conversation position
CREATE TABLE IF NOT EXISTS conversations (
    connection_id TEXT NOT NULL,
    counterpart TEXT NOT NULL,
    last_external_id TEXT,
    last_message_at INTEGER,         -- unix millis
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT,
    PRIMARY KEY (connection_id, counterpart),
    FOREIGN KEY (connection_id) REFERENCES connections(id) ON DELETE CASCADE
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_connections_status ON connections(status);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(connection_id, counterpart, timestamp);
CREATE INDEX IF NOT EXISTS idx_conversations_recent ON conversations(connection_id, last_message_at DESC);
"#;

/// Parse a string value from the database, returning a rusqlite error on parse failure.
fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid value '{value}' in column '{column}'"
            ))),
        )
    })
}

/// Parse an RFC3339 timestamp from the database.
fn parse_timestamp(
    value: &str,
    column: &str,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(Error::CorruptedData(format!(
                    "invalid timestamp '{value}' in column '{column}'"
                ))),
            )
        })
}

/// Parse an optional RFC3339 timestamp from the database.
fn parse_timestamp_opt(
    value: Option<String>,
    column: &str,
) -> std::result::Result<Option<DateTime<Utc>>, rusqlite::Error> {
    value.map(|s| parse_timestamp(&s, column)).transpose()
}

/// Convert unix millis from the database into a timestamp.
fn parse_millis(value: i64, column: &str) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            Box::new(Error::CorruptedData(format!(
                "invalid millis '{value}' in column '{column}'"
            ))),
        )
    })
}

const CONNECTION_COLUMNS: &str = "id, phone_number, status, last_connected_at, last_heartbeat_at,
     reconnect_attempts, credentials IS NOT NULL, created_at, updated_at";

fn connection_from_row(row: &Row<'_>) -> std::result::Result<ConnectionRecord, rusqlite::Error> {
    let status_str: String = row.get(2)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;
    Ok(ConnectionRecord {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        status: parse_db(&status_str, "status")?,
        last_connected_at: parse_timestamp_opt(row.get(3)?, "last_connected_at")?,
        last_heartbeat_at: parse_timestamp_opt(row.get(4)?, "last_heartbeat_at")?,
        reconnect_attempts: row.get(5)?,
        has_credentials: row.get(6)?,
        created_at: parse_timestamp(&created_str, "created_at")?,
        updated_at: parse_timestamp(&updated_str, "updated_at")?,
    })
}

const CONVERSATION_COLUMNS: &str =
    "connection_id, counterpart, last_external_id, last_message_at, unread_count, last_synced_at";

fn conversation_from_row(
    row: &Row<'_>,
) -> std::result::Result<ConversationState, rusqlite::Error> {
    let last_message_ms: Option<i64> = row.get(3)?;
    Ok(ConversationState {
        connection_id: row.get(0)?,
        counterpart: row.get(1)?,
        last_external_id: row.get(2)?,
        last_message_at: last_message_ms
            .map(|ms| parse_millis(ms, "last_message_at"))
            .transpose()?,
        unread_count: row.get(4)?,
        last_synced_at: parse_timestamp_opt(row.get(5)?, "last_synced_at")?,
    })
}

/// Run schema creation on a database connection.
///
/// This is the single migration path for every crate that opens the store.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// SQLite database connection with connection-store operations.
pub struct Database {
    /// The underlying SQLite connection.
    pub conn: Connection,
}

impl Database {
    /// Open a database connection at the given path, creating and migrating if needed.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for concurrency
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let db = Database { conn };
        run_migrations(&db.conn)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        run_migrations(&db.conn)?;
        Ok(db)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Create a new disconnected connection.
    pub fn create_connection(&self, id: &str) -> Result<ConnectionRecord> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("connection id cannot be empty".into()));
        }
        if self.connection_exists(id)? {
            return Err(Error::ConnectionExists(id.to_string()));
        }
        let record = ConnectionRecord::new(id.to_string(), Utc::now());
        self.conn.execute(
            "INSERT INTO connections (id, status, reconnect_attempts, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![
                record.id,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    /// Check if a connection exists.
    pub fn connection_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM connections WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get a connection by ID.
    pub fn get_connection(&self, id: &str) -> Result<ConnectionRecord> {
        let sql = format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], connection_from_row)
            .optional()?
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))
    }

    /// List all connections ordered by id.
    pub fn list_connections(&self) -> Result<Vec<ConnectionRecord>> {
        let sql = format!("SELECT {CONNECTION_COLUMNS} FROM connections ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], connection_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// List connections currently persisted with the given status.
    pub fn list_connections_with_status(
        &self,
        status: ConnectionStatus,
    ) -> Result<Vec<ConnectionRecord>> {
        let sql =
            format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE status = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str()], connection_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persist a status change.
    pub fn update_connection_status(&self, id: &str, status: ConnectionStatus) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE connections SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if affected == 0 {
            return Err(Error::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Record a successful connect: status, timestamp, phone, attempt reset.
    pub fn mark_connected(
        &self,
        id: &str,
        phone_number: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE connections
             SET status = ?1, last_connected_at = ?2, reconnect_attempts = 0,
                 phone_number = COALESCE(?3, phone_number), updated_at = ?2
             WHERE id = ?4",
            params![
                ConnectionStatus::Connected.as_str(),
                at.to_rfc3339(),
                phone_number,
                id
            ],
        )?;
        if affected == 0 {
            return Err(Error::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Record a successful heartbeat.
    pub fn touch_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE connections SET last_heartbeat_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Persist the reconnect attempt counter.
    pub fn set_reconnect_attempts(&self, id: &str, attempts: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE connections SET reconnect_attempts = ?1, updated_at = ?2 WHERE id = ?3",
            params![attempts, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Delete a connection along with its messages and conversations.
    ///
    /// Returns false if the connection did not exist.
    pub fn delete_connection(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM connections WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Store sealed session credentials.
    pub fn store_credentials(&self, id: &str, sealed: &Sealed) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE connections SET credentials = ?1, credentials_nonce = ?2, updated_at = ?3
             WHERE id = ?4",
            params![sealed.ciphertext, sealed.nonce, Utc::now().to_rfc3339(), id],
        )?;
        if affected == 0 {
            return Err(Error::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Load sealed session credentials, if any.
    pub fn load_credentials(&self, id: &str) -> Result<Option<Sealed>> {
        let row: Option<(Option<Vec<u8>>, Option<Vec<u8>>)> = self
            .conn
            .query_row(
                "SELECT credentials, credentials_nonce FROM connections WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Err(Error::ConnectionNotFound(id.to_string())),
            Some((Some(ciphertext), Some(nonce))) => Ok(Some(Sealed { ciphertext, nonce })),
            Some((None, None)) => Ok(None),
            Some(_) => Err(Error::CorruptedData(format!(
                "connection {id} has credentials without nonce"
            ))),
        }
    }

    /// Remove stored credentials.
    pub fn clear_credentials(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE connections SET credentials = NULL, credentials_nonce = NULL, updated_at = ?1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Insert a message unless one with the same external id already exists.
    ///
    /// Returns true if the message was new.
    pub fn upsert_message(&self, message: &Message) -> Result<bool> {
        let affected = self.conn.execute(
            "INSERT INTO messages (connection_id, external_id, counterpart, from_me, body,
                                   timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(connection_id, external_id) DO NOTHING",
            params![
                message.connection_id,
                message.external_id,
                message.counterpart,
                message.from_me,
                message.body,
                message.timestamp.timestamp_millis(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Upsert a batch in one transaction, returning the new messages.
    pub fn upsert_messages(&mut self, messages: &[Message]) -> Result<Vec<Message>> {
        let tx = self.conn.transaction()?;
        let mut inserted = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (connection_id, external_id, counterpart, from_me, body,
                                       timestamp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(connection_id, external_id) DO NOTHING",
            )?;
            let now = Utc::now().to_rfc3339();
            for message in messages {
                let affected = stmt.execute(params![
                    message.connection_id,
                    message.external_id,
                    message.counterpart,
                    message.from_me,
                    message.body,
                    message.timestamp.timestamp_millis(),
                    now,
                ])?;
                if affected > 0 {
                    inserted.push(message.clone());
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Count persisted messages for a connection, optionally for one counterpart.
    pub fn count_messages(&self, connection_id: &str, counterpart: Option<&str>) -> Result<usize> {
        let count: i64 = match counterpart {
            Some(c) => self.conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE connection_id = ?1 AND counterpart = ?2",
                params![connection_id, c],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE connection_id = ?1",
                params![connection_id],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    /// Get messages for a conversation ordered by timestamp, then external id.
    pub fn get_messages(&self, connection_id: &str, counterpart: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT connection_id, external_id, counterpart, from_me, body, timestamp
             FROM messages WHERE connection_id = ?1 AND counterpart = ?2
             ORDER BY timestamp, external_id",
        )?;
        let rows = stmt
            .query_map(params![connection_id, counterpart], |row| {
                let ts: i64 = row.get(5)?;
                Ok(Message {
                    connection_id: row.get(0)?,
                    external_id: row.get(1)?,
                    counterpart: row.get(2)?,
                    from_me: row.get(3)?,
                    body: row.get(4)?,
                    timestamp: parse_millis(ts, "timestamp")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Get the stored position of a conversation.
    pub fn get_conversation(
        &self,
        connection_id: &str,
        counterpart: &str,
    ) -> Result<Option<ConversationState>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE connection_id = ?1 AND counterpart = ?2"
        );
        Ok(self
            .conn
            .query_row(&sql, params![connection_id, counterpart], conversation_from_row)
            .optional()?)
    }

    /// Move a conversation's position forward.
    ///
    /// The stored last-message pointer never moves backward: a position older
    /// than the stored one leaves it untouched. `unread_delta` is added to the
    /// unread counter.
    pub fn advance_conversation(
        &self,
        connection_id: &str,
        counterpart: &str,
        last_external_id: &str,
        last_message_at: DateTime<Utc>,
        unread_delta: u32,
    ) -> Result<ConversationState> {
        self.conn.execute(
            "INSERT INTO conversations (connection_id, counterpart, last_external_id,
                                        last_message_at, unread_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(connection_id, counterpart) DO UPDATE SET
                last_external_id = CASE
                    WHEN conversations.last_message_at IS NULL
                      OR excluded.last_message_at > conversations.last_message_at
                      OR (excluded.last_message_at = conversations.last_message_at
                          AND (conversations.last_external_id IS NULL
                               OR excluded.last_external_id > conversations.last_external_id))
                    THEN excluded.last_external_id
                    ELSE conversations.last_external_id
                END,
                last_message_at = MAX(COALESCE(conversations.last_message_at, excluded.last_message_at),
                                      excluded.last_message_at),
                unread_count = conversations.unread_count + excluded.unread_count",
            params![
                connection_id,
                counterpart,
                last_external_id,
                last_message_at.timestamp_millis(),
                unread_delta,
            ],
        )?;
        self.get_conversation(connection_id, counterpart)?
            .ok_or_else(|| Error::CorruptedData(format!("conversation {counterpart} vanished")))
    }

    /// Record that a conversation was synced at `at`.
    pub fn mark_conversation_synced(
        &self,
        connection_id: &str,
        counterpart: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO conversations (connection_id, counterpart, last_synced_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(connection_id, counterpart) DO UPDATE SET
                last_synced_at = excluded.last_synced_at",
            params![connection_id, counterpart, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Most recently active conversations for a connection.
    pub fn recent_conversations(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationState>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE connection_id = ?1
             ORDER BY last_message_at IS NULL, last_message_at DESC, counterpart
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![connection_id, limit as i64], conversation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
