// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared IPC protocol for CLI-daemon communication.
//!
//! This crate defines the message types and framing protocol used between
//! the `zap` CLI and the `zaplined` daemon. Messages are serialized as JSON
//! with length-prefixed framing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Re-export the closed enums from core (canonical definitions).
pub use zl_core::{ConnectionStatus, SyncPriority};

// ============================================================================
// Model types for IPC serialization
// ============================================================================

/// Operator view of a single connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Externally assigned connection id.
    pub id: String,
    /// Phone number, known once authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Current lifecycle status.
    pub status: ConnectionStatus,
    /// True when the registry reports the session usable right now.
    pub usable: bool,
    /// Reconnect attempts in the current episode.
    pub reconnect_attempts: u32,
    /// Whether sealed credentials are stored.
    pub has_credentials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl ConnectionInfo {
    /// Build the operator view from a persisted record and the live usability flag.
    pub fn from_record(record: zl_core::ConnectionRecord, usable: bool) -> Self {
        ConnectionInfo {
            id: record.id,
            phone_number: record.phone_number,
            status: record.status,
            usable,
            reconnect_attempts: record.reconnect_attempts,
            has_credentials: record.has_credentials,
            last_connected_at: record.last_connected_at,
            last_heartbeat_at: record.last_heartbeat_at,
        }
    }
}

/// Sync queue observability snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total queued items.
    pub length: usize,
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    /// Syncs currently running.
    pub in_flight: usize,
}

impl QueueStats {
    /// Count for one priority band.
    pub fn count(&self, priority: SyncPriority) -> usize {
        match priority {
            SyncPriority::Urgent => self.urgent,
            SyncPriority::High => self.high,
            SyncPriority::Normal => self.normal,
            SyncPriority::Low => self.low,
        }
    }
}

// ============================================================================
// Protocol types
// ============================================================================

/// Request sent from CLI to daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonRequest {
    /// Get daemon status.
    Status,
    /// Graceful shutdown.
    Shutdown,
    /// Ping to check if daemon is alive.
    Ping,
    /// Version handshake request.
    Hello { version: String },
    /// Register a new, disconnected connection.
    Create { connection_id: String },
    /// Start (or restart) a session.
    Connect { connection_id: String },
    /// Tear down the live session and stop reconnecting.
    Disconnect { connection_id: String },
    /// Clear credentials and return to disconnected.
    Reset { connection_id: String },
    /// Tear down and remove the connection with its history.
    Delete { connection_id: String },
    /// Get one connection.
    Connection { connection_id: String },
    /// List every connection.
    ListConnections,
    /// Queue a conversation resync.
    RequestSync {
        connection_id: String,
        counterpart: String,
        priority: SyncPriority,
    },
    /// Sync queue statistics.
    QueueStats,
}

/// Response sent from daemon to CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonResponse {
    /// Status response.
    Status(DaemonStatus),
    /// Shutdown acknowledged.
    ShuttingDown,
    /// Pong response.
    Pong,
    /// Error response.
    Error { message: String },
    /// Version handshake response.
    Hello { version: String },
    /// Operation accepted.
    Ok,
    /// A single connection.
    Connection(ConnectionInfo),
    /// All connections.
    Connections { connections: Vec<ConnectionInfo> },
    /// Queue statistics.
    QueueStats(QueueStats),
}

/// Daemon status information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonStatus {
    /// Current daemon PID.
    pub pid: u32,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Number of known connections.
    pub connections: usize,
    /// Number of connections usable right now.
    pub usable: usize,
    /// Pending sync items.
    pub queue_length: usize,
}

impl DaemonStatus {
    /// Create a new status with the given parameters.
    pub fn new(
        pid: u32,
        uptime_secs: u64,
        connections: usize,
        usable: usize,
        queue_length: usize,
    ) -> Self {
        Self {
            pid,
            uptime_secs,
            connections,
            usable,
            queue_length,
        }
    }
}

// ============================================================================
// Message framing
// ============================================================================

/// Maximum message size (1MB) to prevent malformed messages from causing hangs.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

fn encode<T: Serialize>(message: &T) -> std::io::Result<Vec<u8>> {
    let json = serde_json::to_vec(message)
        .map_err(|e| std::io::Error::other(format!("serialize error: {}", e)))?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::other(format!(
            "message too large: {} bytes (max {})",
            json.len(),
            MAX_MESSAGE_SIZE
        )));
    }
    let len = u32::try_from(json.len()).map_err(|_| std::io::Error::other("message too large"))?;
    let mut frame = Vec::with_capacity(4 + json.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

fn check_len(len_buf: [u8; 4]) -> std::io::Result<usize> {
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::other(format!(
            "message too large: {} bytes (max {})",
            len, MAX_MESSAGE_SIZE
        )));
    }
    Ok(len)
}

fn decode<T: serde::de::DeserializeOwned>(buf: &[u8]) -> std::io::Result<T> {
    serde_json::from_slice(buf)
        .map_err(|e| std::io::Error::other(format!("deserialize error: {}", e)))
}

/// IPC message framing.
///
/// Messages are framed as:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON-encoded message
pub mod framing {
    use std::io::{Read, Write};

    use serde::de::DeserializeOwned;
    use serde::Serialize;

    /// Write a serializable message to the given writer.
    pub fn write_message<W: Write, T: Serialize>(
        writer: &mut W,
        message: &T,
    ) -> std::io::Result<()> {
        let frame = super::encode(message)?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a deserializable message from the given reader.
    pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> std::io::Result<T> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = super::check_len(len_buf)?;

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        super::decode(&buf)
    }
}

/// Async variant of [`framing`] for the tokio-based daemon.
pub mod framing_async {
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// Write a serializable message to the given async writer.
    pub async fn write_message<W: AsyncWrite + Unpin, T: Serialize>(
        writer: &mut W,
        message: &T,
    ) -> std::io::Result<()> {
        let frame = super::encode(message)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a deserializable message from the given async reader.
    pub async fn read_message<R: AsyncRead + Unpin, T: DeserializeOwned>(
        reader: &mut R,
    ) -> std::io::Result<T> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = super::check_len(len_buf)?;

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        super::decode(&buf)
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
