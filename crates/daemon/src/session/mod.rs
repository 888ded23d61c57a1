// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol session abstraction.
//!
//! Provides a trait-based session layer that enables:
//! - A real bridge-backed session for production
//! - Mock sessions for unit testing
//!
//! A [`SessionHandle`] is owned by the registry and replaced wholesale on
//! every reconnect. Other components resolve it by connection id for the
//! duration of a single call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use zl_core::Message;

use crate::error::SessionError;

pub mod bridge;
#[cfg(test)]
pub mod mock;

pub use bridge::BridgeConnector;

/// Boxed future returned by session trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A message as reported by the remote protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub external_id: String,
    pub counterpart: String,
    pub from_me: bool,
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RemoteMessage {
    /// Attach the owning connection to produce a storable message.
    pub fn into_message(self, connection_id: &str) -> Message {
        Message {
            connection_id: connection_id.to_string(),
            external_id: self.external_id,
            counterpart: self.counterpart,
            from_me: self.from_me,
            body: self.body,
            timestamp: self.timestamp,
        }
    }
}

/// A failed history fetch, carrying whatever arrived before the failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("fetch failed after {} messages: {source}", .partial.len())]
pub struct FetchError {
    pub partial: Vec<RemoteMessage>,
    pub source: SessionError,
}

impl From<SessionError> for FetchError {
    fn from(source: SessionError) -> Self {
        FetchError {
            partial: Vec::new(),
            source,
        }
    }
}

/// Events pushed by a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An inbound or outbound message observed live.
    Message(RemoteMessage),
    /// A pairing code the operator must scan.
    Qr(String),
    /// The session authenticated.
    Opened { phone_number: Option<String> },
    /// The transport closed.
    Closed { reason: String },
    /// The protocol rotated its credentials; persist them.
    CredentialsUpdated(Vec<u8>),
    /// The remote refused our credentials.
    AuthRejected,
}

/// State of a session right after connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialState {
    Open { phone_number: Option<String> },
    AwaitingQr(String),
}

/// A freshly established session.
pub struct Connected {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::Receiver<SessionEvent>,
    pub initial: InitialState,
}

impl std::fmt::Debug for Connected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connected")
            .field("handle", &"<session>")
            .field("initial", &self.initial)
            .finish()
    }
}

/// A live protocol session.
pub trait SessionHandle: Send + Sync {
    /// Whether the transport reports itself open.
    ///
    /// This is the library's view only; liveness needs a heartbeat.
    fn is_open(&self) -> bool;

    /// Send a presence update.
    fn send_presence(&self) -> BoxFuture<'_, Result<(), SessionError>>;

    /// Fetch up to `limit` of the most recent messages with `counterpart`.
    fn fetch_messages(
        &self,
        counterpart: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<RemoteMessage>, FetchError>>;

    /// Signal teardown. Idempotent.
    fn close(&self);
}

/// Establishes protocol sessions.
pub trait Connector: Send + Sync {
    /// Connect with the given decrypted credentials, if any.
    fn connect(
        &self,
        connection_id: &str,
        credentials: Option<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Connected, SessionError>>;
}
