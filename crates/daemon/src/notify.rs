// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Notification fanout.
//!
//! The hub is a broadcast channel of [`Notification`]s. When a bind address
//! is configured, a WebSocket push server forwards every notification to
//! each connected client as a JSON text frame.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zl_core::{Notification, NotificationKind, SyncCounts};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts notifications to any number of subscribers.
#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        NotificationHub { tx }
    }

    /// Publish a notification. Having no subscribers is not an error.
    pub fn publish(&self, notification: Notification) {
        debug!(
            connection_id = %notification.connection_id,
            kind = ?notification.kind,
            "notify"
        );
        let _ = self.tx.send(notification);
    }

    /// Shorthand for a notification without counts.
    pub fn notify(&self, connection_id: &str, kind: NotificationKind, message: impl Into<String>) {
        self.publish(Notification::new(connection_id, kind, message));
    }

    /// Shorthand for a notification with sync counts.
    pub fn notify_counts(
        &self,
        connection_id: &str,
        kind: NotificationKind,
        counts: SyncCounts,
        message: impl Into<String>,
    ) {
        self.publish(Notification::new(connection_id, kind, message).with_counts(counts));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

/// Accept push clients on `listener` until `cancel` fires.
pub async fn run_push_server(
    listener: TcpListener,
    hub: NotificationHub,
    cancel: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("notification push server listening on {}", addr);
    }
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                let hub = hub.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, peer_addr, hub, cancel).await {
                        warn!("push client {} failed: {}", peer_addr, e);
                    }
                });
            }
            Err(e) => warn!("failed to accept push client: {}", e),
        }
    }
    debug!("notification push server stopped");
}

/// Forward notifications to one client until it leaves.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: NotificationHub,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!("push client connected: {}", peer_addr);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut notifications = hub.subscribe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }

            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("push client {} error: {}", peer_addr, e);
                        break;
                    }
                }
            }

            notification = notifications.recv() => {
                match notification {
                    Ok(notification) => {
                        let json = notification.to_json()?;
                        if let Err(e) = ws_sink.send(Message::text(json)).await {
                            warn!("failed to push to {}: {}", peer_addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("push client {} lagged by {} notifications", peer_addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("push client disconnected: {}", peer_addr);
    Ok(())
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
