// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge-backed protocol session.
//!
//! Each connection opens its own WebSocket to the protocol bridge process.
//! Requests carry a numeric `id` and the bridge answers with a `response`
//! frame echoing it; everything else the bridge sends is an event.
//!
//! ```text
//! -> {"id":1,"op":"connect","connectionId":"c1","credentials":"<hex>"}
//! <- {"type":"response","id":1,"ok":true,"result":{"state":"open","phoneNumber":"+1555"}}
//! <- {"type":"message","message":{"id":"ABC","counterpart":"...","fromMe":false,"body":"hi","timestamp":1700000000000}}
//! <- {"type":"close","reason":"stream errored"}
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::DateTime;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    BoxFuture, Connected, Connector, FetchError, InitialState, RemoteMessage, SessionEvent,
    SessionHandle,
};
use crate::error::SessionError;

/// Buffered events per session before the reader applies backpressure.
const EVENT_BUFFER: usize = 256;

/// Request sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest {
    #[serde(rename_all = "camelCase")]
    Connect {
        connection_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        credentials: Option<String>,
    },
    Presence,
    Fetch { counterpart: String, limit: usize },
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a BridgeRequest,
}

/// A message as encoded by the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    counterpart: String,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    body: Option<String>,
    /// Unix millis.
    timestamp: i64,
}

impl WireMessage {
    fn into_remote(self) -> Result<RemoteMessage, SessionError> {
        let timestamp = DateTime::from_timestamp_millis(self.timestamp).ok_or_else(|| {
            SessionError::Protocol(format!("invalid timestamp {}", self.timestamp))
        })?;
        Ok(RemoteMessage {
            external_id: self.id,
            counterpart: self.counterpart,
            from_me: self.from_me,
            body: self.body,
            timestamp,
        })
    }
}

/// Frames the bridge sends us.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame {
    Response(Reply),
    Message {
        message: WireMessage,
    },
    Qr {
        code: String,
    },
    #[serde(rename_all = "camelCase")]
    Open {
        #[serde(default)]
        phone_number: Option<String>,
    },
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
    Creds {
        credentials: String,
    },
    AuthRejected,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    partial: Vec<WireMessage>,
}

impl Reply {
    fn into_error(self) -> SessionError {
        match self.code.as_deref() {
            Some("auth_rejected") => SessionError::AuthRejected,
            _ => SessionError::Protocol(
                self.error
                    .unwrap_or_else(|| "request failed without a reason".to_string()),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum ConnectResult {
    #[serde(rename_all = "camelCase")]
    Open {
        #[serde(default)]
        phone_number: Option<String>,
    },
    Qr {
        code: String,
    },
}

#[derive(Debug, Deserialize)]
struct FetchResult {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// A live session multiplexed over one bridge WebSocket.
pub struct BridgeSession {
    connection_id: String,
    open: Arc<AtomicBool>,
    next_id: AtomicU64,
    pending: Pending,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
    timeout: Duration,
}

impl BridgeSession {
    /// Spawn the reader and writer tasks over an established socket.
    fn start<Si, St>(
        connection_id: &str,
        sink: Si,
        stream: St,
        events: mpsc::Sender<SessionEvent>,
        timeout: Duration,
    ) -> Self
    where
        Si: Sink<Message> + Unpin + Send + 'static,
        Si::Error: Display,
        St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
    {
        let open = Arc::new(AtomicBool::new(true));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            sink,
            outbound_rx,
            shutdown.clone(),
            Arc::clone(&open),
        ));
        tokio::spawn(read_loop(
            connection_id.to_string(),
            stream,
            Arc::clone(&pending),
            events,
            shutdown.clone(),
            Arc::clone(&open),
        ));

        BridgeSession {
            connection_id: connection_id.to_string(),
            open,
            next_id: AtomicU64::new(1),
            pending,
            outbound,
            shutdown,
            timeout,
        }
    }

    async fn request(&self, request: BridgeRequest) -> Result<Reply, SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&Envelope {
            id,
            request: &request,
        })
        .map_err(|e| SessionError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        // Also covers callers that drop this future before the reply.
        let _waiter = PendingGuard {
            pending: &self.pending,
            id,
        };

        if self.outbound.send(json).is_err() {
            return Err(SessionError::Closed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

/// Removes a request's reply slot when the request ends, however it ends.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

fn lock_pending(
    pending: &Pending,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
    // Poisoning is ignored: entries are plain senders.
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionHandle for BridgeSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send_presence(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            let reply = self.request(BridgeRequest::Presence).await?;
            if reply.ok {
                Ok(())
            } else {
                Err(reply.into_error())
            }
        })
    }

    fn fetch_messages(
        &self,
        counterpart: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<RemoteMessage>, FetchError>> {
        let counterpart = counterpart.to_string();
        Box::pin(async move {
            let mut reply = self
                .request(BridgeRequest::Fetch { counterpart, limit })
                .await?;
            if !reply.ok {
                let partial = decode_messages(&self.connection_id, std::mem::take(&mut reply.partial));
                return Err(FetchError {
                    partial,
                    source: reply.into_error(),
                });
            }
            let result: FetchResult = serde_json::from_value(reply.result)
                .map_err(|e| SessionError::Protocol(e.to_string()))?;
            Ok(decode_messages(&self.connection_id, result.messages))
        })
    }

    fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(connection_id = %self.connection_id, "closing bridge session");
        }
        self.open.store(false, Ordering::Release);
        self.shutdown.cancel();
    }
}

/// Convert wire messages, dropping any the bridge encoded badly.
fn decode_messages(connection_id: &str, wire: Vec<WireMessage>) -> Vec<RemoteMessage> {
    wire.into_iter()
        .filter_map(|m| match m.into_remote() {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(connection_id, error = %e, "dropping malformed message from bridge");
                None
            }
        })
        .collect()
}

async fn write_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
    open: Arc<AtomicBool>,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            next = outbound.recv() => {
                let Some(text) = next else { break };
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(error = %e, "bridge send failed");
                    break;
                }
            }
        }
    }
    open.store(false, Ordering::Release);
}

async fn read_loop<St>(
    connection_id: String,
    mut stream: St,
    pending: Pending,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
    open: Arc<AtomicBool>,
) where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break None,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&connection_id, &text, &pending, &events).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_else(|| "closed by bridge".to_string());
                    break Some(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break Some("stream ended".to_string()),
            }
        }
    };

    open.store(false, Ordering::Release);
    // Dropping the senders fails every in-flight request with Closed
    lock_pending(&pending).clear();
    shutdown.cancel();

    if let Some(reason) = reason {
        debug!(connection_id = %connection_id, reason = %reason, "bridge socket closed");
        let _ = events.send(SessionEvent::Closed { reason }).await;
    }
}

async fn handle_frame(
    connection_id: &str,
    text: &str,
    pending: &Pending,
    events: &mpsc::Sender<SessionEvent>,
) {
    let frame: BridgeFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection_id, error = %e, "unparseable frame from bridge");
            return;
        }
    };

    let event = match frame {
        BridgeFrame::Response(reply) => {
            let waiter = lock_pending(pending).remove(&reply.id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!(connection_id, id = reply.id, "response for unknown request"),
            }
            return;
        }
        BridgeFrame::Message { message } => match message.into_remote() {
            Ok(msg) => SessionEvent::Message(msg),
            Err(e) => {
                warn!(connection_id, error = %e, "dropping malformed message from bridge");
                return;
            }
        },
        BridgeFrame::Qr { code } => SessionEvent::Qr(code),
        BridgeFrame::Open { phone_number } => SessionEvent::Opened { phone_number },
        BridgeFrame::Close { reason } => SessionEvent::Closed {
            reason: reason.unwrap_or_else(|| "closed by bridge".to_string()),
        },
        BridgeFrame::Creds { credentials } => match hex::decode(&credentials) {
            Ok(bytes) => SessionEvent::CredentialsUpdated(bytes),
            Err(e) => {
                warn!(connection_id, error = %e, "invalid credentials encoding from bridge");
                return;
            }
        },
        BridgeFrame::AuthRejected => SessionEvent::AuthRejected,
    };

    let _ = events.send(event).await;
}

/// Opens bridge sessions against a fixed bridge URL.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    url: String,
    timeout: Duration,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        BridgeConnector {
            url: url.into(),
            timeout,
        }
    }
}

impl Connector for BridgeConnector {
    fn connect(
        &self,
        connection_id: &str,
        credentials: Option<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Connected, SessionError>> {
        let connection_id = connection_id.to_string();
        Box::pin(async move {
            let (ws, _) = tokio::time::timeout(
                self.timeout,
                tokio_tungstenite::connect_async(self.url.as_str()),
            )
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

            let (sink, stream) = ws.split();
            let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
            let session = Arc::new(BridgeSession::start(
                &connection_id,
                sink,
                stream,
                events_tx,
                self.timeout,
            ));

            let request = BridgeRequest::Connect {
                connection_id: connection_id.clone(),
                credentials: credentials.map(hex::encode),
            };
            let reply = match session.request(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    session.close();
                    return Err(e);
                }
            };
            if !reply.ok {
                session.close();
                return Err(reply.into_error());
            }
            let initial = match serde_json::from_value::<ConnectResult>(reply.result) {
                Ok(ConnectResult::Open { phone_number }) => InitialState::Open { phone_number },
                Ok(ConnectResult::Qr { code }) => InitialState::AwaitingQr(code),
                Err(e) => {
                    session.close();
                    return Err(SessionError::Protocol(format!("bad connect result: {}", e)));
                }
            };

            Ok(Connected {
                handle: session,
                events: events_rx,
                initial,
            })
        })
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
