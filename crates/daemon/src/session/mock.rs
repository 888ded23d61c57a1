// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable session doubles for tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use super::{
    BoxFuture, Connected, Connector, FetchError, InitialState, RemoteMessage, SessionEvent,
    SessionHandle,
};
use crate::error::SessionError;

/// Build a remote message at `secs` past a fixed epoch.
pub fn remote(id: &str, counterpart: &str, secs: i64) -> RemoteMessage {
    RemoteMessage {
        external_id: id.to_string(),
        counterpart: counterpart.to_string(),
        from_me: false,
        body: Some(format!("body {id}")),
        timestamp: ts(secs),
    }
}

/// Fixed test timestamp.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A session whose behavior is scripted by the test.
#[derive(Default)]
pub struct MockSession {
    open: AtomicBool,
    presence_failures: AtomicUsize,
    presence_hangs: AtomicBool,
    presence_calls: AtomicUsize,
    fetch_hangs: AtomicBool,
    fetch_script: Mutex<VecDeque<Result<Vec<RemoteMessage>, FetchError>>>,
    history: Mutex<Vec<RemoteMessage>>,
    fetch_calls: AtomicUsize,
    close_count: AtomicUsize,
}

impl MockSession {
    /// A session that reports open.
    pub fn open() -> Arc<Self> {
        let session = MockSession::default();
        session.open.store(true, Ordering::SeqCst);
        Arc::new(session)
    }

    /// Flip the transport's open flag without closing.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Fail the next `n` presence sends.
    pub fn fail_presence(&self, n: usize) {
        self.presence_failures.store(n, Ordering::SeqCst);
    }

    /// Make presence sends never complete.
    pub fn hang_presence(&self) {
        self.presence_hangs.store(true, Ordering::SeqCst);
    }

    /// Make fetches never complete.
    pub fn hang_fetch(&self) {
        self.fetch_hangs.store(true, Ordering::SeqCst);
    }

    /// Messages returned by fetches once the script is exhausted.
    pub fn set_history(&self, messages: Vec<RemoteMessage>) {
        *self.history.lock().unwrap() = messages;
    }

    /// Queue a one-shot fetch result.
    pub fn push_fetch(&self, result: Result<Vec<RemoteMessage>, FetchError>) {
        self.fetch_script.lock().unwrap().push_back(result);
    }

    pub fn presence_calls(&self) -> usize {
        self.presence_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

impl SessionHandle for MockSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_presence(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.presence_calls.fetch_add(1, Ordering::SeqCst);
            if self.presence_hangs.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let remaining = self.presence_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.presence_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SessionError::SendFailed("scripted failure".to_string()));
            }
            if !self.is_open() {
                return Err(SessionError::Closed);
            }
            Ok(())
        })
    }

    fn fetch_messages(
        &self,
        counterpart: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<RemoteMessage>, FetchError>> {
        let counterpart = counterpart.to_string();
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fetch_hangs.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if let Some(result) = self.fetch_script.lock().unwrap().pop_front() {
                return result;
            }
            let history = self.history.lock().unwrap();
            let mut matching: Vec<_> = history
                .iter()
                .filter(|m| m.counterpart == counterpart)
                .cloned()
                .collect();
            let skip = matching.len().saturating_sub(limit);
            Ok(matching.split_off(skip))
        })
    }

    fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Scripted result of one connect call.
pub enum MockOutcome {
    Open(Arc<MockSession>, Option<String>),
    Qr(Arc<MockSession>, String),
    Fail(SessionError),
}

/// A connector that replays scripted outcomes.
///
/// When the script is empty, each connect yields a fresh open session.
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<(String, Option<Vec<u8>>)>>,
    senders: Mutex<HashMap<String, mpsc::Sender<SessionEvent>>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(MockConnector::default())
    }

    pub fn push(&self, outcome: MockOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Number of connect calls so far.
    pub fn connect_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Credentials passed to the most recent connect call.
    pub fn last_credentials(&self) -> Option<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .and_then(|(_, creds)| creds.clone())
    }

    /// Sessions handed out, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap().clone()
    }

    /// Inject an event into the latest session for `connection_id`.
    pub async fn emit(&self, connection_id: &str, event: SessionEvent) {
        let tx = self.senders.lock().unwrap().get(connection_id).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        connection_id: &str,
        credentials: Option<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Connected, SessionError>> {
        let connection_id = connection_id.to_string();
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((connection_id.clone(), credentials));
            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| MockOutcome::Open(MockSession::open(), None));
            let (session, initial) = match outcome {
                MockOutcome::Open(session, phone_number) => {
                    (session, InitialState::Open { phone_number })
                }
                MockOutcome::Qr(session, code) => (session, InitialState::AwaitingQr(code)),
                MockOutcome::Fail(err) => return Err(err),
            };
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().insert(connection_id, tx);
            self.sessions.lock().unwrap().push(Arc::clone(&session));
            Ok(Connected {
                handle: session,
                events: rx,
                initial,
            })
        })
    }
}
