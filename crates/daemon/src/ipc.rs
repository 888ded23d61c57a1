// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Operator IPC server.
//!
//! One request per Unix socket connection, length-prefixed JSON both ways.
//! Requests never wait on a remote session: connect is started in the
//! background and reported through status and notifications.

use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zl_core::SyncReason;
use zl_ipc::{
    framing_async, ConnectionInfo, DaemonRequest, DaemonResponse, DaemonStatus,
};

use crate::error::Result;
use crate::reconnect::ReconnectController;

/// Per-request read/write deadline.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Maps operator requests onto the controller, queue and store.
#[derive(Clone)]
pub struct RequestHandler {
    controller: ReconnectController,
}

impl RequestHandler {
    pub fn new(controller: ReconnectController) -> Self {
        RequestHandler { controller }
    }

    pub async fn handle(&self, request: DaemonRequest) -> DaemonResponse {
        debug!(?request, "ipc request");
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => DaemonResponse::Error {
                message: e.to_string(),
            },
        }
    }

    async fn dispatch(&self, request: DaemonRequest) -> Result<DaemonResponse> {
        let ctx = self.controller.context();
        let response = match request {
            DaemonRequest::Ping => DaemonResponse::Pong,
            DaemonRequest::Hello { version } => {
                if version != env!("CARGO_PKG_VERSION") {
                    warn!(client = %version, "client version differs from daemon");
                }
                DaemonResponse::Hello {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }
            }
            DaemonRequest::Status => DaemonResponse::Status(DaemonStatus::new(
                std::process::id(),
                ctx.started_at.elapsed().as_secs(),
                ctx.registry.len(),
                ctx.registry.usable_count(),
                ctx.queue.len(),
            )),
            DaemonRequest::Shutdown => {
                info!("shutdown requested");
                DaemonResponse::ShuttingDown
            }
            DaemonRequest::Create { connection_id } => {
                let record = self.controller.create(&connection_id).await?;
                DaemonResponse::Connection(ConnectionInfo::from_record(record, false))
            }
            DaemonRequest::Connect { connection_id } => {
                // Fail fast on unknown ids, then connect in the background.
                ctx.db.lock().await.get_connection(&connection_id)?;
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    match controller.connect(&connection_id, true).await {
                        Ok(outcome) => {
                            info!(connection_id = %connection_id, ?outcome, "operator connect finished")
                        }
                        Err(e) => {
                            error!(connection_id = %connection_id, error = %e, "operator connect failed")
                        }
                    }
                });
                DaemonResponse::Ok
            }
            DaemonRequest::Disconnect { connection_id } => {
                self.controller.disconnect(&connection_id).await?;
                DaemonResponse::Ok
            }
            DaemonRequest::Reset { connection_id } => {
                self.controller
                    .reset(&connection_id, "reset by operator")
                    .await?;
                DaemonResponse::Ok
            }
            DaemonRequest::Delete { connection_id } => {
                if !self.controller.delete(&connection_id).await? {
                    return Err(zl_core::Error::ConnectionNotFound(connection_id).into());
                }
                DaemonResponse::Ok
            }
            DaemonRequest::Connection { connection_id } => {
                let record = ctx.db.lock().await.get_connection(&connection_id)?;
                let usable = ctx.registry.is_usable(&connection_id);
                DaemonResponse::Connection(ConnectionInfo::from_record(record, usable))
            }
            DaemonRequest::ListConnections => {
                let records = ctx.db.lock().await.list_connections()?;
                let connections = records
                    .into_iter()
                    .map(|record| {
                        let usable = ctx.registry.is_usable(&record.id);
                        ConnectionInfo::from_record(record, usable)
                    })
                    .collect();
                DaemonResponse::Connections { connections }
            }
            DaemonRequest::RequestSync {
                connection_id,
                counterpart,
                priority,
            } => {
                ctx.db.lock().await.get_connection(&connection_id)?;
                if counterpart.trim().is_empty() {
                    return Err(zl_core::Error::InvalidInput(
                        "counterpart must not be empty".to_string(),
                    )
                    .into());
                }
                ctx.queue.enqueue(
                    &connection_id,
                    &counterpart,
                    priority,
                    SyncReason::ManualRequest,
                );
                DaemonResponse::Ok
            }
            DaemonRequest::QueueStats => DaemonResponse::QueueStats(ctx.queue.stats()),
        };
        Ok(response)
    }
}

/// Serve operator requests until `shutdown` fires.
///
/// A `Shutdown` request cancels `shutdown` after its response is written.
pub async fn serve(listener: UnixListener, handler: RequestHandler, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let handler = handler.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_stream(stream, handler, shutdown).await {
                        warn!("failed to serve request: {}", e);
                    }
                });
            }
            Err(e) => warn!("failed to accept connection: {}", e),
        }
    }
    debug!("ipc server stopped");
}

async fn handle_stream(
    mut stream: UnixStream,
    handler: RequestHandler,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let request: DaemonRequest =
        tokio::time::timeout(IO_TIMEOUT, framing_async::read_message(&mut stream))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
    let response = handler.handle(request).await;
    let shutting_down = matches!(response, DaemonResponse::ShuttingDown);
    tokio::time::timeout(IO_TIMEOUT, framing_async::write_message(&mut stream, &response))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))??;
    if shutting_down {
        shutdown.cancel();
    }
    Ok(())
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
