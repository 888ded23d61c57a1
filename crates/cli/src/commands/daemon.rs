// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon management commands.

use std::io::Write;

use serde_json::json;
use zl_ipc::{DaemonRequest, DaemonResponse};

use super::{emit, unexpected};
use crate::cli::OutputFormat;
use crate::daemon::Requester;
use crate::display;
use crate::error::Result;

/// Show daemon status.
pub fn status<R: Requester, W: Write>(
    client: &mut R,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    match client.request(DaemonRequest::Status)? {
        DaemonResponse::Status(status) => {
            let value = json!({ "running": true, "status": status });
            emit(out, output, &display::daemon_status(&status), &value)
        }
        other => Err(unexpected(other)),
    }
}

/// `zap status` when nothing listens on the socket.
pub fn not_running<W: Write>(output: OutputFormat, out: &mut W) -> Result<()> {
    emit(out, output, "Daemon: not running", &json!({ "running": false }))
}

/// Ask the daemon to stop.
pub fn shutdown<R: Requester, W: Write>(
    client: &mut R,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    match client.request(DaemonRequest::Shutdown)? {
        DaemonResponse::ShuttingDown => emit(
            out,
            output,
            "Daemon shutting down",
            &json!({ "ok": true, "action": "shutdown" }),
        ),
        other => Err(unexpected(other)),
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
