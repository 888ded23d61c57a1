// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle commands.

use std::io::Write;

use zl_ipc::{DaemonRequest, DaemonResponse};

use super::{emit, unexpected, Ack};
use crate::cli::OutputFormat;
use crate::daemon::Requester;
use crate::display;
use crate::error::Result;

pub fn list<R: Requester, W: Write>(
    client: &mut R,
    output: OutputFormat,
    out: &mut W,
    color: bool,
) -> Result<()> {
    let connections = match client.request(DaemonRequest::ListConnections)? {
        DaemonResponse::Connections { connections } => connections,
        other => return Err(unexpected(other)),
    };
    match output {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(&connections)?)?;
        }
        OutputFormat::Text if connections.is_empty() => {
            writeln!(out, "No connections")?;
        }
        OutputFormat::Text => {
            for info in &connections {
                writeln!(out, "{}", display::connection_line(info, color))?;
            }
        }
    }
    Ok(())
}

pub fn show<R: Requester, W: Write>(
    client: &mut R,
    id: &str,
    output: OutputFormat,
    out: &mut W,
    color: bool,
) -> Result<()> {
    let request = DaemonRequest::Connection {
        connection_id: id.to_string(),
    };
    match client.request(request)? {
        DaemonResponse::Connection(info) => {
            emit(out, output, &display::connection_detail(&info, color), &info)
        }
        other => Err(unexpected(other)),
    }
}

pub fn create<R: Requester, W: Write>(
    client: &mut R,
    id: &str,
    output: OutputFormat,
    out: &mut W,
    color: bool,
) -> Result<()> {
    let request = DaemonRequest::Create {
        connection_id: id.to_string(),
    };
    match client.request(request)? {
        DaemonResponse::Connection(info) => {
            let text = format!("Created {}", display::connection_line(&info, color));
            emit(out, output, &text, &info)
        }
        other => Err(unexpected(other)),
    }
}

/// Start a session. The daemon answers before the session is up; progress
/// shows in `zap show` and on the notification stream.
pub fn connect<R: Requester, W: Write>(
    client: &mut R,
    id: &str,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let request = DaemonRequest::Connect {
        connection_id: id.to_string(),
    };
    acknowledge(
        client,
        request,
        "connect",
        id,
        &format!("Connecting {id} in the background"),
        output,
        out,
    )
}

pub fn disconnect<R: Requester, W: Write>(
    client: &mut R,
    id: &str,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let request = DaemonRequest::Disconnect {
        connection_id: id.to_string(),
    };
    let text = format!("Disconnected {id}");
    acknowledge(client, request, "disconnect", id, &text, output, out)
}

pub fn reset<R: Requester, W: Write>(
    client: &mut R,
    id: &str,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let request = DaemonRequest::Reset {
        connection_id: id.to_string(),
    };
    let text = format!("Reset {id}; the next connect will pair again");
    acknowledge(client, request, "reset", id, &text, output, out)
}

pub fn delete<R: Requester, W: Write>(
    client: &mut R,
    id: &str,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let request = DaemonRequest::Delete {
        connection_id: id.to_string(),
    };
    let text = format!("Deleted {id}");
    acknowledge(client, request, "delete", id, &text, output, out)
}

fn acknowledge<R: Requester, W: Write>(
    client: &mut R,
    request: DaemonRequest,
    action: &str,
    id: &str,
    text: &str,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    match client.request(request)? {
        DaemonResponse::Ok => {
            let ack = Ack {
                ok: true,
                action,
                connection_id: id,
            };
            emit(out, output, text, &ack)
        }
        other => Err(unexpected(other)),
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
