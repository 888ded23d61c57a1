// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync queue commands.

use std::io::Write;

use serde_json::json;
use zl_core::SyncPriority;
use zl_ipc::{DaemonRequest, DaemonResponse};

use super::{emit, unexpected};
use crate::cli::OutputFormat;
use crate::daemon::Requester;
use crate::display;
use crate::error::Result;

/// Queue a resync of one conversation.
pub fn request<R: Requester, W: Write>(
    client: &mut R,
    id: &str,
    counterpart: &str,
    priority: SyncPriority,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let request = DaemonRequest::RequestSync {
        connection_id: id.to_string(),
        counterpart: counterpart.to_string(),
        priority,
    };
    match client.request(request)? {
        DaemonResponse::Ok => {
            let text = format!("Queued sync of {counterpart} on {id} ({priority})");
            let value = json!({
                "ok": true,
                "action": "sync",
                "connection_id": id,
                "counterpart": counterpart,
                "priority": priority,
            });
            emit(out, output, &text, &value)
        }
        other => Err(unexpected(other)),
    }
}

/// Show queue statistics.
pub fn queue<R: Requester, W: Write>(
    client: &mut R,
    output: OutputFormat,
    out: &mut W,
) -> Result<()> {
    match client.request(DaemonRequest::QueueStats)? {
        DaemonResponse::QueueStats(stats) => {
            emit(out, output, &display::queue_stats(&stats), &stats)
        }
        other => Err(unexpected(other)),
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
