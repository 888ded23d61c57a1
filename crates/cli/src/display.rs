// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Text rendering for daemon responses.

use chrono::{DateTime, SecondsFormat, Utc};
use zl_core::{ConnectionStatus, SyncPriority};
use zl_ipc::{ConnectionInfo, DaemonStatus, QueueStats};

use crate::colors;

/// Timestamp as RFC 3339 to the second, or "never".
pub fn format_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => "never".to_string(),
    }
}

/// Compact uptime such as `2d 3h`, `4h 5m` or `42s`.
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// One-line summary used by `zap list`.
pub fn connection_line(info: &ConnectionInfo, color: bool) -> String {
    let mut line = format!("{}: {}", info.id, colors::status(info.status, color));
    if info.status == ConnectionStatus::Connected && !info.usable {
        line.push_str(&colors::muted(" (stale)", color));
    }
    if let Some(phone) = &info.phone_number {
        line.push_str(&format!(" {phone}"));
    }
    if info.reconnect_attempts > 0 {
        line.push_str(&colors::muted(
            &format!(" [attempt {}]", info.reconnect_attempts),
            color,
        ));
    }
    line
}

/// Multi-line view used by `zap show`.
pub fn connection_detail(info: &ConnectionInfo, color: bool) -> String {
    let phone = info.phone_number.as_deref().unwrap_or("unknown");
    [
        format!("Connection: {}", info.id),
        format!("Status: {}", colors::status(info.status, color)),
        format!("Usable: {}", yes_no(info.usable)),
        format!("Phone: {phone}"),
        format!("Credentials: {}", yes_no(info.has_credentials)),
        format!("Reconnect attempts: {}", info.reconnect_attempts),
        format!("Last connected: {}", format_time(info.last_connected_at)),
        format!("Last heartbeat: {}", format_time(info.last_heartbeat_at)),
    ]
    .join("\n")
}

/// Multi-line view used by `zap status`.
pub fn daemon_status(status: &DaemonStatus) -> String {
    [
        format!("Daemon: running (pid {})", status.pid),
        format!("Uptime: {}", format_uptime(status.uptime_secs)),
        format!(
            "Connections: {} ({} usable)",
            status.connections, status.usable
        ),
        format!("Queued syncs: {}", status.queue_length),
    ]
    .join("\n")
}

/// Multi-line view used by `zap queue`.
pub fn queue_stats(stats: &QueueStats) -> String {
    let mut lines = vec![format!(
        "Queued: {} ({} in flight)",
        stats.length, stats.in_flight
    )];
    for priority in SyncPriority::ALL {
        lines.push(format!("  {:<7} {}", priority.as_str(), stats.count(priority)));
    }
    lines.join("\n")
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
#[path = "display_tests.rs"]
mod tests;
