// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal color utilities for text output.
//!
//! Respects environment variables:
//! - `NO_COLOR=1`: Disables colors
//! - `COLOR=1`: Forces colors even without TTY

use std::io::IsTerminal;

use zl_core::ConnectionStatus;

use crate::env;

/// ANSI 256-color codes.
pub mod codes {
    pub const GOOD: u8 = 71;
    pub const PENDING: u8 = 179;
    pub const BAD: u8 = 167;
    pub const MUTED: u8 = 245;
}

/// ANSI reset sequence.
const RESET: &str = "\x1b[0m";

/// Check if colors should be enabled based on TTY and environment variables.
pub fn should_colorize() -> bool {
    if env::no_color() {
        return false;
    }
    if env::force_color() {
        return true;
    }
    std::io::stdout().is_terminal()
}

/// Format a 256-color ANSI escape sequence for foreground color.
fn fg256(code: u8) -> String {
    format!("\x1b[38;5;{code}m")
}

fn paint(code: u8, text: &str) -> String {
    format!("{}{}{}", fg256(code), text, RESET)
}

/// Color code for a connection status.
pub fn status_code(status: ConnectionStatus) -> u8 {
    match status {
        ConnectionStatus::Connected => codes::GOOD,
        ConnectionStatus::Connecting | ConnectionStatus::AwaitingQr => codes::PENDING,
        ConnectionStatus::Error => codes::BAD,
        ConnectionStatus::Disconnected => codes::MUTED,
    }
}

/// Render a status name, colored when `color` is set.
pub fn status(status: ConnectionStatus, color: bool) -> String {
    if color {
        paint(status_code(status), status.as_str())
    } else {
        status.as_str().to_string()
    }
}

/// Render secondary text, dimmed when `color` is set.
pub fn muted(text: &str, color: bool) -> String {
    if color {
        paint(codes::MUTED, text)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
#[path = "colors_tests.rs"]
mod tests;
