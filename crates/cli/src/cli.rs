// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use zl_core::SyncPriority;

/// Parse a string that must not be empty or whitespace-only.
fn non_empty_string(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("cannot be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

fn parse_priority(s: &str) -> Result<SyncPriority, String> {
    s.parse::<SyncPriority>().map_err(|e| e.to_string())
}

/// Output format for commands supporting structured output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "zap")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operate the zapline connection daemon")]
#[command(after_help = "\
Examples:
  zap create acme               Register a connection
  zap connect acme              Start its session (pairs via QR if needed)
  zap sync acme 15551234567     Resync one conversation
  zap list -o json              All connections as JSON")]
pub struct Cli {
    /// Daemon state directory (default: $ZAPLINE_STATE_DIR or ~/.local/state/zapline)
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show daemon status
    Status {
        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// List all connections
    List {
        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show one connection
    Show {
        id: String,

        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Register a new connection
    Create {
        #[arg(value_parser = non_empty_string)]
        id: String,

        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Start a connection's session in the background
    Connect {
        id: String,

        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Tear down a connection's session and stop reconnecting
    Disconnect {
        id: String,

        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Clear stored credentials so the next connect pairs again
    Reset {
        id: String,

        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Remove a connection and its message history
    Delete {
        id: String,

        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Queue a resync of one conversation
    Sync {
        id: String,

        /// Conversation counterpart (phone number or group id)
        #[arg(value_parser = non_empty_string)]
        counterpart: String,

        /// Priority band: urgent, high, normal, low
        #[arg(long, short, value_parser = parse_priority, default_value = "normal")]
        priority: SyncPriority,

        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show sync queue statistics
    Queue {
        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Ask the daemon to shut down
    Shutdown {
        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },
}

impl Command {
    /// The output format selected for this command.
    pub fn output(&self) -> OutputFormat {
        match self {
            Command::Status { output }
            | Command::List { output }
            | Command::Show { output, .. }
            | Command::Create { output, .. }
            | Command::Connect { output, .. }
            | Command::Disconnect { output, .. }
            | Command::Reset { output, .. }
            | Command::Delete { output, .. }
            | Command::Sync { output, .. }
            | Command::Queue { output }
            | Command::Shutdown { output } => *output,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
