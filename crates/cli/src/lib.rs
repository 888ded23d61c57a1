// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! zlrs - the library behind the `zap` operator CLI.
//!
//! `zap` is a thin client for the `zaplined` daemon: each command sends one
//! request over the daemon's Unix socket and renders the response as text
//! or JSON.
//!
//! ```rust,ignore
//! use clap::Parser;
//! use zlrs::Cli;
//!
//! let cli = Cli::parse_from(["zap", "list", "-o", "json"]);
//! zlrs::run(cli)?;
//! ```

mod cli;
pub mod colors;
mod commands;
pub mod daemon;
mod display;
pub mod env;
pub mod error;

pub use cli::{Cli, Command, OutputFormat};
pub use daemon::{DaemonClient, Requester};
pub use error::{Error, Result};

/// Execute a parsed command line against the daemon.
pub fn run(cli: Cli) -> Result<()> {
    let state_dir = cli.state_dir.unwrap_or_else(env::default_state_dir);
    let socket_path = daemon::get_socket_path(&state_dir);
    let color = colors::should_colorize();
    let mut out = std::io::stdout().lock();

    match DaemonClient::connect(&socket_path) {
        Ok(mut client) => commands::execute(&mut client, cli.command, &mut out, color),
        // Status is the one command for which an absent daemon is an answer.
        Err(Error::DaemonNotRunning(_)) if matches!(cli.command, Command::Status { .. }) => {
            commands::daemon::not_running(cli.command.output(), &mut out)
        }
        Err(e) => Err(e),
    }
}
