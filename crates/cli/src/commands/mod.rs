// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Command implementations.
//!
//! Every command is a single daemon request; these functions only shape the
//! request and render the response.

pub mod connection;
pub mod daemon;
pub mod sync;

use std::io::Write;

use serde::Serialize;
use zl_ipc::DaemonResponse;

use crate::cli::{Command, OutputFormat};
use crate::daemon::Requester;
use crate::error::{Error, Result};

/// Run `command` against the daemon, writing results to `out`.
pub fn execute<R: Requester, W: Write>(
    client: &mut R,
    command: Command,
    out: &mut W,
    color: bool,
) -> Result<()> {
    match command {
        Command::Status { output } => daemon::status(client, output, out),
        Command::Shutdown { output } => daemon::shutdown(client, output, out),
        Command::List { output } => connection::list(client, output, out, color),
        Command::Show { id, output } => connection::show(client, &id, output, out, color),
        Command::Create { id, output } => connection::create(client, &id, output, out, color),
        Command::Connect { id, output } => connection::connect(client, &id, output, out),
        Command::Disconnect { id, output } => connection::disconnect(client, &id, output, out),
        Command::Reset { id, output } => connection::reset(client, &id, output, out),
        Command::Delete { id, output } => connection::delete(client, &id, output, out),
        Command::Sync {
            id,
            counterpart,
            priority,
            output,
        } => sync::request(client, &id, &counterpart, priority, output, out),
        Command::Queue { output } => sync::queue(client, output, out),
    }
}

/// Turn a response the command did not ask for into an error.
pub(crate) fn unexpected(response: DaemonResponse) -> Error {
    match response {
        DaemonResponse::Error { message } => Error::Daemon(message),
        other => Error::UnexpectedResponse(format!("{other:?}")),
    }
}

/// Acknowledgement printed for requests answered with a bare `Ok`.
#[derive(Debug, Serialize)]
pub(crate) struct Ack<'a> {
    pub ok: bool,
    pub action: &'a str,
    pub connection_id: &'a str,
}

/// Write `text` or the JSON form of `value`, depending on `output`.
pub(crate) fn emit<W: Write, T: Serialize>(
    out: &mut W,
    output: OutputFormat,
    text: &str,
    value: &T,
) -> Result<()> {
    match output {
        OutputFormat::Text => writeln!(out, "{text}")?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(value)?)?,
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
pub mod testing;
