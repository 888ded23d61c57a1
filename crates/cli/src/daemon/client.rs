// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! IPC client for communicating with the zaplined daemon.

use std::io::ErrorKind;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use zl_ipc::{framing, DaemonRequest, DaemonResponse};

use super::Requester;
use crate::error::{Error, Result};

/// Connection timeout for daemon communication.
const TIMEOUT_SECS: u64 = 5;

/// A client for the daemon socket.
///
/// The daemon answers one request per stream, so the stream opened by
/// [`DaemonClient::connect`] serves the first request and later requests
/// reconnect.
pub struct DaemonClient {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
}

impl DaemonClient {
    /// Connect to the daemon at the given socket path.
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = open(socket_path)?;
        Ok(DaemonClient {
            socket_path: socket_path.to_path_buf(),
            stream: Some(stream),
        })
    }
}

impl Requester for DaemonClient {
    fn request(&mut self, request: DaemonRequest) -> Result<DaemonResponse> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => open(&self.socket_path)?,
        };
        framing::write_message(&mut stream, &request)?;
        let response = framing::read_message(&mut stream)?;
        Ok(response)
    }
}

fn open(socket_path: &Path) -> Result<UnixStream> {
    let stream = UnixStream::connect(socket_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
            Error::DaemonNotRunning(socket_path.display().to_string())
        }
        _ => Error::Daemon(format!("failed to connect to daemon: {}", e)),
    })?;

    stream
        .set_read_timeout(Some(Duration::from_secs(TIMEOUT_SECS)))
        .map_err(|e| Error::Daemon(format!("failed to set read timeout: {}", e)))?;
    stream
        .set_write_timeout(Some(Duration::from_secs(TIMEOUT_SECS)))
        .map_err(|e| Error::Daemon(format!("failed to set write timeout: {}", e)))?;
    Ok(stream)
}
