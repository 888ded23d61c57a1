// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Talking to the zaplined daemon.
//!
//! The CLI holds no state of its own: every command is one request over the
//! daemon's Unix socket.

mod client;

use std::path::{Path, PathBuf};

pub use client::DaemonClient;

use crate::error::Result;
use zl_ipc::{DaemonRequest, DaemonResponse};

/// Socket filename within the state directory, shared with `zaplined`.
pub const SOCKET_NAME: &str = "zaplined.sock";

/// Path of the daemon socket under `state_dir`.
pub fn get_socket_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SOCKET_NAME)
}

/// One request/response exchange with the daemon.
pub trait Requester {
    fn request(&mut self, request: DaemonRequest) -> Result<DaemonResponse>;
}
