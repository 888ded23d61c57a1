// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

// Allow unused items: test helpers are shared across multiple test binaries,
// and not every test file uses every helper.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::os::unix::net::UnixListener;
use std::path::Path;
use std::thread::{self, JoinHandle};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use zl_ipc::{framing, DaemonRequest, DaemonResponse};

pub use predicates::prelude::*;
pub use tempfile::TempDir;

pub fn zap() -> Command {
    let mut cmd = cargo_bin_cmd!("zap");
    cmd.env_remove("ZAPLINE_STATE_DIR").env("NO_COLOR", "1");
    cmd
}

/// `zap` pointed at `dir` as its state directory.
pub fn zap_in(dir: &Path) -> Command {
    let mut cmd = zap();
    cmd.arg("--state-dir").arg(dir);
    cmd
}

/// Listen on `<dir>/zaplined.sock` and answer one request per response,
/// returning the requests that arrived.
pub fn fake_daemon(dir: &Path, responses: Vec<DaemonResponse>) -> JoinHandle<Vec<DaemonRequest>> {
    let listener = UnixListener::bind(dir.join("zaplined.sock")).unwrap();
    thread::spawn(move || {
        let mut seen = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let request: DaemonRequest = framing::read_message(&mut stream).unwrap();
            seen.push(request);
            framing::write_message(&mut stream, &response).unwrap();
        }
        seen
    })
}
