//! Transport interfaces and the bridge-backed implementation.
//!
//! kernelmon does not speak ZeroMQ itself. A bridge process owns the kernel
//! sockets and exchanges newline-delimited JSON with us over stdio:
//!
//! - stdout: one message per line, tagged with `"channel": "iopub" | "shell"`
//! - stdin: one `execute_request` per line
//! - stderr: free-form diagnostics, forwarded to the log
//!
//! The rest of the crate only sees the two traits below, so tests drive the
//! monitor with in-memory transports.

mod bridge;
mod lines;

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::message::KernelMessage;

pub use bridge::{parse_bridge_command, BridgeProcess};
pub use lines::{LineTransport, DRAIN_WAIT};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Bridge command is empty")]
    EmptyCommand,

    #[error("Bridge command could not be parsed: {0}")]
    InvalidCommand(String),

    #[error("Failed to spawn bridge '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture bridge {0}")]
    Pipe(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The kernel's one-to-many broadcast (IOPub) stream.
pub trait BroadcastTransport {
    /// Block until at least one message is available.
    ///
    /// Returns [`TransportError::Closed`] once the stream is exhausted.
    fn wait_for_activity(&mut self) -> Result<(), TransportError>;

    /// Collect every message buffered right now. May return nothing.
    fn drain(&mut self) -> Vec<KernelMessage>;
}

/// The request/reply (shell) channel, used only during bootstrap.
pub trait CommandChannel {
    /// Send an `execute_request` and return its message id.
    fn send(
        &mut self,
        code: &str,
        silent: bool,
        user_expressions: &BTreeMap<String, String>,
    ) -> Result<String, TransportError>;

    /// Wait up to `timeout` for the next reply. `Ok(None)` on timeout.
    fn recv_reply(&mut self, timeout: Duration) -> Result<Option<KernelMessage>, TransportError>;
}
