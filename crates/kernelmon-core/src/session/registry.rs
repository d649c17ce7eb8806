//! SessionRegistry - decides which clients' messages belong in the transcript.

use std::collections::HashSet;

use crate::content::ExecuteInput;
use crate::message::{EventKind, KernelMessage};

/// Code a client executes once to announce itself to the monitor.
pub const SESSION_MARKER: &str = r#""_vim_client";_=_;__=__"#;

/// Set of client sessions whose activity is rendered.
///
/// The broadcast stream carries every client connected to the kernel.
/// A session joins the registry when it echoes [`SESSION_MARKER`] and
/// never leaves it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashSet<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether messages from `session_id` should be rendered.
    pub fn is_own(&self, session_id: &str) -> bool {
        !session_id.is_empty() && self.sessions.contains(session_id)
    }

    /// Register the sender of a marker input.
    ///
    /// Returns `true` when `msg` is a marker (registered now or before);
    /// the caller must not process it any further.
    pub fn register_if_marker(&mut self, msg: &KernelMessage) -> bool {
        if msg.kind() != EventKind::InputEcho {
            return false;
        }
        let is_marker = msg
            .content_as::<ExecuteInput>()
            .map(|input| input.code == SESSION_MARKER)
            .unwrap_or(false);
        if !is_marker {
            return false;
        }

        let session = msg.session_id();
        if session.is_empty() {
            log::warn!("Ignoring session marker without a parent session");
        } else if self.sessions.insert(session.to_string()) {
            log::info!("Following client session {}", session);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
