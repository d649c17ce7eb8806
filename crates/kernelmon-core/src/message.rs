//! Kernel messages as they arrive on the broadcast stream.
//!
//! A [`KernelMessage`] mirrors the Jupyter wire message after the transport
//! has decoded it: `header`, `parent_header`, `metadata` and a free-form
//! `content`. Kind-specific payloads are decoded lazily with
//! [`KernelMessage::content_as`] (see [`crate::content`]).

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message header (also used for `parent_header`).
///
/// Every field defaults so that an empty `parent_header: {}` still parses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub msg_type: String,
    #[serde(default)]
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A decoded kernel message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelMessage {
    #[serde(default)]
    pub header: Header,
    #[serde(default)]
    pub parent_header: Header,
    /// Some transports repeat the type at the top level; it wins over
    /// `header.msg_type` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub content: serde_json::Value,
    /// Anything else the transport attached, kept for diagnostics.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Classification of a message by its type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `execute_input` (legacy `pyin`): the code a client submitted.
    InputEcho,
    /// `execute_result` (legacy `pyout`).
    OutputValue,
    DisplayData,
    /// `error` (legacy `pyerr`).
    Error,
    Stream,
    Status,
    ClearOutput,
    /// `shutdown_reply`: the kernel is going away.
    Shutdown,
    /// Anything the transcript has no dedicated rendering for.
    Other(String),
}

impl EventKind {
    pub fn from_msg_type(msg_type: &str) -> Self {
        match msg_type {
            "execute_input" | "pyin" => EventKind::InputEcho,
            "execute_result" | "pyout" => EventKind::OutputValue,
            "display_data" => EventKind::DisplayData,
            "error" | "pyerr" => EventKind::Error,
            "stream" => EventKind::Stream,
            "status" => EventKind::Status,
            "clear_output" => EventKind::ClearOutput,
            "shutdown_reply" => EventKind::Shutdown,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// Canonical message type for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::InputEcho => "execute_input",
            EventKind::OutputValue => "execute_result",
            EventKind::DisplayData => "display_data",
            EventKind::Error => "error",
            EventKind::Stream => "stream",
            EventKind::Status => "status",
            EventKind::ClearOutput => "clear_output",
            EventKind::Shutdown => "shutdown_reply",
            EventKind::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KernelMessage {
    /// The raw message type string.
    pub fn msg_type(&self) -> &str {
        self.msg_type.as_deref().unwrap_or(&self.header.msg_type)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_msg_type(self.msg_type())
    }

    /// Session of the client whose request produced this message.
    pub fn session_id(&self) -> &str {
        &self.parent_header.session
    }

    /// Id of the request this message answers.
    pub fn parent_id(&self) -> &str {
        &self.parent_header.msg_id
    }

    /// Decode `content` into a typed payload.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.content)
    }
}
