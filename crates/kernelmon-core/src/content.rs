//! Typed payloads for the message kinds the transcript renders.
//!
//! Each struct matches the `content` of one Jupyter message type. Decoding
//! is tolerant: optional keys default, and legacy key names are accepted
//! through `alias`.

use serde::Deserialize;
use serde_json::{Map, Value};

/// MIME bundle (`data` of results and display data).
pub type MimeBundle = Map<String, Value>;

const TEXT_PLAIN: &str = "text/plain";

/// `execute_input` / `pyin`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    #[serde(default)]
    pub execution_count: Option<u64>,
}

/// `execute_result` / `pyout`, and `display_data` (which has no counter).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResult {
    #[serde(default)]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub data: MimeBundle,
}

impl ExecuteResult {
    /// Text to print for this result.
    ///
    /// Uses `text/plain`; bundles without it (images, HTML only) are shown
    /// as a bracketed list of their MIME types.
    pub fn plain_text(&self) -> String {
        match self.data.get(TEXT_PLAIN) {
            Some(Value::String(text)) => text.clone(),
            // Older kernels may split text into a list of lines.
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .concat(),
            Some(other) => other.to_string(),
            None => {
                let kinds: Vec<&str> = self.data.keys().map(String::as_str).collect();
                format!("[{}]", kinds.join(", "))
            }
        }
    }
}

/// `error` / `pyerr`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// `stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamContent {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "data")]
    pub text: String,
}

/// `status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusContent {
    pub execution_state: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
    #[serde(other)]
    Unknown,
}

/// `clear_output`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearOutput {
    #[serde(default)]
    pub wait: bool,
}
