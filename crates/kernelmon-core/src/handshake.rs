//! Bootstrap: find the kernel, start the bridge, and resolve the output
//! terminal.
//!
//! Kernels come and go, so connecting is a retry loop. Each attempt reports
//! an [`Attempt`]: ready, worth retrying, or fatal. An interrupt flag
//! (set from a signal handler by the binary) ends the loop cleanly at any
//! point.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::connection::{find_connection_file, ConnectionError, ConnectionInfo, DEFAULT_PATTERN};
use crate::logging::open_log_file;
use crate::message::KernelMessage;
use crate::transport::{BridgeProcess, CommandChannel, TransportError};

/// Code evaluated in the kernel to learn its controlling terminal.
pub const TTY_PROBE: &str = "import os as _os; _tty = _os.ttyname(1)";
const TTY_EXPRESSION: &str = "_tty";

const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Interrupted")]
    Interrupted,

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("{0}")]
    Fatal(String),

    #[error("Kernel has no terminal to write to ({0}); pass an output file instead")]
    NoTerminal(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of one bootstrap attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Ready(T),
    Retry(String),
    Fatal(String),
}

/// How often and how fast to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until interrupted.
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based), doubling up to the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Everything needed to reach a kernel.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Connection file path, glob, or kernel id.
    pub pattern: String,
    pub runtime_dir: Option<PathBuf>,
    /// Bridge argv; the connection file is appended.
    pub bridge: Vec<String>,
    pub log_dir: Option<PathBuf>,
    pub log_id: Option<String>,
    pub reply_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            runtime_dir: None,
            bridge: vec!["kernelmon-bridge".to_string()],
            log_dir: None,
            log_id: None,
            reply_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// Run `attempt` until it is ready, fatal, exhausted, or interrupted.
pub fn retry<T, F>(
    policy: &RetryPolicy,
    interrupted: &AtomicBool,
    mut attempt: F,
) -> Result<T, HandshakeError>
where
    F: FnMut(u32) -> Attempt<T>,
{
    let mut last_reason: Option<String> = None;
    let mut n = 0;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Err(HandshakeError::Interrupted);
        }
        n += 1;
        match attempt(n) {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Fatal(reason) => {
                log::error!("Giving up on kernel connection: {}", reason);
                return Err(HandshakeError::Fatal(reason));
            }
            Attempt::Retry(reason) => {
                // Only report a failure when it changes, the loop can run for hours.
                if last_reason.as_ref() != Some(&reason) {
                    log::warn!("Waiting for kernel: {}", reason);
                } else {
                    log::debug!("Attempt {} failed: {}", n, reason);
                }
                if policy.max_attempts.is_some_and(|max| n >= max) {
                    return Err(HandshakeError::Exhausted {
                        attempts: n,
                        last: reason,
                    });
                }
                last_reason = Some(reason);
                sleep_unless_interrupted(policy.delay(n), interrupted);
            }
        }
    }
}

fn sleep_unless_interrupted(total: Duration, interrupted: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !interrupted.load(Ordering::SeqCst) {
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
}

/// Connect to the newest matching kernel through a fresh bridge.
pub fn connect(
    config: &HandshakeConfig,
    interrupted: &AtomicBool,
) -> Result<BridgeProcess, HandshakeError> {
    retry(&config.retry, interrupted, |_| connect_once(config))
}

fn connect_once(config: &HandshakeConfig) -> Attempt<BridgeProcess> {
    let path = match find_connection_file(&config.pattern, config.runtime_dir.as_deref()) {
        Ok(path) => path,
        Err(e @ ConnectionError::Pattern { .. }) => return Attempt::Fatal(e.to_string()),
        Err(e) => return Attempt::Retry(e.to_string()),
    };
    // Read or parse failures usually mean the kernel is still writing the file.
    let info = match ConnectionInfo::load(&path) {
        Ok(info) => info,
        Err(e) => return Attempt::Retry(e.to_string()),
    };
    log::debug!(
        "Kernel '{}' broadcasts on {}",
        info.kernel_name,
        info.iopub_url()
    );

    let log_id = config.log_id.clone().unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "kernelmon".to_string())
    });
    let trace = open_log_file(config.log_dir.as_deref(), &log_id);

    let mut bridge = match BridgeProcess::spawn(&config.bridge, &path, trace) {
        Ok(bridge) => bridge,
        Err(
            e @ (TransportError::Spawn { .. }
            | TransportError::EmptyCommand
            | TransportError::InvalidCommand(_)),
        ) => return Attempt::Fatal(e.to_string()),
        Err(e) => return Attempt::Retry(e.to_string()),
    };

    // A failed ping drops (and kills) the bridge before the next attempt.
    match ping(&mut bridge, config.reply_timeout) {
        Ok(()) => Attempt::Ready(bridge),
        Err(reason) => Attempt::Retry(reason),
    }
}

/// Send a silent empty execution and wait for any reply.
pub fn ping<C: CommandChannel>(channel: &mut C, timeout: Duration) -> Result<(), String> {
    channel
        .send("", true, &BTreeMap::new())
        .map_err(|e| e.to_string())?;
    match channel.recv_reply(timeout) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(format!("no reply within {}ms", timeout.as_millis())),
        Err(e) => Err(e.to_string()),
    }
}

/// Ask the kernel which terminal its stdout is attached to.
///
/// Waits in `reply_timeout` slices until the correlated reply arrives;
/// replies to other requests are skipped and malformed replies trigger a
/// new probe.
pub fn resolve_tty<C: CommandChannel>(
    channel: &mut C,
    reply_timeout: Duration,
    interrupted: &AtomicBool,
) -> Result<PathBuf, HandshakeError> {
    let mut expressions = BTreeMap::new();
    expressions.insert(TTY_EXPRESSION.to_string(), TTY_EXPRESSION.to_string());

    let mut msg_id = channel.send(TTY_PROBE, true, &expressions)?;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Err(HandshakeError::Interrupted);
        }
        let Some(reply) = channel.recv_reply(reply_timeout)? else {
            continue;
        };
        if reply.parent_id() != msg_id {
            log::debug!("Skipping reply to {}", reply.parent_id());
            continue;
        }
        match parse_tty_reply(&reply) {
            Ok(path) => {
                log::info!("Writing transcript to {}", path.display());
                return Ok(path);
            }
            Err(TtyReplyError::Remote(reason)) => return Err(HandshakeError::NoTerminal(reason)),
            Err(TtyReplyError::Malformed(reason)) => {
                log::warn!("Malformed terminal probe reply ({}), asking again", reason);
                msg_id = channel.send(TTY_PROBE, true, &expressions)?;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum TtyReplyError {
    /// The expression raised in the kernel.
    Remote(String),
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct ExecuteReply {
    #[serde(default)]
    user_expressions: BTreeMap<String, ExpressionResult>,
}

#[derive(Debug, Deserialize)]
struct ExpressionResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ename: String,
    #[serde(default)]
    evalue: String,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

fn parse_tty_reply(reply: &KernelMessage) -> Result<PathBuf, TtyReplyError> {
    let content: ExecuteReply = reply
        .content_as()
        .map_err(|e| TtyReplyError::Malformed(e.to_string()))?;
    let result = content
        .user_expressions
        .get(TTY_EXPRESSION)
        .ok_or_else(|| TtyReplyError::Malformed("missing _tty expression".to_string()))?;

    if result.status.as_deref() == Some("error") {
        return Err(TtyReplyError::Remote(format!(
            "{}: {}",
            result.ename, result.evalue
        )));
    }

    let literal = result
        .data
        .get("text/plain")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TtyReplyError::Malformed("missing text/plain".to_string()))?;
    parse_python_str(literal)
        .map(PathBuf::from)
        .ok_or_else(|| TtyReplyError::Malformed(format!("not a string literal: {literal}")))
}

/// Decode the `repr()` of a Python `str`, e.g. `'/dev/pts/3'`.
fn parse_python_str(literal: &str) -> Option<String> {
    let literal = literal.trim();
    let quote = literal.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = literal.strip_prefix(quote)?.strip_suffix(quote)?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(char::from(u8::from_str_radix(&hex, 16).ok()?));
            }
            other => out.push(other),
        }
    }
    Some(out)
}
