//! Newline-delimited JSON transport.
//!
//! A reader thread splits incoming lines by channel into two mpsc queues;
//! the owner of the [`LineTransport`] consumes them from a single thread.

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BroadcastTransport, CommandChannel, TransportError};
use crate::logging::{log_line, LogHandle};
use crate::message::{Header, KernelMessage};

/// How long a drain attempt waits before deciding nothing else is queued.
pub const DRAIN_WAIT: Duration = Duration::from_millis(1);

const PROTOCOL_VERSION: &str = "5.3";
const USERNAME: &str = "kernelmon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Channel {
    Iopub,
    Shell,
    #[serde(other)]
    Other,
}

/// A line read from the bridge.
#[derive(Debug, Deserialize)]
struct Envelope {
    channel: Channel,
    #[serde(flatten)]
    message: KernelMessage,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    channel: Channel,
    header: Header,
    parent_header: serde_json::Map<String, serde_json::Value>,
    metadata: serde_json::Map<String, serde_json::Value>,
    content: ExecuteRequestContent<'a>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequestContent<'a> {
    code: &'a str,
    silent: bool,
    store_history: bool,
    user_expressions: &'a BTreeMap<String, String>,
    allow_stdin: bool,
    stop_on_error: bool,
}

/// Transport over any line reader/writer pair.
pub struct LineTransport<W: Write> {
    writer: W,
    iopub: Receiver<KernelMessage>,
    shell: Receiver<KernelMessage>,
    /// Message consumed by `wait_for_activity`, handed out by the next drain.
    pending: VecDeque<KernelMessage>,
    session: String,
    log: LogHandle,
}

impl<W: Write> LineTransport<W> {
    /// Start reading `reader` on a background thread.
    ///
    /// The thread ends at EOF; the transport then reports
    /// [`TransportError::Closed`] once the queues are empty.
    pub fn new<R: Read + Send + 'static>(reader: R, writer: W, log: LogHandle) -> Self {
        let (iopub_tx, iopub_rx) = mpsc::channel();
        let (shell_tx, shell_rx) = mpsc::channel();

        let reader_log = LogHandle::clone(&log);
        thread::spawn(move || read_lines(reader, iopub_tx, shell_tx, reader_log));

        Self {
            writer,
            iopub: iopub_rx,
            shell: shell_rx,
            pending: VecDeque::new(),
            session: Uuid::new_v4().to_string(),
            log,
        }
    }

    /// Session id stamped on our own requests.
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

fn read_lines<R: Read>(
    reader: R,
    iopub: Sender<KernelMessage>,
    shell: Sender<KernelMessage>,
    log: LogHandle,
) {
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Bridge stream read failed: {}", e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        log_line(&log, "RECV", trimmed);

        let envelope: Envelope = match serde_json::from_str(trimmed) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Skipping malformed bridge line: {}", e);
                continue;
            }
        };
        // A dropped receiver just means nobody listens to that channel anymore.
        match envelope.channel {
            Channel::Iopub => {
                let _ = iopub.send(envelope.message);
            }
            Channel::Shell => {
                let _ = shell.send(envelope.message);
            }
            Channel::Other => {
                log::debug!("Ignoring {} message on an unused channel", envelope.message.msg_type());
            }
        }
    }
    log::debug!("Bridge stream reached EOF");
}

impl<W: Write> BroadcastTransport for LineTransport<W> {
    fn wait_for_activity(&mut self) -> Result<(), TransportError> {
        if !self.pending.is_empty() {
            return Ok(());
        }
        let msg = self.iopub.recv().map_err(|_| TransportError::Closed)?;
        self.pending.push_back(msg);
        Ok(())
    }

    fn drain(&mut self) -> Vec<KernelMessage> {
        let mut msgs: Vec<KernelMessage> = self.pending.drain(..).collect();
        while let Ok(msg) = self.iopub.recv_timeout(DRAIN_WAIT) {
            msgs.push(msg);
        }
        msgs
    }
}

impl<W: Write> CommandChannel for LineTransport<W> {
    fn send(
        &mut self,
        code: &str,
        silent: bool,
        user_expressions: &BTreeMap<String, String>,
    ) -> Result<String, TransportError> {
        let msg_id = Uuid::new_v4().to_string();
        let request = ExecuteRequest {
            channel: Channel::Shell,
            header: Header {
                msg_id: msg_id.clone(),
                msg_type: "execute_request".to_string(),
                session: self.session.clone(),
                username: Some(USERNAME.to_string()),
                date: Some(chrono::Utc::now().to_rfc3339()),
                version: Some(PROTOCOL_VERSION.to_string()),
            },
            parent_header: serde_json::Map::new(),
            metadata: serde_json::Map::new(),
            content: ExecuteRequestContent {
                code,
                silent,
                store_history: !silent,
                user_expressions,
                allow_stdin: false,
                stop_on_error: true,
            },
        };

        let line = serde_json::to_string(&request)?;
        log_line(&self.log, "SEND", &line);
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(msg_id)
    }

    fn recv_reply(&mut self, timeout: Duration) -> Result<Option<KernelMessage>, TransportError> {
        match self.shell.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::disabled;
    use crate::message::EventKind;
    use std::io::Cursor;

    fn transport(input: &str) -> LineTransport<Vec<u8>> {
        LineTransport::new(Cursor::new(input.to_string()), Vec::new(), disabled())
    }

    const STATUS: &str = r#"{"channel":"iopub","header":{"msg_id":"a","msg_type":"status"},"parent_header":{"msg_id":"r","session":"s"},"content":{"execution_state":"busy"}}"#;
    const STREAM: &str = r#"{"channel":"iopub","header":{"msg_id":"b","msg_type":"stream"},"parent_header":{"msg_id":"r","session":"s"},"content":{"name":"stdout","text":"hi"}}"#;
    const REPLY: &str = r#"{"channel":"shell","header":{"msg_id":"c","msg_type":"execute_reply"},"parent_header":{"msg_id":"r"},"content":{"status":"ok"}}"#;

    #[test]
    fn routes_messages_by_channel() {
        let mut t = transport(&format!("{STATUS}\n{REPLY}\n{STREAM}\n"));

        t.wait_for_activity().unwrap();
        let mut msgs = t.drain();
        // The reader may still be behind; keep draining until both arrive.
        while msgs.len() < 2 {
            t.wait_for_activity().unwrap();
            msgs.extend(t.drain());
        }
        let kinds: Vec<EventKind> = msgs.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec![EventKind::Status, EventKind::Stream]);

        let reply = t.recv_reply(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(reply.msg_type(), "execute_reply");
    }

    #[test]
    fn skips_malformed_and_foreign_lines() {
        let input = format!(
            "not json\n\n{{\"channel\":\"control\",\"header\":{{\"msg_type\":\"x\"}}}}\n{STATUS}\n"
        );
        let mut t = transport(&input);

        t.wait_for_activity().unwrap();
        let msgs = t.drain();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind(), EventKind::Status);
    }

    #[test]
    fn reports_closed_after_eof() {
        let mut t = transport(&format!("{STATUS}\n"));
        t.wait_for_activity().unwrap();
        assert_eq!(t.drain().len(), 1);
        assert!(matches!(t.wait_for_activity(), Err(TransportError::Closed)));
        assert!(t.drain().is_empty());
    }

    #[test]
    fn reply_channel_reports_closed_after_eof() {
        let mut t = transport("");
        let result = t.recv_reply(Duration::from_secs(5));
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn send_writes_execute_request_line() {
        let mut t = transport("");
        let mut expressions = BTreeMap::new();
        expressions.insert("_tty".to_string(), "_tty".to_string());

        let msg_id = t.send("1+1", true, &expressions).unwrap();

        let written = String::from_utf8(t.get_ref().clone()).unwrap();
        assert!(written.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(value["channel"], "shell");
        assert_eq!(value["header"]["msg_id"], msg_id.as_str());
        assert_eq!(value["header"]["msg_type"], "execute_request");
        assert_eq!(value["header"]["session"], t.session());
        assert_eq!(value["content"]["code"], "1+1");
        assert_eq!(value["content"]["silent"], true);
        assert_eq!(value["content"]["store_history"], false);
        assert_eq!(value["content"]["user_expressions"]["_tty"], "_tty");
    }

    #[test]
    fn each_request_gets_a_fresh_id() {
        let mut t = transport("");
        let a = t.send("", true, &BTreeMap::new()).unwrap();
        let b = t.send("", true, &BTreeMap::new()).unwrap();
        assert_ne!(a, b);
    }
}
