//! The dispatch loop.
//!
//! Blocks until the broadcast stream has traffic, drains everything queued,
//! and routes each message: shutdown ends the loop, the session marker
//! registers an editor session, foreign sessions are dropped, and the rest
//! goes to the [`Transcript`].

use std::io::{self, Write};

use thiserror::Error;

use crate::message::{EventKind, KernelMessage};
use crate::session::SessionRegistry;
use crate::transcript::Transcript;
use crate::transport::{BroadcastTransport, TransportError};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to write transcript: {0}")]
    Output(#[from] io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The kernel announced it is shutting down.
    Shutdown,
    /// The bridge went away without a shutdown.
    StreamClosed,
}

pub struct Monitor<W: Write> {
    registry: SessionRegistry,
    transcript: Transcript<W>,
}

impl<W: Write> Monitor<W> {
    pub fn new(transcript: Transcript<W>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            transcript,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn transcript(&self) -> &Transcript<W> {
        &self.transcript
    }

    pub fn into_transcript(self) -> Transcript<W> {
        self.transcript
    }

    /// Run until shutdown or until the transport closes.
    pub fn run<T: BroadcastTransport>(&mut self, transport: &mut T) -> Result<Exit, MonitorError> {
        loop {
            match transport.wait_for_activity() {
                Ok(()) => {}
                Err(TransportError::Closed) => {
                    log::warn!("Broadcast stream closed");
                    self.transcript.flush()?;
                    return Ok(Exit::StreamClosed);
                }
                Err(e) => return Err(e.into()),
            }

            for msg in transport.drain() {
                if let Some(exit) = self.dispatch(&msg)? {
                    return Ok(exit);
                }
            }
        }
    }

    /// Route a single message. Returns `Some` when the loop should stop.
    pub fn dispatch(&mut self, msg: &KernelMessage) -> Result<Option<Exit>, MonitorError> {
        if msg.kind() == EventKind::Shutdown {
            log::info!("Kernel is shutting down");
            self.transcript.flush()?;
            return Ok(Some(Exit::Shutdown));
        }

        if self.registry.register_if_marker(msg) {
            return Ok(None);
        }

        let session = msg.session_id();
        if !self.registry.is_own(session) {
            log::debug!("Skipping {} from session '{}'", msg.msg_type(), session);
            return Ok(None);
        }

        self.transcript.handle(msg)?;
        self.transcript.flush()?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::strip_ansi;
    use crate::highlight::PlainHighlighter;
    use crate::session::SESSION_MARKER;
    use crate::transcript::PromptStyle;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Broadcast stream replaying fixed batches, then closing.
    struct ScriptedTransport {
        batches: VecDeque<Vec<KernelMessage>>,
    }

    impl ScriptedTransport {
        fn new(batches: Vec<Vec<KernelMessage>>) -> Self {
            Self {
                batches: batches.into(),
            }
        }
    }

    impl BroadcastTransport for ScriptedTransport {
        fn wait_for_activity(&mut self) -> Result<(), TransportError> {
            if self.batches.is_empty() {
                Err(TransportError::Closed)
            } else {
                Ok(())
            }
        }

        fn drain(&mut self) -> Vec<KernelMessage> {
            self.batches.pop_front().unwrap_or_default()
        }
    }

    fn msg(msg_type: &str, session: &str, parent: &str, content: serde_json::Value) -> KernelMessage {
        serde_json::from_value(json!({
            "header": {"msg_id": "m", "msg_type": msg_type, "session": "kernel"},
            "parent_header": {"msg_id": parent, "session": session},
            "content": content
        }))
        .unwrap()
    }

    fn marker(session: &str) -> KernelMessage {
        msg(
            "execute_input",
            session,
            "marker",
            json!({"code": SESSION_MARKER, "execution_count": 1}),
        )
    }

    fn input(session: &str, parent: &str, code: &str, count: u64) -> KernelMessage {
        msg(
            "execute_input",
            session,
            parent,
            json!({"code": code, "execution_count": count}),
        )
    }

    fn result(session: &str, parent: &str, count: u64, text: &str) -> KernelMessage {
        msg(
            "execute_result",
            session,
            parent,
            json!({"execution_count": count, "data": {"text/plain": text}, "metadata": {}}),
        )
    }

    fn idle(session: &str, parent: &str) -> KernelMessage {
        msg("status", session, parent, json!({"execution_state": "idle"}))
    }

    fn monitor() -> Monitor<Vec<u8>> {
        Monitor::new(Transcript::new(
            Vec::new(),
            PromptStyle::default(),
            Box::new(PlainHighlighter),
        ))
    }

    fn output(m: &Monitor<Vec<u8>>) -> String {
        strip_ansi(&String::from_utf8_lossy(m.transcript().get_ref()))
    }

    mod filtering {
        use super::*;

        #[test]
        fn foreign_sessions_render_nothing() {
            let mut m = monitor();
            let mut t = ScriptedTransport::new(vec![vec![
                input("notebook", "r1", "2+2", 5),
                result("notebook", "r1", 5, "4"),
                idle("notebook", "r1"),
            ]]);

            assert_eq!(m.run(&mut t).unwrap(), Exit::StreamClosed);
            assert_eq!(output(&m), "");
            assert_eq!(m.transcript().state().last_execution_count, 0);
            assert!(m.transcript().state().last_event_kind.is_none());
        }

        #[test]
        fn marker_renders_nothing_and_is_idempotent() {
            let mut m = monitor();
            let mut t = ScriptedTransport::new(vec![vec![marker("vim"), marker("vim")]]);

            m.run(&mut t).unwrap();
            assert_eq!(output(&m), "");
            assert_eq!(m.registry().len(), 1);
            assert!(m.registry().is_own("vim"));
        }

        #[test]
        fn registered_session_is_rendered() {
            let mut m = monitor();
            let mut t = ScriptedTransport::new(vec![
                vec![marker("vim")],
                vec![
                    input("vim", "r1", "2+2", 5),
                    result("vim", "r1", 5, "4"),
                    input("notebook", "r9", "1/0", 6),
                    idle("vim", "r1"),
                ],
            ]);

            m.run(&mut t).unwrap();
            assert_eq!(output(&m), "\rIn [5]: 2+2\nOut [5]: 4\nIn [6]: ");
        }
    }

    mod exits {
        use super::*;

        #[test]
        fn shutdown_from_any_session_stops_the_loop() {
            let mut m = monitor();
            let mut t = ScriptedTransport::new(vec![
                vec![
                    marker("vim"),
                    msg("shutdown_reply", "other", "r", json!({"restart": false})),
                    input("vim", "r1", "never", 2),
                ],
                vec![input("vim", "r2", "never", 3)],
            ]);

            assert_eq!(m.run(&mut t).unwrap(), Exit::Shutdown);
            assert_eq!(output(&m), "");
            assert_eq!(t.batches.len(), 1);
        }

        #[test]
        fn unknown_kinds_do_not_stop_the_loop() {
            let mut m = monitor();
            let mut t = ScriptedTransport::new(vec![
                vec![marker("vim")],
                vec![msg("comm_open", "vim", "r1", json!({"comm_id": "c"}))],
                vec![input("vim", "r2", "x", 2)],
            ]);

            assert_eq!(m.run(&mut t).unwrap(), Exit::StreamClosed);
            let out = output(&m);
            assert!(out.starts_with("msg_type = comm_open\n"));
            assert!(out.ends_with("In [2]: x"));
        }

        #[test]
        fn closed_stream_without_traffic() {
            let mut m = monitor();
            let mut t = ScriptedTransport::new(Vec::new());
            assert_eq!(m.run(&mut t).unwrap(), Exit::StreamClosed);
        }
    }

    #[test]
    fn write_failure_is_reported() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut m = Monitor::new(Transcript::new(
            Broken,
            PromptStyle::default(),
            Box::new(PlainHighlighter),
        ));
        let mut t = ScriptedTransport::new(vec![vec![marker("vim"), input("vim", "r1", "x", 1)]]);

        assert!(matches!(m.run(&mut t), Err(MonitorError::Output(_))));
    }
}
