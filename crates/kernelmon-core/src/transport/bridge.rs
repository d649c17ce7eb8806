//! Bridge process management.
//!
//! Spawns the bridge with the kernel's connection file as its last argument
//! and wires its stdio into a [`LineTransport`]. Dropping the handle kills
//! the process.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::Duration;

use super::{BroadcastTransport, CommandChannel, LineTransport, TransportError};
use crate::logging::LogHandle;
use crate::message::KernelMessage;

/// Split a bridge command line into program and arguments.
///
/// Uses shell quoting rules, so `"python -m my_bridge --flag 'a b'"` works.
pub fn parse_bridge_command(command: &str) -> Result<Vec<String>, TransportError> {
    let argv = shlex::split(command)
        .ok_or_else(|| TransportError::InvalidCommand(command.to_string()))?;
    if argv.is_empty() {
        return Err(TransportError::EmptyCommand);
    }
    Ok(argv)
}

/// A running bridge process.
pub struct BridgeProcess {
    child: Child,
    transport: LineTransport<ChildStdin>,
}

impl BridgeProcess {
    /// Spawn `argv` with `connection_file` appended.
    pub fn spawn(
        argv: &[String],
        connection_file: &Path,
        log: LogHandle,
    ) -> Result<Self, TransportError> {
        let (program, args) = argv.split_first().ok_or(TransportError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .arg(connection_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(TransportError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(TransportError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(TransportError::Pipe("stderr"))?;

        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                log::debug!("bridge: {}", line);
            }
        });

        log::debug!("Spawned bridge '{}' (pid {})", program, child.id());
        Ok(Self {
            transport: LineTransport::new(stdout, stdin, log),
            child,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl fmt::Debug for BridgeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeProcess")
            .field("pid", &self.child.id())
            .field("session", &self.transport.session())
            .finish()
    }
}

impl Drop for BridgeProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

impl BroadcastTransport for BridgeProcess {
    fn wait_for_activity(&mut self) -> Result<(), TransportError> {
        self.transport.wait_for_activity()
    }

    fn drain(&mut self) -> Vec<KernelMessage> {
        self.transport.drain()
    }
}

impl CommandChannel for BridgeProcess {
    fn send(
        &mut self,
        code: &str,
        silent: bool,
        user_expressions: &BTreeMap<String, String>,
    ) -> Result<String, TransportError> {
        self.transport.send(code, silent, user_expressions)
    }

    fn recv_reply(&mut self, timeout: Duration) -> Result<Option<KernelMessage>, TransportError> {
        self.transport.recv_reply(timeout)
    }
}
