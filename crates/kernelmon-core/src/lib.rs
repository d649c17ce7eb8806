//! # kernelmon-core
//!
//! Core logic for kernelmon, a live transcript of a Jupyter kernel.
//!
//! The monitor attaches to a running kernel through a bridge process,
//! listens to its broadcast stream, and renders the executions issued by
//! editor clients as a colorized `In [N]:` / `Out [N]:` log on the kernel's
//! own terminal (or any writer).
//!
//! ## Key Concepts
//!
//! - **Bridge**: external process that owns the kernel sockets and speaks
//!   newline-delimited JSON over stdio
//! - **Session marker**: a fixed snippet editor clients execute to announce
//!   their session, see [`SESSION_MARKER`]
//! - **Transcript**: the prompt state machine that turns messages into text

pub mod color;
pub mod connection;
pub mod content;
pub mod handshake;
pub mod highlight;
pub mod logging;
pub mod message;
pub mod monitor;
pub mod session;
pub mod transcript;
pub mod transport;

// Re-export commonly used types
pub use color::{Color, NamedColor};
pub use handshake::{HandshakeConfig, HandshakeError, RetryPolicy};
pub use message::{EventKind, KernelMessage};
pub use monitor::{Exit, Monitor, MonitorError};
pub use session::{SessionRegistry, SESSION_MARKER};
pub use transcript::{PromptStyle, Transcript};
pub use transport::{BridgeProcess, BroadcastTransport, CommandChannel, TransportError};
