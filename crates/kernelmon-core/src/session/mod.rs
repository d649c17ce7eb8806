//! Session tracking for the shared broadcast stream.
//!
//! Only clients that announced themselves with the session marker are
//! rendered; everything else on the stream belongs to someone else.

mod registry;

pub use registry::{SessionRegistry, SESSION_MARKER};
