//! Protocol trace log.
//!
//! Optional append-only file holding every raw line exchanged with the
//! bridge, with a UTC timestamp and direction. Diagnostics go through the
//! `log` facade instead; this file is for replaying what the kernel said.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only trace file.
///
/// Shared between the bridge reader thread (RECV) and the sender (SEND).
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// A handle that drops every line.
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

/// ISO 8601 UTC with milliseconds, e.g. `2026-02-04T10:15:30.123Z`.
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the trace file (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = utc_timestamp();
            let _ = writeln!(file, "[{}] {}: {}", ts, direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// Failures are logged and yield a disabled handle; tracing never stops the
/// monitor.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        let path = dir.join(format!("{}.log", log_id));
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create trace log dir {}: {}", dir.display(), e);
            return None;
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                log::info!("Tracing protocol traffic to {}", path.display());
                Some(file)
            }
            Err(e) => {
                log::warn!("Cannot open trace log {}: {}", path.display(), e);
                None
            }
        }
    });
    Arc::new(Mutex::new(file))
}
