//! Kernel connection file discovery.
//!
//! Kernels write a `kernel-<id>.json` file describing their sockets into the
//! Jupyter runtime directory. The monitor picks the most recently modified
//! file matching a pattern and hands its path to the bridge.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use thiserror::Error;

/// Pattern used when none is given.
pub const DEFAULT_PATTERN: &str = "kernel-*.json";

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("No connection file matching '{pattern}' in {searched:?}")]
    NotFound {
        pattern: String,
        searched: Vec<PathBuf>,
    },

    #[error("Invalid connection file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Contents of a kernel connection file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    #[serde(default)]
    pub stdin_port: u16,
    #[serde(default)]
    pub control_port: u16,
    #[serde(default)]
    pub hb_port: u16,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub signature_scheme: String,
    #[serde(default)]
    pub kernel_name: String,
}

fn default_transport() -> String {
    "tcp".to_string()
}

impl ConnectionInfo {
    pub fn load(path: &Path) -> Result<Self, ConnectionError> {
        let text = fs::read_to_string(path).map_err(|source| ConnectionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConnectionError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Address of the broadcast socket, e.g. `tcp://127.0.0.1:5556`.
    pub fn iopub_url(&self) -> String {
        format!("{}://{}:{}", self.transport, self.ip, self.iopub_port)
    }
}

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Jupyter's runtime directory, following its environment overrides.
pub fn runtime_dir() -> Option<PathBuf> {
    if let Some(dir) = env_path("JUPYTER_RUNTIME_DIR") {
        return Some(dir);
    }
    if let Some(data) = env_path("JUPYTER_DATA_DIR") {
        return Some(data.join("runtime"));
    }
    if cfg!(target_os = "macos") {
        return home_dir().map(|home| home.join("Library/Jupyter/runtime"));
    }
    if let Some(xdg) = env_path("XDG_DATA_HOME") {
        return Some(xdg.join("jupyter/runtime"));
    }
    home_dir().map(|home| home.join(".local/share/jupyter/runtime"))
}

/// Locate a connection file.
///
/// `pattern` may be an existing path, a glob over file names
/// (`kernel-*.json`), or a bare kernel id (`1234` matches `kernel-1234.json`).
/// Matches from the current directory and `runtime_dir` are pooled; the
/// newest one wins.
pub fn find_connection_file(
    pattern: &str,
    runtime_dir: Option<&Path>,
) -> Result<PathBuf, ConnectionError> {
    let direct = Path::new(pattern);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    let mut patterns = vec![pattern.to_string()];
    if !pattern.contains(['*', '?', '[']) && !pattern.ends_with(".json") {
        patterns.push(format!("kernel-{pattern}.json"));
    }
    let compiled = patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|source| ConnectionError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut searched = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        searched.push(cwd);
    }
    if let Some(dir) = runtime_dir {
        searched.push(dir.to_path_buf());
    }

    match newest_match(&searched, &compiled) {
        Some(found) => {
            log::debug!("Using connection file {}", found.display());
            Ok(found)
        }
        None => Err(ConnectionError::NotFound {
            pattern: pattern.to_string(),
            searched,
        }),
    }
}

/// Newest file matching any pattern, pooled over all `dirs`.
fn newest_match(dirs: &[PathBuf], patterns: &[glob::Pattern]) -> Option<PathBuf> {
    dirs.iter()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flatten()
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            patterns.iter().any(|p| p.matches(&name))
        })
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}
