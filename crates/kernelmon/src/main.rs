//! kernelmon: live In/Out transcript of a Jupyter kernel.
//!
//! Usage:
//!   kernelmon                    # write to the kernel's own terminal
//!   kernelmon /tmp/transcript    # write to a file
//!   kernelmon --existing 4242    # pick kernel-4242.json

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use kernelmon_core::connection::{self, DEFAULT_PATTERN};
use kernelmon_core::handshake::{self, HandshakeConfig, HandshakeError, RetryPolicy};
use kernelmon_core::highlight::make_highlighter;
use kernelmon_core::transport::parse_bridge_command;
use kernelmon_core::{Color, Exit, Monitor, MonitorError, PromptStyle, Transcript, TransportError};
use signal_hook::consts::SIGINT;
use signal_hook::SigId;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "kernelmon")]
#[command(version, about = "Render a live In/Out transcript of a Jupyter kernel")]
struct Args {
    /// Write the transcript here instead of the kernel's terminal
    output: Option<PathBuf>,

    /// Connection file path, glob, or kernel id
    #[arg(long, env = "KERNELMON_EXISTING", default_value = DEFAULT_PATTERN)]
    existing: String,

    /// Jupyter runtime directory to search for connection files
    #[arg(long, env = "KERNELMON_RUNTIME_DIR")]
    runtime_dir: Option<PathBuf>,

    /// Bridge command; the connection file is appended as its last argument
    #[arg(long, env = "KERNELMON_BRIDGE", default_value = "kernelmon-bridge")]
    bridge: String,

    /// Directory for the protocol trace log
    #[arg(long, env = "KERNELMON_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Trace log file name (defaults to the connection file stem)
    #[arg(long, env = "KERNELMON_LOG_ID")]
    log_id: Option<String>,

    /// Color of the input prompt (name or 0-255)
    #[arg(long, default_value = "28")]
    in_color: Color,

    /// Color of the input prompt number
    #[arg(long, default_value = "46")]
    in_number_color: Color,

    /// Color of the output prompt
    #[arg(long, default_value = "196")]
    out_color: Color,

    /// Color of the output prompt number
    #[arg(long, default_value = "196")]
    out_number_color: Color,

    /// Color of stdout/stderr text
    #[arg(long, default_value = "cyan")]
    stream_color: Color,

    /// Language used to highlight input code
    #[arg(long, env = "KERNELMON_LANGUAGE", default_value = "python")]
    language: String,

    /// Print input code without syntax highlighting
    #[arg(long)]
    no_highlight: bool,

    /// Give up connecting after this many attempts
    #[arg(long, env = "KERNELMON_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// How long to wait for each kernel reply
    #[arg(long, env = "KERNELMON_REPLY_TIMEOUT_MS", default_value_t = 1000)]
    reply_timeout_ms: u64,

    /// More diagnostics on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Cannot open {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot install interrupt handler: {0}")]
    Signal(#[source] std::io::Error),
}

impl Args {
    fn handshake_config(&self) -> Result<HandshakeConfig, CliError> {
        Ok(HandshakeConfig {
            pattern: self.existing.clone(),
            runtime_dir: self.runtime_dir.clone().or_else(connection::runtime_dir),
            bridge: parse_bridge_command(&self.bridge)?,
            log_dir: self.log_dir.clone(),
            log_id: self.log_id.clone(),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
        })
    }

    fn prompt_style(&self) -> PromptStyle {
        PromptStyle {
            in_color: self.in_color,
            in_number_color: self.in_number_color,
            out_color: self.out_color,
            out_number_color: self.out_number_color,
            stream_color: self.stream_color,
            ..PromptStyle::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();
}

fn open_output(path: &Path, read: bool) -> Result<File, CliError> {
    let result = if read {
        OpenOptions::new().read(true).write(true).open(path)
    } else {
        File::create(path)
    };
    result.map_err(|source| CliError::Output {
        path: path.to_path_buf(),
        source,
    })
}

/// Make SIGINT only raise `interrupted` (checked by the handshake).
fn catch_interrupt(interrupted: &Arc<AtomicBool>) -> Result<SigId, CliError> {
    signal_hook::flag::register(SIGINT, Arc::clone(interrupted)).map_err(CliError::Signal)
}

/// Give SIGINT its default action back once bootstrap is over.
///
/// Unregistering alone would leave an empty handler behind, so the flag is
/// armed and a handler that re-raises with the default disposition is added.
fn restore_default_interrupt(interrupted: &Arc<AtomicBool>) -> Result<SigId, CliError> {
    interrupted.store(true, Ordering::SeqCst);
    signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(interrupted))
        .map_err(CliError::Signal)
}

fn run(args: &Args) -> Result<ExitCode, CliError> {
    let config = args.handshake_config()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    catch_interrupt(&interrupted)?;

    let bootstrap = handshake::connect(&config, &interrupted).and_then(|mut bridge| {
        println!("kernelmon connected successfully!");
        let target = match &args.output {
            Some(path) => path.clone(),
            None => handshake::resolve_tty(&mut bridge, config.reply_timeout, &interrupted)?,
        };
        Ok((bridge, target))
    });

    let (mut bridge, target) = match bootstrap {
        Ok(ready) => ready,
        Err(HandshakeError::Interrupted) => {
            log::info!("Interrupted while connecting");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };
    restore_default_interrupt(&interrupted)?;

    let out = open_output(&target, args.output.is_none())?;
    let highlighter = make_highlighter(&args.language, !args.no_highlight);
    let mut monitor = Monitor::new(Transcript::new(out, args.prompt_style(), highlighter));

    match monitor.run(&mut bridge)? {
        Exit::Shutdown => Ok(ExitCode::SUCCESS),
        Exit::StreamClosed => {
            log::error!("Lost connection to the kernel");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
