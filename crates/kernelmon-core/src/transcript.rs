//! Transcript state machine.
//!
//! Turns accepted kernel messages into terminal output with IPython-style
//! `In [N]:` / `Out [N]:` framing.
//!
//! # How The Transcript Works
//!
//! The kernel never tells a passive observer "the prompt is ready". Input
//! echoes, results, errors and status changes arrive as separate messages,
//! so the transcript keeps three pieces of state:
//!
//! 1. `last_execution_count`: the counter of the most recent input or result,
//!    used to number prompts.
//! 2. `pending_execution_id`: the request id of the input still running. An
//!    idle status answering exactly that request prints the next prompt.
//! 3. `last_event_kind`: what was rendered last, which decides whether the
//!    next piece of output needs a separating newline.
//!
//! An error ends the pending execution itself (and prints the next prompt),
//! because an idle status tied to the same request is not guaranteed to
//! follow it.

use std::io::{self, Write};

use serde::de::DeserializeOwned;

use crate::color::{colorize, Color, NamedColor};
use crate::content::{
    ClearOutput, ErrorContent, ExecuteInput, ExecuteResult, ExecutionState, StatusContent,
    StreamContent,
};
use crate::highlight::Highlighter;
use crate::message::{EventKind, KernelMessage};

/// Erase the current line and return the cursor to column 0.
const CLEAR_LINE: &str = "\x1b[2K\r";

/// Colors used for prompts and stream text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptStyle {
    pub in_color: Color,
    pub in_number_color: Color,
    pub out_color: Color,
    pub out_number_color: Color,
    pub stream_color: Color,
    pub stream_bright: bool,
}

impl Default for PromptStyle {
    fn default() -> Self {
        Self {
            in_color: Color::Code(28),
            in_number_color: Color::Code(46),
            out_color: Color::Code(196),
            out_number_color: Color::Code(196),
            stream_color: Color::Named(NamedColor::Cyan),
            stream_bright: true,
        }
    }
}

/// Mutable rendering state. One instance lives for the whole process.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TranscriptState {
    pub last_execution_count: u64,
    /// Request id of the execution awaiting its idle status.
    pub pending_execution_id: Option<String>,
    /// Kind of the last message that produced output.
    pub last_event_kind: Option<EventKind>,
}

/// Renders kernel messages into `W`.
pub struct Transcript<W: Write> {
    out: W,
    state: TranscriptState,
    style: PromptStyle,
    highlighter: Box<dyn Highlighter>,
}

impl<W: Write> Transcript<W> {
    pub fn new(out: W, style: PromptStyle, highlighter: Box<dyn Highlighter>) -> Self {
        Self {
            out,
            state: TranscriptState::default(),
            style,
            highlighter,
        }
    }

    pub fn state(&self) -> &TranscriptState {
        &self.state
    }

    /// Borrow the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Render one message and update the state.
    ///
    /// Payloads that fail to decode are printed by the fallback renderer,
    /// like unknown kinds, so nothing is dropped silently.
    pub fn handle(&mut self, msg: &KernelMessage) -> io::Result<()> {
        match msg.kind() {
            EventKind::InputEcho => {
                if let Some(input) = self.decode::<ExecuteInput>(msg)? {
                    self.input_echo(msg, &input)?;
                }
            }
            EventKind::OutputValue => {
                if let Some(result) = self.decode::<ExecuteResult>(msg)? {
                    self.output_value(msg, &result, EventKind::OutputValue, true)?;
                }
            }
            EventKind::DisplayData => {
                if let Some(result) = self.decode::<ExecuteResult>(msg)? {
                    self.out.write_all(b"\n")?;
                    self.output_value(msg, &result, EventKind::DisplayData, false)?;
                }
            }
            EventKind::Error => {
                if let Some(error) = self.decode::<ErrorContent>(msg)? {
                    self.error(&error)?;
                }
            }
            EventKind::Stream => {
                if let Some(stream) = self.decode::<StreamContent>(msg)? {
                    self.stream(&stream)?;
                }
            }
            EventKind::Status => {
                if let Some(status) = self.decode::<StatusContent>(msg)? {
                    self.status(msg, &status)?;
                }
            }
            EventKind::ClearOutput => {
                if self.decode::<ClearOutput>(msg)?.is_some() {
                    self.clear_output()?;
                }
            }
            EventKind::Shutdown => {
                log::debug!("Shutdown message reached the transcript, nothing to render");
            }
            EventKind::Other(_) => self.other(msg)?,
        }
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&mut self, msg: &KernelMessage) -> io::Result<Option<T>> {
        match msg.content_as::<T>() {
            Ok(content) => Ok(Some(content)),
            Err(e) => {
                log::warn!("Undecodable {} content: {}", msg.msg_type(), e);
                self.other(msg)?;
                Ok(None)
            }
        }
    }

    /// Write `<label> [N]: ` in color and return its plain text.
    fn print_prompt(
        &mut self,
        label: &str,
        color: Color,
        number_color: Color,
        count_offset: u64,
    ) -> io::Result<String> {
        let count = (self.state.last_execution_count + count_offset).to_string();
        write!(
            self.out,
            "{}{}{}",
            colorize(&format!("{label} ["), color, false, false),
            colorize(&count, number_color, true, false),
            colorize("]: ", color, false, false),
        )?;
        Ok(format!("{label} [{count}]: "))
    }

    fn print_next_input_prompt(&mut self) -> io::Result<()> {
        self.out.write_all(b"\n")?;
        let (color, number_color) = (self.style.in_color, self.style.in_number_color);
        self.print_prompt("In", color, number_color, 1)?;
        self.state.pending_execution_id = None;
        Ok(())
    }

    fn input_echo(&mut self, msg: &KernelMessage, input: &ExecuteInput) -> io::Result<()> {
        if let Some(count) = input.execution_count {
            self.state.last_execution_count = count;
        }
        self.out.write_all(b"\r")?;

        let (color, number_color) = (self.style.in_color, self.style.in_number_color);
        let prompt = self.print_prompt("In", color, number_color, 0)?;

        // Continuation lines line up their ": " with the prompt's.
        let width = prompt.trim_end().len().saturating_sub(1);
        let indent = format!("{}: ", " ".repeat(width));
        let continuation = format!("\n{}", colorize(&indent, color, false, false));

        let code = self.highlighter.highlight(input.code.trim_end());
        self.out.write_all(code.replace('\n', &continuation).as_bytes())?;

        self.state.pending_execution_id = non_empty(msg.parent_id());
        self.state.last_event_kind = Some(EventKind::InputEcho);
        Ok(())
    }

    fn output_value(
        &mut self,
        msg: &KernelMessage,
        result: &ExecuteResult,
        kind: EventKind,
        prompt: bool,
    ) -> io::Result<()> {
        if let Some(count) = result.execution_count {
            self.state.last_execution_count = count;
            self.state.pending_execution_id = non_empty(msg.parent_id());
        }

        let text = result.plain_text();
        if prompt && result.execution_count.is_some() {
            self.out.write_all(b"\n")?;
            let (color, number_color) = (self.style.out_color, self.style.out_number_color);
            self.print_prompt("Out", color, number_color, 0)?;
            if text.contains('\n') {
                self.out.write_all(b"\n")?;
            }
        }
        self.out.write_all(text.as_bytes())?;

        self.state.last_event_kind = Some(kind);
        Ok(())
    }

    fn error(&mut self, error: &ErrorContent) -> io::Result<()> {
        for line in &error.traceback {
            write!(self.out, "\n{}", line)?;
        }

        let execution_running = self.state.pending_execution_id.is_some();
        let after_input = self.state.last_event_kind == Some(EventKind::InputEcho);
        if execution_running || !after_input {
            self.print_next_input_prompt()?;
        }

        self.state.last_event_kind = Some(EventKind::Error);
        Ok(())
    }

    fn stream(&mut self, stream: &StreamContent) -> io::Result<()> {
        if !matches!(
            self.state.last_event_kind,
            Some(EventKind::Error) | Some(EventKind::Stream)
        ) {
            self.out.write_all(b"\n")?;
        }
        let text = colorize(
            &stream.text,
            self.style.stream_color,
            false,
            self.style.stream_bright,
        );
        self.out.write_all(text.as_bytes())?;

        self.state.last_event_kind = Some(EventKind::Stream);
        Ok(())
    }

    fn status(&mut self, msg: &KernelMessage, status: &StatusContent) -> io::Result<()> {
        let answers_pending = self
            .state
            .pending_execution_id
            .as_deref()
            .is_some_and(|pending| pending == msg.parent_id());

        if status.execution_state == ExecutionState::Idle && answers_pending {
            self.print_next_input_prompt()?;
        }
        Ok(())
    }

    fn clear_output(&mut self) -> io::Result<()> {
        if self.state.last_event_kind == Some(EventKind::InputEcho) {
            self.out.write_all(b"\n\n")?;
        }
        self.out.write_all(CLEAR_LINE.as_bytes())
    }

    /// Fallback for anything without a dedicated renderer.
    fn other(&mut self, msg: &KernelMessage) -> io::Result<()> {
        let raw = serde_json::to_string(msg).unwrap_or_else(|e| format!("<unprintable: {e}>"));
        writeln!(self.out, "msg_type = {}", msg.msg_type())?;
        writeln!(self.out, "msg = {}", raw)?;
        self.state.last_event_kind = Some(msg.kind());
        Ok(())
    }
}

fn non_empty(id: &str) -> Option<String> {
    (!id.is_empty()).then(|| id.to_string())
}

// ============================================================================
// TESTS
// ============================================================================
