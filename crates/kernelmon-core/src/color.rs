//! ANSI color formatting for transcript output.
//!
//! Everything here is pure: text goes in, text wrapped in escape sequences
//! comes out. Callers that need widths (prompt indentation) measure the raw
//! text, never the colorized result.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const RESET: &str = "\x1b[0m";

/// One of the eight base terminal colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl NamedColor {
    pub const ALL: [NamedColor; 8] = [
        NamedColor::Black,
        NamedColor::Red,
        NamedColor::Green,
        NamedColor::Yellow,
        NamedColor::Blue,
        NamedColor::Magenta,
        NamedColor::Cyan,
        NamedColor::White,
    ];

    /// Palette index (0-7).
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            NamedColor::Black => "black",
            NamedColor::Red => "red",
            NamedColor::Green => "green",
            NamedColor::Yellow => "yellow",
            NamedColor::Blue => "blue",
            NamedColor::Magenta => "magenta",
            NamedColor::Cyan => "cyan",
            NamedColor::White => "white",
        }
    }
}

/// A color usable in the transcript: a named base color or a raw
/// 256-color palette code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Named(NamedColor),
    Code(u8),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown color '{0}' (expected a color name or a number 0-255)")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return Ok(Color::Code(code));
        }
        let lower = trimmed.to_ascii_lowercase();
        NamedColor::ALL
            .iter()
            .find(|c| c.name() == lower)
            .map(|c| Color::Named(*c))
            .ok_or_else(|| ParseColorError(s.to_string()))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Named(named) => f.write_str(named.name()),
            Color::Code(code) => write!(f, "{}", code),
        }
    }
}

impl From<NamedColor> for Color {
    fn from(named: NamedColor) -> Self {
        Color::Named(named)
    }
}

/// Wrap `text` in the escape sequence for `color`.
///
/// `bright` shifts a named color into the 90-97 range and has no effect on
/// numeric codes.
pub fn colorize(text: &str, color: Color, bold: bool, bright: bool) -> String {
    let code = match color {
        Color::Named(named) => {
            let base = if bright { 90 } else { 30 };
            format!("\x1b[{}", base + named.index() as u16)
        }
        Color::Code(code) => format!("\x1b[38;5;{}", code),
    };
    let weight = if bold { ";1" } else { "" };
    format!("{code}{weight}m{text}{RESET}")
}

/// Remove CSI escape sequences, leaving the visible text.
#[cfg(test)]
pub(crate) fn strip_ansi(text: &str) -> String {
    let mut out = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    mod colorize {
        use super::*;

        #[test]
        fn named_color() {
            let out = colorize("hi", Color::Named(NamedColor::Red), false, false);
            assert_eq!(out, "\x1b[31mhi\x1b[0m");
        }

        #[test]
        fn bright_named_color() {
            let out = colorize("hi", Color::Named(NamedColor::Cyan), false, true);
            assert_eq!(out, "\x1b[96mhi\x1b[0m");
        }

        #[test]
        fn numeric_code_ignores_bright() {
            let out = colorize("7", Color::Code(46), true, true);
            assert_eq!(out, "\x1b[38;5;46;1m7\x1b[0m");
        }

        #[test]
        fn bold_named_color() {
            let out = colorize("x", Color::Named(NamedColor::Black), true, false);
            assert_eq!(out, "\x1b[30;1mx\x1b[0m");
        }

        #[test]
        fn text_is_preserved_verbatim() {
            let text = "line one\n  line two";
            let out = colorize(text, Color::Code(28), false, false);
            assert!(out.contains(text));
        }
    }

    mod parse {
        use super::*;

        #[test]
        fn parses_names_case_insensitively() {
            assert_eq!("Cyan".parse(), Ok(Color::Named(NamedColor::Cyan)));
            assert_eq!("white".parse(), Ok(Color::Named(NamedColor::White)));
        }

        #[test]
        fn parses_codes() {
            assert_eq!("196".parse(), Ok(Color::Code(196)));
            assert_eq!(" 0 ".parse(), Ok(Color::Code(0)));
        }

        #[test]
        fn rejects_unknown() {
            assert!("purple".parse::<Color>().is_err());
            assert!("256".parse::<Color>().is_err());
        }

        #[test]
        fn display_matches_parse() {
            for text in ["green", "28"] {
                let color: Color = text.parse().unwrap();
                assert_eq!(color.to_string(), text);
            }
        }
    }
}
