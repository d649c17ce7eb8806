//! Syntax highlighting for echoed input.
//!
//! Highlighting is optional. [`make_highlighter`] returns a syntect-backed
//! highlighter when the `highlight` feature is compiled in and the language
//! is known, and a passthrough otherwise.

/// Turns source text into terminal-escaped source text.
///
/// Implementations must keep the line structure of the input: the output
/// has exactly as many `\n` separators as the input.
pub trait Highlighter {
    fn highlight(&self, code: &str) -> String;
}

/// Returns the code unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainHighlighter;

impl Highlighter for PlainHighlighter {
    fn highlight(&self, code: &str) -> String {
        code.to_string()
    }
}

#[cfg(feature = "highlight")]
pub use self::syntax::SyntectHighlighter;

#[cfg(feature = "highlight")]
mod syntax {
    use super::Highlighter;
    use syntect::easy::HighlightLines;
    use syntect::highlighting::{Theme, ThemeSet};
    use syntect::parsing::{SyntaxReference, SyntaxSet};
    use syntect::util::as_24_bit_terminal_escaped;

    const THEME: &str = "base16-ocean.dark";

    /// Highlighter backed by syntect's bundled syntaxes and themes.
    pub struct SyntectHighlighter {
        syntax_set: SyntaxSet,
        syntax_name: String,
        theme: Theme,
    }

    impl SyntectHighlighter {
        /// Build a highlighter for `language` (a name, token or extension).
        ///
        /// Returns `None` when syntect has no syntax for it.
        pub fn new(language: &str) -> Option<Self> {
            let syntax_set = SyntaxSet::load_defaults_newlines();
            let syntax_name = find_syntax(&syntax_set, language)?.name.clone();
            let mut themes = ThemeSet::load_defaults();
            let theme = themes.themes.remove(THEME)?;
            Some(Self {
                syntax_set,
                syntax_name,
                theme,
            })
        }
    }

    fn find_syntax<'a>(set: &'a SyntaxSet, language: &str) -> Option<&'a SyntaxReference> {
        set.find_syntax_by_token(language)
            .or_else(|| set.find_syntax_by_extension(language))
            .or_else(|| set.find_syntax_by_name(language))
    }

    impl Highlighter for SyntectHighlighter {
        fn highlight(&self, code: &str) -> String {
            let Some(syntax) = self.syntax_set.find_syntax_by_name(&self.syntax_name) else {
                return code.to_string();
            };
            let mut highlighter = HighlightLines::new(syntax, &self.theme);

            let mut lines = Vec::new();
            for line in code.split('\n') {
                let with_newline = format!("{line}\n");
                match highlighter.highlight_line(&with_newline, &self.syntax_set) {
                    Ok(ranges) => {
                        let escaped = as_24_bit_terminal_escaped(&ranges[..], false);
                        lines.push(format!("{}\x1b[0m", escaped.trim_end_matches('\n')));
                    }
                    Err(e) => {
                        log::debug!("Highlighting failed, falling back to plain text: {}", e);
                        lines.push(line.to_string());
                    }
                }
            }
            lines.join("\n")
        }
    }
}

/// Pick the best available highlighter for `language`.
pub fn make_highlighter(language: &str, enabled: bool) -> Box<dyn Highlighter> {
    if !enabled {
        return Box::new(PlainHighlighter);
    }

    #[cfg(feature = "highlight")]
    {
        match SyntectHighlighter::new(language) {
            Some(highlighter) => return Box::new(highlighter),
            None => log::warn!("No syntax definition for '{}', highlighting disabled", language),
        }
    }

    #[cfg(not(feature = "highlight"))]
    log::info!(
        "Built without the highlight feature, '{}' input is shown as plain text",
        language
    );

    Box::new(PlainHighlighter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_is_identity() {
        let code = "for i in range(3):\n    print(i)";
        assert_eq!(PlainHighlighter.highlight(code), code);
    }

    #[test]
    fn disabled_returns_plain() {
        let highlighter = make_highlighter("python", false);
        assert_eq!(highlighter.highlight("x = 1"), "x = 1");
    }

    #[test]
    fn unknown_language_falls_back_to_plain() {
        let highlighter = make_highlighter("definitely-not-a-language", true);
        assert_eq!(highlighter.highlight("a\nb"), "a\nb");
    }

    #[cfg(feature = "highlight")]
    #[test]
    fn syntect_keeps_line_structure() {
        let highlighter = SyntectHighlighter::new("python").expect("python syntax");
        let out = highlighter.highlight("x = 1\ny = 2\nprint(x + y)");
        assert_eq!(out.matches('\n').count(), 2);
        assert!(out.contains("print"));
        assert!(out.contains("\x1b["));
    }
}
