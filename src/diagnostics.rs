//! Issue collection and rendering.
//!
//! Parsing never throws for user errors. Every recoverable problem, from any
//! tier (lexical, grammar, semantic), is appended to the owned issue list and
//! parsing continues with a placeholder. The collector also renders the
//! fixed-width context window shown under grammar and semantic errors, and
//! adapts issues into `miette` diagnostics for callers that want rich output.

use std::fmt;
use std::io;
use std::path::PathBuf;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceCode};
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::{Point, Position, SourceRef};

/// A non-fatal diagnostic: a display-ready message and the source span it
/// refers to. An empty issue list means the parse is correct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub message: String,
    pub position: Position,
}

/// The only errors a parse itself can raise: I/O at the file boundary, or an
/// internal construction failure with no user-facing issue to blame.
#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("internal parser failure: {0}")]
    Internal(String),
}

/// Accumulates issues for one parse invocation.
///
/// Line/column arguments to [`Diagnostics::syntax_error`] are relative to the
/// fragment being parsed; the collector applies its position bias so every
/// recorded issue points into the outer document. The source passed in is the
/// outer document too, so context windows render real source lines.
pub struct Diagnostics {
    source: SourceRef,
    bias: Point,
    window_size: usize,
    issues: Vec<Issue>,
    lines: OnceCell<Vec<String>>,
}

impl Diagnostics {
    pub fn new(source: SourceRef, bias: Point, window_size: usize) -> Diagnostics {
        Diagnostics {
            source,
            bias,
            window_size,
            issues: Vec::new(),
            lines: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append an issue. Never deduplicates, never fails.
    pub fn report(&mut self, message: impl Into<String>, position: Position) {
        self.issues.push(Issue {
            message: message.into(),
            position,
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    /// Record a grammar-tier error at a fragment-relative location, with a
    /// rendered context window under the message.
    pub fn syntax_error(&mut self, line: usize, column: usize, token_len: usize, message: &str) {
        let at = Point::new(line, column).offset_from(self.bias);
        let window = render_window(self.lines(), at.line, at.column, token_len, self.window_size);
        let position = Position::synthetic(at, self.source.clone());
        self.report(format!("{message}\n{window}"), position);
    }

    /// Record a build-tier error at an absolute position, with a context
    /// window highlighting the start of the offending span. Multi-line spans
    /// highlight only their first line.
    pub fn semantic_error(&mut self, message: &str, position: &Position) {
        let start = position.start;
        let end_column = if position.start.line == position.end.line {
            position.end.column
        } else {
            self.lines()
                .get(start.line.saturating_sub(1))
                .map(|l| l.chars().count())
                .unwrap_or(start.column)
        };
        let length = end_column.saturating_sub(start.column).max(1);
        let window =
            render_window(self.lines(), start.line, start.column, length, self.window_size);
        self.report(format!("{message}\n{window}"), position.clone());
    }

    fn lines(&self) -> &[String] {
        self.lines.get_or_init(|| {
            self.source
                .code
                .replace('\r', "")
                .split('\n')
                .map(str::to_string)
                .collect()
        })
    }
}

/// Render the two display lines of a context window: a copy of the offending
/// source line capped at `width` characters, and a caret ribbon under the
/// offending span.
///
/// When the line is wider than the window, the trim keeps the offending token
/// visible, marks each trimmed side with `...`, and recomputes the caret
/// offset against the trimmed text. Out-of-range lines clamp to the nearest
/// valid line; a non-positive token length is rendered as a single caret.
pub fn render_window(
    lines: &[String],
    line: usize,
    column: usize,
    token_len: usize,
    width: usize,
) -> String {
    const MARK: &str = "...";
    let m = MARK.len();

    if lines.is_empty() {
        return String::new();
    }
    let ix = line.clamp(1, lines.len()) - 1;
    let chars: Vec<char> = lines[ix].chars().collect();
    let len = chars.len();
    let mut token_len = token_len.max(1);
    let column = column.min(len);

    let (display, caret) = if len <= width {
        (lines[ix].clone(), column)
    } else if column + token_len <= width.saturating_sub(m) {
        // Token fits in the left portion: trim the right side only.
        let kept: String = chars[..width - m].iter().collect();
        (format!("{kept}{MARK}"), column)
    } else if column >= len.saturating_sub(width.saturating_sub(m)) {
        // Token sits near the end: trim the left side only.
        let start = len - (width - m);
        let kept: String = chars[start..].iter().collect();
        (format!("{MARK}{kept}"), m + column - start)
    } else {
        // Token in the middle: trim both sides, centered on the token.
        let keep = width.saturating_sub(2 * m);
        let start = column.saturating_sub(keep / 2);
        let kept: String = chars[start..start + keep].iter().collect();
        (format!("{MARK}{kept}{MARK}"), m + column - start)
    };

    let display_len = display.chars().count();
    if caret >= display_len {
        token_len = 1;
    } else {
        token_len = token_len.min(display_len - caret);
    }
    format!("{display}\n{}{}", " ".repeat(caret), "^".repeat(token_len))
}

/// A single issue adapted for miette rendering.
#[derive(Debug)]
pub struct IssueReport {
    message: String,
    source: NamedSource<String>,
    span: miette::SourceSpan,
}

impl fmt::Display for IssueReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first line carries the summary; the span label lets miette
        // render the source context itself.
        let summary = self.message.lines().next().unwrap_or(&self.message);
        write!(f, "{summary}")
    }
}

impl std::error::Error for IssueReport {}

impl Diagnostic for IssueReport {
    fn source_code(&self) -> Option<&dyn SourceCode> {
        Some(&self.source)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            None, self.span,
        ))))
    }
}

impl Issue {
    /// Adapt this issue into a standalone miette report.
    pub fn to_report(&self) -> miette::Report {
        let range = self.position.byte_range();
        let len = (range.end - range.start).max(1);
        miette::Report::new(IssueReport {
            message: self.message.clone(),
            source: self.position.source.to_named_source(),
            span: (range.start, len).into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceUnit;

    fn lines(text: &str) -> Vec<String> {
        text.split('\n').map(str::to_string).collect()
    }

    #[test]
    fn short_line_is_untrimmed() {
        let out = render_window(&lines("let x = y"), 1, 4, 1, 80);
        assert_eq!(out, "let x = y\n    ^");
    }

    #[test]
    fn long_line_trims_right() {
        let text = "a".repeat(100);
        let out = render_window(&lines(&text), 1, 2, 3, 20);
        let mut parts = out.split('\n');
        let display = parts.next().unwrap();
        let caret = parts.next().unwrap();
        assert_eq!(display.len(), 20);
        assert!(display.ends_with("..."));
        assert_eq!(caret, "  ^^^");
    }

    #[test]
    fn long_line_trims_left() {
        let text = "a".repeat(100);
        let out = render_window(&lines(&text), 1, 98, 2, 20);
        let mut parts = out.split('\n');
        let display = parts.next().unwrap();
        let caret = parts.next().unwrap();
        assert!(display.starts_with("..."));
        assert_eq!(display.chars().count(), 20);
        // Caret lands at marker length plus the offset into the kept tail:
        // 3 + (98 - 83) = 18.
        assert_eq!(caret.len() - caret.trim_start().len(), 18);
        assert!(caret.trim_start().starts_with('^'));
    }

    #[test]
    fn long_line_trims_both_sides() {
        let text = "a".repeat(200);
        let out = render_window(&lines(&text), 1, 100, 4, 20);
        let display = out.split('\n').next().unwrap();
        assert!(display.starts_with("...") && display.ends_with("..."));
    }

    #[test]
    fn out_of_range_line_clamps() {
        let out = render_window(&lines("only line"), 99, 0, 1, 80);
        assert!(out.starts_with("only line"));
    }

    #[test]
    fn zero_token_length_renders_one_caret() {
        let out = render_window(&lines("abc"), 1, 1, 0, 80);
        assert_eq!(out, "abc\n ^");
    }

    #[test]
    fn syntax_error_applies_bias() {
        let src = SourceUnit::buffer("line one\nline two #x\n");
        let mut diags = Diagnostics::new(src, Point::new(2, 9), 80);
        diags.syntax_error(1, 1, 1, "unexpected token");
        let issue = &diags.issues()[0];
        assert_eq!(issue.position.start, Point::new(2, 10));
        assert!(issue.message.contains("line two #x"));
    }

    #[test]
    fn semantic_error_highlights_only_the_start_line() {
        let src = SourceUnit::buffer("first\nsecond line here\nthird");
        let mut diags = Diagnostics::new(src.clone(), Point::start(), 80);
        let span = Position::new(Point::new(2, 7), Point::new(3, 2), src);
        diags.semantic_error("value must be constant", &span);
        let message = &diags.issues()[0].message;
        assert!(message.contains("second line here"));
        // The caret run ends at the first line's end, not the span's end.
        let caret_line = message.lines().last().unwrap();
        assert_eq!(caret_line, "       ^^^^^^^^^");
    }

    #[test]
    fn report_appends_without_deduplicating() {
        let src = SourceUnit::buffer("x");
        let mut diags = Diagnostics::new(src.clone(), Point::start(), 80);
        let pos = Position::synthetic(Point::start(), src);
        diags.report("same", pos.clone());
        diags.report("same", pos);
        assert_eq!(diags.len(), 2);
        assert!(diags.has_errors());
    }
}
