//! The template parser: orchestration, result type, and the sub-parser
//! coordinator.
//!
//! One parse invocation owns one [`Parser`] state (diagnostics, comments,
//! position bias). Control flow per parse: mode validation over the raw
//! token stream, the pest parse, the AST build, then comment extraction and
//! association. Embedded expressions and script islands recurse through the
//! coordinator methods, which bias child positions into this document and
//! merge child issues and comments into this parse — an embedded syntax
//! error never aborts the outer parse.

mod builder;
mod script;

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use log::{debug, trace};
use pest::Parser as _;

use crate::ast::{Comment, Expr, ExprStmt, NodeMeta, NullLiteral, Stmt, Template};
use crate::diagnostics::{Diagnostics, Issue, ParseFailure};
use crate::lexer::{self, Mode, ScanResult, Token, TokenKind};
use crate::registry::ComponentResolver;
use crate::source::{Point, Position, SourceRef, SourceUnit};
use crate::syntax::template::{Rule, TemplateGrammar};

/// The outcome of one parse: a best-effort tree, the issue list, and every
/// comment harvested from the source. `root` is `None` only when `issues`
/// is non-empty; a missing root signals "do not attempt codegen", while a
/// present root alongside issues is still useful to editors and formatters.
#[derive(Debug)]
pub struct ParsingResult {
    pub root: Option<Template>,
    pub issues: Vec<Issue>,
    pub comments: Vec<Comment>,
}

impl ParsingResult {
    /// True when the parse produced no issues at all.
    pub fn is_correct(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Entry point for parsing Vellum templates.
///
/// The component resolver is an injected capability; the parser holds no
/// global registry state, so concurrent parses never share anything.
pub struct TemplateParser<'r> {
    resolver: &'r dyn ComponentResolver,
    window_size: usize,
}

impl<'r> TemplateParser<'r> {
    pub fn new(resolver: &'r dyn ComponentResolver) -> TemplateParser<'r> {
        TemplateParser {
            resolver,
            window_size: 80,
        }
    }

    /// Width of the context window rendered under syntax errors.
    pub fn window_size(mut self, window_size: usize) -> TemplateParser<'r> {
        self.window_size = window_size;
        self
    }

    /// Parse an in-memory template.
    pub fn parse(&self, code: &str) -> Result<ParsingResult, ParseFailure> {
        self.parse_source(SourceUnit::buffer(code))
    }

    /// Parse a template file. The file is read as UTF-8; a leading BOM is
    /// stripped. Encoding detection beyond that is the caller's concern.
    pub fn parse_file(&self, path: &Path) -> Result<ParsingResult, ParseFailure> {
        let text = fs::read_to_string(path).map_err(|source| ParseFailure::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let code = text.strip_prefix('\u{feff}').unwrap_or(&text);
        self.parse_source(SourceUnit::file(path, code))
    }

    fn parse_source(&self, source: SourceRef) -> Result<ParsingResult, ParseFailure> {
        Parser::new(source, Point::start(), false, self.resolver, self.window_size).parse()
    }
}

/// Per-invocation parser state. Sub-parses construct fresh instances; the
/// parent blocks until the child returns, so no state is ever shared.
pub(crate) struct Parser<'r> {
    pub(crate) source: SourceRef,
    pub(crate) bias: Point,
    pub(crate) sub_parser: bool,
    pub(crate) resolver: &'r dyn ComponentResolver,
    pub(crate) diags: Diagnostics,
    pub(crate) comments: Vec<Comment>,
}

impl<'r> Parser<'r> {
    pub(crate) fn new(
        source: SourceRef,
        bias: Point,
        sub_parser: bool,
        resolver: &'r dyn ComponentResolver,
        window_size: usize,
    ) -> Parser<'r> {
        let diags = Diagnostics::new(source.clone(), bias, window_size);
        Parser {
            source,
            bias,
            sub_parser,
            resolver,
            diags,
            comments: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<ParsingResult, ParseFailure> {
        let source = self.source.clone();
        let code: &str = &source.code;
        debug!("parsing template {} ({} bytes)", source.name(), code.len());

        // Mode validation runs first so unterminated constructs are
        // classified before the grammar reports a bare failure.
        let scan = lexer::scan(code);
        self.validate_modes(&scan);

        let mut root = match TemplateGrammar::parse(Rule::template, code) {
            Ok(mut pairs) => {
                let template = pairs.next().ok_or_else(|| {
                    ParseFailure::Internal("grammar produced no template root".into())
                })?;
                match catch_unwind(AssertUnwindSafe(|| self.template_to_ast(template))) {
                    Ok(template) => Some(template),
                    Err(payload) => {
                        // A construction failure with a clean issue list is
                        // an internal bug and must surface; with issues
                        // present it degrades to a missing root.
                        if self.diags.is_empty() {
                            return Err(ParseFailure::Internal(panic_text(payload)));
                        }
                        None
                    }
                }
            }
            Err(err) => {
                self.report_pest_error(&err, code, &scan);
                None
            }
        };

        let harvested = self.extract_comments(&scan, code);
        self.comments.extend(harvested);
        if !self.sub_parser {
            if let Some(template) = root.as_mut() {
                template.associate_comments(&self.comments);
            }
        }

        debug!(
            "parse finished: root={}, issues={}",
            root.is_some(),
            self.diags.len()
        );
        Ok(ParsingResult {
            root,
            issues: self.diags.into_issues(),
            comments: self.comments,
        })
    }

    // ---- mode validation --------------------------------------------------

    fn validate_modes(&mut self, scan: &ScanResult) {
        if !scan.has_unpopped_modes() {
            return;
        }
        debug!("unpopped lexical modes: [{}]", scan.mode_names());
        let fallback = scan
            .last_token()
            .map(|t| self.token_end_position(t))
            .unwrap_or_else(|| Position::synthetic(self.bias, self.source.clone()));

        if scan.has_expression_mode(false) {
            let position = scan
                .find_previous(TokenKind::Ichar)
                .map(|ix| self.token_position(&scan.tokens[ix]))
                .unwrap_or(fallback);
            self.diags.report(
                format!(
                    "Unclosed expression starting with # on line {}",
                    position.start.line
                ),
                position,
            );
        } else if scan.has_expression_mode(true) {
            let position = scan
                .find_previous_prefix()
                .map(|ix| self.token_position(&scan.tokens[ix]))
                .unwrap_or(fallback);
            self.diags.report(
                format!(
                    "Unclosed expression inside an opening tag on line {}",
                    position.start.line
                ),
                position,
            );
        } else if scan.has_mode(Mode::Island) {
            let position = scan
                .find_previous_prefix_named("script")
                .map(|ix| self.token_position(&scan.tokens[ix]))
                .unwrap_or(fallback);
            self.diags.report(
                format!(
                    "Unclosed tag [script] starting on line {}",
                    position.start.line
                ),
                position,
            );
        } else if scan.has_mode(Mode::Output) {
            let position = scan
                .find_previous_prefix_named("output")
                .map(|ix| self.token_position(&scan.tokens[ix]))
                .unwrap_or(fallback);
            self.diags.report(
                format!("Unclosed output tag on line {}", position.start.line),
                position,
            );
        } else if scan.has_mode(Mode::Comment) {
            let position = scan
                .find_previous(TokenKind::CommentStart)
                .map(|ix| self.token_position(&scan.tokens[ix]))
                .unwrap_or(fallback);
            self.diags.report(
                format!("Unclosed tag comment on line {}", position.start.line),
                position,
            );
        } else if scan.has_tag_mode() {
            let (position, name) = match scan.find_previous_prefix() {
                Some(ix) => (
                    self.token_position(&scan.tokens[ix]),
                    scan.name_after(ix).map(|t| t.text.clone()),
                ),
                None => (fallback, None),
            };
            let mut message = String::from("Unclosed tag");
            if let Some(name) = name {
                message.push_str(&format!(" [{name}]"));
            }
            message.push_str(&format!(" starting on line {}", position.start.line));
            self.diags.report(message, position);
        } else {
            self.diags.report(
                format!("Invalid syntax. (Unpopped modes) [{}]", scan.mode_names()),
                fallback,
            );
        }
    }

    fn report_pest_error(&mut self, err: &pest::error::Error<Rule>, code: &str, scan: &ScanResult) {
        use pest::error::{ErrorVariant, InputLocation, LineColLocation};

        // With a balanced mode stack, a failed parse means the statement
        // sequence stopped early and input was left over. Re-running the
        // prefix rule tells us exactly where consumption stopped.
        if !scan.has_unpopped_modes() {
            if let Ok(mut pairs) = TemplateGrammar::parse(Rule::statements, code) {
                let consumed = pairs
                    .next()
                    .map(|p| p.as_span().end())
                    .unwrap_or(0);
                if consumed < code.len() {
                    let extra: String = code[consumed..].chars().take(100).collect();
                    let (line, column) = line_col_at(code, consumed);
                    let at = Point::new(line, column).offset_from(self.bias);
                    self.diags.report(
                        format!("Extra char(s) [{extra}] at the end of parsing."),
                        Position::synthetic(at, self.source.clone()),
                    );
                    return;
                }
            }
        }

        let (line, column) = match err.line_col {
            LineColLocation::Pos((l, c)) => (l, c - 1),
            LineColLocation::Span((l, c), _) => (l, c - 1),
        };
        let token_len = match err.location {
            InputLocation::Pos(_) => 1,
            InputLocation::Span((s, e)) => e.saturating_sub(s).max(1),
        };
        let message = match &err.variant {
            ErrorVariant::CustomError { message } => message.clone(),
            variant => variant.message().to_string(),
        };
        self.diags
            .syntax_error(line, column, token_len, &format!("Syntax error: {message}"));
    }

    // ---- comment extraction (token replay) --------------------------------

    fn extract_comments(&mut self, scan: &ScanResult, code: &str) -> Vec<Comment> {
        let mut comments = Vec::new();
        let tokens = &scan.tokens;
        let mut ix = 0;
        while ix < tokens.len() {
            if tokens[ix].kind != TokenKind::CommentStart {
                ix += 1;
                continue;
            }
            let start = &tokens[ix];
            let mut text = String::new();
            let mut end = start;
            let mut jx = ix + 1;
            while jx < tokens.len() && tokens[jx].kind != TokenKind::CommentEnd {
                match tokens[jx].kind {
                    TokenKind::CommentStart | TokenKind::CommentText => {
                        text.push_str(&tokens[jx].text);
                    }
                    _ => {
                        self.diags
                            .report("Invalid tag comment", self.token_position(&tokens[jx]));
                        break;
                    }
                }
                end = &tokens[jx];
                jx += 1;
            }
            if jx < tokens.len() && tokens[jx].kind == TokenKind::CommentEnd {
                end = &tokens[jx];
            }
            comments.push(Comment {
                text: text.trim().to_string(),
                position: self.span_tokens(start, end),
                source_text: code[start.start..end.stop].to_string(),
            });
            ix = jx + 1;
        }
        comments
    }

    // ---- sub-parser coordination ------------------------------------------

    /// Parse embedded code as a single expression. On failure the child's
    /// issues are merged and a null literal stands in so building continues.
    pub(crate) fn parse_embedded_expression(&mut self, code: &str, position: &Position) -> Expr {
        trace!(
            "sub-parsing expression at {}:{}",
            position.start.line,
            position.start.column
        );
        let outcome = script::parse_expression(
            code,
            self.source.clone(),
            position.start,
            self.diags.window_size(),
        );
        self.comments.extend(outcome.comments);
        if outcome.issues.is_empty() {
            match outcome.value {
                Some(expr) => return expr,
                None => unreachable!("script parse produced neither a value nor issues"),
            }
        }
        self.diags.extend(outcome.issues);
        self.null_placeholder(position)
    }

    /// Parse embedded code as a statement list. A single statement roots a
    /// one-element list; on failure a lone no-op statement stands in.
    pub(crate) fn parse_embedded_statements(
        &mut self,
        code: &str,
        position: &Position,
    ) -> Vec<Stmt> {
        trace!(
            "sub-parsing statements at {}:{}",
            position.start.line,
            position.start.column
        );
        let outcome = script::parse_statements(
            code,
            self.source.clone(),
            position.start,
            self.diags.window_size(),
        );
        self.comments.extend(outcome.comments);
        if outcome.issues.is_empty() {
            match outcome.value {
                Some(statements) => return statements,
                None => unreachable!("script parse produced neither a value nor issues"),
            }
        }
        self.diags.extend(outcome.issues);
        vec![Stmt::Expression(ExprStmt {
            expression: self.null_placeholder(position),
            meta: NodeMeta::synthetic(Position::synthetic(
                position.start,
                self.source.clone(),
            )),
        })]
    }

    fn null_placeholder(&self, position: &Position) -> Expr {
        Expr::Null(NullLiteral {
            meta: NodeMeta::synthetic(Position::synthetic(
                position.start,
                self.source.clone(),
            )),
        })
    }

    // ---- position helpers -------------------------------------------------

    pub(crate) fn token_position(&self, token: &Token) -> Position {
        Position::new(
            Point::new(token.line, token.column).offset_from(self.bias),
            Point::new(token.end_line, token.end_column).offset_from(self.bias),
            self.source.clone(),
        )
    }

    fn token_end_position(&self, token: &Token) -> Position {
        Position::synthetic(
            Point::new(token.end_line, token.end_column).offset_from(self.bias),
            self.source.clone(),
        )
    }

    fn span_tokens(&self, start: &Token, end: &Token) -> Position {
        Position::new(
            Point::new(start.line, start.column).offset_from(self.bias),
            Point::new(end.end_line, end.end_column).offset_from(self.bias),
            self.source.clone(),
        )
    }
}

/// Position of a pest span, biased into the outer document.
pub(crate) fn span_position(span: &pest::Span, bias: Point, source: &SourceRef) -> Position {
    let (start_line, start_col) = span.start_pos().line_col();
    let (end_line, end_col) = span.end_pos().line_col();
    Position::new(
        Point::new(start_line, start_col - 1).offset_from(bias),
        Point::new(end_line, end_col - 1).offset_from(bias),
        source.clone(),
    )
}

/// Metadata for a node built from a pest span: biased position plus the
/// verbatim source text.
pub(crate) fn span_meta(span: &pest::Span, bias: Point, source: &SourceRef) -> NodeMeta {
    NodeMeta::new(span_position(span, bias, source), span.as_str())
}

/// Line (1-based) and column (0-based, chars) of a byte offset.
fn line_col_at(code: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 0;
    for (ix, ch) in code.char_indices() {
        if ix >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Resolve the doubled interpolation marker: `##` becomes `#`, exactly once.
pub(crate) fn escape_hash(text: &str) -> String {
    text.replace("##", "#")
}

/// Resolve the escapes inside a quoted string: doubled markers and doubled
/// quote characters each collapse to one.
pub(crate) fn escape_quoted(quote: char, text: &str) -> String {
    let doubled = format!("{quote}{quote}");
    text.replace("##", "#").replace(&doubled, &quote.to_string())
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown construction failure".to_string()
    }
}
