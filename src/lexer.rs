//! Mode-tracking scanner over raw template text.
//!
//! This is not the parser: the pest grammar owns the concrete tree. The
//! scanner exists for the two jobs a grammar cannot do once it has failed or
//! finished — classifying which construct was left unterminated (by
//! inspecting the leftover mode stack) and replaying comment tokens
//! regardless of where the grammar placed them. It never fails; any input
//! produces a token list and a final mode stack.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    CommentStart,
    CommentText,
    CommentEnd,
    Prefix,
    SlashPrefix,
    Name,
    TagEnd,
    AttrText,
    QuoteText,
    Ichar,
    ExpressionText,
}

/// Lexical modes. A well-formed source unit pops every mode it pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Comment,
    Tag,
    Quoted(char),
    Output,
    /// Raw script-island content; opaque until the closing script tag.
    Island,
    Expression { in_tag: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug)]
pub struct ScanResult {
    pub tokens: Vec<Token>,
    pub unpopped: Vec<Mode>,
}

impl ScanResult {
    pub fn has_unpopped_modes(&self) -> bool {
        !self.unpopped.is_empty()
    }

    pub fn has_mode(&self, mode: Mode) -> bool {
        self.unpopped.contains(&mode)
    }

    pub fn has_expression_mode(&self, in_tag: bool) -> bool {
        self.unpopped.contains(&Mode::Expression { in_tag })
    }

    /// Tag mode or an unterminated quoted value inside one.
    pub fn has_tag_mode(&self) -> bool {
        self.unpopped
            .iter()
            .any(|m| matches!(m, Mode::Tag | Mode::Quoted(_)))
    }

    /// Index of the most recent token of `kind`.
    pub fn find_previous(&self, kind: TokenKind) -> Option<usize> {
        self.tokens.iter().rposition(|t| t.kind == kind)
    }

    /// Most recent opening or closing tag marker, whichever came later.
    pub fn find_previous_prefix(&self) -> Option<usize> {
        self.tokens
            .iter()
            .rposition(|t| matches!(t.kind, TokenKind::Prefix | TokenKind::SlashPrefix))
    }

    /// Most recent opening marker whose tag name matches (case-insensitive).
    pub fn find_previous_prefix_named(&self, name: &str) -> Option<usize> {
        (0..self.tokens.len()).rev().find(|&ix| {
            self.tokens[ix].kind == TokenKind::Prefix
                && self
                    .name_after(ix)
                    .map(|t| t.text.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
        })
    }

    /// The tag name token following a prefix marker, if any.
    pub fn name_after(&self, ix: usize) -> Option<&Token> {
        self.tokens
            .get(ix + 1)
            .filter(|t| t.kind == TokenKind::Name)
    }

    pub fn last_token(&self) -> Option<&Token> {
        self.tokens.last()
    }

    pub fn mode_names(&self) -> String {
        self.unpopped
            .iter()
            .map(|m| format!("{m:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Tokenize `src`, tracking the lexical mode stack.
pub fn scan(src: &str) -> ScanResult {
    let mut scanner = Scanner::new(src);
    while !scanner.eof() {
        match scanner.modes.last().copied() {
            None | Some(Mode::Output) => scanner.text_step(),
            Some(Mode::Comment) => scanner.comment_step(),
            Some(Mode::Tag) => scanner.tag_step(),
            Some(Mode::Quoted(q)) => scanner.quoted_step(q),
            Some(Mode::Island) => scanner.island_step(),
            Some(Mode::Expression { .. }) => scanner.expression_step(),
        }
    }
    ScanResult {
        tokens: scanner.tokens,
        unpopped: scanner.modes,
    }
}

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    line: usize,
    column: usize,
}

#[derive(Default)]
struct TagFrame {
    opening_output: bool,
    closing_output: bool,
    opening_script: bool,
}

struct Scanner<'s> {
    src: &'s str,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    modes: Vec<Mode>,
    tags: Vec<TagFrame>,
}

impl<'s> Scanner<'s> {
    fn new(src: &'s str) -> Scanner<'s> {
        Scanner {
            src,
            pos: 0,
            line: 1,
            column: 0,
            tokens: Vec::new(),
            modes: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn starts_with_ci(&self, s: &str) -> bool {
        self.rest()
            .get(..s.len())
            .map(|p| p.eq_ignore_ascii_case(s))
            .unwrap_or(false)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.rest().chars().next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            if self.bump().is_none() {
                break;
            }
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn emit(&mut self, kind: TokenKind, mark: Mark) {
        self.tokens.push(Token {
            kind,
            text: self.src[mark.pos..self.pos].to_string(),
            line: mark.line,
            column: mark.column,
            end_line: self.line,
            end_column: self.column,
            start: mark.pos,
            stop: self.pos,
        });
    }

    fn text_step(&mut self) {
        if self.starts_with("<!---") {
            let m = self.mark();
            self.bump_n(5);
            self.emit(TokenKind::CommentStart, m);
            self.modes.push(Mode::Comment);
            return;
        }
        if self.starts_with_ci("</vl:") {
            self.open_tag(true);
            return;
        }
        if self.starts_with_ci("<vl:") {
            self.open_tag(false);
            return;
        }
        if self.peek() == Some('#') && self.peek2() != Some('#') {
            let m = self.mark();
            self.bump();
            self.emit(TokenKind::Ichar, m);
            self.modes.push(Mode::Expression { in_tag: false });
            return;
        }
        let m = self.mark();
        while !self.eof() {
            if self.starts_with("<!---")
                || self.starts_with_ci("</vl:")
                || self.starts_with_ci("<vl:")
            {
                break;
            }
            if self.peek() == Some('#') {
                if self.peek2() == Some('#') {
                    self.bump();
                    self.bump();
                    continue;
                }
                break;
            }
            self.bump();
        }
        self.emit(TokenKind::Text, m);
    }

    fn open_tag(&mut self, closing: bool) {
        let m = self.mark();
        self.bump_n(if closing { 5 } else { 4 });
        self.emit(
            if closing {
                TokenKind::SlashPrefix
            } else {
                TokenKind::Prefix
            },
            m,
        );
        let name_mark = self.mark();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        let name = self.src[name_mark.pos..self.pos].to_string();
        if !name.is_empty() {
            self.emit(TokenKind::Name, name_mark);
        }
        let is_output = name.eq_ignore_ascii_case("output");
        let is_script = name.eq_ignore_ascii_case("script");
        self.modes.push(Mode::Tag);
        self.tags.push(TagFrame {
            opening_output: is_output && !closing,
            closing_output: is_output && closing,
            opening_script: is_script && !closing,
        });
    }

    fn tag_step(&mut self) {
        let c = match self.peek() {
            Some(c) => c,
            None => return,
        };
        if c == '"' || c == '\'' {
            self.bump();
            self.modes.push(Mode::Quoted(c));
            return;
        }
        if c == '#' {
            if self.peek2() == Some('#') {
                self.bump();
                self.bump();
                return;
            }
            let m = self.mark();
            self.bump();
            self.emit(TokenKind::Ichar, m);
            self.modes.push(Mode::Expression { in_tag: true });
            return;
        }
        if self.starts_with("/>") || c == '>' {
            let m = self.mark();
            if c == '>' {
                self.bump();
            } else {
                self.bump_n(2);
            }
            self.emit(TokenKind::TagEnd, m);
            self.close_tag();
            return;
        }
        let m = self.mark();
        while let Some(c) = self.peek() {
            if c == '"' || c == '\'' || c == '>' || self.starts_with("/>") {
                break;
            }
            if c == '#' {
                if self.peek2() == Some('#') {
                    self.bump();
                    self.bump();
                    continue;
                }
                break;
            }
            self.bump();
        }
        if self.pos > m.pos {
            self.emit(TokenKind::AttrText, m);
        }
    }

    fn close_tag(&mut self) {
        self.modes.pop();
        let frame = self.tags.pop().unwrap_or_default();
        let self_closed = self
            .tokens
            .last()
            .map(|t| t.text == "/>")
            .unwrap_or(false);
        if frame.opening_output && !self_closed {
            self.modes.push(Mode::Output);
        }
        if frame.closing_output && matches!(self.modes.last(), Some(Mode::Output)) {
            self.modes.pop();
        }
        if frame.opening_script && !self_closed {
            self.modes.push(Mode::Island);
        }
    }

    /// Script-island content is one opaque text run; the closing tag is
    /// handed back to the text step.
    fn island_step(&mut self) {
        let m = self.mark();
        while !self.eof() && !self.starts_with_ci("</vl:script") {
            self.bump();
        }
        if self.pos > m.pos {
            self.emit(TokenKind::Text, m);
        }
        if !self.eof() {
            self.modes.pop();
        }
    }

    fn quoted_step(&mut self, quote: char) {
        let m = self.mark();
        while let Some(c) = self.peek() {
            if c == quote {
                if self.peek2() == Some(quote) {
                    self.bump();
                    self.bump();
                    continue;
                }
                break;
            }
            if c == '#' {
                if self.peek2() == Some('#') {
                    self.bump();
                    self.bump();
                    continue;
                }
                break;
            }
            self.bump();
        }
        if self.pos > m.pos {
            self.emit(TokenKind::QuoteText, m);
        }
        match self.peek() {
            Some(c) if c == quote => {
                self.bump();
                self.modes.pop();
            }
            Some('#') => {
                let m = self.mark();
                self.bump();
                self.emit(TokenKind::Ichar, m);
                self.modes.push(Mode::Expression { in_tag: false });
            }
            _ => {}
        }
    }

    fn expression_step(&mut self) {
        let m = self.mark();
        while let Some(c) = self.peek() {
            if c == '#' {
                break;
            }
            if c == '"' || c == '\'' {
                self.skip_raw_string(c);
                continue;
            }
            self.bump();
        }
        if self.pos > m.pos {
            self.emit(TokenKind::ExpressionText, m);
        }
        if self.peek() == Some('#') {
            let m = self.mark();
            self.bump();
            self.emit(TokenKind::Ichar, m);
            self.modes.pop();
        }
    }

    fn skip_raw_string(&mut self, quote: char) {
        self.bump();
        while let Some(c) = self.peek() {
            if c == quote {
                if self.peek2() == Some(quote) {
                    self.bump();
                    self.bump();
                    continue;
                }
                self.bump();
                return;
            }
            self.bump();
        }
    }

    fn comment_step(&mut self) {
        if self.starts_with("<!---") {
            let m = self.mark();
            self.bump_n(5);
            self.emit(TokenKind::CommentStart, m);
            self.modes.push(Mode::Comment);
            return;
        }
        if self.starts_with("--->") {
            let m = self.mark();
            self.bump_n(4);
            self.emit(TokenKind::CommentEnd, m);
            self.modes.pop();
            return;
        }
        let m = self.mark();
        while !self.eof() && !self.starts_with("<!---") && !self.starts_with("--->") {
            self.bump();
        }
        self.emit(TokenKind::CommentText, m);
    }
}
