//! VellumScript sub-parsing.
//!
//! Embedded expressions, attribute expressions, and script islands all come
//! through here. Each call is a fresh, strictly nested parse: the child gets
//! the outer document's source ref and a line/column bias, so everything it
//! produces (nodes, issues, comments) already points at the true original
//! source when it is merged back into the parent.

use pest::iterators::Pair;
use pest::Parser as _;

use crate::ast::{
    ArrayLiteral, Assign, AssignOp, Binary, BinaryOp, BoolLiteral, Call, Comment, Expr, ExprStmt,
    Fqn, Identifier, Index, Member, NodeMeta, NullLiteral, NumberLiteral, Stmt, StringInterpolation,
    StringLiteral, StructEntry, StructLiteral, Unary, UnaryOp,
};
use crate::diagnostics::{Diagnostics, Issue};
use crate::source::{Point, Position, SourceRef};
use crate::syntax::script::{Rule, ScriptGrammar};

use super::{escape_quoted, span_meta, span_position};

/// What a script sub-parse hands back to the coordinator. The value is only
/// trusted when the issue list is empty; otherwise the coordinator merges
/// the issues and substitutes a placeholder.
pub(crate) struct ScriptOutcome<T> {
    pub value: Option<T>,
    pub issues: Vec<Issue>,
    pub comments: Vec<Comment>,
}

pub(crate) fn parse_expression(
    code: &str,
    source: SourceRef,
    bias: Point,
    window_size: usize,
) -> ScriptOutcome<Expr> {
    let mut builder = ScriptBuilder::new(code, source, bias, window_size);
    let value = match ScriptGrammar::parse(Rule::expression_entry, code) {
        Ok(mut pairs) => {
            let entry = pairs.next().expect("grammar produces an entry pair");
            let expression = entry
                .into_inner()
                .find(|p| p.as_rule() == Rule::expression)
                .expect("expression entry carries an expression"); // grammar guarantees
            Some(builder.expression(expression))
        }
        Err(err) => {
            builder.report_pest_error(&err);
            None
        }
    };
    builder.finish(value)
}

pub(crate) fn parse_statements(
    code: &str,
    source: SourceRef,
    bias: Point,
    window_size: usize,
) -> ScriptOutcome<Vec<Stmt>> {
    let mut builder = ScriptBuilder::new(code, source, bias, window_size);
    let value = match ScriptGrammar::parse(Rule::statements_entry, code) {
        Ok(mut pairs) => {
            let entry = pairs.next().expect("grammar produces an entry pair");
            let statements = entry
                .into_inner()
                .filter(|p| p.as_rule() == Rule::statement)
                .map(|p| builder.statement(p))
                .collect();
            Some(statements)
        }
        Err(err) => {
            builder.report_pest_error(&err);
            None
        }
    };
    builder.finish(value)
}

struct ScriptBuilder {
    source: SourceRef,
    bias: Point,
    window_size: usize,
    diags: Diagnostics,
    comments: Vec<Comment>,
}

impl ScriptBuilder {
    fn new(code: &str, source: SourceRef, bias: Point, window_size: usize) -> ScriptBuilder {
        let comments = harvest_comments(code, bias, &source);
        let diags = Diagnostics::new(source.clone(), bias, window_size);
        ScriptBuilder {
            source,
            bias,
            window_size,
            diags,
            comments,
        }
    }

    fn finish<T>(self, value: Option<T>) -> ScriptOutcome<T> {
        ScriptOutcome {
            value,
            issues: self.diags.into_issues(),
            comments: self.comments,
        }
    }

    fn statement(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let expression = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::expression)
            .expect("statement carries an expression"); // grammar guarantees
        Stmt::Expression(ExprStmt {
            expression: self.expression(expression),
            meta,
        })
    }

    fn expression(&mut self, pair: Pair<'_, Rule>) -> Expr {
        match pair.as_rule() {
            Rule::expression | Rule::paren_expr | Rule::literal | Rule::primary => {
                let inner = first_inner(pair);
                self.expression(inner)
            }
            Rule::assignment => self.assignment(pair),
            Rule::boolean_or
            | Rule::boolean_and
            | Rule::equality
            | Rule::relational
            | Rule::additive
            | Rule::multiplicative => self.binary_chain(pair),
            Rule::unary => self.unary(pair),
            Rule::postfix => self.postfix(pair),
            Rule::number => {
                let value = pair.as_str().parse().unwrap_or_default();
                Expr::Number(NumberLiteral {
                    value,
                    meta: self.meta_of(&pair),
                })
            }
            Rule::boolean => Expr::Bool(BoolLiteral {
                value: pair.as_str().eq_ignore_ascii_case("true"),
                meta: self.meta_of(&pair),
            }),
            Rule::null_lit => Expr::Null(NullLiteral {
                meta: self.meta_of(&pair),
            }),
            Rule::quoted_string => self.string(pair),
            Rule::identifier => Expr::Identifier(Identifier {
                name: pair.as_str().to_string(),
                meta: self.meta_of(&pair),
            }),
            Rule::array_literal => self.array(pair),
            Rule::struct_literal => self.structure(pair),
            rule => unreachable!("unhandled expression rule {rule:?}"),
        }
    }

    fn assignment(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let span = pair.as_span();
        let mut inner = pair.into_inner();
        let left = inner.next().expect("assignment carries an operand"); // grammar guarantees
        let left = self.expression(left);
        let Some(op_pair) = inner.next() else {
            return left;
        };
        let op = match op_pair.as_str() {
            "=" => AssignOp::Assign,
            "+=" => AssignOp::AddAssign,
            "-=" => AssignOp::SubtractAssign,
            "*=" => AssignOp::MultiplyAssign,
            "/=" => AssignOp::DivideAssign,
            "&=" => AssignOp::ConcatAssign,
            other => unreachable!("unhandled assignment operator {other:?}"),
        };
        let value = inner.next().expect("assignment carries a value"); // grammar guarantees
        let value = self.expression(value);
        Expr::Assign(Assign {
            op,
            target: Box::new(left),
            value: Box::new(value),
            meta: span_meta(&span, self.bias, &self.source),
        })
    }

    fn binary_chain(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let mut inner = pair.into_inner();
        let first = inner.next().expect("binary chain carries an operand"); // grammar guarantees
        let start = first.as_span().start_pos();
        let mut acc = self.expression(first);
        while let Some(op_pair) = inner.next() {
            let rhs_pair = inner
                .next()
                .expect("binary operator carries a right operand"); // grammar guarantees
            let span = start.clone().span(&rhs_pair.as_span().end_pos());
            let op = binary_op(op_pair.as_str());
            let rhs = self.expression(rhs_pair);
            acc = Expr::Binary(Binary {
                op,
                left: Box::new(acc),
                right: Box::new(rhs),
                meta: span_meta(&span, self.bias, &self.source),
            });
        }
        acc
    }

    fn unary(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let end = pair.as_span().end_pos();
        let parts: Vec<Pair<Rule>> = pair.into_inner().collect();
        let (ops, operand) = parts.split_at(parts.len() - 1);
        let mut acc = self.expression(operand[0].clone());
        for op_pair in ops.iter().rev() {
            let op = match op_pair.as_str().to_ascii_lowercase().as_str() {
                "!" | "not" => UnaryOp::Not,
                "-" => UnaryOp::Negate,
                other => unreachable!("unhandled unary operator {other:?}"),
            };
            let span = op_pair.as_span().start_pos().span(&end);
            acc = Expr::Unary(Unary {
                op,
                operand: Box::new(acc),
                meta: span_meta(&span, self.bias, &self.source),
            });
        }
        acc
    }

    fn postfix(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let mut inner = pair.into_inner();
        let primary = inner.next().expect("postfix carries a primary"); // grammar guarantees
        let start = primary.as_span().start_pos();
        let mut acc = self.expression(primary);
        for op in inner {
            let span = start.clone().span(&op.as_span().end_pos());
            let meta = span_meta(&span, self.bias, &self.source);
            let op = first_inner(op);
            match op.as_rule() {
                Rule::call_args => {
                    let args = op
                        .into_inner()
                        .filter(|p| p.as_rule() == Rule::expression)
                        .map(|p| self.expression(p))
                        .collect();
                    acc = Expr::Call(Call {
                        callee: Box::new(acc),
                        args,
                        meta,
                    });
                }
                Rule::index_op => {
                    let index = op
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::expression)
                        .expect("index carries an expression"); // grammar guarantees
                    let index = self.expression(index);
                    acc = Expr::Index(Index {
                        object: Box::new(acc),
                        index: Box::new(index),
                        meta,
                    });
                }
                Rule::member_op => {
                    let name = op
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::identifier)
                        .map(|p| p.as_str().to_string())
                        .expect("member access carries a name"); // grammar guarantees
                    // Plain dotted identifier chains read as one qualified
                    // name; anything else stays a member access.
                    acc = match acc {
                        Expr::Identifier(id) => Expr::Fqn(Fqn {
                            value: format!("{}.{name}", id.name),
                            meta,
                        }),
                        Expr::Fqn(fqn) => Expr::Fqn(Fqn {
                            value: format!("{}.{name}", fqn.value),
                            meta,
                        }),
                        object => Expr::Member(Member {
                            object: Box::new(object),
                            name,
                            meta,
                        }),
                    };
                }
                rule => unreachable!("unhandled postfix rule {rule:?}"),
            }
        }
        acc
    }

    fn array(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let meta = self.meta_of(&pair);
        let items = pair
            .into_inner()
            .filter(|p| p.as_rule() == Rule::expression)
            .map(|p| self.expression(p))
            .collect();
        Expr::Array(ArrayLiteral { items, meta })
    }

    fn structure(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let meta = self.meta_of(&pair);
        let mut entries = Vec::new();
        for entry in pair.into_inner() {
            if entry.as_rule() != Rule::struct_entry {
                continue;
            }
            let mut key = None;
            let mut value = None;
            for child in entry.into_inner() {
                match child.as_rule() {
                    Rule::struct_key => {
                        let inner = first_inner(child);
                        key = Some(self.expression(inner));
                    }
                    Rule::expression => value = Some(self.expression(child)),
                    _ => {}
                }
            }
            let (Some(key), Some(value)) = (key, value) else {
                unreachable!("struct entry carries a key and a value");
            };
            entries.push(StructEntry { key, value });
        }
        Expr::Struct(StructLiteral { entries, meta })
    }

    fn string(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let meta = self.meta_of(&pair);
        let text = pair.as_str();
        let quote = text.chars().next().unwrap_or('"');
        let inner = first_inner(pair); // dq_string | sq_string
        let parts_pairs: Vec<Pair<Rule>> = inner.into_inner().collect();
        let has_interpolation = parts_pairs
            .iter()
            .any(|p| p.as_rule() == Rule::string_interp);

        if !has_interpolation {
            let inner_text = &text[1..text.len().saturating_sub(1)];
            return Expr::StringLiteral(StringLiteral {
                value: escape_quoted(quote, inner_text),
                meta,
            });
        }

        let mut parts = Vec::new();
        for piece in parts_pairs {
            match piece.as_rule() {
                Rule::dq_text | Rule::sq_text => parts.push(Expr::StringLiteral(StringLiteral {
                    value: escape_quoted(quote, piece.as_str()),
                    meta: self.meta_of(&piece),
                })),
                Rule::string_interp => {
                    let inner = piece
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::interp_inner)
                        .expect("interpolation carries inner text"); // grammar guarantees
                    let position = self.position_of(&inner);
                    let part = self.embedded(inner.as_str(), &position);
                    parts.push(part);
                }
                _ => {}
            }
        }
        Expr::StringInterpolation(StringInterpolation { parts, meta })
    }

    /// Nested interpolation inside a script string is one more strictly
    /// nested sub-parse, biased at the inner fragment's position.
    fn embedded(&mut self, code: &str, position: &Position) -> Expr {
        let outcome = parse_expression(code, self.source.clone(), position.start, self.window_size);
        self.comments.extend(outcome.comments);
        if outcome.issues.is_empty() {
            if let Some(expr) = outcome.value {
                return expr;
            }
        } else {
            self.diags.extend(outcome.issues);
        }
        Expr::Null(NullLiteral {
            meta: NodeMeta::synthetic(Position::synthetic(position.start, self.source.clone())),
        })
    }

    fn report_pest_error(&mut self, err: &pest::error::Error<Rule>) {
        use pest::error::{ErrorVariant, InputLocation, LineColLocation};

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

    fn meta_of(&self, pair: &Pair<'_, Rule>) -> NodeMeta {
        span_meta(&pair.as_span(), self.bias, &self.source)
    }

    fn position_of(&self, pair: &Pair<'_, Rule>) -> Position {
        span_position(&pair.as_span(), self.bias, &self.source)
    }
}

fn first_inner(pair: Pair<'_, Rule>) -> Pair<'_, Rule> {
    pair.into_inner()
        .next()
        .expect("rule wraps one alternative") // grammar guarantees
}

fn binary_op(text: &str) -> BinaryOp {
    match text.to_ascii_lowercase().as_str() {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Subtract,
        "*" => BinaryOp::Multiply,
        "/" => BinaryOp::Divide,
        "%" | "mod" => BinaryOp::Modulo,
        "&" => BinaryOp::Concat,
        "==" | "eq" => BinaryOp::Equal,
        "!=" | "neq" => BinaryOp::NotEqual,
        ">" | "gt" => BinaryOp::GreaterThan,
        ">=" | "gte" => BinaryOp::GreaterEqual,
        "<" | "lt" => BinaryOp::LessThan,
        "<=" | "lte" => BinaryOp::LessEqual,
        "&&" | "and" => BinaryOp::And,
        "||" | "or" => BinaryOp::Or,
        other => unreachable!("unhandled binary operator {other:?}"),
    }
}

/// Replay scan for `//` and `/* */` comments, skipping quoted strings.
/// Harvested comments merge into the parent parse's comment list.
fn harvest_comments(code: &str, bias: Point, source: &SourceRef) -> Vec<Comment> {
    let chars: Vec<(usize, char)> = code.char_indices().collect();
    let mut comments = Vec::new();
    let mut line = 1usize;
    let mut column = 0usize;
    let mut ix = 0usize;

    let advance = |line: &mut usize, column: &mut usize, c: char| {
        if c == '\n' {
            *line += 1;
            *column = 0;
        } else {
            *column += 1;
        }
    };

    while ix < chars.len() {
        let (offset, c) = chars[ix];
        let next = chars.get(ix + 1).map(|&(_, n)| n);
        match c {
            '"' | '\'' => {
                let quote = c;
                advance(&mut line, &mut column, c);
                ix += 1;
                while ix < chars.len() {
                    let (_, cc) = chars[ix];
                    let nn = chars.get(ix + 1).map(|&(_, n)| n);
                    advance(&mut line, &mut column, cc);
                    ix += 1;
                    if cc == quote {
                        if nn == Some(quote) {
                            advance(&mut line, &mut column, quote);
                            ix += 1;
                            continue;
                        }
                        break;
                    }
                }
            }
            '/' if next == Some('/') => {
                let start = Point::new(line, column);
                while ix < chars.len() && chars[ix].1 != '\n' {
                    advance(&mut line, &mut column, chars[ix].1);
                    ix += 1;
                }
                let end_offset = chars.get(ix).map(|&(o, _)| o).unwrap_or(code.len());
                let source_text = &code[offset..end_offset];
                comments.push(Comment {
                    text: source_text.trim_start_matches("//").trim().to_string(),
                    position: Position::new(
                        start.offset_from(bias),
                        Point::new(line, column).offset_from(bias),
                        source.clone(),
                    ),
                    source_text: source_text.to_string(),
                });
            }
            '/' if next == Some('*') => {
                let start = Point::new(line, column);
                advance(&mut line, &mut column, '/');
                advance(&mut line, &mut column, '*');
                ix += 2;
                while ix < chars.len() {
                    if chars[ix].1 == '*' && chars.get(ix + 1).map(|&(_, n)| n) == Some('/') {
                        advance(&mut line, &mut column, '*');
                        advance(&mut line, &mut column, '/');
                        ix += 2;
                        break;
                    }
                    advance(&mut line, &mut column, chars[ix].1);
                    ix += 1;
                }
                let end_offset = chars.get(ix).map(|&(o, _)| o).unwrap_or(code.len());
                let source_text = &code[offset..end_offset];
                let text = source_text
                    .trim_start_matches("/*")
                    .trim_end_matches("*/")
                    .trim()
                    .to_string();
                comments.push(Comment {
                    text,
                    position: Position::new(
                        start.offset_from(bias),
                        Point::new(line, column).offset_from(bias),
                        source.clone(),
                    ),
                    source_text: source_text.to_string(),
                });
            }
            _ => {
                advance(&mut line, &mut column, c);
                ix += 1;
            }
        }
    }
    comments
}
