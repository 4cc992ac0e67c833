//! Template tree → AST transformation.
//!
//! Walks the concrete parse tree one production at a time. Ordinary
//! statements convert directly; generic open/close components are paired
//! retroactively, since markup dialects close constructs with a separate tag
//! rather than a bracketed body. All validation reports into the shared
//! collector and substitutes placeholders, so a bad construct never stops
//! the walk.

use log::trace;
use pest::iterators::Pair;

use crate::ast::{
    Access, ArgumentDecl, Attribute, Block, Break, BufferOutput, CatchClause, Closure, Component,
    Continue, Expr, ExprStmt, Fqn, FunctionDecl, Identifier, If, Import, NodeMeta, Rethrow,
    Return, ScriptIsland, Stmt, StringInterpolation, StringLiteral, Switch, SwitchCase, Template,
    Try, While,
};
use crate::source::Position;
use crate::syntax::template::Rule;

use super::{escape_hash, escape_quoted, span_meta, span_position, Parser};

impl<'r> Parser<'r> {
    pub(crate) fn template_to_ast(&mut self, pair: Pair<'_, Rule>) -> Template {
        let meta = self.meta_of(&pair);
        let mut statements = Vec::new();
        for child in pair.into_inner() {
            if child.as_rule() == Rule::statements {
                statements = self.statements_to_ast(child);
            }
        }
        Template { statements, meta }
    }

    /// Convert a flat statement sequence, pairing generic close tags with
    /// their most recent unmatched same-named open. `open` is the index
    /// stack of still-open components in `out`.
    pub(crate) fn statements_to_ast(&mut self, pair: Pair<'_, Rule>) -> Vec<Stmt> {
        let mut out: Vec<Stmt> = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::statement => {
                    let inner = child
                        .into_inner()
                        .next()
                        .expect("statement wraps one alternative"); // grammar guarantees
                    if inner.as_rule() == Rule::generic_close {
                        self.close_component(inner, &mut out, &mut open);
                    } else {
                        let stmt = self.statement_to_ast(inner);
                        let is_open = matches!(&stmt, Stmt::Component(c) if c.body.is_none());
                        out.push(stmt);
                        if is_open {
                            open.push(out.len() - 1);
                        }
                    }
                }
                Rule::script_island => {
                    let stmt = self.script_island_to_ast(child);
                    out.push(stmt);
                }
                Rule::text_content => {
                    let stmts = self.text_content_to_ast(child);
                    out.extend(stmts);
                }
                _ => {}
            }
        }
        // Anything still open that demanded a body gets one issue each.
        for stmt in &out {
            if let Stmt::Component(component) = stmt {
                if component.body.is_none() && component.requires_body {
                    self.diags.report(
                        format!("Component [{}] requires a body.", component.name),
                        component.meta.position.clone(),
                    );
                }
            }
        }
        out
    }

    fn close_component(
        &mut self,
        pair: Pair<'_, Rule>,
        out: &mut Vec<Stmt>,
        open: &mut Vec<usize>,
    ) {
        let span = pair.as_span();
        let close_pos = span_position(&span, self.bias, &self.source);
        let close_end = span.end();
        let name = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::component_name)
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();

        if let Some(descriptor) = self.resolver.resolve(&name) {
            if !descriptor.allows_body {
                self.diags.report(
                    format!("The [{name}] component does not allow a body"),
                    close_pos.clone(),
                );
            }
        }

        // Scan open components newest-first. Skipped-over opens that demand
        // a body are being closed over unfinished, so they are flagged here.
        let mut matched: Option<usize> = None;
        for k in (0..open.len()).rev() {
            let Stmt::Component(component) = &out[open[k]] else {
                continue;
            };
            if component.body.is_some() {
                continue;
            }
            if component.name.eq_ignore_ascii_case(&name) {
                matched = Some(k);
                break;
            }
            if component.requires_body {
                let message = format!("Component [{}] requires a body.", component.name);
                let position = component.meta.position.clone();
                self.diags.report(message, position);
            }
        }

        match matched {
            Some(k) => {
                let ix = open[k];
                trace!("close [{name}] matches open component at index {ix}");
                open.truncate(k);
                let body: Vec<Stmt> = out.drain(ix + 1..).collect();
                let source_text = {
                    let Stmt::Component(component) = &out[ix] else {
                        unreachable!("open stack points at a component");
                    };
                    self.source
                        .code
                        .get(component.source_start..close_end)
                        .unwrap_or_default()
                        .to_string()
                };
                let Stmt::Component(component) = &mut out[ix] else {
                    unreachable!("open stack points at a component");
                };
                component.body = Some(body);
                component.meta.position.end = close_pos.end;
                component.meta.source_text = source_text;
            }
            None => {
                self.diags.report(
                    format!("Found end component [{name}] without matching start component"),
                    close_pos,
                );
            }
        }
    }

    fn statement_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        match pair.as_rule() {
            Rule::if_stmt => self.if_to_ast(pair),
            Rule::while_stmt => self.while_to_ast(pair),
            Rule::switch_stmt => self.switch_to_ast(pair),
            Rule::try_stmt => self.try_to_ast(pair),
            Rule::function_stmt => self.function_to_ast(pair),
            Rule::set_stmt => self.set_to_ast(pair),
            Rule::return_stmt => self.return_to_ast(pair),
            Rule::break_stmt => self.break_to_ast(pair),
            Rule::continue_stmt => self.continue_to_ast(pair),
            Rule::rethrow_stmt => self.rethrow_to_ast(pair),
            Rule::import_stmt => self.import_to_ast(pair),
            Rule::output_stmt => self.output_to_ast(pair),
            Rule::generic_component => self.generic_component_to_ast(pair),
            rule => unreachable!("unhandled statement rule {rule:?}"),
        }
    }

    // ---- conditional chain folding ----------------------------------------

    fn if_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let mut condition_pair = None;
        let mut then_pair = None;
        let mut elseifs = Vec::new();
        let mut else_pair = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::tag_expression => condition_pair = Some(child),
                Rule::statements if then_pair.is_none() => then_pair = Some(child),
                Rule::elseif_clause => elseifs.push(child),
                Rule::else_clause => else_pair = Some(child),
                _ => {}
            }
        }

        let condition_pair = condition_pair.expect("if carries a condition"); // grammar guarantees
        let condition_pos = self.position_of(&condition_pair);
        let condition = self.parse_embedded_expression(condition_pair.as_str(), &condition_pos);

        let then_pair = then_pair.expect("if carries a then body"); // grammar guarantees
        let then_block = Block {
            statements: self.statements_to_ast(then_pair.clone()),
            meta: self.meta_of(&then_pair),
        };

        let mut else_accum: Option<Box<Stmt>> = else_pair.map(|clause| {
            let stmts = clause
                .into_inner()
                .find(|p| p.as_rule() == Rule::statements)
                .expect("else carries a body"); // grammar guarantees
            Box::new(Stmt::Block(Block {
                statements: self.statements_to_ast(stmts.clone()),
                meta: self.meta_of(&stmts),
            }))
        });

        // Fold elseifs right-to-left: each becomes the else branch of the
        // one before it, producing the right-associated first-match chain.
        for clause in elseifs.into_iter().rev() {
            let clause_meta = self.meta_of(&clause);
            let mut cond = None;
            let mut stmts = None;
            for c in clause.into_inner() {
                match c.as_rule() {
                    Rule::tag_expression => cond = Some(c),
                    Rule::statements => stmts = Some(c),
                    _ => {}
                }
            }
            let cond = cond.expect("elseif carries a condition"); // grammar guarantees
            let cond_pos = self.position_of(&cond);
            let elseif_condition = self.parse_embedded_expression(cond.as_str(), &cond_pos);
            let stmts = stmts.expect("elseif carries a body"); // grammar guarantees
            let elseif_then = Block {
                statements: self.statements_to_ast(stmts.clone()),
                meta: self.meta_of(&stmts),
            };
            let node = If {
                condition: elseif_condition,
                then_body: Box::new(Stmt::Block(elseif_then)),
                else_body: else_accum.take(),
                meta: clause_meta.clone(),
            };
            else_accum = Some(Box::new(Stmt::Block(Block {
                statements: vec![Stmt::If(node)],
                meta: clause_meta,
            })));
        }

        Stmt::If(If {
            condition,
            then_body: Box::new(Stmt::Block(then_block)),
            else_body: else_accum,
            meta,
        })
    }

    // ---- looping ----------------------------------------------------------

    fn while_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let mut attributes = Vec::new();
        let mut stmts_pair = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::attributes => attributes = self.attributes_to_ast(child),
                Rule::statements => stmts_pair = Some(child),
                _ => {}
            }
        }
        let position = meta.position.clone();
        let condition_attr = self.find_attr(&attributes, "condition", true, None, "while", &position);
        let condition_text = self
            .attr_as_string(condition_attr.as_ref(), "condition", false)
            .unwrap_or_default();
        let condition_pos = condition_attr
            .as_ref()
            .map(|e| e.position().clone())
            .unwrap_or_else(|| position.clone());
        let condition = self.parse_embedded_expression(&condition_text, &condition_pos);

        let label_attr = self.find_attr(&attributes, "label", false, None, "while", &position);
        let label = self.attr_as_string(label_attr.as_ref(), "label", false);

        let stmts_pair = stmts_pair.expect("while carries a body"); // grammar guarantees
        let body = Block {
            statements: self.statements_to_ast(stmts_pair.clone()),
            meta: self.meta_of(&stmts_pair),
        };
        Stmt::While(While {
            label,
            condition,
            body: Box::new(Stmt::Block(body)),
            meta,
        })
    }

    // ---- switch -----------------------------------------------------------

    fn switch_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let mut attributes = Vec::new();
        let mut body_pair = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::attributes => attributes = self.attributes_to_ast(child),
                Rule::switch_body => body_pair = Some(child),
                _ => {}
            }
        }
        let position = meta.position.clone();
        let expression = self
            .find_attr(&attributes, "expression", true, None, "switch", &position)
            .unwrap_or_else(|| self.null_placeholder(&position));

        let mut cases = Vec::new();
        if let Some(body) = body_pair {
            for child in body.into_inner() {
                match child.as_rule() {
                    Rule::case_stmt => {
                        let case = self.case_to_ast(child);
                        cases.push(case);
                    }
                    // Stray text between cases is overlooked; anything
                    // structural is not.
                    Rule::text_content => {}
                    Rule::statement | Rule::script_island => {
                        let at = self.position_of(&child);
                        self.diags
                            .report("Switch body can only contain case statements", at);
                    }
                    _ => {}
                }
            }
        }
        Stmt::Switch(Switch {
            expression,
            cases,
            meta,
        })
    }

    fn case_to_ast(&mut self, pair: Pair<'_, Rule>) -> SwitchCase {
        let meta = self.meta_of(&pair);
        let mut keyword = None;
        let mut attributes = Vec::new();
        let mut stmts_pair = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::case_kw if keyword.is_none() => keyword = Some(child.as_str().to_string()),
                Rule::attributes => attributes = self.attributes_to_ast(child),
                Rule::statements => stmts_pair = Some(child),
                _ => {}
            }
        }
        let is_default = keyword
            .map(|k| k.eq_ignore_ascii_case("defaultcase"))
            .unwrap_or(false);
        let position = meta.position.clone();
        let (value, delimiter) = if is_default {
            (None, None)
        } else {
            let value = self.find_attr(&attributes, "value", true, None, "case", &position);
            let default_delimiter = Expr::StringLiteral(StringLiteral {
                value: ",".to_string(),
                meta: self.synthetic_meta(&position),
            });
            let delimiter = self.find_attr(
                &attributes,
                "delimiter",
                false,
                Some(default_delimiter),
                "case",
                &position,
            );
            (value, delimiter)
        };

        let mut body = stmts_pair
            .map(|p| self.statements_to_ast(p))
            .unwrap_or_default();
        // In the markup dialect the break at the end of a case is implied.
        body.push(Stmt::Break(Break {
            label: None,
            meta: NodeMeta::synthetic(Position::synthetic(
                meta.position.end,
                self.source.clone(),
            )),
        }));

        SwitchCase {
            value,
            delimiter,
            body,
            meta,
        }
    }

    // ---- try/catch/finally ------------------------------------------------

    fn try_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let mut body = Vec::new();
        let mut catches = Vec::new();
        let mut finally_body = Vec::new();
        for child in pair.into_inner() {
            match child.as_rule() {
                // Every statements segment at try level joins the try body,
                // including text between catch clauses.
                Rule::statements => {
                    let stmts = self.statements_to_ast(child);
                    body.extend(stmts);
                }
                Rule::catch_clause => {
                    let clause = self.catch_to_ast(child);
                    catches.push(clause);
                }
                Rule::finally_clause => {
                    if let Some(stmts) = child
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::statements)
                    {
                        finally_body = self.statements_to_ast(stmts);
                    }
                }
                _ => {}
            }
        }
        Stmt::Try(Try {
            body,
            catches,
            finally_body,
            meta,
        })
    }

    fn catch_to_ast(&mut self, pair: Pair<'_, Rule>) -> CatchClause {
        let meta = self.meta_of(&pair);
        let mut attributes = Vec::new();
        let mut stmts_pair = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::attributes => attributes = self.attributes_to_ast(child),
                Rule::statements => stmts_pair = Some(child),
                _ => {}
            }
        }
        let position = meta.position.clone();
        let type_attr = self.find_attr(&attributes, "type", false, None, "catch", &position);
        let types = match type_attr {
            Some(expr) => vec![expr],
            None => vec![Expr::Fqn(Fqn {
                value: "any".to_string(),
                meta: self.synthetic_meta(&position),
            })],
        };
        let variable = Identifier {
            name: "vlcatch".to_string(),
            meta: self.synthetic_meta(&position),
        };
        let body = stmts_pair
            .map(|p| self.statements_to_ast(p))
            .unwrap_or_default();
        CatchClause {
            types,
            variable,
            body,
            meta,
        }
    }

    // ---- functions ---------------------------------------------------------

    fn function_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let mut attributes = Vec::new();
        let mut args = Vec::new();
        let mut stmts_pair = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::attributes => attributes = self.attributes_to_ast(child),
                Rule::argument_stmt => {
                    let arg = self.argument_to_ast(child);
                    args.push(arg);
                }
                Rule::statements => stmts_pair = Some(child),
                _ => {}
            }
        }
        let position = meta.position.clone();
        let name_attr = self.find_attr(&attributes, "name", true, None, "function", &position);
        let name = self
            .attr_as_string(name_attr.as_ref(), "name", false)
            .unwrap_or_default();

        let access_attr = self.find_attr(&attributes, "access", false, None, "function", &position);
        let access_text = self.attr_as_string(access_attr.as_ref(), "access", true);
        let access = access_text.and_then(|text| match text.to_ascii_lowercase().as_str() {
            "public" => Some(Access::Public),
            "private" => Some(Access::Private),
            "remote" => Some(Access::Remote),
            "package" => Some(Access::Package),
            _ => None,
        });

        let return_type_attr =
            self.find_attr(&attributes, "returnType", false, None, "function", &position);
        let return_type = self.attr_as_string(return_type_attr.as_ref(), "returnType", true);

        let body = stmts_pair
            .map(|p| self.statements_to_ast(p))
            .unwrap_or_default();
        Stmt::Function(FunctionDecl {
            access,
            name,
            return_type,
            args,
            annotations: attributes,
            body,
            meta,
        })
    }

    fn argument_to_ast(&mut self, pair: Pair<'_, Rule>) -> ArgumentDecl {
        let meta = self.meta_of(&pair);
        let mut attributes = Vec::new();
        for child in pair.into_inner() {
            if child.as_rule() == Rule::attributes {
                attributes = self.attributes_to_ast(child);
            }
        }
        let position = meta.position.clone();
        let name_attr = self.find_attr(&attributes, "name", true, None, "argument", &position);
        let name = self
            .attr_as_string(name_attr.as_ref(), "name", false)
            .unwrap_or_default();

        let required_attr =
            self.find_attr(&attributes, "required", false, None, "argument", &position);
        let required_text = self.attr_as_string(required_attr.as_ref(), "required", false);
        let required = parse_bool(required_text);

        let default = self.find_attr(&attributes, "default", false, None, "argument", &position);

        let type_default = Expr::StringLiteral(StringLiteral {
            value: "Any".to_string(),
            meta: self.synthetic_meta(&position),
        });
        let type_attr = self.find_attr(
            &attributes,
            "type",
            false,
            Some(type_default),
            "argument",
            &position,
        );
        let type_name = self
            .attr_as_string(type_attr.as_ref(), "type", false)
            .unwrap_or_else(|| "Any".to_string());

        ArgumentDecl {
            required,
            type_name,
            name,
            default,
            annotations: attributes,
            meta,
        }
    }

    // ---- simple statements -------------------------------------------------

    fn set_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let expr_pair = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::tag_expression)
            .expect("set carries an expression"); // grammar guarantees
        let position = self.position_of(&expr_pair);
        let expression = self.parse_embedded_expression(expr_pair.as_str(), &position);
        Stmt::Expression(ExprStmt { expression, meta })
    }

    fn return_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let expression = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::tag_expression)
            .map(|expr_pair| {
                let position = self.position_of(&expr_pair);
                self.parse_embedded_expression(expr_pair.as_str(), &position)
            });
        Stmt::Return(Return { expression, meta })
    }

    fn break_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let label = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::label_name)
            .map(|p| p.as_str().to_string());
        Stmt::Break(Break { label, meta })
    }

    fn continue_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let label = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::label_name)
            .map(|p| p.as_str().to_string());
        Stmt::Continue(Continue { label, meta })
    }

    fn rethrow_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        Stmt::Rethrow(Rethrow { meta })
    }

    fn import_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let mut attributes = Vec::new();
        for child in pair.into_inner() {
            if child.as_rule() == Rule::attributes {
                attributes = self.attributes_to_ast(child);
            }
        }
        let position = meta.position.clone();

        let name_attr = self.find_attr(&attributes, "name", false, None, "import", &position);
        let name = name_attr.as_ref().and_then(|expr| {
            let base = self.attr_as_string(Some(expr), "name", false)?;
            let prefix_attr =
                self.find_attr(&attributes, "prefix", false, None, "import", &position);
            let prefix = self.attr_as_string(prefix_attr.as_ref(), "prefix", false);
            let qualified = match prefix {
                Some(prefix) => format!("{prefix}:{base}"),
                None => base,
            };
            Some(Fqn {
                value: qualified,
                meta: NodeMeta::new(expr.position().clone(), expr.source_text()),
            })
        });

        let alias_attr = self.find_attr(&attributes, "alias", false, None, "import", &position);
        let alias = alias_attr.as_ref().and_then(|expr| {
            let text = self.attr_as_string(Some(expr), "alias", false)?;
            Some(Identifier {
                name: text,
                meta: NodeMeta::new(expr.position().clone(), expr.source_text()),
            })
        });

        Stmt::Import(Import { name, alias, meta })
    }

    fn output_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let source_start = pair.as_span().start();
        let mut attributes = Vec::new();
        let mut body = Vec::new();
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::attributes => attributes = self.attributes_to_ast(child),
                Rule::statements => body = self.statements_to_ast(child),
                _ => {}
            }
        }
        Stmt::Component(Component {
            name: "output".to_string(),
            attributes,
            body: Some(body),
            requires_body: false,
            source_start,
            meta,
        })
    }

    fn script_island_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let body_pair = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::script_body)
            .expect("script island carries a body"); // grammar guarantees
        let meta = self.meta_of(&body_pair);
        let position = meta.position.clone();
        let statements = self.parse_embedded_statements(body_pair.as_str(), &position);
        Stmt::ScriptIsland(ScriptIsland { statements, meta })
    }

    // ---- generic components ------------------------------------------------

    fn generic_component_to_ast(&mut self, pair: Pair<'_, Rule>) -> Stmt {
        let meta = self.meta_of(&pair);
        let source_start = pair.as_span().start();
        let mut name = String::new();
        let mut attributes = Vec::new();
        let mut self_closed = false;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::component_name => name = child.as_str().to_string(),
                Rule::attributes => attributes = self.attributes_to_ast(child),
                Rule::self_close => self_closed = true,
                _ => {}
            }
        }

        if !self_closed && name.eq_ignore_ascii_case("loop") {
            self.rewrite_loop_condition(&mut attributes);
        }

        let requires_body = !self_closed
            && self
                .resolver
                .resolve(&name)
                .map(|d| d.requires_body)
                .unwrap_or(false);
        // A self-closing component is already complete; an open one may get
        // its body from a later close tag.
        let body = if self_closed { Some(Vec::new()) } else { None };

        Stmt::Component(Component {
            name,
            attributes,
            body,
            requires_body,
            source_start,
            meta,
        })
    }

    /// Rewrite a loop's `condition` attribute into a zero-argument closure
    /// wrapping a return of the condition, deferring evaluation to each
    /// iteration. String-literal conditions are re-parsed as expressions.
    fn rewrite_loop_condition(&mut self, attributes: &mut [Attribute]) {
        for attr in attributes.iter_mut() {
            if !attr.key.value.eq_ignore_ascii_case("condition") {
                continue;
            }
            let placeholder = self.null_placeholder(&attr.meta.position);
            let mut condition = std::mem::replace(&mut attr.value, placeholder);
            if let Expr::StringLiteral(literal) = &condition {
                let value = literal.value.clone();
                let position = literal.meta.position.clone();
                condition = self.parse_embedded_expression(&value, &position);
            }
            let synthetic = NodeMeta::synthetic(Position::synthetic(
                condition.position().start,
                self.source.clone(),
            ));
            attr.value = Expr::Closure(Closure {
                params: Vec::new(),
                body: Box::new(Stmt::Return(Return {
                    expression: Some(condition),
                    meta: synthetic.clone(),
                })),
                meta: synthetic,
            });
        }
    }

    // ---- text & interpolation ----------------------------------------------

    /// Partition text content into runs bounded by comments. An all-literal
    /// run collapses into one string literal; a mixed run becomes an
    /// interpolation. Each run emits exactly one buffer output statement.
    fn text_content_to_ast(&mut self, pair: Pair<'_, Rule>) -> Vec<Stmt> {
        let mut statements = Vec::new();
        let mut run: Vec<Pair<Rule>> = Vec::new();
        let mut all_literal = true;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::interpolated_expression => {
                    all_literal = false;
                    run.push(child);
                }
                Rule::plain_text => run.push(child),
                Rule::comment => {
                    if !run.is_empty() {
                        let stmt = self.text_run_to_ast(&run, all_literal);
                        statements.push(stmt);
                        run.clear();
                        all_literal = true;
                    }
                }
                _ => {}
            }
        }
        if !run.is_empty() {
            let stmt = self.text_run_to_ast(&run, all_literal);
            statements.push(stmt);
        }
        statements
    }

    fn text_run_to_ast(&mut self, run: &[Pair<'_, Rule>], all_literal: bool) -> Stmt {
        let first = run.first().expect("text run is non-empty");
        let last = run.last().expect("text run is non-empty");
        let span = first.as_span().start_pos().span(&last.as_span().end_pos());
        let meta = span_meta(&span, self.bias, &self.source);

        let expression = if all_literal {
            let text: String = run.iter().map(|p| p.as_str()).collect();
            Expr::StringLiteral(StringLiteral {
                value: escape_hash(&text),
                meta: meta.clone(),
            })
        } else {
            let mut parts = Vec::new();
            for piece in run {
                match piece.as_rule() {
                    Rule::interpolated_expression => {
                        let part = self.interpolation_to_expr(piece.clone());
                        parts.push(part);
                    }
                    Rule::plain_text => parts.push(Expr::StringLiteral(StringLiteral {
                        value: escape_hash(piece.as_str()),
                        meta: self.meta_of(piece),
                    })),
                    _ => {}
                }
            }
            Expr::StringInterpolation(StringInterpolation {
                parts,
                meta: meta.clone(),
            })
        };
        Stmt::BufferOutput(BufferOutput { expression, meta })
    }

    fn interpolation_to_expr(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let inner = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::interp_inner)
            .expect("interpolation carries inner text"); // grammar guarantees
        let position = self.position_of(&inner);
        self.parse_embedded_expression(inner.as_str(), &position)
    }

    // ---- attributes ---------------------------------------------------------

    fn attributes_to_ast(&mut self, pair: Pair<'_, Rule>) -> Vec<Attribute> {
        let mut attributes = Vec::new();
        for attr_pair in pair.into_inner() {
            if attr_pair.as_rule() != Rule::attribute {
                continue;
            }
            let meta = self.meta_of(&attr_pair);
            let mut key = None;
            let mut value = None;
            for child in attr_pair.into_inner() {
                match child.as_rule() {
                    Rule::attribute_name => {
                        key = Some(Fqn {
                            value: child.as_str().to_string(),
                            meta: self.meta_of(&child),
                        })
                    }
                    Rule::attribute_value => value = Some(self.attribute_value_to_ast(child)),
                    _ => {}
                }
            }
            let key = key.expect("attribute carries a name"); // grammar guarantees
            let value = value.unwrap_or_else(|| {
                Expr::StringLiteral(StringLiteral {
                    value: String::new(),
                    meta: self.synthetic_meta(&meta.position),
                })
            });
            attributes.push(Attribute { key, value, meta });
        }
        attributes
    }

    fn attribute_value_to_ast(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let inner = pair
            .into_inner()
            .next()
            .expect("attribute value wraps one alternative"); // grammar guarantees
        match inner.as_rule() {
            Rule::unquoted_value => Expr::StringLiteral(StringLiteral {
                value: inner.as_str().to_string(),
                meta: self.meta_of(&inner),
            }),
            Rule::interpolated_expression => self.interpolation_to_expr(inner),
            Rule::quoted_string => self.quoted_string_to_expr(inner),
            rule => unreachable!("unhandled attribute value rule {rule:?}"),
        }
    }

    fn quoted_string_to_expr(&mut self, pair: Pair<'_, Rule>) -> Expr {
        let meta = self.meta_of(&pair);
        let text = pair.as_str();
        let quote = text.chars().next().unwrap_or('"');
        let inner = pair
            .into_inner()
            .next()
            .expect("quoted string wraps one alternative"); // grammar guarantees
        let parts_pairs: Vec<Pair<Rule>> = inner.into_inner().collect();
        let has_interpolation = parts_pairs
            .iter()
            .any(|p| p.as_rule() == Rule::interpolated_expression);

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
                Rule::interpolated_expression => {
                    let part = self.interpolation_to_expr(piece);
                    parts.push(part);
                }
                _ => {}
            }
        }
        Expr::StringInterpolation(StringInterpolation { parts, meta })
    }

    // ---- validation helpers -------------------------------------------------

    /// Find a named attribute's value expression. Required-but-absent
    /// reports one issue and yields a null placeholder so building
    /// continues.
    fn find_attr(
        &mut self,
        attributes: &[Attribute],
        name: &str,
        required: bool,
        default: Option<Expr>,
        component: &str,
        position: &Position,
    ) -> Option<Expr> {
        if let Some(attr) = attributes
            .iter()
            .find(|a| a.key.value.eq_ignore_ascii_case(name))
        {
            return Some(attr.value.clone());
        }
        if !required {
            return default;
        }
        self.diags.report(
            format!("Missing {name} attribute on {component} component"),
            position.clone(),
        );
        Some(self.null_placeholder(position))
    }

    /// Coerce an attribute expression to a literal string. Non-literals
    /// report one issue and yield an empty string.
    fn attr_as_string(
        &mut self,
        expr: Option<&Expr>,
        name: &str,
        allow_empty: bool,
    ) -> Option<String> {
        let expr = expr?;
        match expr {
            Expr::StringLiteral(literal) => {
                if !allow_empty && literal.value.trim().is_empty() {
                    self.diags.report(
                        format!("Attribute [{name}] cannot be empty"),
                        expr.position().clone(),
                    );
                }
                Some(literal.value.clone())
            }
            _ => {
                self.diags.report(
                    format!("Attribute [{name}] must be a string literal"),
                    expr.position().clone(),
                );
                Some(String::new())
            }
        }
    }

    // ---- position helpers ----------------------------------------------------

    fn meta_of(&self, pair: &Pair<'_, Rule>) -> NodeMeta {
        span_meta(&pair.as_span(), self.bias, &self.source)
    }

    fn position_of(&self, pair: &Pair<'_, Rule>) -> Position {
        span_position(&pair.as_span(), self.bias, &self.source)
    }

    fn synthetic_meta(&self, position: &Position) -> NodeMeta {
        NodeMeta::synthetic(Position::synthetic(position.start, self.source.clone()))
    }
}

fn parse_bool(text: Option<String>) -> bool {
    text.map(|t| {
        let t = t.trim().to_ascii_lowercase();
        t == "true" || t == "yes" || t == "1"
    })
    .unwrap_or(false)
}
