// tests/template_tests.rs

use vellum::ast::{BinaryOp, Expr, Stmt};
use vellum::{ComponentDescriptor, DefaultRegistry, ParsingResult, TemplateParser};

fn parse(code: &str) -> ParsingResult {
    let registry = DefaultRegistry::default();
    TemplateParser::new(&registry)
        .parse(code)
        .expect("parse should not hard-fail")
}

fn parse_with(code: &str, registry: &DefaultRegistry) -> ParsingResult {
    TemplateParser::new(registry)
        .parse(code)
        .expect("parse should not hard-fail")
}

fn statements(result: &ParsingResult) -> &[Stmt] {
    &result.root.as_ref().expect("expected a root").statements
}

#[test]
fn empty_input_yields_empty_root_and_no_issues() {
    let result = parse("");
    assert!(result.is_correct());
    assert!(statements(&result).is_empty());
}

#[test]
fn plain_text_becomes_one_buffer_output() {
    let result = parse("hello world");
    assert!(result.is_correct());
    let stmts = statements(&result);
    assert_eq!(stmts.len(), 1);
    let Stmt::BufferOutput(output) = &stmts[0] else {
        panic!("expected a buffer output, got {:?}", stmts[0]);
    };
    let Expr::StringLiteral(literal) = &output.expression else {
        panic!("expected a string literal");
    };
    assert_eq!(literal.value, "hello world");
}

#[test]
fn doubled_marker_unescapes_exactly_once() {
    let result = parse("I have locker ##20");
    assert!(result.is_correct());
    let Stmt::BufferOutput(output) = &statements(&result)[0] else {
        panic!("expected a buffer output");
    };
    let Expr::StringLiteral(literal) = &output.expression else {
        panic!("expected a string literal");
    };
    assert_eq!(literal.value, "I have locker #20");
}

#[test]
fn interpolated_text_becomes_interpolation_parts() {
    let result = parse("total: #amount# units");
    assert!(result.is_correct());
    let Stmt::BufferOutput(output) = &statements(&result)[0] else {
        panic!("expected a buffer output");
    };
    let Expr::StringInterpolation(interp) = &output.expression else {
        panic!("expected an interpolation");
    };
    assert_eq!(interp.parts.len(), 3);
    assert!(matches!(&interp.parts[0], Expr::StringLiteral(s) if s.value == "total: "));
    assert!(matches!(&interp.parts[1], Expr::Identifier(id) if id.name == "amount"));
    assert!(matches!(&interp.parts[2], Expr::StringLiteral(s) if s.value == " units"));
}

#[test]
fn node_source_text_round_trips_to_the_original_source() {
    let code = "  <vl:set x = 1>\n#x#";
    let result = parse(code);
    assert!(result.is_correct());
    for stmt in statements(&result) {
        let text = stmt.source_text();
        if text.is_empty() {
            continue;
        }
        let range = stmt.position().byte_range();
        assert_eq!(&code[range], text, "position does not cover sourceText");
    }
}

#[test]
fn set_parses_as_expression_statement() {
    let result = parse("<vl:set total = 1 + 2 * 3>");
    assert!(result.is_correct());
    let Stmt::Expression(stmt) = &statements(&result)[0] else {
        panic!("expected an expression statement");
    };
    let Expr::Assign(assign) = &stmt.expression else {
        panic!("expected an assignment");
    };
    let Expr::Binary(sum) = assign.value.as_ref() else {
        panic!("expected a binary expression");
    };
    assert_eq!(sum.op, BinaryOp::Add);
    assert!(matches!(sum.right.as_ref(), Expr::Binary(b) if b.op == BinaryOp::Multiply));
}

#[test]
fn close_matches_nearest_unmatched_open() {
    // Opens: widget, widget, panel. Closes: widget, panel, widget.
    let code = "<vl:widget a=1><vl:widget a=2><vl:panel></vl:widget></vl:panel></vl:widget>";
    let result = parse(code);
    let stmts = statements(&result);
    assert_eq!(stmts.len(), 1);

    let Stmt::Component(outer) = &stmts[0] else {
        panic!("expected the first open widget");
    };
    assert_eq!(outer.name, "widget");
    assert!(matches!(&outer.attributes[0].value, Expr::StringLiteral(s) if s.value == "1"));

    // The first close-widget claimed the second (most recent) open, which
    // had already swallowed the still-open panel.
    let body = outer.body.as_ref().expect("outer widget was closed");
    assert_eq!(body.len(), 1);
    let Stmt::Component(inner) = &body[0] else {
        panic!("expected the second widget inside the first");
    };
    assert!(matches!(&inner.attributes[0].value, Expr::StringLiteral(s) if s.value == "2"));
    let inner_body = inner.body.as_ref().expect("inner widget was closed");
    assert!(matches!(&inner_body[0], Stmt::Component(c) if c.name == "panel"));

    // The close-panel then found no unmatched open panel left.
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0]
        .message
        .contains("end component [panel] without matching start"));
}

#[test]
fn matched_component_extends_position_and_source_text() {
    let code = "<vl:widget>inside</vl:widget>";
    let result = parse(code);
    assert!(result.is_correct());
    let Stmt::Component(widget) = &statements(&result)[0] else {
        panic!("expected a component");
    };
    assert_eq!(widget.meta.source_text, code);
    assert_eq!(widget.body.as_ref().unwrap().len(), 1);
}

#[test]
fn self_closing_component_gets_an_empty_body() {
    let result = parse("<vl:widget name=\"w\"/>");
    assert!(result.is_correct());
    let Stmt::Component(widget) = &statements(&result)[0] else {
        panic!("expected a component");
    };
    assert_eq!(widget.body.as_deref(), Some(&[][..]));
}

#[test]
fn unclosed_required_body_yields_exactly_one_issue() {
    let registry = DefaultRegistry::empty().with("box", ComponentDescriptor::new(true, true));
    let result = parse_with("<vl:box>", &registry);
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0].message.contains("[box] requires a body"));
    let Stmt::Component(component) = &statements(&result)[0] else {
        panic!("expected a component");
    };
    assert!(component.body.is_none());
    assert!(component.requires_body);
}

#[test]
fn end_component_without_start_reports_and_keeps_going() {
    let result = parse("before</vl:widget>after");
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0]
        .message
        .contains("Found end component [widget] without matching start component"));
    assert_eq!(statements(&result).len(), 2);
}

#[test]
fn bodyless_component_rejects_a_close_tag() {
    let result = parse("<vl:dump var=1></vl:dump>");
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0]
        .message
        .contains("The [dump] component does not allow a body"));
}

#[test]
fn elseif_chain_folds_right_associated() {
    let code = "<vl:if false>1<vl:elseif false>2<vl:elseif true>3<vl:else>4</vl:if>";
    let result = parse(code);
    assert!(result.is_correct(), "issues: {:?}", result.issues);

    let Stmt::If(outer) = &statements(&result)[0] else {
        panic!("expected an if");
    };
    assert!(matches!(&outer.condition, Expr::Bool(b) if !b.value));

    // First elseif hangs off the outer else branch.
    let Stmt::Block(block) = outer.else_body.as_deref().unwrap() else {
        panic!("expected a block else branch");
    };
    let Stmt::If(first_elseif) = &block.statements[0] else {
        panic!("expected the first elseif as an if node");
    };
    assert!(matches!(&first_elseif.condition, Expr::Bool(b) if !b.value));

    // Second elseif hangs off the first one.
    let Stmt::Block(block) = first_elseif.else_body.as_deref().unwrap() else {
        panic!("expected a nested block");
    };
    let Stmt::If(second_elseif) = &block.statements[0] else {
        panic!("expected the second elseif as an if node");
    };
    assert!(matches!(&second_elseif.condition, Expr::Bool(b) if b.value));

    // And the else body terminates the chain.
    let Stmt::Block(last) = second_elseif.else_body.as_deref().unwrap() else {
        panic!("expected the else block");
    };
    let Stmt::BufferOutput(output) = &last.statements[0] else {
        panic!("expected the else text");
    };
    assert!(matches!(&output.expression, Expr::StringLiteral(s) if s.value == "4"));
}

#[test]
fn embedded_syntax_error_does_not_abort_the_outer_parse() {
    let result = parse("before #a +# after");
    assert!(result.root.is_some(), "outer parse should still produce a root");
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0].message.contains("Syntax error"));

    // The bad expression degraded to a null placeholder inside the run.
    let Stmt::BufferOutput(output) = &statements(&result)[0] else {
        panic!("expected a buffer output");
    };
    let Expr::StringInterpolation(interp) = &output.expression else {
        panic!("expected an interpolation");
    };
    assert!(matches!(&interp.parts[1], Expr::Null(_)));
}

#[test]
fn switch_cases_carry_implied_breaks_only_at_case_ends() {
    let code = "<vl:switch expression=\"#x#\">\
                <vl:case value=\"1\">one</vl:case>\
                <vl:defaultcase>other</vl:defaultcase>\
                </vl:switch>";
    let result = parse(code);
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Switch(switch) = &statements(&result)[0] else {
        panic!("expected a switch");
    };
    assert_eq!(switch.cases.len(), 2);

    let case = &switch.cases[0];
    assert!(matches!(case.value.as_ref().unwrap(), Expr::StringLiteral(s) if s.value == "1"));
    assert!(matches!(case.delimiter.as_ref().unwrap(), Expr::StringLiteral(s) if s.value == ","));
    assert_eq!(case.body.len(), 2);
    assert!(matches!(&case.body[0], Stmt::BufferOutput(_)));
    assert!(matches!(&case.body[1], Stmt::Break(_)));

    let default = &switch.cases[1];
    assert!(default.value.is_none());
    assert!(default.delimiter.is_none());
    assert!(matches!(default.body.last().unwrap(), Stmt::Break(_)));
}

#[test]
fn switch_rejects_non_case_statements() {
    let result = parse("<vl:switch expression=\"#x#\"><vl:set y = 1></vl:switch>");
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0]
        .message
        .contains("Switch body can only contain case statements"));
}

#[test]
fn loop_condition_rewrites_into_a_closure() {
    let result = parse("<vl:loop condition=\"count lt 5\">tick</vl:loop>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Component(component) = &statements(&result)[0] else {
        panic!("expected the loop component");
    };
    let condition = &component
        .attributes
        .iter()
        .find(|a| a.key.value == "condition")
        .expect("condition attribute")
        .value;
    let Expr::Closure(closure) = condition else {
        panic!("expected the condition rewritten into a closure");
    };
    assert!(closure.params.is_empty());
    let Stmt::Return(ret) = closure.body.as_ref() else {
        panic!("expected the closure to wrap a return");
    };
    let Expr::Binary(cmp) = ret.expression.as_ref().unwrap() else {
        panic!("expected the re-parsed comparison");
    };
    assert_eq!(cmp.op, BinaryOp::LessThan);
}

#[test]
fn try_catch_finally_builds_all_sections() {
    let code = "<vl:try><vl:set x = 1>\
                <vl:catch type=\"any\">caught</vl:catch>\
                <vl:finally>done</vl:finally></vl:try>";
    let result = parse(code);
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Try(try_stmt) = &statements(&result)[0] else {
        panic!("expected a try");
    };
    assert!(matches!(&try_stmt.body[0], Stmt::Expression(_)));
    assert_eq!(try_stmt.catches.len(), 1);
    let catch = &try_stmt.catches[0];
    assert!(matches!(&catch.types[0], Expr::StringLiteral(s) if s.value == "any"));
    assert_eq!(catch.variable.name, "vlcatch");
    assert!(matches!(&catch.body[0], Stmt::BufferOutput(_)));
    assert!(matches!(&try_stmt.finally_body[0], Stmt::BufferOutput(_)));
}

#[test]
fn function_declaration_collects_attributes_and_arguments() {
    let code = "<vl:function name=\"greet\" access=\"public\" returnType=\"string\">\
                <vl:argument name=\"who\" required=\"true\" type=\"string\">\
                <vl:return \"Hi \" & who></vl:function>";
    let result = parse(code);
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Function(function) = &statements(&result)[0] else {
        panic!("expected a function declaration");
    };
    assert_eq!(function.name, "greet");
    assert_eq!(function.access, Some(vellum::ast::Access::Public));
    assert_eq!(function.return_type.as_deref(), Some("string"));
    assert_eq!(function.args.len(), 1);
    let arg = &function.args[0];
    assert_eq!(arg.name, "who");
    assert!(arg.required);
    assert_eq!(arg.type_name, "string");
    let Some(Stmt::Return(ret)) = function.body.first() else {
        panic!("expected the return statement");
    };
    assert!(matches!(
        ret.expression.as_ref().unwrap(),
        Expr::Binary(b) if b.op == BinaryOp::Concat
    ));
}

#[test]
fn argument_type_defaults_to_any() {
    let result = parse("<vl:function name=\"f\"><vl:argument name=\"a\"></vl:function>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Function(function) = &statements(&result)[0] else {
        panic!("expected a function declaration");
    };
    assert_eq!(function.args[0].type_name, "Any");
    assert!(!function.args[0].required);
}

#[test]
fn import_joins_prefix_and_reads_alias() {
    let result = parse("<vl:import name=\"util.text\" prefix=\"core\" alias=\"txt\">");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Import(import) = &statements(&result)[0] else {
        panic!("expected an import");
    };
    assert_eq!(import.name.as_ref().unwrap().value, "core:util.text");
    assert_eq!(import.alias.as_ref().unwrap().name, "txt");
}

#[test]
fn missing_required_attribute_reports_and_continues() {
    let result = parse("<vl:while>body</vl:while>");
    assert!(result.root.is_some());
    assert!(result
        .issues
        .iter()
        .any(|i| i.message.contains("Missing condition attribute on while component")));
}

#[test]
fn while_parses_condition_and_label() {
    let result = parse("<vl:while condition=\"x lt 3\" label=\"outer\">go</vl:while>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::While(while_stmt) = &statements(&result)[0] else {
        panic!("expected a while");
    };
    assert_eq!(while_stmt.label.as_deref(), Some("outer"));
    assert!(matches!(&while_stmt.condition, Expr::Binary(b) if b.op == BinaryOp::LessThan));
}

#[test]
fn output_builds_a_component_with_populated_body() {
    let result = parse("<vl:output>#x#</vl:output>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Component(output) = &statements(&result)[0] else {
        panic!("expected the output component");
    };
    assert_eq!(output.name, "output");
    assert_eq!(output.body.as_ref().unwrap().len(), 1);
}

#[test]
fn script_island_embeds_statements() {
    let result = parse("<vl:script>x = 1; y = x + 2;</vl:script>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::ScriptIsland(island) = &statements(&result)[0] else {
        panic!("expected a script island");
    };
    assert_eq!(island.statements.len(), 2);
    assert!(island
        .statements
        .iter()
        .all(|s| matches!(s, Stmt::Expression(_))));
}

#[test]
fn break_continue_rethrow_return_parse() {
    let code = "<vl:break outer><vl:continue><vl:rethrow><vl:return x>";
    let result = parse(code);
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let stmts = statements(&result);
    assert!(matches!(&stmts[0], Stmt::Break(b) if b.label.as_deref() == Some("outer")));
    assert!(matches!(&stmts[1], Stmt::Continue(c) if c.label.is_none()));
    assert!(matches!(&stmts[2], Stmt::Rethrow(_)));
    assert!(matches!(&stmts[3], Stmt::Return(r) if r.expression.is_some()));
}

#[test]
fn comments_are_harvested_and_associated() {
    let result = parse("<!--- assign below ---><vl:set x = 1>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    assert_eq!(result.comments.len(), 1);
    assert_eq!(result.comments[0].text, "assign below");
    let stmt = &statements(&result)[0];
    assert_eq!(stmt.meta().comments.len(), 1);
}

#[test]
fn comment_only_content_emits_no_statements() {
    let result = parse("<!--- nothing to see --->");
    assert!(result.is_correct());
    assert!(statements(&result).is_empty());
    assert_eq!(result.comments.len(), 1);
}

#[test]
fn comment_splits_text_into_two_runs() {
    let result = parse("left<!--- split --->right");
    assert!(result.is_correct());
    let stmts = statements(&result);
    assert_eq!(stmts.len(), 2);
    assert!(matches!(&stmts[0], Stmt::BufferOutput(_)));
    assert!(matches!(&stmts[1], Stmt::BufferOutput(_)));
}

#[test]
fn quoted_attribute_unescapes_doubled_quotes() {
    let result = parse("<vl:widget title=\"say \"\"hi\"\"\"/>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Component(widget) = &statements(&result)[0] else {
        panic!("expected a component");
    };
    assert!(matches!(
        &widget.attributes[0].value,
        Expr::StringLiteral(s) if s.value == "say \"hi\""
    ));
}

#[test]
fn interpolated_attribute_value_is_sub_parsed() {
    let result = parse("<vl:widget count=#n + 1#/>");
    assert!(result.is_correct(), "issues: {:?}", result.issues);
    let Stmt::Component(widget) = &statements(&result)[0] else {
        panic!("expected a component");
    };
    assert!(matches!(&widget.attributes[0].value, Expr::Binary(b) if b.op == BinaryOp::Add));
}

#[test]
fn serialized_ast_is_stable_json() {
    let result = parse("<vl:set x = 1>");
    let root = result.root.expect("expected a root");
    let json = serde_json::to_value(&root).expect("AST serializes");
    assert!(json["statements"][0]["Expression"]["expression"]["Assign"].is_object());
}
