// tests/diagnostic_tests.rs

use pretty_assertions::assert_eq;
use vellum::{DefaultRegistry, ParsingResult, Point, TemplateParser};

fn parse(code: &str) -> ParsingResult {
    let registry = DefaultRegistry::default();
    TemplateParser::new(&registry)
        .parse(code)
        .expect("parse should not hard-fail")
}

#[test]
fn unclosed_comment_is_classified() {
    let result = parse("before <!--- never ends");
    assert!(result.root.is_none());
    assert!(result
        .issues
        .iter()
        .any(|i| i.message.starts_with("Unclosed tag comment on line 1")));
}

#[test]
fn unclosed_text_expression_is_classified() {
    let result = parse("hello #name");
    assert!(result.root.is_none());
    let issue = result
        .issues
        .iter()
        .find(|i| i.message.starts_with("Unclosed expression starting with #"))
        .expect("expected the unclosed-expression issue");
    // The issue points at the opening marker.
    assert_eq!(issue.position.start, Point::new(1, 6));
}

#[test]
fn unclosed_tag_is_classified_with_its_name() {
    let result = parse("<vl:dump var=1");
    assert!(result.root.is_none());
    assert!(result
        .issues
        .iter()
        .any(|i| i.message.starts_with("Unclosed tag [dump] starting on line 1")));
}

#[test]
fn unclosed_output_is_classified() {
    let result = parse("<vl:output>hi");
    assert!(result.root.is_none());
    assert!(result
        .issues
        .iter()
        .any(|i| i.message.starts_with("Unclosed output tag on line 1")));
}

#[test]
fn unclosed_expression_inside_a_tag_is_classified() {
    let result = parse("<vl:dump var=#x");
    assert!(result.root.is_none());
    assert!(result
        .issues
        .iter()
        .any(|i| i.message.starts_with("Unclosed expression inside an opening tag")));
}

#[test]
fn trailing_unparsable_input_reports_extra_chars() {
    // A stray case outside a switch is structurally balanced, but the
    // grammar cannot consume it.
    let result = parse("<vl:case value=\"1\"></vl:case>");
    assert!(result.root.is_none());
    assert!(result
        .issues
        .iter()
        .any(|i| i.message.starts_with("Extra char(s) [")));
}

#[test]
fn embedded_error_renders_a_context_window() {
    let result = parse("count: #1 +#");
    assert!(result.root.is_some());
    assert_eq!(result.issues.len(), 1);
    let message = &result.issues[0].message;
    assert!(message.starts_with("Syntax error"));
    // Three display lines: message, source line, caret ribbon.
    let lines: Vec<&str> = message.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "count: #1 +#");
    assert!(lines[2].trim_start().starts_with('^'));
}

#[test]
fn embedded_error_positions_are_biased_into_the_document() {
    let result = parse("line1\n<vl:set x = @>");
    assert!(result.root.is_some());
    assert_eq!(result.issues.len(), 1);
    // The `@` sits on line 2, column 12 of the outer document.
    assert_eq!(result.issues[0].position.start, Point::new(2, 12));
}

#[test]
fn multiline_fragment_errors_keep_their_own_line() {
    let result = parse("<vl:script>\nok = 1;\nbad = @;\n</vl:script>");
    assert!(result.root.is_some());
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].position.start.line, 3);
}

#[test]
fn issues_adapt_to_miette_reports() {
    let result = parse("oops #");
    assert!(!result.issues.is_empty());
    let rendered = format!("{:?}", result.issues[0].to_report());
    assert!(rendered.contains("Unclosed expression"));
}

#[test]
fn every_issue_position_points_into_the_source() {
    let result = parse("a #b\n<vl:dump var=1");
    for issue in &result.issues {
        let range = issue.position.byte_range();
        assert!(range.start <= issue.position.source.code.len());
        assert!(range.end <= issue.position.source.code.len());
    }
}
