#![allow(clippy::unwrap_used)]

mod common;

use arbor::grammar::RuleValue;
use arbor::{compile_json, parse, parse_grammar, CompileError, ValidationError};
use common::{leaf_text, simpl_expressions, SIMPL, SIMPL_EXPRESSIONS};
use rstest::rstest;

#[test]
fn test_simpl_grammar_decodes() {
    let grammar = parse_grammar(SIMPL).unwrap();
    assert_eq!(grammar.name, "simpl");
    assert_eq!(grammar.rules.len(), 39);
    assert_eq!(grammar.start_rule(), Ok("source_file"));
    assert_eq!(grammar.extras.as_ref().map(Vec::len), Some(2));

    let binary = &grammar.rules["binary_expression"];
    let levels: Vec<_> = binary
        .members
        .iter()
        .map(|member| member.value.clone())
        .collect();
    assert_eq!(
        levels,
        [8, 6, 5, 4, 3].map(|level| Some(RuleValue::Integer(level)))
    );
    assert_eq!(
        grammar.rules["true"].value,
        Some(RuleValue::String("true".to_string()))
    );
}

#[test]
fn test_simpl_grammar_reports_unused_rules() {
    // lambda_expression is commented out of _expression, leaving it and its
    // argument list unreachable.
    assert_eq!(
        compile_json(SIMPL).err(),
        Some(CompileError::Validation(ValidationError::UnreachableRule {
            rule: "lambda_argument_list".to_string()
        }))
    );
}

#[test]
fn test_simpl_expressions_compile_deterministically() {
    let first = compile_json(SIMPL_EXPRESSIONS).unwrap();
    let second = compile_json(SIMPL_EXPRESSIONS).unwrap();
    assert_eq!(first.to_bytes(), second.to_bytes());
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[rstest]
#[case("1.", "(source_file (int_literal))")]
#[case("x. 1.5.", "(source_file (field_identifier) (float_literal))")]
#[case(
    "1 + 2 * 3.",
    "(source_file (binary_expression left: (int_literal) operator: (additive_operator) \
     right: (binary_expression left: (int_literal) operator: (multiplicative_operator) \
     right: (int_literal))))"
)]
#[case(
    "1 - 2 - 3.",
    "(source_file (binary_expression left: (binary_expression left: (int_literal) \
     operator: (additive_operator) right: (int_literal)) operator: (additive_operator) \
     right: (int_literal)))"
)]
#[case(
    "(a + b) % c.",
    "(source_file (binary_expression left: (parenthised_expression (binary_expression \
     left: (field_identifier) operator: (additive_operator) right: (field_identifier))) \
     operator: (multiplicative_operator) right: (field_identifier)))"
)]
fn test_simpl_expressions_parse(#[case] text: &str, #[case] expected: &str) {
    let tree = parse(&simpl_expressions(), text);
    assert!(!tree.has_error(), "{}", tree.debug_dump());
    assert_eq!(tree.to_sexp(), expected);
    assert_eq!(leaf_text(&tree), text);
}

#[test]
fn test_simpl_expressions_field_lookup() {
    let tree = parse(&simpl_expressions(), "a * 2.");
    let binary = tree.root_node().named_children()[0];
    assert_eq!(binary.child_by_field_name("left").unwrap().text(), "a");
    assert_eq!(binary.child_by_field_name("operator").unwrap().text(), "*");
    assert_eq!(binary.child_by_field_name("right").unwrap().text(), "2");
}

#[test]
fn test_simpl_expressions_recover_at_the_period() {
    let text = "1 +. (2.\n3 * 4.";
    let tree = parse(&simpl_expressions(), text);
    assert!(tree.has_error());
    assert_eq!(leaf_text(&tree), text);
    let last = *tree.root_node().named_children().last().unwrap();
    assert_eq!(last.kind(), "binary_expression");
    assert_eq!(last.text(), "3 * 4");
    assert!(!last.has_error());
}
