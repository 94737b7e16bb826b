//! Grammars shared by the integration suites.
#![allow(dead_code)]

use arbor::{compile, compile_json, Grammar, Language, Rule};

pub const SIMPL: &str = include_str!("../fixtures/simpl.json");
pub const SIMPL_EXPRESSIONS: &str = include_str!("../fixtures/simpl_expressions.json");

/// Simpl's arithmetic core, read from `grammar.json`.
pub fn simpl_expressions() -> Language {
    Language::from_compiled(compile_json(SIMPL_EXPRESSIONS).unwrap()).unwrap()
}

/// `expr ;` statements with parentheses, terminated by `;` or `.`, both of
/// which bound recovery.
pub fn statements() -> Language {
    let grammar = Grammar::new("stmts")
        .rule("program", Rule::repeat(Rule::symbol("stmt")))
        .rule(
            "stmt",
            Rule::seq([
                Rule::symbol("expr"),
                Rule::choice([Rule::string(";"), Rule::string(".")]),
            ]),
        )
        .rule(
            "expr",
            Rule::choice([
                Rule::symbol("number"),
                Rule::symbol("ident"),
                Rule::prec_left(
                    1,
                    Rule::seq([Rule::symbol("expr"), Rule::string("+"), Rule::symbol("expr")]),
                ),
                Rule::seq([Rule::string("("), Rule::symbol("expr"), Rule::string(")")]),
            ]),
        )
        .rule("number", Rule::pattern("[0-9]+"))
        .rule("ident", Rule::pattern("[a-z]+"))
        .extra(Rule::pattern(r"\s"))
        .recovery(";")
        .recovery(".");
    Language::from_compiled(compile(&grammar).unwrap()).unwrap()
}

/// Concatenated leaf texts of `tree`.
pub fn leaf_text(tree: &arbor::SyntaxTree) -> String {
    tree.leaves().iter().map(|leaf| leaf.text()).collect()
}

/// Kinds of the named children of the root.
pub fn top_level_kinds(tree: &arbor::SyntaxTree) -> Vec<&str> {
    tree.root_node()
        .named_children()
        .into_iter()
        .map(|node| node.kind())
        .collect()
}
