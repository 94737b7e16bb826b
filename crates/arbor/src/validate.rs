//! Validation routines for grammar definitions.
//!
//! This module performs structural checks over parsed [`Grammar`](crate::grammar::Grammar)
//! definitions before compilation: symbol references must resolve, every rule must be
//! reachable from the start rule and able to derive some text, and no rule may derive
//! itself without consuming input. The compiler runs these checks first so that table
//! construction only ever sees well-formed rule graphs.

use crate::grammar::{collect_references, Grammar, Rule, RuleType};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Represents a validation failure encountered when checking a grammar.
///
/// Every variant names the rule (or rules) at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The grammar defines no rules.
    #[error("grammar has no rules")]
    EmptyGrammar,

    /// A `SYMBOL` refers to a rule that does not exist.
    #[error("undefined symbol '{symbol}' referenced in rule '{rule}'")]
    UndefinedSymbol {
        /// The missing name.
        symbol: String,
        /// Where it was referenced.
        rule: String,
    },

    /// A rule cannot be reached from the start rule or any extra.
    #[error("rule '{rule}' is unreachable from the start rule")]
    UnreachableRule {
        /// The unreachable rule.
        rule: String,
    },

    /// A rule cannot derive any finite text.
    #[error("rule '{rule}' can never match any input")]
    NonProductive {
        /// The offending rule.
        rule: String,
    },

    /// A rule derives itself without consuming input.
    #[error("rule '{rule}' is recursive without consuming input: {}", cycle.join(" -> "))]
    LeftRecursion {
        /// The first rule of the cycle.
        rule: String,
        /// The cycle, starting and ending at `rule`.
        cycle: Vec<String>,
    },

    /// A `REPEAT`/`REPEAT1` whose content can match the empty string.
    #[error("rule '{rule}' repeats content that can match the empty string")]
    EmptyRepetition {
        /// The rule containing the repetition.
        rule: String,
    },

    /// A precedence wrapper names a level absent from `precedences`.
    #[error("unknown precedence '{name}' in rule '{rule}'")]
    UnknownPrecedence {
        /// The level name.
        name: String,
        /// Where it was used.
        rule: String,
    },

    /// A rule is missing a field its type requires.
    #[error("malformed {kind} in rule '{rule}': {message}")]
    MalformedRule {
        /// The rule containing the malformed node.
        rule: String,
        /// The rule type of the malformed node.
        kind: &'static str,
        /// What is wrong with it.
        message: &'static str,
    },
}

/// Performs semantic validation of a parsed [`Grammar`](crate::grammar::Grammar).
///
/// This function runs several consistency passes over the grammar:
///
/// - Resolves the start rule.
/// - Checks rule shapes and that all referenced symbols are defined.
/// - Rejects unreachable and non-productive rules.
/// - Rejects rules that derive themselves without consuming input.
/// - Verifies that named precedences are declared.
///
/// # Errors
///
/// Returns a [`ValidationError`] for the first violation found. Rules are
/// visited in sorted order, so the reported violation is deterministic.
pub fn validate(grammar: &Grammar) -> Result<(), ValidationError> {
    let start = grammar.start_rule()?;

    check_rule_shapes(grammar)?;

    // Check for undefined symbol references
    check_undefined_symbols(grammar)?;

    // Check for unreachable rules
    check_unreachable_rules(grammar, start)?;

    check_productive(grammar)?;

    // Detect recursion that makes no progress
    check_left_recursion(grammar)?;

    // Validate precedence usage
    check_precedence(grammar)?;

    Ok(())
}

fn sorted_rules(grammar: &Grammar) -> impl Iterator<Item = (&str, &Rule)> {
    grammar
        .rule_names()
        .into_iter()
        .filter_map(move |name| grammar.rules.get(name).map(|rule| (name, rule)))
}

fn check_rule_shapes(grammar: &Grammar) -> Result<(), ValidationError> {
    for (rule_name, rule) in sorted_rules(grammar) {
        check_rule_shape(rule, rule_name)?;
    }
    for rule in grammar.extras.iter().flatten() {
        check_rule_shape(rule, "extras")?;
    }
    Ok(())
}

fn check_rule_shape(rule: &Rule, context: &str) -> Result<(), ValidationError> {
    let malformed = |message| ValidationError::MalformedRule {
        rule: context.to_string(),
        kind: rule.type_name(),
        message,
    };
    match rule.rule_type {
        RuleType::String if rule.string_value().is_none() => {
            return Err(malformed("missing string value"))
        }
        RuleType::Pattern if rule.pattern_value().is_none() => {
            return Err(malformed("missing pattern source"))
        }
        RuleType::Symbol | RuleType::Field if rule.name.is_none() => {
            return Err(malformed("missing name"))
        }
        RuleType::Alias if rule.alias_value().is_none() => {
            return Err(malformed("missing alias name"))
        }
        RuleType::Token | RuleType::ImmediateToken
            if rule.content.as_deref().is_some_and(|c| !c.is_lexical()) =>
        {
            return Err(malformed("token content may not reference symbols"))
        }
        _ => {}
    }
    let needs_content = matches!(
        rule.rule_type,
        RuleType::Repeat
            | RuleType::Repeat1
            | RuleType::Prec
            | RuleType::PrecLeft
            | RuleType::PrecRight
            | RuleType::PrecDynamic
            | RuleType::Field
            | RuleType::Alias
            | RuleType::Token
            | RuleType::ImmediateToken
            | RuleType::Reserved
    );
    if needs_content && rule.content.is_none() {
        return Err(malformed("missing content"));
    }
    for child in rule.children() {
        check_rule_shape(child, context)?;
    }
    Ok(())
}

fn check_undefined_symbols(grammar: &Grammar) -> Result<(), ValidationError> {
    let defined: HashSet<&str> = grammar.rules.keys().map(String::as_str).collect();
    let undefined = |symbol: &str, rule: &str| ValidationError::UndefinedSymbol {
        symbol: symbol.to_string(),
        rule: rule.to_string(),
    };

    for (rule_name, rule) in sorted_rules(grammar) {
        check_rule_symbols(rule, &defined, rule_name)?;
    }
    for rule in grammar.extras.iter().flatten() {
        check_rule_symbols(rule, &defined, "extras")?;
    }
    let named_lists = [
        ("inline", grammar.inline.as_deref()),
        ("supertypes", grammar.supertypes.as_deref()),
    ];
    for (list, names) in named_lists {
        for name in names.into_iter().flatten() {
            if !defined.contains(name.as_str()) {
                return Err(undefined(name, list));
            }
        }
    }
    if let Some(word) = &grammar.word {
        if !defined.contains(word.as_str()) {
            return Err(undefined(word, "word"));
        }
    }

    Ok(())
}

fn check_rule_symbols(
    rule: &Rule,
    defined: &HashSet<&str>,
    context: &str,
) -> Result<(), ValidationError> {
    if let Some(name) = rule.symbol_name() {
        if !defined.contains(name) {
            return Err(ValidationError::UndefinedSymbol {
                symbol: name.to_string(),
                rule: context.to_string(),
            });
        }
    }
    for child in rule.children() {
        check_rule_symbols(child, defined, context)?;
    }
    Ok(())
}

fn check_unreachable_rules(grammar: &Grammar, start: &str) -> Result<(), ValidationError> {
    let mut reachable = HashSet::new();
    let mut to_visit = vec![start.to_string()];
    for rule in grammar.extras.iter().flatten() {
        collect_references(rule, &mut |name| to_visit.push(name.to_string()));
    }
    to_visit.extend(grammar.word.iter().cloned());

    while let Some(rule_name) = to_visit.pop() {
        if !reachable.insert(rule_name.clone()) {
            continue; // Already visited
        }

        if let Some(rule) = grammar.rules.get(&rule_name) {
            collect_references(rule, &mut |name| to_visit.push(name.to_string()));
        }
    }

    for rule_name in grammar.rule_names() {
        if !reachable.contains(rule_name) && !grammar.is_inline(rule_name) {
            return Err(ValidationError::UnreachableRule {
                rule: rule_name.to_string(),
            });
        }
    }

    Ok(())
}

/// Least fixpoint of `holds` over the rule names.
fn fixpoint<'g>(grammar: &'g Grammar, holds: impl Fn(&Rule, &HashSet<&str>) -> bool) -> HashSet<&'g str> {
    let mut set = HashSet::new();
    loop {
        let mut changed = false;
        for (name, rule) in sorted_rules(grammar) {
            if !set.contains(name) && holds(rule, &set) {
                set.insert(name);
                changed = true;
            }
        }
        if !changed {
            return set;
        }
    }
}

pub(crate) fn is_nullable(rule: &Rule, nullable: &HashSet<&str>) -> bool {
    match rule.rule_type {
        RuleType::Blank | RuleType::Repeat => true,
        RuleType::String => rule.string_value().is_some_and(str::is_empty),
        RuleType::Pattern | RuleType::Token | RuleType::ImmediateToken => false,
        RuleType::Symbol => rule.symbol_name().is_some_and(|n| nullable.contains(n)),
        RuleType::Choice => rule.members.iter().any(|m| is_nullable(m, nullable)),
        RuleType::Seq => rule.members.iter().all(|m| is_nullable(m, nullable)),
        RuleType::Repeat1
        | RuleType::Prec
        | RuleType::PrecLeft
        | RuleType::PrecRight
        | RuleType::PrecDynamic
        | RuleType::Field
        | RuleType::Alias
        | RuleType::Reserved => rule
            .content
            .as_deref()
            .is_some_and(|c| is_nullable(c, nullable)),
    }
}

fn is_productive(rule: &Rule, productive: &HashSet<&str>) -> bool {
    match rule.rule_type {
        RuleType::Blank
        | RuleType::String
        | RuleType::Pattern
        | RuleType::Token
        | RuleType::ImmediateToken
        | RuleType::Repeat => true,
        RuleType::Symbol => rule.symbol_name().is_some_and(|n| productive.contains(n)),
        RuleType::Choice => rule.members.iter().any(|m| is_productive(m, productive)),
        RuleType::Seq => rule.members.iter().all(|m| is_productive(m, productive)),
        RuleType::Repeat1
        | RuleType::Prec
        | RuleType::PrecLeft
        | RuleType::PrecRight
        | RuleType::PrecDynamic
        | RuleType::Field
        | RuleType::Alias
        | RuleType::Reserved => rule
            .content
            .as_deref()
            .is_some_and(|c| is_productive(c, productive)),
    }
}

fn check_productive(grammar: &Grammar) -> Result<(), ValidationError> {
    let productive = fixpoint(grammar, is_productive);
    match grammar
        .rule_names()
        .into_iter()
        .find(|name| !productive.contains(name))
    {
        Some(rule) => Err(ValidationError::NonProductive {
            rule: rule.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_left_recursion(grammar: &Grammar) -> Result<(), ValidationError> {
    let nullable = fixpoint(grammar, is_nullable);

    let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (rule_name, rule) in sorted_rules(grammar) {
        if let Some(rule) = find_empty_repetition(rule, &nullable) {
            tracing::debug!(rule = rule_name, repeated = ?rule.content, "nullable repetition");
            return Err(ValidationError::EmptyRepetition {
                rule: rule_name.to_string(),
            });
        }
        let mut targets = BTreeSet::new();
        collect_unit_derivations(rule, &nullable, &mut targets);
        edges.insert(rule_name, targets);
    }

    // Depth-first search for a cycle in the "derives without progress" graph
    let mut done = HashSet::new();
    for &root in edges.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = find_cycle(root, &edges, &mut path, &mut done) {
            return Err(ValidationError::LeftRecursion {
                rule: cycle[0].clone(),
                cycle,
            });
        }
    }
    Ok(())
}

fn find_cycle<'g>(
    node: &'g str,
    edges: &BTreeMap<&'g str, BTreeSet<&'g str>>,
    path: &mut Vec<&'g str>,
    done: &mut HashSet<&'g str>,
) -> Option<Vec<String>> {
    if let Some(pos) = path.iter().position(|n| *n == node) {
        let mut cycle: Vec<String> = path[pos..].iter().map(ToString::to_string).collect();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if done.contains(node) {
        return None;
    }
    path.push(node);
    for &next in edges.get(node).into_iter().flatten() {
        if let Some(cycle) = find_cycle(next, edges, path, done) {
            return Some(cycle);
        }
    }
    path.pop();
    done.insert(node);
    None
}

/// Symbols `rule` can derive on their own, with everything around them empty.
fn collect_unit_derivations<'g>(
    rule: &'g Rule,
    nullable: &HashSet<&str>,
    out: &mut BTreeSet<&'g str>,
) {
    match rule.rule_type {
        RuleType::Symbol => {
            if let Some(name) = rule.symbol_name() {
                out.insert(name);
            }
        }

        RuleType::Choice => {
            for member in &rule.members {
                collect_unit_derivations(member, nullable, out);
            }
        }

        RuleType::Seq => {
            for (i, member) in rule.members.iter().enumerate() {
                let rest_nullable = rule
                    .members
                    .iter()
                    .enumerate()
                    .all(|(j, other)| j == i || is_nullable(other, nullable));
                if rest_nullable {
                    collect_unit_derivations(member, nullable, out);
                }
            }
        }

        RuleType::Repeat
        | RuleType::Repeat1
        | RuleType::Prec
        | RuleType::PrecLeft
        | RuleType::PrecRight
        | RuleType::PrecDynamic
        | RuleType::Field
        | RuleType::Alias
        | RuleType::Reserved => {
            if let Some(content) = &rule.content {
                collect_unit_derivations(content, nullable, out);
            }
        }

        RuleType::Blank
        | RuleType::String
        | RuleType::Pattern
        | RuleType::Token
        | RuleType::ImmediateToken => {
            // terminals: nothing to traverse
        }
    }
}

fn find_empty_repetition<'g>(rule: &'g Rule, nullable: &HashSet<&str>) -> Option<&'g Rule> {
    if matches!(rule.rule_type, RuleType::Repeat | RuleType::Repeat1)
        && rule
            .content
            .as_deref()
            .is_some_and(|c| is_nullable(c, nullable))
    {
        return Some(rule);
    }
    if matches!(rule.rule_type, RuleType::Token | RuleType::ImmediateToken) {
        return None;
    }
    rule.children()
        .find_map(|child| find_empty_repetition(child, nullable))
}

fn check_precedence(grammar: &Grammar) -> Result<(), ValidationError> {
    let declared: HashSet<&str> = grammar
        .precedences
        .iter()
        .flatten()
        .flatten()
        .map(crate::grammar::Precedence::name)
        .collect();

    for (rule_name, rule) in sorted_rules(grammar) {
        let mut names = Vec::new();
        collect_precedence_names(rule, &mut names);
        if let Some(name) = names.into_iter().find(|n| !declared.contains(n)) {
            return Err(ValidationError::UnknownPrecedence {
                name: name.to_string(),
                rule: rule_name.to_string(),
            });
        }
    }
    Ok(())
}

fn collect_precedence_names<'g>(rule: &'g Rule, names: &mut Vec<&'g str>) {
    if let Some(name) = rule.precedence_name() {
        names.push(name);
    }
    for child in rule.children() {
        collect_precedence_names(child, names);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> Grammar {
        Grammar::new("calc")
            .rule(
                "expr",
                Rule::choice([
                    Rule::prec_left(
                        1,
                        Rule::seq([Rule::symbol("expr"), Rule::string("+"), Rule::symbol("expr")]),
                    ),
                    Rule::symbol("number"),
                ]),
            )
            .rule("number", Rule::pattern(r"\d+"))
    }

    #[test]
    fn test_valid_grammar_passes() {
        assert_eq!(validate(&calc()), Ok(()));
    }

    #[test]
    fn test_undefined_symbol() {
        let grammar = calc().start("expr").rule("expr", Rule::symbol("missing"));
        assert_eq!(
            validate(&grammar),
            Err(ValidationError::UndefinedSymbol {
                symbol: "missing".to_string(),
                rule: "expr".to_string(),
            })
        );
    }

    #[test]
    fn test_unreachable_rule() {
        let grammar = calc().start("expr").rule("orphan", Rule::string("x"));
        assert_eq!(
            validate(&grammar),
            Err(ValidationError::UnreachableRule {
                rule: "orphan".to_string()
            })
        );
    }

    #[test]
    fn test_left_recursion_without_progress() {
        let grammar = Grammar::new("loop")
            .start("a")
            .rule("a", Rule::choice([Rule::symbol("b"), Rule::string("x")]))
            .rule("b", Rule::seq([Rule::optional(Rule::string(";")), Rule::symbol("a")]));
        assert_eq!(
            validate(&grammar),
            Err(ValidationError::LeftRecursion {
                rule: "a".to_string(),
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            })
        );
    }

    #[test]
    fn test_left_recursion_with_progress_is_fine() {
        let grammar = Grammar::new("list").rule(
            "list",
            Rule::choice([
                Rule::seq([Rule::symbol("list"), Rule::string(","), Rule::string("x")]),
                Rule::string("x"),
            ]),
        );
        assert_eq!(validate(&grammar), Ok(()));
    }

    #[test]
    fn test_non_productive_rule() {
        let grammar = Grammar::new("inf")
            .rule("a", Rule::seq([Rule::string("("), Rule::symbol("a"), Rule::string(")")]));
        assert_eq!(
            validate(&grammar),
            Err(ValidationError::NonProductive {
                rule: "a".to_string()
            })
        );
    }

    #[test]
    fn test_empty_repetition() {
        let grammar =
            Grammar::new("rep").rule("a", Rule::repeat(Rule::optional(Rule::string("x"))));
        assert_eq!(
            validate(&grammar),
            Err(ValidationError::EmptyRepetition {
                rule: "a".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_precedence() {
        let grammar = Grammar::new("p").rule(
            "a",
            Rule::prec_named(RuleType::PrecLeft, "sum", Rule::string("x")),
        );
        assert_eq!(
            validate(&grammar),
            Err(ValidationError::UnknownPrecedence {
                name: "sum".to_string(),
                rule: "a".to_string(),
            })
        );
        assert_eq!(validate(&grammar.precedences(["sum"])), Ok(()));
    }

    #[test]
    fn test_malformed_symbol() {
        let mut broken = Rule::symbol("x");
        broken.name = None;
        let grammar = Grammar::new("m").rule("a", broken);
        assert!(matches!(
            validate(&grammar),
            Err(ValidationError::MalformedRule { kind: "SYMBOL", .. })
        ));
    }
}
