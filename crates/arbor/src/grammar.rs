//! Core structures and parsing logic for grammar definitions.
//!
//! This module defines the internal representation of a grammar as read from
//! tree-sitter's JSON format. It uses [`facet_json`] for deserialization and
//! provides a small builder so grammars can be assembled directly in Rust.

pub mod rules;

use facet::Facet;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

pub use rules::{Rule, RuleType, RuleValue};

use crate::validate::ValidationError;

/// Represents a full grammar definition.
///
/// This structure mirrors the serialized JSON format produced by
/// `tree-sitter generate --json`, with two additions understood only by
/// arbor: an explicit `start` rule and the `recovery` tokens error
/// recovery synchronizes on.
///
/// See <https://tree-sitter.github.io/tree-sitter/assets/schemas/grammar.schema.json>
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    /// Optional `$schema` field from the JSON, typically used for schema
    /// validation or editor integration.
    pub schema: Option<String>,

    /// The short name of the grammar (e.g. `"simpl"`).
    pub name: String,

    /// Optional name of a base grammar that this one inherits from.
    pub inherits: Option<String>,

    /// All rule definitions, in the order they were written.
    pub rules: IndexMap<String, Rule>,

    /// Rules that may appear between any two tokens, such as whitespace or comments.
    pub extras: Option<Vec<Rule>>,

    /// Rules implemented externally via a scanner.
    pub externals: Option<Vec<Rule>>,

    /// Names of rules that should be inlined into other rules.
    pub inline: Option<Vec<String>>,

    /// Named precedence orderings; earlier entries bind tighter.
    pub precedences: Option<Vec<Vec<Precedence>>>,

    /// Conflict groups a GLR generator would expect.
    pub conflicts: Option<Vec<Vec<String>>>,

    /// Context-specific reserved word definitions.
    pub reserved: Option<HashMap<String, Vec<Rule>>>,

    /// The rule used to identify word tokens, so keywords only match whole words.
    pub word: Option<String>,

    /// Hidden rules that group related syntactic forms.
    pub supertypes: Option<Vec<String>>,

    /// The entry rule. When absent the first rule is used, see [`Grammar::start_rule`].
    pub start: Option<String>,

    /// Token names or literals that bound error recovery, such as `";"` or `"}"`.
    pub recovery: Option<Vec<String>>,
}

/// A single precedence entry, either a named level or a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precedence {
    /// A literal precedence string.
    String(String),

    /// A symbolic precedence name.
    Symbol {
        /// The identifier of the referenced symbol.
        name: String,
    },
}

impl Precedence {
    /// The name this entry is referred to by.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Precedence::String(s) => s,
            Precedence::Symbol { name } => name,
        }
    }

    fn from_rule(rule: Rule) -> Result<Self, GrammarError> {
        match (rule.rule_type, rule.value, rule.name) {
            (RuleType::String, Some(RuleValue::String(value)), _) => Ok(Precedence::String(value)),
            (RuleType::Symbol, _, Some(name)) => Ok(Precedence::Symbol { name }),
            (rule_type, ..) => Err(GrammarError::Schema(format!(
                "precedence entries must be STRING or SYMBOL, found {rule_type:?}"
            ))),
        }
    }
}

/// The `grammar.json` document as decoded by facet.
#[derive(Debug, Facet)]
struct GrammarFile {
    #[facet(rename = "$schema")]
    #[facet(default)]
    schema: Option<String>,
    name: String,
    #[facet(default)]
    inherits: Option<String>,
    rules: HashMap<String, Rule>,
    #[facet(default)]
    extras: Option<Vec<Rule>>,
    #[facet(default)]
    externals: Option<Vec<Rule>>,
    #[facet(default)]
    inline: Option<Vec<String>>,
    #[facet(default)]
    precedences: Option<Vec<Vec<Rule>>>,
    #[facet(default)]
    conflicts: Option<Vec<Vec<String>>>,
    #[facet(default)]
    reserved: Option<HashMap<String, Vec<Rule>>>,
    #[facet(default)]
    word: Option<String>,
    #[facet(default)]
    supertypes: Option<Vec<String>>,
    #[facet(default)]
    start: Option<String>,
    #[facet(default)]
    recovery: Option<Vec<String>>,
}

impl GrammarFile {
    /// Rebuilds the definition with `rules` in document order.
    fn into_grammar(mut self, order: &[String]) -> Result<Grammar, GrammarError> {
        let rules = order
            .iter()
            .filter_map(|name| self.rules.remove_entry(name))
            .collect();
        let precedences = self
            .precedences
            .map(|lists| {
                lists
                    .into_iter()
                    .map(|list| list.into_iter().map(Precedence::from_rule).collect())
                    .collect::<Result<Vec<Vec<_>>, _>>()
            })
            .transpose()?;
        Ok(Grammar {
            schema: self.schema,
            name: self.name,
            inherits: self.inherits,
            rules,
            extras: self.extras,
            externals: self.externals,
            inline: self.inline,
            precedences,
            conflicts: self.conflicts,
            reserved: self.reserved,
            word: self.word,
            supertypes: self.supertypes,
            start: self.start,
            recovery: self.recovery,
        })
    }
}

/// Wraps every scalar rule `value` as `{"String": ..}` or `{"Integer": ..}`
/// so it decodes into [`RuleValue`].
fn tag_rule_values(value: &mut Value) {
    match value {
        Value::Object(object) => {
            if object.contains_key("type") {
                if let Some(inner) = object.get_mut("value") {
                    let tag = match inner {
                        Value::String(_) => Some("String"),
                        Value::Number(_) => Some("Integer"),
                        _ => None,
                    };
                    if let Some(tag) = tag {
                        let mut tagged = Map::new();
                        tagged.insert(tag.to_string(), inner.take());
                        *inner = Value::Object(tagged);
                    }
                }
            }
            object.values_mut().for_each(tag_rule_values);
        }
        Value::Array(items) => items.iter_mut().for_each(tag_rule_values),
        _ => {}
    }
}

/// Colour codes facet-json puts into its messages.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("escape pattern is valid"));

/// `message` without terminal colour codes.
pub(crate) fn plain_text(message: &impl fmt::Display) -> String {
    ANSI_ESCAPE
        .replace_all(&message.to_string(), "")
        .into_owned()
}

fn read_json(json: &str) -> Result<Value, GrammarError> {
    serde_json::from_str(json).map_err(|e| GrammarError::JsonParse(e.to_string()))
}

/// Decodes `document` with facet once its rule values are tagged.
fn decode<T: for<'f> Facet<'f>>(mut document: Value) -> Result<T, GrammarError> {
    tag_rule_values(&mut document);
    let normalized = document.to_string();
    facet_json::from_str(&normalized).map_err(|e| GrammarError::Schema(plain_text(&e.message())))
}

/// Parse a JSON grammar definition into a strongly typed [`Grammar`] structure.
///
/// Rules keep the order of the document, so the first rule is the default
/// start rule as in tree-sitter.
///
/// # Errors
///
/// Returns [`GrammarError::JsonParse`] if the provided string is not valid
/// JSON and [`GrammarError::Schema`] if it does not describe a grammar.
pub fn parse_grammar(json: &str) -> Result<Grammar, GrammarError> {
    let document = read_json(json)?;
    let order: Vec<String> = document
        .get("rules")
        .and_then(Value::as_object)
        .map(|rules| rules.keys().cloned().collect())
        .unwrap_or_default();
    decode::<GrammarFile>(document)?.into_grammar(&order)
}

/// Parse a single rule object such as `{"type": "STRING", "value": "+"}`.
///
/// # Errors
///
/// As for [`parse_grammar`].
pub fn parse_rule(json: &str) -> Result<Rule, GrammarError> {
    decode(read_json(json)?)
}

/// Possible errors raised while reading a grammar definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// The input is not syntactically valid JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// The JSON is valid but does not have the shape of a grammar.
    #[error("invalid grammar: {0}")]
    Schema(String),
}

impl Grammar {
    /// An empty grammar called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds (or replaces) the rule `name`.
    #[must_use]
    pub fn rule(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.rules.insert(name.into(), rule);
        self
    }

    /// Adds an extra, such as a whitespace pattern or a comment symbol.
    #[must_use]
    pub fn extra(mut self, rule: Rule) -> Self {
        self.extras.get_or_insert_with(Vec::new).push(rule);
        self
    }

    /// Sets the entry rule.
    #[must_use]
    pub fn start(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Sets the word rule used for keyword extraction.
    #[must_use]
    pub fn word(mut self, name: impl Into<String>) -> Self {
        self.word = Some(name.into());
        self
    }

    /// Marks a rule for inlining.
    #[must_use]
    pub fn inline(mut self, name: impl Into<String>) -> Self {
        self.inline.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    /// Adds a token that error recovery may resynchronize after.
    #[must_use]
    pub fn recovery(mut self, token: impl Into<String>) -> Self {
        self.recovery.get_or_insert_with(Vec::new).push(token.into());
        self
    }

    /// Adds a named precedence ordering, tightest first.
    #[must_use]
    pub fn precedences<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels = levels
            .into_iter()
            .map(|s| Precedence::String(s.into()))
            .collect();
        self.precedences.get_or_insert_with(Vec::new).push(levels);
        self
    }

    /// Rule names in a stable (sorted) order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns `true` if `name` is listed in `inline`.
    #[must_use]
    pub fn is_inline(&self, name: &str) -> bool {
        self.inline
            .as_ref()
            .is_some_and(|v| v.iter().any(|n| n == name))
    }

    /// Resolves the entry rule: `start` if set, else the first rule defined.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyGrammar`] for a grammar without rules
    /// and [`ValidationError::UndefinedSymbol`] for an unknown explicit start.
    pub fn start_rule(&self) -> Result<&str, ValidationError> {
        let Some((first, _)) = self.rules.first() else {
            return Err(ValidationError::EmptyGrammar);
        };
        match &self.start {
            Some(start) => self
                .rules
                .get_key_value(start)
                .map(|(k, _)| k.as_str())
                .ok_or_else(|| ValidationError::UndefinedSymbol {
                    symbol: start.clone(),
                    rule: "start".to_string(),
                }),
            None => Ok(first),
        }
    }
}

/// Calls `f` with every symbol name referenced inside `rule`.
pub(crate) fn collect_references(rule: &Rule, f: &mut impl FnMut(&str)) {
    if let Some(name) = rule.symbol_name() {
        f(name);
    }
    for child in rule.children() {
        collect_references(child, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_grammar() {
        let json = r#"{
            "name": "test",
            "rules": {
                "source_file": {
                    "type": "SYMBOL",
                    "name": "expression"
                },
                "expression": {
                    "type": "CHOICE",
                    "members": [
                        {
                            "type": "STRING",
                            "value": "hello"
                        },
                        {
                            "type": "PATTERN",
                            "value": "[0-9]+"
                        }
                    ]
                }
            }
        }"#;

        let grammar = parse_grammar(json).unwrap();
        assert_eq!(grammar.name, "test");
        assert_eq!(grammar.rules.len(), 2);
        assert_eq!(grammar.start_rule().unwrap(), "source_file");
    }

    #[test]
    fn test_parse_arbor_extensions() {
        let json = r#"{
            "name": "stmts",
            "start": "program",
            "recovery": [";"],
            "rules": {
                "program": {"type": "REPEAT", "content": {"type": "SYMBOL", "name": "stmt"}},
                "stmt": {"type": "SEQ", "members": [
                    {"type": "PATTERN", "value": "[a-z]+"},
                    {"type": "STRING", "value": ";"}
                ]}
            }
        }"#;

        let grammar = parse_grammar(json).unwrap();
        assert_eq!(grammar.start.as_deref(), Some("program"));
        assert_eq!(grammar.recovery, Some(vec![";".to_string()]));
    }

    #[test]
    fn test_start_rule_inferred_from_references() {
        let grammar = Grammar::new("calc")
            .rule("expr", Rule::seq([Rule::symbol("num"), Rule::string("+")]))
            .rule("num", Rule::pattern(r"\d+"));
        assert_eq!(grammar.start_rule().unwrap(), "expr");
    }

    #[test]
    fn test_start_rule_defaults_to_first_rule() {
        let grammar = Grammar::new("two")
            .rule("b", Rule::string("b"))
            .rule("a", Rule::string("a"));
        assert_eq!(grammar.start_rule().unwrap(), "b");
        assert_eq!(grammar.clone().start("a").start_rule().unwrap(), "a");
        assert_eq!(
            Grammar::new("empty").start_rule(),
            Err(ValidationError::EmptyGrammar)
        );
    }

    #[test]
    fn test_rule_order_follows_the_document() {
        let json = r#"{
            "name": "order",
            "rules": {
                "zeta": {"type": "SYMBOL", "name": "alpha"},
                "alpha": {"type": "STRING", "value": "a"},
                "mid": {"type": "STRING", "value": "m"}
            }
        }"#;
        let grammar = parse_grammar(json).unwrap();
        let names: Vec<&str> = grammar.rules.keys().map(String::as_str).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(grammar.start_rule().unwrap(), "zeta");
    }

    #[test]
    fn test_parse_precedence_lists() {
        let json = r#"{
            "name": "levels",
            "precedences": [[
                {"type": "STRING", "value": "call"},
                {"type": "SYMBOL", "name": "binary"}
            ]],
            "rules": {
                "binary": {"type": "PREC_LEFT", "value": "call", "content": {"type": "STRING", "value": "*"}}
            }
        }"#;
        let grammar = parse_grammar(json).unwrap();
        assert_eq!(
            grammar.precedences,
            Some(vec![vec![
                Precedence::String("call".to_string()),
                Precedence::Symbol {
                    name: "binary".to_string()
                },
            ]])
        );
        assert_eq!(grammar.rules["binary"].precedence_name(), Some("call"));
    }

    #[test]
    fn test_schema_errors_are_plain_text() {
        let error = parse_grammar(r#"{"name": "g", "rules": {"s": {"type": "NOPE"}}}"#).unwrap_err();
        assert!(matches!(error, GrammarError::Schema(_)));
        assert!(!error.to_string().contains('\x1b'));

        let error = parse_grammar(r#"{"name": "g", "precedences": [[{"type": "BLANK"}]], "rules": {}}"#)
            .unwrap_err();
        assert!(matches!(error, GrammarError::Schema(_)));
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            parse_grammar("{ not json"),
            Err(GrammarError::JsonParse(_))
        ));
    }
}
