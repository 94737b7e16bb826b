//! Grammar compilation: a validated [`Grammar`] becomes a [`CompiledGrammar`].
//!
//! The pipeline runs in three passes:
//!
//! 1. [`prepare`] extracts terminals and flattens every rule into plain
//!    productions annotated with fields, aliases and precedence.
//! 2. [`first_sets`] computes nullability and FIRST sets.
//! 3. [`lalr`] builds the LALR(1) automaton and resolves conflicts with the
//!    declared precedences, reporting any it cannot resolve.
//!
//! Every pass iterates in a fixed order so the same grammar always produces
//! the same table, byte for byte.

pub(crate) mod first_sets;
pub(crate) mod lalr;
pub(crate) mod prepare;

use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::blob;
use crate::config::CompileOptions;
use crate::grammar::{parse_grammar, Grammar, GrammarError};
use crate::table::ParseTable;
use crate::validate::{validate, ValidationError};

/// Why two parse actions could not both be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A shift competes with a reduction.
    ShiftReduce,
    /// Two reductions compete.
    ReduceReduce,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::ShiftReduce => f.write_str("shift/reduce"),
            ConflictKind::ReduceReduce => f.write_str("reduce/reduce"),
        }
    }
}

/// Errors raised while compiling a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The definition failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The definition could not be read.
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    /// An ambiguity that precedence and associativity do not resolve.
    #[error("{kind} conflict on {token} between rules '{first}' and '{second}'")]
    Conflict {
        /// Shift/reduce or reduce/reduce.
        kind: ConflictKind,
        /// The lookahead token.
        token: String,
        /// The rule being shifted into (or the first reduction).
        first: String,
        /// The rule being reduced.
        second: String,
    },

    /// A token pattern is not a valid regular expression.
    #[error("invalid pattern for token '{token}': {message}")]
    InvalidPattern {
        /// The token.
        token: String,
        /// The regex compiler's message.
        message: String,
    },

    /// A token matches the empty string.
    #[error("token '{token}' matches the empty string")]
    EmptyToken {
        /// The token.
        token: String,
    },

    /// The definition uses a feature this compiler does not implement.
    #[error("unsupported grammar feature: {0}")]
    Unsupported(String),

    /// A rule expands into too many alternatives.
    #[error("rule '{rule}' expands to more than {limit} alternatives")]
    TooManyAlternatives {
        /// The rule.
        rule: String,
        /// The configured limit.
        limit: u32,
    },

    /// The grammar needs more symbols than a table can index.
    #[error("grammar needs more than {limit} symbols")]
    TooManySymbols {
        /// The largest supported count.
        limit: usize,
    },

    /// An inlined rule refers to itself.
    #[error("inlined rule '{rule}' refers to itself")]
    InlineRecursion {
        /// The rule.
        rule: String,
    },

    /// A recovery entry names neither a token rule nor a literal.
    #[error("recovery token '{0}' is not a token")]
    UnknownRecoveryToken(String),

    /// The `word` rule is not a token.
    #[error("word rule '{0}' is not a token")]
    InvalidWord(String),
}

/// The output of compilation: an immutable parse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledGrammar {
    table: ParseTable,
}

impl CompiledGrammar {
    pub(crate) fn new(table: ParseTable) -> Self {
        Self { table }
    }

    /// The parse table.
    #[must_use]
    pub fn table(&self) -> &ParseTable {
        &self.table
    }

    /// Takes the parse table out.
    #[must_use]
    pub fn into_table(self) -> ParseTable {
        self.table
    }

    /// Serializes the table into a versioned, checksummed blob for [`crate::load`].
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        blob::encode(&self.table)
    }

    /// A 64-bit content address of the table.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        blob::checksum(blob::payload(&self.table).as_bytes())
    }
}

/// Compiles `grammar` with default options.
///
/// # Errors
///
/// See [`compile_with`].
pub fn compile(grammar: &Grammar) -> Result<CompiledGrammar, CompileError> {
    compile_with(grammar, &CompileOptions::default())
}

/// Reads a `grammar.json` document and compiles it.
///
/// # Errors
///
/// Returns [`CompileError::Grammar`] for unreadable JSON, otherwise as
/// [`compile_with`].
pub fn compile_json(json: &str) -> Result<CompiledGrammar, CompileError> {
    compile(&parse_grammar(json)?)
}

/// Compiles `grammar` into a parse table.
///
/// # Errors
///
/// Returns [`CompileError::Validation`] for malformed definitions and the
/// other [`CompileError`] variants for token, size or conflict problems.
pub fn compile_with(
    grammar: &Grammar,
    options: &CompileOptions,
) -> Result<CompiledGrammar, CompileError> {
    validate(grammar)?;
    if grammar.conflicts.as_ref().is_some_and(|c| !c.is_empty()) {
        warn!(
            grammar = %grammar.name,
            "declared conflicts are ignored; ambiguities must be resolved by precedence"
        );
    }

    let prepared = prepare::prepare(grammar, options)?;
    debug!(
        grammar = %grammar.name,
        symbols = prepared.symbols.len(),
        tokens = prepared.tokens.len(),
        productions = prepared.productions.len(),
        "prepared grammar"
    );

    let first = first_sets::FirstSets::compute(&prepared);
    let states = lalr::build(&prepared, &first)?;
    debug!(grammar = %grammar.name, states = states.len(), "built parse table");

    Ok(CompiledGrammar::new(prepared.into_table(states)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Rule;
    use crate::table::Action;

    fn sum() -> Grammar {
        Grammar::new("sum")
            .rule(
                "expr",
                Rule::seq([
                    Rule::symbol("number"),
                    Rule::repeat(Rule::seq([Rule::string("+"), Rule::symbol("number")])),
                ]),
            )
            .rule("number", Rule::pattern(r"\d+"))
            .extra(Rule::pattern(r"\s"))
    }

    #[test]
    fn test_compile_seed_grammar() {
        let compiled = compile(&sum()).unwrap();
        let table = compiled.table();
        let number = table.symbol_for_name("number", true).unwrap();
        let plus = table.symbol_for_name("+", false).unwrap();
        assert!(table.is_terminal(number));
        assert!(table.is_terminal(plus));
        assert!(matches!(table.action(0, number), Some(Action::Shift(_))));
        assert_eq!(table.symbol(table.start_symbol).name, "expr");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = compile(&sum()).unwrap();
        let b = compile(&sum()).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_externals_are_unsupported() {
        let mut grammar = sum();
        grammar.externals = Some(vec![Rule::symbol("number")]);
        assert!(matches!(
            compile(&grammar),
            Err(CompileError::Unsupported(_))
        ));
    }

    #[test]
    fn test_compile_json_reports_bad_json() {
        assert!(matches!(
            compile_json("{"),
            Err(CompileError::Grammar(_))
        ));
    }
}
