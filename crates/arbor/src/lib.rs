//! An incremental, error-tolerant parser core for tree-sitter style grammars.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::multiple_crate_versions)]

/// Core structures and parsing logic for grammar definitions.
///
/// This module defines how arbor understands the declarative shape of a
/// language: the grammar itself. Everything else builds upon these types.
pub mod grammar;

/// Grammar validation and consistency checking utilities.
///
/// Validation protects the compiler from malformed grammars and reports
/// problems by rule name.
pub mod validate;

/// Grammar compilation into a deterministic LALR(1) parse table.
pub mod compile;

/// The compiled parse table.
pub mod table;

/// The versioned, checksummed byte form of a compiled grammar.
pub mod blob;

/// Option structs for the compiler and the parse engine.
pub mod config;

/// Loaded languages.
pub mod language;

/// A host-owned collection of loaded languages.
pub mod registry;

mod lexer;

/// The parse engine: full and incremental parses with error recovery.
pub mod parse;

/// Syntax trees, nodes and cursors.
pub mod tree;

/// Edits and the editable document.
pub mod edit;

pub use blob::{LoadError, FORMAT_VERSION, MAGIC};
pub use compile::{compile, compile_json, compile_with, CompileError, CompiledGrammar, ConflictKind};
pub use config::{CompileOptions, ConfigError, ParseOptions};
pub use edit::{Document, Edit, EditError};
pub use grammar::{parse_grammar, parse_rule, Grammar, GrammarError, Rule};
pub use language::{load, Language};
pub use parse::{parse, reparse, Parser};
pub use registry::Registry;
pub use table::{ParseTable, SymbolId};
pub use tree::{Node, NodeId, Point, SyntaxTree, TreeCursor};
pub use validate::{validate, ValidationError};
