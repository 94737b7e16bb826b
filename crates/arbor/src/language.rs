//! Loaded languages.
//!
//! A [`Language`] is the run-time handle for one compiled grammar: the parse
//! table plus token matchers compiled from it. Handles are cheap to clone and
//! immutable, so they can be shared between threads and parsers freely.

use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::blob::{self, LoadError};
use crate::compile::CompiledGrammar;
use crate::table::{ParseTable, SymbolId, TokenDef};

/// How one terminal is recognized at a position.
#[derive(Debug)]
pub(crate) enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    /// Length in bytes of the match at the start of `rest`, if any.
    pub fn match_len(&self, rest: &str) -> Option<usize> {
        match self {
            Matcher::Literal(text) => rest.starts_with(text.as_str()).then_some(text.len()),
            Matcher::Pattern(regex) => regex.find(rest).map(|m| m.end()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TokenMatcher {
    pub symbol: SymbolId,
    pub matcher: Matcher,
    pub immediate: bool,
    pub keyword: bool,
    pub precedence: i32,
}

impl TokenMatcher {
    fn compile(def: &TokenDef) -> Result<Self, LoadError> {
        let matcher = match &def.literal {
            Some(text) => Matcher::Literal(text.clone()),
            None => Matcher::Pattern(
                Regex::new(&format!("^(?:{})", def.pattern))
                    .map_err(|e| LoadError::Corrupt(format!("token {}: {e}", def.symbol)))?,
            ),
        };
        Ok(Self {
            symbol: def.symbol,
            matcher,
            immediate: def.immediate,
            keyword: def.keyword,
            precedence: def.precedence,
        })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.matcher, Matcher::Literal(_))
    }
}

struct LanguageData {
    table: ParseTable,
    /// Indexed by symbol; `None` for symbols the lexer never produces.
    matchers: Vec<Option<TokenMatcher>>,
    fingerprint: u64,
}

/// A loaded grammar.
#[derive(Clone)]
pub struct Language {
    inner: Arc<LanguageData>,
}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Language")
            .field("name", &self.name())
            .field("fingerprint", &format_args!("{:#018x}", self.fingerprint()))
            .finish_non_exhaustive()
    }
}

/// Loads a blob produced by [`CompiledGrammar::to_bytes`].
///
/// Every call builds a fresh, independent handle.
///
/// # Errors
///
/// Returns a [`LoadError`] if the blob has the wrong magic or version, is
/// truncated, fails its checksum, or does not decode to a consistent table.
pub fn load(bytes: &[u8]) -> Result<Language, LoadError> {
    let (table, checksum) = blob::decode(bytes)?;
    let language = Language::from_table(table, checksum)?;
    debug!(
        language = language.name(),
        states = language.table().states.len(),
        "loaded grammar"
    );
    Ok(language)
}

impl Language {
    fn from_table(table: ParseTable, fingerprint: u64) -> Result<Self, LoadError> {
        let mut matchers: Vec<Option<TokenMatcher>> =
            std::iter::repeat_with(|| None).take(table.symbols.len()).collect();
        for def in &table.tokens {
            matchers[usize::from(def.symbol)] = Some(TokenMatcher::compile(def)?);
        }
        Ok(Self {
            inner: Arc::new(LanguageData {
                table,
                matchers,
                fingerprint,
            }),
        })
    }

    /// Wraps a freshly compiled grammar without a serialization round trip.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Corrupt`] if a token pattern fails to compile.
    pub fn from_compiled(compiled: CompiledGrammar) -> Result<Self, LoadError> {
        let fingerprint = compiled.fingerprint();
        Self::from_table(compiled.into_table(), fingerprint)
    }

    /// The grammar name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.table.name
    }

    /// The parse table.
    #[must_use]
    pub fn table(&self) -> &ParseTable {
        &self.inner.table
    }

    /// Content address of the table, equal to the blob checksum.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.inner.fingerprint
    }

    /// Number of symbols, including `end` and `ERROR`.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.inner.table.symbols.len()
    }

    /// The name of `symbol`.
    #[must_use]
    pub fn symbol_name(&self, symbol: SymbolId) -> Option<&str> {
        self.inner
            .table
            .symbols
            .get(usize::from(symbol))
            .map(|s| s.name.as_str())
    }

    /// The field names, in id order starting at field 1.
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.inner.table.fields
    }

    /// Returns `true` if both handles point at the same loaded table.
    #[must_use]
    pub fn same_handle(&self, other: &Language) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` if both handles were loaded from identical tables.
    #[must_use]
    pub fn same_grammar(&self, other: &Language) -> bool {
        self.same_handle(other) || self.fingerprint() == other.fingerprint()
    }

    pub(crate) fn matcher(&self, symbol: SymbolId) -> Option<&TokenMatcher> {
        self.inner
            .matchers
            .get(usize::from(symbol))
            .and_then(Option::as_ref)
    }

    pub(crate) fn matchers(&self) -> impl Iterator<Item = &TokenMatcher> {
        self.inner.matchers.iter().flatten()
    }
}
