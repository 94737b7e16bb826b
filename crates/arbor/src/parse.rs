//! The LR parse engine.
//!
//! [`Parser`] drives the table of a [`Language`] over a text. With a previous
//! tree and the edits that turned its text into the new one, unchanged
//! subtrees are pushed onto the stack whole instead of being reparsed.
//! Syntax errors never abort a parse: they end up as `ERROR` nodes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::ParseOptions;
use crate::edit::{Edit, EditMap};
use crate::language::Language;
use crate::lexer::{Lexer, Token};
use crate::table::{Action, ParseTable, ProductionId, StateId, NO_ALIAS, NO_FIELD};
use crate::tree::arena::{Arena, Edge, NodeData, NodeStore, EXTRA, HAS_ERROR};
use crate::tree::{NodeId, SyntaxTree};

mod recovery;
mod reuse;
mod stack;

use reuse::ReuseCursor;
use stack::{Entry, Stack};

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Parses texts with one language.
///
/// A parser holds no state between parses apart from its options and
/// cancellation flag; use one per thread.
#[derive(Debug, Clone)]
pub struct Parser {
    language: Language,
    options: ParseOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl Parser {
    /// A parser for `language` with default options.
    #[must_use]
    pub fn new(language: Language) -> Self {
        Self::with_options(language, ParseOptions::default())
    }

    /// A parser for `language` with `options`.
    #[must_use]
    pub fn with_options(language: Language, options: ParseOptions) -> Self {
        Self {
            language,
            options,
            cancel: None,
        }
    }

    /// The language this parser uses.
    #[must_use]
    pub fn language(&self) -> &Language {
        &self.language
    }

    /// The current options.
    #[must_use]
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Replaces the options.
    pub fn set_options(&mut self, options: ParseOptions) {
        self.options = options;
    }

    /// Installs a flag that stops the next parses once raised. The flag is
    /// polled, so a parse stops shortly after, not immediately.
    pub fn set_cancellation_flag(&mut self, flag: Option<Arc<AtomicBool>>) {
        self.cancel = flag;
    }

    /// Parses `text` from scratch.
    ///
    /// Returns `None` only if the cancellation flag was raised.
    pub fn parse(&mut self, text: &str) -> Option<SyntaxTree> {
        self.run(text, None)
    }

    /// Parses `text`, reusing what `edits` left untouched in `old`.
    ///
    /// `edits` must turn `old.text()` into `text`; when they do not, or when
    /// `old` belongs to another grammar, this is a full parse. The result is
    /// the same tree a full parse would build.
    ///
    /// Returns `None` only if the cancellation flag was raised.
    pub fn reparse(&mut self, text: &str, old: &SyntaxTree, edits: &[Edit]) -> Option<SyntaxTree> {
        if !old.language().same_grammar(&self.language) {
            debug!("previous tree uses another grammar, parsing from scratch");
            return self.parse(text);
        }
        if edits.is_empty() && old.text() == text && old.language().same_handle(&self.language) {
            return Some(old.clone());
        }
        let Some(map) = EditMap::new(old.text().len(), text.len(), edits) else {
            warn!(
                edits = edits.len(),
                old_len = old.text().len(),
                new_len = text.len(),
                "edits do not match the text, parsing from scratch"
            );
            return self.parse(text);
        };
        self.run(text, Some(ReuseCursor::new(old, map)))
    }

    fn run(&self, text: &str, reuse: Option<ReuseCursor<'_>>) -> Option<SyntaxTree> {
        let base = reuse
            .as_ref()
            .map(|cursor| cursor.tree().segments().to_vec())
            .unwrap_or_default();
        let mut run = Run {
            table: self.language.table(),
            options: &self.options,
            cancel: self.cancel.as_deref(),
            lexer: Lexer::new(&self.language, text),
            arena: Arena::new(base),
            stack: Stack::default(),
            pending: VecDeque::new(),
            pos: 0,
            lex_state: 0,
            after_extra: false,
            reuse,
            actions: 0,
        };
        let root = run.execute()?;
        if let Some(cursor) = &run.reuse {
            debug!(reused = cursor.reused, "incremental parse finished");
        }
        let max_segments = self.options.max_segments as usize;
        let (segments, root) = run.arena.finish(root, max_segments.max(1));
        Some(SyntaxTree::new(self.language.clone(), text, segments, root))
    }
}

/// Parses `text` with a fresh [`Parser`].
#[must_use]
pub fn parse(language: &Language, text: &str) -> SyntaxTree {
    let Some(tree) = Parser::new(language.clone()).parse(text) else {
        unreachable!("a parse without a cancellation flag always completes")
    };
    tree
}

/// Reparses `text` against `old` with a fresh [`Parser`].
#[must_use]
pub fn reparse(language: &Language, text: &str, old: &SyntaxTree, edits: &[Edit]) -> SyntaxTree {
    let Some(tree) = Parser::new(language.clone()).reparse(text, old, edits) else {
        unreachable!("a parse without a cancellation flag always completes")
    };
    tree
}

/// The state of one parse.
struct Run<'a> {
    table: &'a ParseTable,
    options: &'a ParseOptions,
    cancel: Option<&'a AtomicBool>,
    lexer: Lexer<'a>,
    arena: Arena,
    stack: Stack,
    /// Lexed tokens not consumed yet, in text order.
    pending: VecDeque<Token>,
    /// End of the consumed text.
    pos: usize,
    /// State the next token is lexed in: the state after the last shift.
    lex_state: StateId,
    after_extra: bool,
    reuse: Option<ReuseCursor<'a>>,
    actions: u32,
}

impl Run<'_> {
    fn execute(&mut self) -> Option<NodeId> {
        let interval = self.options.cancellation_check_interval.max(1);
        loop {
            let token = self.lookahead();
            self.actions = self.actions.wrapping_add(1);
            if self.actions % interval == 0 && self.cancelled() {
                return None;
            }

            match self.table.action(self.stack.top_state(), token.symbol) {
                Some(Action::Shift(next)) => {
                    self.pending.pop_front();
                    if !self.try_reuse(token) {
                        self.shift(token, next);
                    }
                }
                Some(Action::Reduce(production)) => match self.reduce(production, token) {
                    Some(0) if self.cancelled() => return None,
                    Some(_) => {}
                    None => {
                        if let Some(root) = self.recover() {
                            return Some(root);
                        }
                    }
                },
                Some(Action::Accept) => return Some(self.accept()),
                None if self.table.is_extra(token.symbol) => {
                    self.pending.pop_front();
                    self.shift_extra(token);
                }
                None => {
                    if let Some(root) = self.recover() {
                        return Some(root);
                    }
                }
            }
        }
    }

    fn cancelled(&self) -> bool {
        let cancelled = self
            .cancel
            .is_some_and(|flag| flag.load(Ordering::Relaxed));
        if cancelled {
            debug!(position = self.pos, "parse cancelled");
        }
        cancelled
    }

    fn lookahead(&mut self) -> Token {
        if let Some(token) = self.pending.front() {
            return *token;
        }
        let token = self.lexer.lex(self.lex_state, self.pos, self.after_extra);
        self.pending.push_back(token);
        token
    }

    fn leaf(&mut self, token: Token, flags: u8, trailing_lex_state: StateId) -> NodeId {
        self.arena.push(
            NodeData {
                kind: token.symbol,
                len: to_u32(token.len),
                lookahead: 1,
                lex_state: self.lex_state,
                parse_state: self.stack.top_state(),
                trailing_lex_state,
                token_count: u32::from(flags & EXTRA == 0),
                flags,
                first_edge: 0,
                edge_count: 0,
            },
            &[],
        )
    }

    fn shift(&mut self, token: Token, next: StateId) {
        let node = self.leaf(token, 0, next);
        self.stack.push(Entry {
            state: next,
            node,
            start: token.start,
            extra: false,
        });
        self.pos = token.end();
        self.lex_state = next;
        self.after_extra = false;
    }

    fn shift_extra(&mut self, token: Token) {
        let node = self.leaf(token, EXTRA, self.lex_state);
        self.stack.push(Entry {
            state: self.stack.top_state(),
            node,
            start: token.start,
            extra: true,
        });
        self.pos = token.end();
        self.after_extra = true;
    }

    fn try_reuse(&mut self, token: Token) -> bool {
        if !self.pending.is_empty() {
            return false;
        }
        let top = self.stack.top_state();
        let Some(cursor) = &mut self.reuse else {
            return false;
        };
        let Some(reused) = cursor.find(self.table, token, self.lex_state, top) else {
            return false;
        };
        trace!(position = token.start, len = reused.len, "reusing subtree");
        self.stack.push(Entry {
            state: reused.state,
            node: reused.node,
            start: token.start,
            extra: false,
        });
        self.pos = token.start + reused.len;
        self.lex_state = reused.trailing_lex_state;
        self.after_extra = false;
        true
    }

    /// Reduces by `production` with lookahead `token`, returning the state
    /// below the new node. `None` means the table has no goto for it; the
    /// node is left on the stack for recovery.
    fn reduce(&mut self, production: ProductionId, token: Token) -> Option<StateId> {
        let table = self.table;
        let info = table.productions.get(production as usize)?;

        let mut trailing = Vec::new();
        while self.stack.last().is_some_and(|entry| entry.extra) {
            trailing.extend(self.stack.pop());
        }
        trailing.reverse();

        let mut children = Vec::new();
        let mut remaining = usize::from(info.len);
        while remaining > 0 {
            let Some(entry) = self.stack.pop() else {
                break;
            };
            if !entry.extra {
                remaining -= 1;
            }
            children.push(entry);
        }
        children.reverse();

        let below = self.stack.top_state();
        let start = children
            .first()
            .or(trailing.first())
            .map_or(self.pos, |entry| entry.start);
        let mut end = start;
        let mut reach = token.end() + 1;
        let mut flags = 0;
        let mut token_count = 0u32;
        let mut edges = Vec::with_capacity(children.len());
        let mut index = 0;
        for entry in &children {
            let data = self.arena.node(entry.node);
            end = entry.start + data.len as usize;
            reach = reach.max(end + data.lookahead as usize);
            if data.has_error() {
                flags |= HAS_ERROR;
            }
            if entry.extra {
                edges.push(Edge {
                    node: entry.node,
                    field: NO_FIELD,
                    alias: NO_ALIAS,
                });
            } else {
                token_count = token_count.saturating_add(data.token_count);
                edges.push(Edge {
                    node: entry.node,
                    field: info.field_at(index),
                    alias: info.alias_at(index),
                });
                index += 1;
            }
        }
        let lex_state = children
            .first()
            .map_or(self.lex_state, |e| self.arena.node(e.node).lex_state);
        let trailing_lex_state = children
            .last()
            .map_or(self.lex_state, |e| self.arena.node(e.node).trailing_lex_state);

        let node = self.arena.push(
            NodeData {
                kind: info.lhs,
                len: to_u32(end - start),
                lookahead: to_u32(reach.saturating_sub(end)),
                lex_state,
                parse_state: below,
                trailing_lex_state,
                token_count,
                flags,
                first_edge: 0,
                edge_count: 0,
            },
            &edges,
        );

        let next = table.goto(below, info.lhs);
        if next.is_none() {
            warn!(state = below, symbol = info.lhs, "parse table has no goto");
        }
        let state = next.unwrap_or(below);
        self.stack.push(Entry {
            state,
            node,
            start,
            extra: false,
        });
        for mut entry in trailing {
            entry.state = state;
            self.stack.push(entry);
        }
        next.map(|_| below)
    }

    /// Builds the root from the stack: the start node, with the extras
    /// around it folded in.
    fn accept(&mut self) -> NodeId {
        let entries = self.stack.split_off(0);
        self.root(&entries)
    }

    fn root(&mut self, entries: &[Entry]) -> NodeId {
        let start_symbol = self.table.start_symbol;
        if let [only] = entries {
            if !only.extra && self.arena.node(only.node).kind == start_symbol {
                return only.node;
            }
        }

        let mut edges = Vec::new();
        let mut flags = 0;
        let mut token_count = 0u32;
        let mut end = 0;
        for entry in entries {
            let data = self.arena.node(entry.node);
            end = entry.start + data.len as usize;
            if data.has_error() {
                flags |= HAS_ERROR;
            }
            token_count = token_count.saturating_add(data.token_count);
            if !entry.extra && data.kind == start_symbol {
                edges.extend_from_slice(self.arena.edges(entry.node));
            } else {
                edges.push(Edge {
                    node: entry.node,
                    field: NO_FIELD,
                    alias: NO_ALIAS,
                });
            }
        }
        self.arena.push(
            NodeData {
                kind: start_symbol,
                len: to_u32(end),
                lookahead: 0,
                lex_state: 0,
                parse_state: 0,
                trailing_lex_state: 0,
                token_count,
                flags,
                first_edge: 0,
                edge_count: 0,
            },
            &edges,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::grammar::{Grammar, Rule};
    use text_size::{TextRange, TextSize};

    fn sum() -> Language {
        let grammar = Grammar::new("sum")
            .rule(
                "expr",
                Rule::seq([
                    Rule::symbol("number"),
                    Rule::repeat(Rule::seq([Rule::string("+"), Rule::symbol("number")])),
                ]),
            )
            .rule("number", Rule::pattern(r"\d+"))
            .extra(Rule::pattern(r"\s"));
        Language::from_compiled(compile(&grammar).unwrap()).unwrap()
    }

    fn size(n: u32) -> TextSize {
        TextSize::from(n)
    }

    #[test]
    fn test_parse_sum() {
        let tree = parse(&sum(), "1+2+3");
        assert_eq!(tree.to_sexp(), "(expr (number) (number) (number))");
        let root = tree.root_node();
        assert_eq!(root.child_count(), 5);
        assert_eq!(root.child(1).unwrap().kind(), "+");
        assert!(!tree.has_error());
    }

    #[test]
    fn test_extras_fold_into_root() {
        let tree = parse(&sum(), " 1 + 2 ");
        let root = tree.root_node();
        assert_eq!(root.text(), " 1 + 2 ");
        assert_eq!(root.start_byte(), 0);
        let joined: String = tree.leaves().iter().map(|l| l.text()).collect();
        assert_eq!(joined, " 1 + 2 ");
    }

    #[test]
    fn test_unchanged_text_returns_same_tree() {
        let language = sum();
        let mut parser = Parser::new(language);
        let tree = parser.parse("1+2").unwrap();
        let again = parser.reparse("1+2", &tree, &[]).unwrap();
        assert_eq!(again.root_node().id(), tree.root_node().id());
    }

    #[test]
    fn test_reparse_reuses_unchanged_prefix() {
        let language = sum();
        let mut parser = Parser::new(language);
        let old = parser.parse("1 + 2 + 3").unwrap();
        let edit = Edit::replace(TextRange::new(size(8), size(9)), size(2));
        let new = parser.reparse("1 + 2 + 45", &old, &[edit]).unwrap();
        let fresh = parser.parse("1 + 2 + 45").unwrap();
        assert_eq!(new.debug_dump(), fresh.debug_dump());
        let first_old = old.root_node().child(0).unwrap();
        let first_new = new.root_node().child(0).unwrap();
        assert_eq!(first_old.id(), first_new.id());
    }

    #[test]
    fn test_bad_edits_fall_back_to_full_parse() {
        let language = sum();
        let mut parser = Parser::new(language);
        let old = parser.parse("1+2").unwrap();
        let edit = Edit::insert(size(9), size(1));
        let new = parser.reparse("1+2+3", &old, &[edit]).unwrap();
        assert_eq!(new.to_sexp(), "(expr (number) (number) (number))");
    }

    #[test]
    fn test_raised_flag_cancels() {
        let mut parser = Parser::with_options(
            sum(),
            ParseOptions {
                cancellation_check_interval: 1,
                ..ParseOptions::default()
            },
        );
        let flag = Arc::new(AtomicBool::new(true));
        parser.set_cancellation_flag(Some(flag.clone()));
        assert!(parser.parse("1+2").is_none());
        flag.store(false, Ordering::Relaxed);
        assert!(parser.parse("1+2").is_some());
    }
}
