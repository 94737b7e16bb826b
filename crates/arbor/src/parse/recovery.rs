//! Error recovery.
//!
//! When the lookahead has no action, the parser looks at a window of tokens
//! past the error and at how far the stack could be unwound. Each choice of
//! tokens to skip and entries to pop is checked by simulating the reductions
//! the resumption token would trigger; the cheapest viable choice wins, and
//! everything it discards becomes one `ERROR` node pushed as an extra.
//!
//! Skipping a recovery token (such as `;`) also discards every stack entry
//! pushed since the last completed recovery token, so parsing resumes at
//! the same level the malformed construct started at.

use tracing::{debug, trace};

use super::stack::{Entry, Stack};
use super::{to_u32, Run};
use crate::lexer::Token;
use crate::table::{Action, ParseTable, SymbolId, END, ERROR, NO_ALIAS, NO_FIELD};
use crate::tree::arena::{Edge, NodeData, NodeStore, EXTRA, IS_ERROR};
use crate::tree::NodeId;

/// A way to resume: pop `popped` stack entries, skip `skipped` window tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Resumption {
    cost: usize,
    skipped: usize,
    popped: usize,
}

/// Returns `true` if `symbol` can be shifted (or accepted) on top of
/// `entries` after the reductions it triggers.
fn viable(table: &ParseTable, entries: &[Entry], symbol: SymbolId) -> bool {
    let mut states = Stack::states_of(entries);
    let limit = states.len() + table.productions.len() + 1;
    for _ in 0..limit {
        let Some(&top) = states.last() else {
            return false;
        };
        match table.action(top, symbol) {
            Some(Action::Shift(_) | Action::Accept) => return true,
            Some(Action::Reduce(production)) => {
                let Some(info) = table.productions.get(production as usize) else {
                    return false;
                };
                let len = usize::from(info.len);
                if len >= states.len() {
                    return false;
                }
                states.truncate(states.len() - len);
                let below = states[states.len() - 1];
                match table.goto(below, info.lhs) {
                    Some(next) => states.push(next),
                    None => return false,
                }
            }
            None => return false,
        }
    }
    false
}

impl Run<'_> {
    fn is_trivia(&self, token: &Token) -> bool {
        token.symbol != END && self.table.is_extra(token.symbol)
    }

    /// Pending tokens plus tokens lexed in error mode, up to one token past
    /// the first recovery token, the configured limit, or end of input.
    fn recovery_window(&mut self) -> Vec<Token> {
        let limit = (self.options.max_recovery_tokens as usize).max(1);
        let mut items: Vec<Token> = self.pending.drain(..).collect();
        if items.is_empty() {
            items.push(self.lexer.lex_any(self.pos, self.after_extra));
        }
        loop {
            let Some(&last) = items.last() else {
                break;
            };
            if last.symbol == END {
                break;
            }
            let tokens: Vec<&Token> = items.iter().filter(|t| !self.is_trivia(t)).collect();
            if tokens.len() >= limit {
                break;
            }
            let synced = tokens
                .iter()
                .position(|t| self.table.is_recovery(t.symbol))
                .is_some_and(|at| tokens.len() > at + 1);
            if synced {
                break;
            }
            let after_extra = self.is_trivia(&last);
            items.push(self.lexer.lex_any(last.end(), after_extra));
        }
        items
    }

    /// Returns `true` if the last non-empty token under `id` is a recovery token.
    fn ends_with_recovery(&self, mut id: NodeId) -> bool {
        loop {
            let data = self.arena.node(id);
            if data.edge_count == 0 {
                return data.len > 0 && self.table.is_recovery(data.kind);
            }
            let Some(edge) = self
                .arena
                .edges(id)
                .iter()
                .rev()
                .find(|edge| self.arena.node(edge.node).len > 0)
            else {
                return false;
            };
            id = edge.node;
        }
    }

    /// The cheapest resumption by tokens discarded; ties go to fewer skipped
    /// tokens, then fewer popped entries.
    fn cheapest(&self, items: &[Token], window: &[usize]) -> Option<Resumption> {
        let entries = self.stack.entries();
        let synced = entries
            .iter()
            .rposition(|entry| self.ends_with_recovery(entry.node))
            .map_or(0, |at| at + 1);
        let mut crosses_recovery = false;
        let mut best: Option<Resumption> = None;
        for (skipped, &item) in window.iter().enumerate() {
            if best.is_some_and(|b| skipped >= b.cost) {
                break;
            }
            if let Some(&previous) = skipped.checked_sub(1).and_then(|i| window.get(i)) {
                crosses_recovery |= self.table.is_recovery(items[previous].symbol);
            }
            let symbol = items[item].symbol;
            if symbol == ERROR {
                continue;
            }
            let least_popped = if crosses_recovery {
                entries.len() - synced
            } else {
                0
            };
            let mut cost = skipped;
            for popped in 0..=entries.len() {
                if popped > 0 {
                    let entry = &entries[entries.len() - popped];
                    if !entry.extra {
                        cost += self.arena.node(entry.node).token_count as usize;
                    }
                }
                if popped < least_popped {
                    continue;
                }
                if best.is_some_and(|b| cost >= b.cost) {
                    break;
                }
                if viable(self.table, &entries[..entries.len() - popped], symbol) {
                    best = Some(Resumption {
                        cost,
                        skipped,
                        popped,
                    });
                    break;
                }
            }
        }
        best
    }

    /// Recovers from a token without an action. Returns the root when the
    /// input ended and nothing could be salvaged.
    pub(super) fn recover(&mut self) -> Option<NodeId> {
        let items = self.recovery_window();
        let window: Vec<usize> = (0..items.len())
            .filter(|&i| !self.is_trivia(&items[i]))
            .collect();

        let Some(choice) = self.cheapest(&items, &window) else {
            return self.give_up(items);
        };
        debug!(
            position = self.pos,
            skipped = choice.skipped,
            popped = choice.popped,
            "recovered from syntax error"
        );

        let resume = window[choice.skipped];
        let skipped_end = match choice.skipped {
            0 => 0,
            n => window[n - 1] + 1,
        };
        let popped = self.stack.split_off(self.stack.len() - choice.popped);
        self.push_error(popped, &items[..skipped_end]);

        if let Some(last) = items[..skipped_end].last() {
            self.pos = last.end();
        }
        self.pending.extend(items[skipped_end..=resume].iter().copied());
        self.lex_state = self.stack.top_state();
        self.after_extra = true;
        None
    }

    /// No resumption exists in the window. Mid-input the whole window is
    /// skipped; at end of input everything becomes one `ERROR` node under
    /// the root.
    fn give_up(&mut self, items: Vec<Token>) -> Option<NodeId> {
        let at_end = items.last().is_some_and(|t| t.symbol == END);
        if !at_end {
            trace!(position = self.pos, tokens = items.len(), "skipping recovery window");
            self.push_error(Vec::new(), &items);
            if let Some(last) = items.last() {
                self.pos = last.end();
            }
            self.lex_state = self.stack.top_state();
            self.after_extra = true;
            return None;
        }

        debug!(position = self.pos, "no recovery before end of input");
        let entries = self.stack.split_off(0);
        let consumed = &items[..items.len() - 1];
        if !self.push_error(entries, consumed) {
            let node = self.error_node(Vec::new(), self.pos, self.pos);
            self.stack.push(Entry {
                state: 0,
                node,
                start: self.pos,
                extra: true,
            });
        }
        let entries = self.stack.split_off(0);
        Some(self.root(&entries))
    }

    fn error_node(&mut self, edges: Vec<Edge>, start: usize, end: usize) -> NodeId {
        let state = self.stack.top_state();
        self.arena.push(
            NodeData {
                kind: ERROR,
                len: to_u32(end - start),
                lookahead: 0,
                lex_state: state,
                parse_state: state,
                trailing_lex_state: state,
                token_count: 0,
                flags: EXTRA | IS_ERROR,
                first_edge: 0,
                edge_count: 0,
            },
            &edges,
        )
    }

    /// Pushes one `ERROR` extra holding `popped` and `skipped`, merged with
    /// an `ERROR` node that only extras separate from the stack top. Returns
    /// `false` if there was nothing to wrap.
    fn push_error(&mut self, popped: Vec<Entry>, skipped: &[Token]) -> bool {
        let entries = self.stack.entries();
        let run = entries.iter().rev().take_while(|e| e.extra).count();
        let merge_at = (entries.len() - run..entries.len())
            .find(|&i| self.arena.node(entries[i].node).is_error());
        let mut wrapped = match merge_at {
            Some(at) => self.stack.split_off(at),
            None => Vec::new(),
        };
        wrapped.extend(popped);

        let mut start = None;
        let mut end = self.pos;
        let mut edges = Vec::new();
        for entry in &wrapped {
            start.get_or_insert(entry.start);
            let data = self.arena.node(entry.node);
            end = entry.start + data.len as usize;
            if data.is_error() && data.edge_count > 0 {
                edges.extend_from_slice(self.arena.edges(entry.node));
            } else {
                edges.push(Edge {
                    node: entry.node,
                    field: NO_FIELD,
                    alias: NO_ALIAS,
                });
            }
        }
        for token in skipped {
            start.get_or_insert(token.start);
            end = token.end();
            let flags = if token.symbol == ERROR {
                EXTRA | IS_ERROR
            } else if self.is_trivia(token) {
                EXTRA
            } else {
                0
            };
            let node = self.leaf(*token, flags, self.lex_state);
            edges.push(Edge {
                node,
                field: NO_FIELD,
                alias: NO_ALIAS,
            });
        }

        let Some(start) = start else {
            return false;
        };
        let lone_error = match edges.as_slice() {
            [only] => {
                let data = self.arena.node(only.node);
                data.is_error() && data.is_extra() && data.edge_count == 0
            }
            _ => false,
        };
        let node = if lone_error {
            edges[0].node
        } else {
            self.error_node(edges, start, end)
        };
        self.stack.push(Entry {
            state: self.stack.top_state(),
            node,
            start,
            extra: true,
        });
        true
    }
}
