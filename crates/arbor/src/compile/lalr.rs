//! LALR(1) automaton construction and conflict resolution.
//!
//! States are identified by their kernel core. A state's kernel lookaheads
//! grow as new predecessors are discovered; whenever they do, the state is
//! queued again so the growth propagates to its successors. States are
//! numbered in discovery order from a FIFO worklist with transitions taken in
//! symbol order, which makes the numbering deterministic.

use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;

use super::first_sets::{FirstSets, TokenSet};
use super::prepare::{Assoc, PreparedGrammar, Production};
use super::{CompileError, ConflictKind};
use crate::table::{Action, ActionEntry, GotoEntry, ParseState, StateId, SymbolId, END};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Item {
    production: u32,
    dot: u32,
}

type Kernel = Vec<(Item, TokenSet)>;

struct Automaton<'g> {
    grammar: &'g PreparedGrammar,
    first: &'g FirstSets,
    by_lhs: Vec<Vec<u32>>,
    cores: IndexMap<Vec<Item>, usize>,
    kernels: Vec<Kernel>,
    transitions: Vec<BTreeMap<SymbolId, usize>>,
}

/// Builds the parse states for `grammar`.
pub(crate) fn build(
    grammar: &PreparedGrammar,
    first: &FirstSets,
) -> Result<Vec<ParseState>, CompileError> {
    let mut by_lhs = vec![Vec::new(); grammar.symbols.len()];
    for (index, production) in grammar.productions.iter().enumerate().skip(1) {
        by_lhs[usize::from(production.lhs)].push(index_u32(index));
    }

    let mut automaton = Automaton {
        grammar,
        first,
        by_lhs,
        cores: IndexMap::new(),
        kernels: Vec::new(),
        transitions: Vec::new(),
    };
    automaton.construct();
    trace!(states = automaton.kernels.len(), "constructed LALR(1) automaton");

    (0..automaton.kernels.len())
        .map(|state| automaton.resolve(state))
        .collect()
}

fn index_u32(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

impl Automaton<'_> {
    fn production(&self, item: Item) -> &Production {
        &self.grammar.productions[item.production as usize]
    }

    fn next_symbol(&self, item: Item) -> Option<SymbolId> {
        self.production(item)
            .steps
            .get(item.dot as usize)
            .map(|step| step.symbol)
    }

    fn construct(&mut self) {
        let symbol_count = self.grammar.symbols.len();
        let mut end = TokenSet::new(symbol_count);
        end.insert(END);
        let start = Item {
            production: 0,
            dot: 0,
        };
        self.cores.insert(vec![start], 0);
        self.kernels.push(vec![(start, end)]);
        self.transitions.push(BTreeMap::new());

        let mut queue = VecDeque::from([0]);
        let mut queued = vec![true];
        while let Some(state) = queue.pop_front() {
            queued[state] = false;
            let closure = self.closure(&self.kernels[state]);

            let mut successors: BTreeMap<SymbolId, Kernel> = BTreeMap::new();
            for (item, lookahead) in closure {
                if let Some(symbol) = self.next_symbol(item) {
                    let advanced = Item {
                        dot: item.dot + 1,
                        ..item
                    };
                    successors
                        .entry(symbol)
                        .or_default()
                        .push((advanced, lookahead));
                }
            }

            for (symbol, mut kernel) in successors {
                kernel.sort_by_key(|(item, _)| *item);
                let core: Vec<Item> = kernel.iter().map(|(item, _)| *item).collect();
                let target = if let Some(&existing) = self.cores.get(&core) {
                    let mut grew = false;
                    for ((_, mine), (_, theirs)) in
                        self.kernels[existing].iter_mut().zip(&kernel)
                    {
                        grew |= mine.union_with(theirs);
                    }
                    if grew && !queued[existing] {
                        queued[existing] = true;
                        queue.push_back(existing);
                    }
                    existing
                } else {
                    let id = self.kernels.len();
                    self.cores.insert(core, id);
                    self.kernels.push(kernel);
                    self.transitions.push(BTreeMap::new());
                    queued.push(true);
                    queue.push_back(id);
                    id
                };
                self.transitions[state].insert(symbol, target);
            }
        }
    }

    /// LR(1) closure of a kernel; items with the same core are merged.
    fn closure(&self, kernel: &Kernel) -> Vec<(Item, TokenSet)> {
        let mut items: IndexMap<Item, TokenSet> = kernel.iter().cloned().collect();
        let mut pending: VecDeque<usize> = (0..items.len()).collect();

        while let Some(index) = pending.pop_front() {
            let (item, lookahead) = match items.get_index(index) {
                Some((item, lookahead)) => (*item, lookahead.clone()),
                None => continue,
            };
            let Some(symbol) = self.next_symbol(item) else {
                continue;
            };
            if self.grammar.is_terminal(symbol) {
                continue;
            }
            let rest = &self.production(item).steps[item.dot as usize + 1..];
            let follow = self.first.sequence(rest, &lookahead);
            for &production in &self.by_lhs[usize::from(symbol)] {
                let fresh = Item { production, dot: 0 };
                match items.get_full_mut(&fresh) {
                    Some((existing, _, set)) => {
                        if set.union_with(&follow) {
                            pending.push_back(existing);
                        }
                    }
                    None => {
                        let (inserted, _) = items.insert_full(fresh, follow.clone());
                        pending.push_back(inserted);
                    }
                }
            }
        }
        items.into_iter().collect()
    }

    fn token_name(&self, symbol: SymbolId) -> String {
        if symbol == END {
            return "end of input".to_string();
        }
        let info = &self.grammar.symbols[usize::from(symbol)];
        if info.named {
            info.name.clone()
        } else {
            format!("'{}'", info.name)
        }
    }

    fn reduce_precedence(&self, production: u32) -> (i32, Assoc) {
        self.grammar.productions[production as usize]
            .steps
            .last()
            .map_or((0, Assoc::None), |step| (step.precedence, step.assoc))
    }

    /// Turns the final closure of `state` into a conflict-free action list.
    fn resolve(&self, state: usize) -> Result<ParseState, CompileError> {
        let closure = self.closure(&self.kernels[state]);

        let mut reductions: BTreeMap<SymbolId, IndexSet<u32>> = BTreeMap::new();
        for (item, lookahead) in &closure {
            if self.next_symbol(*item).is_none() {
                for token in lookahead.iter() {
                    reductions.entry(token).or_default().insert(item.production);
                }
            }
        }

        let mut actions: BTreeMap<SymbolId, Action> = BTreeMap::new();
        let mut gotos = Vec::new();
        for (&symbol, &target) in &self.transitions[state] {
            let target = StateId::try_from(target).unwrap_or(StateId::MAX);
            if self.grammar.is_terminal(symbol) {
                actions.insert(symbol, Action::Shift(target));
            } else {
                gotos.push(GotoEntry {
                    symbol,
                    state: target,
                });
            }
        }

        for (token, productions) in reductions {
            let reduce = self.pick_reduction(token, &productions)?;
            let reduce_action = if reduce == 0 {
                Action::Accept
            } else {
                Action::Reduce(reduce - 1)
            };
            match actions.get(&token) {
                None => {
                    actions.insert(token, reduce_action);
                }
                Some(Action::Shift(_)) => {
                    if self.prefers_reduce(&closure, token, reduce)? {
                        actions.insert(token, reduce_action);
                    }
                }
                Some(Action::Reduce(_) | Action::Accept) => {}
            }
        }

        Ok(ParseState {
            actions: actions
                .into_iter()
                .map(|(symbol, action)| ActionEntry::new(symbol, action))
                .collect(),
            gotos,
        })
    }

    /// Chooses among reductions on the same lookahead by production precedence.
    fn pick_reduction(&self, token: SymbolId, productions: &IndexSet<u32>) -> Result<u32, CompileError> {
        let mut ranked: Vec<(i32, u32)> = productions
            .iter()
            .map(|&p| (self.reduce_precedence(p).0, p))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        match ranked.as_slice() {
            [(_, only)] => Ok(*only),
            [(best, first), (next, second), ..] => {
                if best > next {
                    Ok(*first)
                } else {
                    Err(CompileError::Conflict {
                        kind: ConflictKind::ReduceReduce,
                        token: self.token_name(token),
                        first: self.rule_of(*first).to_string(),
                        second: self.rule_of(*second).to_string(),
                    })
                }
            }
            [] => Err(CompileError::Unsupported("empty reduction set".to_string())),
        }
    }

    fn rule_of(&self, production: u32) -> &str {
        self.grammar
            .rule_name(self.grammar.productions[production as usize].lhs)
    }

    /// Settles a shift/reduce conflict on `token`.
    fn prefers_reduce(
        &self,
        closure: &[(Item, TokenSet)],
        token: SymbolId,
        reduce: u32,
    ) -> Result<bool, CompileError> {
        let mut shift_precedence: Option<i32> = None;
        let mut shift_rule = None;
        for (item, _) in closure {
            let Some(next) = self.next_symbol(*item) else {
                continue;
            };
            if !self.first.first(next).contains(token) {
                continue;
            }
            shift_rule.get_or_insert(item.production);
            if item.dot > 0 {
                let before = self.production(*item).steps[item.dot as usize - 1].precedence;
                shift_precedence = Some(shift_precedence.map_or(before, |p| p.max(before)));
            }
        }
        let shift_precedence = shift_precedence.unwrap_or(0);
        let (reduce_precedence, assoc) = self.reduce_precedence(reduce);

        if reduce_precedence != shift_precedence {
            return Ok(reduce_precedence > shift_precedence);
        }
        match assoc {
            Assoc::Left => Ok(true),
            Assoc::Right => Ok(false),
            Assoc::None => Err(CompileError::Conflict {
                kind: ConflictKind::ShiftReduce,
                token: self.token_name(token),
                first: shift_rule.map_or("", |p| self.rule_of(p)).to_string(),
                second: self.rule_of(reduce).to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::compile::{compile, CompileError, ConflictKind};
    use crate::grammar::{Grammar, Rule};

    fn binary(operator: &str, rule: fn(i32, Rule) -> Rule, level: i32) -> Rule {
        rule(
            level,
            Rule::seq([
                Rule::symbol("expr"),
                Rule::string(operator),
                Rule::symbol("expr"),
            ]),
        )
    }

    fn arithmetic(plus: fn(i32, Rule) -> Rule) -> Grammar {
        Grammar::new("arith")
            .rule("program", Rule::symbol("expr"))
            .rule(
                "expr",
                Rule::choice([
                    binary("+", plus, 1),
                    binary("*", Rule::prec_left, 2),
                    Rule::symbol("number"),
                ]),
            )
            .rule("number", Rule::pattern("[0-9]+"))
    }

    #[test]
    fn test_precedence_resolves_operator_conflicts() {
        assert!(compile(&arithmetic(Rule::prec_left)).is_ok());
        assert!(compile(&arithmetic(Rule::prec_right)).is_ok());
    }

    #[test]
    fn test_unresolved_conflict_names_both_rules() {
        let error = compile(&arithmetic(Rule::prec)).unwrap_err();
        assert_eq!(
            error,
            CompileError::Conflict {
                kind: ConflictKind::ShiftReduce,
                token: "'+'".to_string(),
                first: "expr".to_string(),
                second: "expr".to_string(),
            }
        );
    }

    #[test]
    fn test_reduce_reduce_conflict() {
        let grammar = Grammar::new("rr")
            .rule(
                "program",
                Rule::choice([Rule::symbol("left"), Rule::symbol("right")]),
            )
            .rule("left", Rule::symbol("name"))
            .rule("right", Rule::symbol("name"))
            .rule("name", Rule::pattern("[a-z]+"));
        match compile(&grammar).unwrap_err() {
            CompileError::Conflict {
                kind,
                first,
                second,
                ..
            } => {
                assert_eq!(kind, ConflictKind::ReduceReduce);
                assert_eq!((first.as_str(), second.as_str()), ("left", "right"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_dangling_else_is_reported() {
        let grammar = Grammar::new("ifs")
            .rule(
                "stmt",
                Rule::choice([
                    Rule::seq([
                        Rule::string("if"),
                        Rule::symbol("stmt"),
                        Rule::optional(Rule::seq([Rule::string("else"), Rule::symbol("stmt")])),
                    ]),
                    Rule::string("x"),
                ]),
            );
        assert!(matches!(
            compile(&grammar),
            Err(CompileError::Conflict {
                kind: ConflictKind::ShiftReduce,
                ..
            })
        ));

        let resolved = Grammar::new("ifs").rule(
            "stmt",
            Rule::choice([
                Rule::prec_right(
                    0,
                    Rule::seq([
                        Rule::string("if"),
                        Rule::symbol("stmt"),
                        Rule::optional(Rule::seq([Rule::string("else"), Rule::symbol("stmt")])),
                    ]),
                ),
                Rule::string("x"),
            ]),
        );
        assert!(compile(&resolved).is_ok());
    }
}
