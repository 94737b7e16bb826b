//! Nullability and FIRST sets over the prepared productions.

use super::prepare::{PreparedGrammar, Step};
use crate::table::SymbolId;

/// A set of terminals, stored as a bitset indexed by symbol id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TokenSet {
    words: Vec<u64>,
}

impl TokenSet {
    pub fn new(symbol_count: usize) -> Self {
        Self {
            words: vec![0; symbol_count.div_ceil(64)],
        }
    }

    /// Adds `symbol`, returning `true` if it was not present.
    pub fn insert(&mut self, symbol: SymbolId) -> bool {
        let (word, bit) = (usize::from(symbol) / 64, usize::from(symbol) % 64);
        let before = self.words[word];
        self.words[word] |= 1 << bit;
        before != self.words[word]
    }

    pub fn contains(&self, symbol: SymbolId) -> bool {
        let (word, bit) = (usize::from(symbol) / 64, usize::from(symbol) % 64);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    /// Adds every member of `other`, returning `true` if anything was added.
    pub fn union_with(&mut self, other: &TokenSet) -> bool {
        let mut changed = false;
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            let merged = *mine | theirs;
            changed |= merged != *mine;
            *mine = merged;
        }
        changed
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.words.iter().enumerate().flat_map(|(index, word)| {
            (0..64)
                .filter(move |bit| word & (1 << bit) != 0)
                .filter_map(move |bit| SymbolId::try_from(index * 64 + bit).ok())
        })
    }
}

#[derive(Debug)]
pub(crate) struct FirstSets {
    nullable: Vec<bool>,
    first: Vec<TokenSet>,
}

impl FirstSets {
    pub fn compute(grammar: &PreparedGrammar) -> Self {
        let count = grammar.symbols.len();
        let mut nullable = vec![false; count];
        let mut first = vec![TokenSet::new(count); count];
        for (index, info) in grammar.symbols.iter().enumerate() {
            if info.terminal {
                if let Ok(symbol) = SymbolId::try_from(index) {
                    first[index].insert(symbol);
                }
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for production in grammar.productions.iter().skip(1) {
                let lhs = usize::from(production.lhs);
                let mut derives_empty = true;
                for step in &production.steps {
                    let symbol = usize::from(step.symbol);
                    if symbol != lhs {
                        let addition = first[symbol].clone();
                        changed |= first[lhs].union_with(&addition);
                    }
                    if !nullable[symbol] {
                        derives_empty = false;
                        break;
                    }
                }
                if derives_empty && !nullable[lhs] {
                    nullable[lhs] = true;
                    changed = true;
                }
            }
        }

        Self { nullable, first }
    }

    pub fn first(&self, symbol: SymbolId) -> &TokenSet {
        &self.first[usize::from(symbol)]
    }

    pub fn is_nullable(&self, symbol: SymbolId) -> bool {
        self.nullable[usize::from(symbol)]
    }

    /// FIRST of `steps` followed by any terminal of `follow`.
    pub fn sequence(&self, steps: &[Step], follow: &TokenSet) -> TokenSet {
        let mut result = TokenSet::new(self.first.len());
        for step in steps {
            result.union_with(self.first(step.symbol));
            if !self.is_nullable(step.symbol) {
                return result;
            }
        }
        result.union_with(follow);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::prepare::prepare;
    use crate::config::CompileOptions;
    use crate::grammar::{Grammar, Rule};

    #[test]
    fn test_token_set() {
        let mut set = TokenSet::new(130);
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(129));
        assert!(set.contains(129));
        assert!(!set.contains(4));

        let mut other = TokenSet::new(130);
        other.insert(64);
        assert!(set.union_with(&other));
        assert!(!set.union_with(&other));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 64, 129]);
    }

    #[test]
    fn test_first_and_nullable() {
        let grammar = Grammar::new("lists")
            .rule(
                "list",
                Rule::seq([Rule::repeat(Rule::symbol("item")), Rule::string(";")]),
            )
            .rule("item", Rule::pattern("[a-z]+"));
        let prepared = prepare(&grammar, &CompileOptions::default()).unwrap();
        let sets = FirstSets::compute(&prepared);

        let id = |name: &str| {
            SymbolId::try_from(prepared.symbols.iter().position(|s| s.name == name).unwrap())
                .unwrap()
        };
        let (item, semicolon) = (id("item"), id(";"));
        let list = id("list");
        assert!(!sets.is_nullable(list));
        assert!(!sets.is_nullable(id("list_repeat1")));
        assert_eq!(sets.first(list).iter().collect::<Vec<_>>(), {
            let mut v = vec![item, semicolon];
            v.sort_unstable();
            v
        });
    }
}
