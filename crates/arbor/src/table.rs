//! The compiled parse table.
//!
//! A [`ParseTable`] is everything the lexer and the LR driver need at run time:
//! the symbol inventory, token definitions, productions reduced to their
//! length and per-step labels, and the action/goto lists of every state. It
//! is plain data so it can be serialized byte-for-byte deterministically.

use facet::Facet;

/// Index of a symbol (terminal, nonterminal or alias kind).
pub type SymbolId = u16;
/// Index of an LR state.
pub type StateId = u32;
/// Index of a field name; `0` means "no field".
pub type FieldId = u16;
/// Index of a production.
pub type ProductionId = u32;

/// The end-of-input terminal.
pub const END: SymbolId = 0;
/// The kind of error nodes and of unrecognized characters.
pub const ERROR: SymbolId = 1;
/// The first id available to grammar symbols.
pub const FIRST_GRAMMAR_SYMBOL: SymbolId = 2;
/// Sentinel for "no field" on an edge or step.
pub const NO_FIELD: FieldId = 0;
/// Sentinel for "no alias" on an edge or step. Symbol 0 is never an alias.
pub const NO_ALIAS: SymbolId = 0;

/// Display information for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct SymbolInfo {
    /// Rule name for named symbols, literal text for anonymous ones.
    pub name: String,
    /// Whether nodes of this kind are named.
    pub named: bool,
    /// Whether nodes of this kind appear in the visible tree.
    pub visible: bool,
    /// Whether this symbol is produced by the lexer.
    pub terminal: bool,
}

/// How the lexer recognizes one terminal.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct TokenDef {
    /// The terminal this definition produces.
    pub symbol: SymbolId,
    /// Regex source, unanchored.
    pub pattern: String,
    /// Literal text when the token is a plain string.
    pub literal: Option<String>,
    /// Whether the token may not follow extras.
    pub immediate: bool,
    /// Whether this literal is a keyword matched through the word token.
    pub keyword: bool,
    /// Lexical precedence; higher wins before match length is compared.
    pub precedence: i32,
}

/// A production, reduced to what the driver needs to build nodes.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ProductionInfo {
    /// The symbol this production reduces to.
    pub lhs: SymbolId,
    /// Number of (non-extra) children.
    pub len: u16,
    /// Field of each child; empty when no child has one.
    pub fields: Vec<FieldId>,
    /// Alias of each child; empty when no child has one.
    pub aliases: Vec<SymbolId>,
}

impl ProductionInfo {
    /// The field attached to child `index`.
    #[must_use]
    pub fn field_at(&self, index: usize) -> FieldId {
        self.fields.get(index).copied().unwrap_or(NO_FIELD)
    }

    /// The alias attached to child `index`.
    #[must_use]
    pub fn alias_at(&self, index: usize) -> SymbolId {
        self.aliases.get(index).copied().unwrap_or(NO_ALIAS)
    }
}

/// Serialized discriminant of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
#[repr(u8)]
pub enum ActionKind {
    /// Push the token and move to `target`.
    Shift,
    /// Reduce by production `target`.
    Reduce,
    /// Input is complete.
    Accept,
}

/// One entry of a state's action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
pub struct ActionEntry {
    /// The lookahead terminal.
    pub symbol: SymbolId,
    /// What to do.
    pub kind: ActionKind,
    /// State for shifts, production for reductions, unused for accept.
    pub target: u32,
}

/// One entry of a state's goto list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
pub struct GotoEntry {
    /// The nonterminal just reduced.
    pub symbol: SymbolId,
    /// The state to move to.
    pub state: StateId,
}

/// One LR state. Both lists are sorted by symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct ParseState {
    /// Terminal actions.
    pub actions: Vec<ActionEntry>,
    /// Nonterminal transitions.
    pub gotos: Vec<GotoEntry>,
}

/// A decoded parse action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Push the token and move to the state.
    Shift(StateId),
    /// Reduce by the production.
    Reduce(ProductionId),
    /// Input is complete.
    Accept,
}

impl From<ActionEntry> for Action {
    fn from(entry: ActionEntry) -> Self {
        match entry.kind {
            ActionKind::Shift => Action::Shift(entry.target),
            ActionKind::Reduce => Action::Reduce(entry.target),
            ActionKind::Accept => Action::Accept,
        }
    }
}

impl ActionEntry {
    /// Encodes `action` for lookahead `symbol`.
    #[must_use]
    pub fn new(symbol: SymbolId, action: Action) -> Self {
        let (kind, target) = match action {
            Action::Shift(state) => (ActionKind::Shift, state),
            Action::Reduce(production) => (ActionKind::Reduce, production),
            Action::Accept => (ActionKind::Accept, 0),
        };
        Self {
            symbol,
            kind,
            target,
        }
    }
}

/// The complete compiled form of a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ParseTable {
    /// Grammar name.
    pub name: String,
    /// Every symbol, indexed by [`SymbolId`].
    pub symbols: Vec<SymbolInfo>,
    /// Field names; field id `n` is `fields[n - 1]`.
    pub fields: Vec<String>,
    /// Token definitions, in symbol order.
    pub tokens: Vec<TokenDef>,
    /// Productions, indexed by [`ProductionId`].
    pub productions: Vec<ProductionInfo>,
    /// States, indexed by [`StateId`]; state 0 is the initial state.
    pub states: Vec<ParseState>,
    /// The start rule's symbol.
    pub start_symbol: SymbolId,
    /// Terminals allowed between any two tokens.
    pub extras: Vec<SymbolId>,
    /// Terminals error recovery synchronizes on.
    pub recovery: Vec<SymbolId>,
    /// The word token used for keyword matching.
    pub word: Option<SymbolId>,
}

impl ParseTable {
    /// The action for `symbol` in `state`, if any.
    #[must_use]
    pub fn action(&self, state: StateId, symbol: SymbolId) -> Option<Action> {
        let actions = &self.states.get(state as usize)?.actions;
        actions
            .binary_search_by_key(&symbol, |entry| entry.symbol)
            .ok()
            .map(|i| Action::from(actions[i]))
    }

    /// The terminals with an action in `state`, ascending.
    #[must_use]
    pub fn valid_terminals(&self, state: StateId) -> &[ActionEntry] {
        self.states
            .get(state as usize)
            .map_or(&[], |s| s.actions.as_slice())
    }

    /// The state reached from `state` after reducing `symbol`.
    #[must_use]
    pub fn goto(&self, state: StateId, symbol: SymbolId) -> Option<StateId> {
        let gotos = &self.states.get(state as usize)?.gotos;
        gotos
            .binary_search_by_key(&symbol, |entry| entry.symbol)
            .ok()
            .map(|i| gotos[i].state)
    }

    /// The state after pushing a node of kind `symbol` in `state`: a shift for
    /// terminals, a goto for nonterminals.
    #[must_use]
    pub fn next_state(&self, state: StateId, symbol: SymbolId) -> Option<StateId> {
        if self.is_terminal(symbol) {
            match self.action(state, symbol)? {
                Action::Shift(next) => Some(next),
                Action::Reduce(_) | Action::Accept => None,
            }
        } else {
            self.goto(state, symbol)
        }
    }

    /// Information about `symbol`.
    #[must_use]
    pub fn symbol(&self, symbol: SymbolId) -> &SymbolInfo {
        &self.symbols[usize::from(symbol)]
    }

    /// Returns `true` if `symbol` is produced by the lexer.
    #[must_use]
    pub fn is_terminal(&self, symbol: SymbolId) -> bool {
        self.symbols
            .get(usize::from(symbol))
            .is_some_and(|s| s.terminal)
    }

    /// Returns `true` if `symbol` is an extra.
    #[must_use]
    pub fn is_extra(&self, symbol: SymbolId) -> bool {
        self.extras.contains(&symbol)
    }

    /// Returns `true` if `symbol` is a recovery token.
    #[must_use]
    pub fn is_recovery(&self, symbol: SymbolId) -> bool {
        self.recovery.contains(&symbol)
    }

    /// The name of field `id`.
    #[must_use]
    pub fn field_name(&self, id: FieldId) -> Option<&str> {
        if id == NO_FIELD {
            return None;
        }
        self.fields.get(usize::from(id) - 1).map(String::as_str)
    }

    /// The id of the field called `name`.
    #[must_use]
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|f| f == name)
            .and_then(|i| FieldId::try_from(i + 1).ok())
    }

    /// The symbol called `name`, preferring named symbols when `named` is set.
    #[must_use]
    pub fn symbol_for_name(&self, name: &str, named: bool) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|s| s.name == name && s.named == named)
            .and_then(|i| SymbolId::try_from(i).ok())
    }

    /// Checks that every index in the table is in range.
    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        let symbols = self.symbols.len();
        let states = self.states.len();
        let productions = self.productions.len();
        let symbol_ok = |s: SymbolId| usize::from(s) < symbols;

        if symbols < usize::from(FIRST_GRAMMAR_SYMBOL) || states == 0 {
            return Err("table has no symbols or states".to_string());
        }
        if !symbol_ok(self.start_symbol) || self.is_terminal(self.start_symbol) {
            return Err(format!("bad start symbol {}", self.start_symbol));
        }
        for token in &self.tokens {
            if !self.is_terminal(token.symbol) {
                return Err(format!("token for non-terminal symbol {}", token.symbol));
            }
        }
        for extra in self.extras.iter().chain(&self.recovery).chain(&self.word) {
            if !self.is_terminal(*extra) {
                return Err(format!("symbol {extra} is not a terminal"));
            }
        }
        for (id, production) in self.productions.iter().enumerate() {
            let labels_ok = production
                .fields
                .iter()
                .all(|f| usize::from(*f) <= self.fields.len())
                && production.aliases.iter().all(|a| symbol_ok(*a));
            if !symbol_ok(production.lhs) || !labels_ok {
                return Err(format!("production {id} is out of range"));
            }
        }
        for (id, state) in self.states.iter().enumerate() {
            let sorted = state.actions.windows(2).all(|w| w[0].symbol < w[1].symbol)
                && state.gotos.windows(2).all(|w| w[0].symbol < w[1].symbol);
            if !sorted {
                return Err(format!("state {id} is not sorted"));
            }
            for entry in &state.actions {
                let target_ok = match entry.kind {
                    ActionKind::Shift => (entry.target as usize) < states,
                    ActionKind::Reduce => (entry.target as usize) < productions,
                    ActionKind::Accept => true,
                };
                if !self.is_terminal(entry.symbol) || !target_ok {
                    return Err(format!("state {id} has an invalid action"));
                }
            }
            for entry in &state.gotos {
                if !symbol_ok(entry.symbol) || entry.state as usize >= states {
                    return Err(format!("state {id} has an invalid goto"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> ParseTable {
        let symbol = |name: &str, terminal| SymbolInfo {
            name: name.to_string(),
            named: true,
            visible: true,
            terminal,
        };
        ParseTable {
            name: "tiny".to_string(),
            symbols: vec![
                symbol("end", true),
                symbol("ERROR", true),
                symbol("x", true),
                symbol("s", false),
            ],
            fields: vec!["value".to_string()],
            tokens: vec![TokenDef {
                symbol: 2,
                pattern: "x".to_string(),
                literal: Some("x".to_string()),
                immediate: false,
                keyword: false,
                precedence: 0,
            }],
            productions: vec![ProductionInfo {
                lhs: 3,
                len: 1,
                fields: vec![1],
                aliases: vec![],
            }],
            states: vec![
                ParseState {
                    actions: vec![ActionEntry::new(2, Action::Shift(1))],
                    gotos: vec![GotoEntry { symbol: 3, state: 2 }],
                },
                ParseState {
                    actions: vec![ActionEntry::new(END, Action::Reduce(0))],
                    gotos: vec![],
                },
                ParseState {
                    actions: vec![ActionEntry::new(END, Action::Accept)],
                    gotos: vec![],
                },
            ],
            start_symbol: 3,
            extras: vec![],
            recovery: vec![],
            word: None,
        }
    }

    #[test]
    fn test_lookups() {
        let table = tiny();
        assert_eq!(table.action(0, 2), Some(Action::Shift(1)));
        assert_eq!(table.action(0, END), None);
        assert_eq!(table.action(1, END), Some(Action::Reduce(0)));
        assert_eq!(table.goto(0, 3), Some(2));
        assert_eq!(table.next_state(0, 2), Some(1));
        assert_eq!(table.next_state(0, 3), Some(2));
        assert_eq!(table.field_name(1), Some("value"));
        assert_eq!(table.field_name(NO_FIELD), None);
        assert_eq!(table.field_id("value"), Some(1));
        assert_eq!(table.productions[0].field_at(0), 1);
        assert_eq!(table.productions[0].alias_at(0), NO_ALIAS);
        assert_eq!(table.check_consistency(), Ok(()));
    }

    #[test]
    fn test_inconsistent_table_is_rejected() {
        let mut table = tiny();
        table.states[0].actions[0].target = 9;
        assert!(table.check_consistency().is_err());

        let mut table = tiny();
        table.start_symbol = 2;
        assert!(table.check_consistency().is_err());
    }
}
