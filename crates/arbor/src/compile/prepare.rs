//! Terminal extraction and rule flattening.
//!
//! Turns the nested rule expressions of a [`Grammar`] into a flat symbol
//! inventory and a list of productions whose steps carry their field, alias
//! and precedence. Repetitions become hidden left-recursive helper rules.

use indexmap::IndexSet;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::trace;

use super::CompileError;
use crate::config::CompileOptions;
use crate::grammar::{Grammar, Rule, RuleType, RuleValue};
use crate::table::{
    FieldId, ParseState, ParseTable, ProductionInfo, SymbolId, SymbolInfo, TokenDef, END, ERROR,
    NO_ALIAS, NO_FIELD,
};
use crate::validate::ValidationError;

/// Left-hand side of the augmented start production.
pub(crate) const AUGMENTED: SymbolId = SymbolId::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub(crate) enum Assoc {
    #[default]
    None,
    Left,
    Right,
}

/// One symbol of a production, with the labels it was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Step {
    pub symbol: SymbolId,
    pub precedence: i32,
    pub assoc: Assoc,
    pub field: FieldId,
    pub alias: SymbolId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Production {
    pub lhs: SymbolId,
    pub steps: Vec<Step>,
}

/// A grammar reduced to symbols and flat productions.
///
/// `productions[0]` is the augmented production `AUGMENTED -> start`.
#[derive(Debug)]
pub(crate) struct PreparedGrammar {
    pub name: String,
    pub symbols: Vec<SymbolInfo>,
    /// For helper symbols, the rule they were generated for; otherwise the symbol itself.
    pub origins: Vec<SymbolId>,
    pub tokens: Vec<TokenDef>,
    pub fields: Vec<String>,
    pub productions: Vec<Production>,
    pub start: SymbolId,
    pub extras: Vec<SymbolId>,
    pub recovery: Vec<SymbolId>,
    pub word: Option<SymbolId>,
}

impl PreparedGrammar {
    pub fn is_terminal(&self, symbol: SymbolId) -> bool {
        self.symbols[usize::from(symbol)].terminal
    }

    /// The user-facing rule name for `symbol`, mapping helpers to their origin.
    pub fn rule_name(&self, symbol: SymbolId) -> &str {
        let symbol = if symbol == AUGMENTED {
            self.start
        } else {
            self.origins[usize::from(symbol)]
        };
        &self.symbols[usize::from(symbol)].name
    }

    /// Assembles the run-time table around the given states.
    pub fn into_table(self, states: Vec<ParseState>) -> ParseTable {
        let productions = self
            .productions
            .iter()
            .skip(1)
            .map(|production| {
                let fields: Vec<FieldId> = production.steps.iter().map(|s| s.field).collect();
                let aliases: Vec<SymbolId> = production.steps.iter().map(|s| s.alias).collect();
                ProductionInfo {
                    lhs: production.lhs,
                    len: u16::try_from(production.steps.len()).unwrap_or(u16::MAX),
                    fields: if fields.iter().all(|f| *f == NO_FIELD) {
                        Vec::new()
                    } else {
                        fields
                    },
                    aliases: if aliases.iter().all(|a| *a == NO_ALIAS) {
                        Vec::new()
                    } else {
                        aliases
                    },
                }
            })
            .collect();

        ParseTable {
            name: self.name,
            symbols: self.symbols,
            fields: self.fields,
            tokens: self.tokens,
            productions,
            states,
            start_symbol: self.start,
            extras: self.extras,
            recovery: self.recovery,
            word: self.word,
        }
    }
}

/// Prepares `grammar` for table construction. The grammar must be valid.
pub(crate) fn prepare(
    grammar: &Grammar,
    options: &CompileOptions,
) -> Result<PreparedGrammar, CompileError> {
    if grammar.externals.as_ref().is_some_and(|e| !e.is_empty()) {
        return Err(CompileError::Unsupported("external scanners".to_string()));
    }
    let start = grammar.start_rule()?;
    let (rules, extras) = inline_rules(grammar, start)?;

    let mut order: Vec<&str> = vec![start];
    order.extend(rules.keys().map(String::as_str).filter(|name| *name != start));

    let extra_names: FxHashSet<&str> = extras.iter().filter_map(Rule::symbol_name).collect();
    let is_token_rule = |name: &str, rule: &Rule| {
        name != start
            && (matches!(
                rule.rule_type,
                RuleType::String | RuleType::Pattern | RuleType::Token | RuleType::ImmediateToken
            ) || (extra_names.contains(name) && rule.is_lexical()))
    };

    let mut builder = Builder::new(grammar, options);

    // Terminals first: named token rules, then literals and patterns nested in
    // other rules, then the extras.
    for &name in &order {
        let rule = &rules[name];
        if is_token_rule(name, rule) {
            builder.named_token(name, rule)?;
        }
    }
    for &name in &order {
        let rule = &rules[name];
        if !is_token_rule(name, rule) {
            builder.collect_nested_tokens(rule, name)?;
        }
    }
    for extra in &extras {
        builder.extra(extra)?;
    }

    let supertypes: FxHashSet<&str> = grammar
        .supertypes
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();
    let mut nonterminals = Vec::new();
    for &name in &order {
        let rule = &rules[name];
        if !is_token_rule(name, rule) {
            let visible = !name.starts_with('_') && !supertypes.contains(name);
            let symbol = builder.add_symbol(
                SymbolInfo {
                    name: name.to_string(),
                    named: true,
                    visible,
                    terminal: false,
                },
                None,
            )?;
            builder.rule_symbols.insert(name.to_string(), symbol);
            nonterminals.push((symbol, rule));
        }
    }

    for (symbol, rule) in nonterminals {
        let alternatives = builder.flatten(rule, Context::default(), symbol)?;
        let name = &builder.symbols[usize::from(symbol)].name;
        trace!(rule = %name, alternatives = alternatives.len(), "flattened rule");
        builder.add_productions(symbol, alternatives)?;
    }

    builder.finish(grammar, start)
}

/// Substitutes `inline` rules into every other rule and the extras.
fn inline_rules(
    grammar: &Grammar,
    start: &str,
) -> Result<(BTreeMap<String, Rule>, Vec<Rule>), CompileError> {
    let inline: FxHashMap<&str, &Rule> = grammar
        .rules
        .iter()
        .filter(|(name, _)| grammar.is_inline(name) && name.as_str() != start)
        .map(|(name, rule)| (name.as_str(), rule))
        .collect();

    let mut stack = Vec::new();
    let mut rules = BTreeMap::new();
    for name in grammar.rule_names() {
        if !inline.contains_key(name) {
            let rule = &grammar.rules[name];
            rules.insert(name.to_string(), expand_inline(rule, &inline, &mut stack)?);
        }
    }
    let extras = grammar
        .extras
        .iter()
        .flatten()
        .map(|rule| expand_inline(rule, &inline, &mut stack))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rules, extras))
}

fn expand_inline<'g>(
    rule: &Rule,
    inline: &FxHashMap<&'g str, &'g Rule>,
    stack: &mut Vec<&'g str>,
) -> Result<Rule, CompileError> {
    if let Some((name, body)) = rule
        .symbol_name()
        .and_then(|name| inline.get_key_value(name))
    {
        if stack.contains(name) {
            return Err(CompileError::InlineRecursion {
                rule: (*name).to_string(),
            });
        }
        stack.push(*name);
        let expanded = expand_inline(body, inline, stack);
        stack.pop();
        return expanded;
    }

    let mut expanded = rule.clone();
    if let Some(content) = &rule.content {
        expanded.content = Some(Box::new(expand_inline(content, inline, stack)?));
    }
    expanded.members = rule
        .members
        .iter()
        .map(|member| expand_inline(member, inline, stack))
        .collect::<Result<_, _>>()?;
    Ok(expanded)
}

/// The lexical description of one token.
struct TokenSource {
    pattern: String,
    literal: Option<String>,
    immediate: bool,
    precedence: i32,
}

impl TokenSource {
    fn literal(text: &str) -> Self {
        Self {
            pattern: regex::escape(text),
            literal: Some(text.to_string()),
            immediate: false,
            precedence: 0,
        }
    }

    fn of(rule: &Rule) -> Result<Self, CompileError> {
        let mut precedence = 0;
        match rule.rule_type {
            RuleType::String => Ok(Self::literal(rule.string_value().unwrap_or_default())),
            RuleType::Token | RuleType::ImmediateToken => {
                let content = rule.content.as_deref();
                let pattern = match content {
                    Some(content) => regex_source(content, &mut precedence)?,
                    None => String::new(),
                };
                Ok(Self {
                    pattern,
                    literal: content.and_then(Rule::string_value).map(str::to_string),
                    immediate: rule.rule_type == RuleType::ImmediateToken,
                    precedence,
                })
            }
            _ => Ok(Self {
                pattern: regex_source(rule, &mut precedence)?,
                literal: None,
                immediate: false,
                precedence,
            }),
        }
    }
}

/// Collapses a lexical rule into one regex. Precedence found inside raises `precedence`.
fn regex_source(rule: &Rule, precedence: &mut i32) -> Result<String, CompileError> {
    let content = |precedence: &mut i32| match rule.content.as_deref() {
        Some(content) => regex_source(content, precedence),
        None => Ok(String::new()),
    };
    Ok(match rule.rule_type {
        RuleType::Blank => String::new(),
        RuleType::String => regex::escape(rule.string_value().unwrap_or_default()),
        RuleType::Pattern => {
            let source = rule.pattern_value().unwrap_or_default();
            if rule.flags.as_deref().is_some_and(|f| f.contains('i')) {
                format!("(?i:{source})")
            } else {
                format!("(?:{source})")
            }
        }
        RuleType::Seq => rule
            .members
            .iter()
            .map(|member| regex_source(member, precedence))
            .collect::<Result<String, _>>()?,
        RuleType::Choice => {
            let alternatives = rule
                .members
                .iter()
                .map(|member| regex_source(member, precedence))
                .collect::<Result<Vec<_>, _>>()?;
            format!("(?:{})", alternatives.join("|"))
        }
        RuleType::Repeat => format!("(?:{})*", content(precedence)?),
        RuleType::Repeat1 => format!("(?:{})+", content(precedence)?),
        RuleType::Prec | RuleType::PrecLeft | RuleType::PrecRight => {
            if let Some(level) = rule.precedence() {
                *precedence = (*precedence).max(level);
            }
            content(precedence)?
        }
        RuleType::PrecDynamic
        | RuleType::Field
        | RuleType::Alias
        | RuleType::Token
        | RuleType::ImmediateToken
        | RuleType::Reserved => content(precedence)?,
        RuleType::Symbol => {
            return Err(CompileError::Unsupported(format!(
                "symbol '{}' inside a token",
                rule.symbol_name().unwrap_or_default()
            )))
        }
    })
}

/// Labels applied to every step flattened beneath a rule wrapper.
#[derive(Debug, Clone, Copy, Default)]
struct Context {
    precedence: i32,
    assoc: Assoc,
    field: FieldId,
    alias: SymbolId,
}

impl Context {
    fn step(self, symbol: SymbolId) -> Step {
        Step {
            symbol,
            precedence: self.precedence,
            assoc: self.assoc,
            field: self.field,
            alias: self.alias,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AuxKey {
    owner: SymbolId,
    kind: &'static str,
    rule: String,
    precedence: i32,
    assoc: Assoc,
}

type Alternatives = Vec<Vec<Step>>;

struct Builder {
    max_alternatives: u32,
    symbols: Vec<SymbolInfo>,
    origins: Vec<SymbolId>,
    tokens: Vec<TokenDef>,
    rule_symbols: FxHashMap<String, SymbolId>,
    literal_symbols: FxHashMap<String, SymbolId>,
    pattern_symbols: FxHashMap<(String, bool), SymbolId>,
    alias_symbols: FxHashMap<(String, bool), SymbolId>,
    aux_symbols: FxHashMap<AuxKey, SymbolId>,
    counters: FxHashMap<(String, &'static str), u32>,
    fields: IndexSet<String>,
    precedence_levels: FxHashMap<String, i32>,
    productions: Vec<Production>,
    extras: Vec<SymbolId>,
}

impl Builder {
    fn new(grammar: &Grammar, options: &CompileOptions) -> Self {
        let builtin = |name: &str, named| SymbolInfo {
            name: name.to_string(),
            named,
            visible: named,
            terminal: true,
        };

        // Within one ordering list, earlier names bind tighter.
        let mut precedence_levels = FxHashMap::default();
        for list in grammar.precedences.iter().flatten() {
            for (index, entry) in list.iter().enumerate() {
                let level = i32::try_from(list.len() - index).unwrap_or(i32::MAX);
                precedence_levels
                    .entry(entry.name().to_string())
                    .or_insert(level);
            }
        }

        Self {
            max_alternatives: options.max_alternatives,
            symbols: vec![builtin("end", false), builtin("ERROR", true)],
            origins: vec![END, ERROR],
            tokens: Vec::new(),
            rule_symbols: FxHashMap::default(),
            literal_symbols: FxHashMap::default(),
            pattern_symbols: FxHashMap::default(),
            alias_symbols: FxHashMap::default(),
            aux_symbols: FxHashMap::default(),
            counters: FxHashMap::default(),
            fields: IndexSet::new(),
            precedence_levels,
            productions: Vec::new(),
            extras: Vec::new(),
        }
    }

    fn add_symbol(
        &mut self,
        info: SymbolInfo,
        origin: Option<SymbolId>,
    ) -> Result<SymbolId, CompileError> {
        let id = SymbolId::try_from(self.symbols.len())
            .ok()
            .filter(|id| *id < AUGMENTED)
            .ok_or(CompileError::TooManySymbols {
                limit: usize::from(AUGMENTED),
            })?;
        self.symbols.push(info);
        self.origins.push(origin.unwrap_or(id));
        Ok(id)
    }

    fn aux_name(&mut self, owner: &str, kind: &'static str) -> String {
        let counter = self.counters.entry((owner.to_string(), kind)).or_insert(0);
        *counter += 1;
        format!("{owner}_{kind}{counter}")
    }

    fn add_token(&mut self, symbol: SymbolId, source: TokenSource) -> Result<(), CompileError> {
        let name = &self.symbols[usize::from(symbol)].name;
        let empty = match &source.literal {
            Some(literal) => literal.is_empty(),
            None => Regex::new(&format!("^(?:{})$", source.pattern))
                .map_err(|e| CompileError::InvalidPattern {
                    token: name.clone(),
                    message: e.to_string(),
                })?
                .is_match(""),
        };
        if empty {
            return Err(CompileError::EmptyToken {
                token: name.clone(),
            });
        }
        self.tokens.push(TokenDef {
            symbol,
            pattern: source.pattern,
            literal: source.literal,
            immediate: source.immediate,
            keyword: false,
            precedence: source.precedence,
        });
        Ok(())
    }

    /// A rule whose whole body is a token becomes a named terminal.
    fn named_token(&mut self, name: &str, rule: &Rule) -> Result<(), CompileError> {
        let source = TokenSource::of(rule)?;
        let symbol = self.add_symbol(
            SymbolInfo {
                name: name.to_string(),
                named: true,
                visible: !name.starts_with('_'),
                terminal: true,
            },
            None,
        )?;
        self.add_token(symbol, source)?;
        self.rule_symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    fn literal_symbol(&mut self, text: &str) -> Result<SymbolId, CompileError> {
        if let Some(symbol) = self.literal_symbols.get(text) {
            return Ok(*symbol);
        }
        let symbol = self.add_symbol(
            SymbolInfo {
                name: text.to_string(),
                named: false,
                visible: true,
                terminal: true,
            },
            None,
        )?;
        self.add_token(symbol, TokenSource::literal(text))?;
        self.literal_symbols.insert(text.to_string(), symbol);
        Ok(symbol)
    }

    /// A hidden terminal for a pattern or token written inside a larger rule.
    fn nested_token(&mut self, rule: &Rule, owner: &str) -> Result<SymbolId, CompileError> {
        if rule.rule_type == RuleType::Token {
            if let Some(text) = rule.content.as_deref().and_then(Rule::string_value) {
                return self.literal_symbol(text);
            }
        }
        let source = TokenSource::of(rule)?;
        let key = (source.pattern.clone(), source.immediate);
        if let Some(symbol) = self.pattern_symbols.get(&key) {
            return Ok(*symbol);
        }
        // Immediate literals keep their text as an anonymous, visible kind.
        let (name, visible) = match &source.literal {
            Some(text) => (text.clone(), true),
            None => (self.aux_name(owner, "token"), false),
        };
        let symbol = self.add_symbol(
            SymbolInfo {
                name,
                named: false,
                visible,
                terminal: true,
            },
            None,
        )?;
        self.add_token(symbol, source)?;
        self.pattern_symbols.insert(key, symbol);
        Ok(symbol)
    }

    fn collect_nested_tokens(&mut self, rule: &Rule, owner: &str) -> Result<(), CompileError> {
        match rule.rule_type {
            RuleType::String => {
                let text = rule.string_value().unwrap_or_default();
                if !text.is_empty() {
                    self.literal_symbol(text)?;
                }
            }
            RuleType::Pattern | RuleType::Token | RuleType::ImmediateToken => {
                self.nested_token(rule, owner)?;
            }
            RuleType::Symbol | RuleType::Blank => {}
            _ => {
                for child in rule.children() {
                    self.collect_nested_tokens(child, owner)?;
                }
            }
        }
        Ok(())
    }

    fn extra(&mut self, rule: &Rule) -> Result<(), CompileError> {
        let symbol = match rule.rule_type {
            RuleType::Symbol => {
                let name = rule.symbol_name().unwrap_or_default();
                match self.rule_symbols.get(name) {
                    Some(symbol) if self.symbols[usize::from(*symbol)].terminal => *symbol,
                    _ => {
                        return Err(CompileError::Unsupported(format!(
                            "non-token extra '{name}'"
                        )))
                    }
                }
            }
            RuleType::String => self.literal_symbol(rule.string_value().unwrap_or_default())?,
            _ if rule.is_lexical() => self.nested_token(rule, "extra")?,
            _ => {
                return Err(CompileError::Unsupported(format!(
                    "non-token extra of type {}",
                    rule.type_name()
                )))
            }
        };
        if !self.extras.contains(&symbol) {
            self.extras.push(symbol);
        }
        Ok(())
    }

    fn field_id(&mut self, name: &str) -> Result<FieldId, CompileError> {
        let (index, _) = self.fields.insert_full(name.to_string());
        FieldId::try_from(index + 1).map_err(|_| CompileError::TooManySymbols {
            limit: usize::from(FieldId::MAX),
        })
    }

    fn precedence_level(&self, rule: &Rule, owner: SymbolId) -> Result<i32, CompileError> {
        match &rule.value {
            Some(RuleValue::Integer(level)) => Ok(*level),
            Some(RuleValue::String(name)) => self
                .precedence_levels
                .get(name)
                .copied()
                .ok_or_else(|| {
                    ValidationError::UnknownPrecedence {
                        name: name.clone(),
                        rule: self.symbols[usize::from(owner)].name.clone(),
                    }
                    .into()
                }),
            None => Ok(0),
        }
    }

    /// The kind an `ALIAS` renames to, reusing a visible symbol of the same name.
    fn alias_symbol(&mut self, name: &str, named: bool) -> Result<SymbolId, CompileError> {
        let key = (name.to_string(), named);
        if let Some(symbol) = self.alias_symbols.get(&key) {
            return Ok(*symbol);
        }
        let existing = self
            .symbols
            .iter()
            .position(|s| s.name == name && s.named == named && s.visible)
            .and_then(|i| SymbolId::try_from(i).ok());
        let symbol = match existing {
            Some(symbol) => symbol,
            None => self.add_symbol(
                SymbolInfo {
                    name: name.to_string(),
                    named,
                    visible: true,
                    terminal: false,
                },
                None,
            )?,
        };
        self.alias_symbols.insert(key, symbol);
        Ok(symbol)
    }

    fn check_alternatives(&self, count: usize, owner: SymbolId) -> Result<(), CompileError> {
        if count > self.max_alternatives as usize {
            return Err(CompileError::TooManyAlternatives {
                rule: self.symbols[usize::from(owner)].name.clone(),
                limit: self.max_alternatives,
            });
        }
        Ok(())
    }

    fn flatten(
        &mut self,
        rule: &Rule,
        context: Context,
        owner: SymbolId,
    ) -> Result<Alternatives, CompileError> {
        let content = rule.content.as_deref();
        match rule.rule_type {
            RuleType::Blank => Ok(vec![Vec::new()]),
            RuleType::String => {
                let text = rule.string_value().unwrap_or_default();
                if text.is_empty() {
                    return Ok(vec![Vec::new()]);
                }
                Ok(vec![vec![context.step(self.literal_symbol(text)?)]])
            }
            RuleType::Pattern | RuleType::Token | RuleType::ImmediateToken => {
                let owner_name = self.symbols[usize::from(owner)].name.clone();
                Ok(vec![vec![context.step(self.nested_token(rule, &owner_name)?)]])
            }
            RuleType::Symbol => {
                let name = rule.symbol_name().unwrap_or_default();
                let symbol = self.rule_symbols.get(name).copied().ok_or_else(|| {
                    ValidationError::UndefinedSymbol {
                        symbol: name.to_string(),
                        rule: self.symbols[usize::from(owner)].name.clone(),
                    }
                })?;
                Ok(vec![vec![context.step(symbol)]])
            }
            RuleType::Seq => {
                let mut result: Alternatives = vec![Vec::new()];
                for member in &rule.members {
                    let tails = self.flatten(member, context, owner)?;
                    self.check_alternatives(result.len() * tails.len(), owner)?;
                    let mut next = Vec::with_capacity(result.len() * tails.len());
                    for head in &result {
                        for tail in &tails {
                            let mut steps = head.clone();
                            steps.extend_from_slice(tail);
                            next.push(steps);
                        }
                    }
                    result = next;
                }
                Ok(result)
            }
            RuleType::Choice => {
                let mut result: IndexSet<Vec<Step>> = IndexSet::new();
                for member in &rule.members {
                    result.extend(self.flatten(member, context, owner)?);
                    self.check_alternatives(result.len(), owner)?;
                }
                Ok(result.into_iter().collect())
            }
            RuleType::Repeat | RuleType::Repeat1 => {
                let Some(content) = content else {
                    return Ok(vec![Vec::new()]);
                };
                let helper = self.repeat_symbol(content, context, owner)?;
                let step = context.step(helper);
                if rule.rule_type == RuleType::Repeat {
                    Ok(vec![Vec::new(), vec![step]])
                } else {
                    Ok(vec![vec![step]])
                }
            }
            RuleType::Prec | RuleType::PrecLeft | RuleType::PrecRight => {
                let precedence = self.precedence_level(rule, owner)?;
                let assoc = match rule.rule_type {
                    RuleType::PrecLeft => Assoc::Left,
                    RuleType::PrecRight => Assoc::Right,
                    _ => Assoc::None,
                };
                let context = Context {
                    precedence,
                    assoc,
                    ..context
                };
                self.flatten_content(content, context, owner)
            }
            RuleType::PrecDynamic | RuleType::Reserved => {
                self.flatten_content(content, context, owner)
            }
            RuleType::Field => {
                let field = self.field_id(rule.name.as_deref().unwrap_or_default())?;
                self.flatten_content(content, Context { field, ..context }, owner)
            }
            RuleType::Alias => {
                let alias =
                    self.alias_symbol(rule.alias_value().unwrap_or_default(), rule.named == Some(true))?;
                let aliased = Context { alias, ..context };
                match content {
                    Some(content) if is_single_step(content) => {
                        self.flatten(content, aliased, owner)
                    }
                    Some(content) => {
                        let helper = self.helper_symbol("alias", content, context, owner)?;
                        Ok(vec![vec![aliased.step(helper)]])
                    }
                    None => Ok(vec![Vec::new()]),
                }
            }
        }
    }

    fn flatten_content(
        &mut self,
        content: Option<&Rule>,
        context: Context,
        owner: SymbolId,
    ) -> Result<Alternatives, CompileError> {
        match content {
            Some(content) => self.flatten(content, context, owner),
            None => Ok(vec![Vec::new()]),
        }
    }

    /// A hidden rule `helper -> helper content | content`.
    fn repeat_symbol(
        &mut self,
        content: &Rule,
        context: Context,
        owner: SymbolId,
    ) -> Result<SymbolId, CompileError> {
        let key = aux_key("repeat", content, context, owner);
        if let Some(symbol) = self.aux_symbols.get(&key) {
            return Ok(*symbol);
        }
        let helper = self.new_helper("repeat", owner)?;
        self.aux_symbols.insert(key, helper);

        let inner = Context {
            field: NO_FIELD,
            alias: NO_ALIAS,
            ..context
        };
        let alternatives = self.flatten(content, inner, owner)?;
        let head = inner.step(helper);
        let mut productions = Vec::with_capacity(alternatives.len() * 2);
        for alternative in &alternatives {
            let mut steps = Vec::with_capacity(alternative.len() + 1);
            steps.push(head);
            steps.extend_from_slice(alternative);
            productions.push(steps);
        }
        productions.extend(alternatives);
        self.add_productions(helper, productions)?;
        Ok(helper)
    }

    /// A hidden rule deriving exactly `content`.
    fn helper_symbol(
        &mut self,
        kind: &'static str,
        content: &Rule,
        context: Context,
        owner: SymbolId,
    ) -> Result<SymbolId, CompileError> {
        let key = aux_key(kind, content, context, owner);
        if let Some(symbol) = self.aux_symbols.get(&key) {
            return Ok(*symbol);
        }
        let helper = self.new_helper(kind, owner)?;
        self.aux_symbols.insert(key, helper);
        let inner = Context {
            field: NO_FIELD,
            alias: NO_ALIAS,
            ..context
        };
        let alternatives = self.flatten(content, inner, owner)?;
        self.add_productions(helper, alternatives)?;
        Ok(helper)
    }

    fn new_helper(&mut self, kind: &'static str, owner: SymbolId) -> Result<SymbolId, CompileError> {
        let owner_name = self.symbols[usize::from(owner)].name.clone();
        let name = self.aux_name(&owner_name, kind);
        self.add_symbol(
            SymbolInfo {
                name,
                named: false,
                visible: false,
                terminal: false,
            },
            Some(self.origins[usize::from(owner)]),
        )
    }

    fn add_productions(&mut self, lhs: SymbolId, alternatives: Alternatives) -> Result<(), CompileError> {
        let unique: IndexSet<Vec<Step>> = alternatives.into_iter().collect();
        for steps in unique {
            if u16::try_from(steps.len()).is_err() {
                return Err(CompileError::Unsupported(format!(
                    "production of '{}' is too long",
                    self.symbols[usize::from(lhs)].name
                )));
            }
            self.productions.push(Production { lhs, steps });
        }
        Ok(())
    }

    fn mark_keywords(&mut self, word: SymbolId) -> Result<(), CompileError> {
        let Some(pattern) = self
            .tokens
            .iter()
            .find(|t| t.symbol == word)
            .map(|t| t.pattern.clone())
        else {
            return Ok(());
        };
        let word_regex =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| CompileError::InvalidPattern {
                token: self.symbols[usize::from(word)].name.clone(),
                message: e.to_string(),
            })?;
        for token in &mut self.tokens {
            if token.symbol != word
                && token
                    .literal
                    .as_deref()
                    .is_some_and(|literal| word_regex.is_match(literal))
            {
                token.keyword = true;
            }
        }
        Ok(())
    }

    fn finish(mut self, grammar: &Grammar, start: &str) -> Result<PreparedGrammar, CompileError> {
        let start = self.rule_symbols.get(start).copied().ok_or_else(|| {
            ValidationError::UndefinedSymbol {
                symbol: start.to_string(),
                rule: "start".to_string(),
            }
        })?;

        let mut recovery = Vec::new();
        for name in grammar.recovery.iter().flatten() {
            let symbol = self
                .rule_symbols
                .get(name)
                .copied()
                .filter(|s| self.symbols[usize::from(*s)].terminal)
                .or_else(|| self.literal_symbols.get(name).copied())
                .ok_or_else(|| CompileError::UnknownRecoveryToken(name.clone()))?;
            if !recovery.contains(&symbol) {
                recovery.push(symbol);
            }
        }

        let word = match &grammar.word {
            Some(name) => {
                let symbol = self
                    .rule_symbols
                    .get(name)
                    .copied()
                    .filter(|s| self.symbols[usize::from(*s)].terminal)
                    .ok_or_else(|| CompileError::InvalidWord(name.clone()))?;
                self.mark_keywords(symbol)?;
                Some(symbol)
            }
            None => None,
        };

        self.tokens.sort_by_key(|t| t.symbol);
        let augmented = Production {
            lhs: AUGMENTED,
            steps: vec![Context::default().step(start)],
        };
        self.productions.insert(0, augmented);

        Ok(PreparedGrammar {
            name: grammar.name.clone(),
            symbols: self.symbols,
            origins: self.origins,
            tokens: self.tokens,
            fields: self.fields.into_iter().collect(),
            productions: self.productions,
            start,
            extras: self.extras,
            recovery,
            word,
        })
    }
}

fn aux_key(kind: &'static str, content: &Rule, context: Context, owner: SymbolId) -> AuxKey {
    AuxKey {
        owner,
        kind,
        rule: format!("{content:?}"),
        precedence: context.precedence,
        assoc: context.assoc,
    }
}

/// Rules that flatten to exactly one step.
fn is_single_step(rule: &Rule) -> bool {
    match rule.rule_type {
        RuleType::Symbol | RuleType::Pattern | RuleType::Token | RuleType::ImmediateToken => true,
        RuleType::String => rule.string_value().is_some_and(|s| !s.is_empty()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn prepared(grammar: &Grammar) -> PreparedGrammar {
        prepare(grammar, &CompileOptions::default()).unwrap()
    }

    fn find(prepared: &PreparedGrammar, name: &str) -> SymbolId {
        let index = prepared.symbols.iter().position(|s| s.name == name).unwrap();
        SymbolId::try_from(index).unwrap()
    }

    #[test]
    fn test_symbol_layout() {
        let prepared = prepared(&sum());
        let names: Vec<&str> = prepared.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["end", "ERROR", "number", "+", "extra_token1", "expr", "expr_repeat1"]
        );
        let repeat = &prepared.symbols[6];
        assert!(!repeat.visible && !repeat.terminal);
        assert_eq!(prepared.rule_name(6), "expr");
        assert_eq!(prepared.extras, vec![4]);
        assert_eq!(prepared.start, 5);
    }

    #[test]
    fn test_repeat_is_left_recursive() {
        let prepared = prepared(&sum());
        let repeat = find(&prepared, "expr_repeat1");
        let bodies: Vec<Vec<SymbolId>> = prepared
            .productions
            .iter()
            .filter(|p| p.lhs == repeat)
            .map(|p| p.steps.iter().map(|s| s.symbol).collect())
            .collect();
        assert_eq!(bodies, vec![vec![repeat, 3, 2], vec![3, 2]]);

        let expr: Vec<usize> = prepared
            .productions
            .iter()
            .filter(|p| p.lhs == prepared.start)
            .map(|p| p.steps.len())
            .collect();
        assert_eq!(expr, vec![1, 2]);
        assert_eq!(prepared.productions[0].lhs, AUGMENTED);
    }

    #[test]
    fn test_inline_rules_are_substituted() {
        let grammar = Grammar::new("inline")
            .rule("expr", Rule::seq([Rule::symbol("_atom"), Rule::string(";")]))
            .rule("_atom", Rule::choice([Rule::string("a"), Rule::string("b")]))
            .inline("_atom");
        let prepared = prepared(&grammar);
        assert!(prepared.symbols.iter().all(|s| s.name != "_atom"));
        assert_eq!(prepared.productions.len(), 3);
    }

    #[test]
    fn test_inline_recursion_is_rejected() {
        let grammar = Grammar::new("loop")
            .rule("expr", Rule::symbol("_a"))
            .rule("_a", Rule::choice([Rule::string("x"), Rule::seq([Rule::string("("), Rule::symbol("_a")])]))
            .inline("_a");
        assert_eq!(
            prepare(&grammar, &CompileOptions::default()).unwrap_err(),
            CompileError::InlineRecursion {
                rule: "_a".to_string()
            }
        );
    }

    #[test]
    fn test_token_checks() {
        let empty = Grammar::new("empty").rule("expr", Rule::seq([Rule::pattern("a*"), Rule::string("b")]));
        assert_eq!(
            prepare(&empty, &CompileOptions::default()).unwrap_err(),
            CompileError::EmptyToken {
                token: "expr_token1".to_string()
            }
        );

        let invalid = Grammar::new("bad").rule("expr", Rule::seq([Rule::pattern("("), Rule::string("b")]));
        assert!(matches!(
            prepare(&invalid, &CompileOptions::default()),
            Err(CompileError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_keywords_follow_the_word_rule() {
        let grammar = Grammar::new("kw")
            .rule(
                "stmt",
                Rule::choice([
                    Rule::seq([Rule::string("let"), Rule::symbol("identifier")]),
                    Rule::string("+"),
                ]),
            )
            .rule("identifier", Rule::pattern("[a-z]+"))
            .word("identifier");
        let prepared = prepared(&grammar);
        let keyword = |text: &str| {
            prepared
                .tokens
                .iter()
                .find(|t| t.literal.as_deref() == Some(text))
                .unwrap()
                .keyword
        };
        assert!(keyword("let"));
        assert!(!keyword("+"));
        assert_eq!(prepared.word, Some(find(&prepared, "identifier")));
    }

    #[test]
    fn test_fields_aliases_and_precedence() {
        let grammar = Grammar::new("labels")
            .rule(
                "binary",
                Rule::prec_left(
                    2,
                    Rule::seq([
                        Rule::field("left", Rule::symbol("atom")),
                        Rule::alias(Rule::string("+"), "plus", true),
                        Rule::field("right", Rule::symbol("atom")),
                    ]),
                ),
            )
            .rule("atom", Rule::pattern("[0-9]+"));
        let prepared = prepared(&grammar);
        assert_eq!(prepared.fields, vec!["left".to_string(), "right".to_string()]);
        let production = &prepared.productions[1];
        assert_eq!(
            production.steps.iter().map(|s| s.field).collect::<Vec<_>>(),
            vec![1, 0, 2]
        );
        let plus = find(&prepared, "plus");
        assert_eq!(production.steps[1].alias, plus);
        assert!(production
            .steps
            .iter()
            .all(|s| s.precedence == 2 && s.assoc == Assoc::Left));
    }

    #[test]
    fn test_unknown_recovery_token() {
        let grammar = sum().recovery(";");
        assert_eq!(
            prepare(&grammar, &CompileOptions::default()).unwrap_err(),
            CompileError::UnknownRecoveryToken(";".to_string())
        );
        let prepared = prepared(&sum().recovery("+"));
        assert_eq!(prepared.recovery, vec![3]);
    }
}
