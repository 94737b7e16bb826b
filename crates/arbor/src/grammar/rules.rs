//! Core types for representing grammar rules.
//!
//! Rules follow the tree-sitter `grammar.json` schema: every rule is a tagged
//! object whose `type` selects which of the optional fields are meaningful.
//! The constructors on [`Rule`] mirror the `grammar.js` DSL (`seq`, `choice`,
//! `repeat`, `prec.left`, ...) so grammars can also be written in Rust.

use facet::Facet;

/// Represents a grammar rule in the tree-sitter format.
///
/// Each rule corresponds to a node in the grammar's rule graph, identified by a
/// [`RuleType`] and containing type-specific fields such as `members` or
/// `content`.
///
/// A `Rule` can be atomic (like a literal or regex) or composite
/// (like a sequence, choice, or precedence group). Together, they
/// form a self-describing syntax graph.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct Rule {
    /// The discriminant identifying what kind of rule this is.
    #[facet(rename = "type")]
    pub rule_type: RuleType,

    /// Literal text, pattern source, precedence level or alias name,
    /// depending on rule kind.
    #[facet(default)]
    pub value: Option<RuleValue>,

    /// Name used by `SYMBOL` and `FIELD` rules.
    #[facet(default)]
    pub name: Option<String>,

    /// Nested rule for unary constructs such as `REPEAT` or `PREC`.
    #[facet(default)]
    pub content: Option<Box<Rule>>,

    /// Child rules for compound constructs (`SEQ`, `CHOICE`).
    #[facet(default)]
    pub members: Vec<Rule>,

    /// Whether the node produced by an `ALIAS` is named.
    #[facet(default)]
    pub named: Option<bool>,

    /// Regex flags for `PATTERN` rules (only `i` is honoured).
    #[facet(default)]
    pub flags: Option<String>,

    /// Context label used for reserved-word handling.
    #[facet(default)]
    pub context_name: Option<String>,
}

/// A literal or numeric value attached to a rule node.
///
/// `RuleValue` abstracts small scalar payloads that alter how a rule behaves,
/// such as precedence numbers or literal match text.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
#[repr(u8)]
pub enum RuleValue {
    /// A string literal value (e.g. `"+"`, `"if"`) or a named precedence.
    String(String),

    /// An integer numeric value (used by precedence modifiers).
    Integer(i32),
}

/// The enumeration of all recognized rule types.
///
/// Each variant corresponds to one of the `type` strings found in the JSON
/// grammar format. Each variant captures a syntactic combinator, a primitive
/// operation composed to define language structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
#[repr(u8)]
pub enum RuleType {
    /// An empty (ε) production.
    #[facet(rename = "BLANK")]
    Blank,
    /// A literal string token.
    #[facet(rename = "STRING")]
    String,
    /// A regular-expression pattern token.
    #[facet(rename = "PATTERN")]
    Pattern,
    /// A reference to another named rule.
    #[facet(rename = "SYMBOL")]
    Symbol,
    /// A rule that matches one of several alternatives.
    #[facet(rename = "CHOICE")]
    Choice,
    /// A sequential composition of member rules.
    #[facet(rename = "SEQ")]
    Seq,
    /// A zero-or-more repetition of a rule.
    #[facet(rename = "REPEAT")]
    Repeat,
    /// A one-or-more repetition of a rule.
    #[facet(rename = "REPEAT1")]
    Repeat1,
    /// A generic precedence wrapper.
    #[facet(rename = "PREC")]
    Prec,
    /// A left-associative precedence wrapper.
    #[facet(rename = "PREC_LEFT")]
    PrecLeft,
    /// A right-associative precedence wrapper.
    #[facet(rename = "PREC_RIGHT")]
    PrecRight,
    /// A dynamic (runtime) precedence wrapper.
    #[facet(rename = "PREC_DYNAMIC")]
    PrecDynamic,
    /// A named field applied to a subrule.
    #[facet(rename = "FIELD")]
    Field,
    /// An alias providing an alternate node name.
    #[facet(rename = "ALIAS")]
    Alias,
    /// A tokenization wrapper.
    #[facet(rename = "TOKEN")]
    Token,
    /// A token that must appear immediately without leading trivia.
    #[facet(rename = "IMMEDIATE_TOKEN")]
    ImmediateToken,
    /// A reserved-word context wrapper.
    #[facet(rename = "RESERVED")]
    Reserved,
}

impl Rule {
    fn bare(rule_type: RuleType) -> Self {
        Self {
            rule_type,
            value: None,
            name: None,
            content: None,
            members: Vec::new(),
            named: None,
            flags: None,
            context_name: None,
        }
    }

    fn wrap(rule_type: RuleType, value: Option<RuleValue>, content: Rule) -> Self {
        Self {
            value,
            content: Some(Box::new(content)),
            ..Self::bare(rule_type)
        }
    }

    /// The empty rule.
    #[must_use]
    pub fn blank() -> Self {
        Self::bare(RuleType::Blank)
    }

    /// A literal token.
    #[must_use]
    pub fn string(text: impl Into<String>) -> Self {
        Self {
            value: Some(RuleValue::String(text.into())),
            ..Self::bare(RuleType::String)
        }
    }

    /// A regular-expression token.
    #[must_use]
    pub fn pattern(source: impl Into<String>) -> Self {
        Self {
            value: Some(RuleValue::String(source.into())),
            ..Self::bare(RuleType::Pattern)
        }
    }

    /// A reference to the rule called `name`.
    #[must_use]
    pub fn symbol(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::bare(RuleType::Symbol)
        }
    }

    /// Matches `members` one after the other.
    #[must_use]
    pub fn seq(members: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            members: members.into_iter().collect(),
            ..Self::bare(RuleType::Seq)
        }
    }

    /// Matches any one of `members`.
    #[must_use]
    pub fn choice(members: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            members: members.into_iter().collect(),
            ..Self::bare(RuleType::Choice)
        }
    }

    /// `content` or nothing, as `optional()` in `grammar.js`.
    #[must_use]
    pub fn optional(content: Rule) -> Self {
        Self::choice([content, Self::blank()])
    }

    /// Zero or more `content`.
    #[must_use]
    pub fn repeat(content: Rule) -> Self {
        Self::wrap(RuleType::Repeat, None, content)
    }

    /// One or more `content`.
    #[must_use]
    pub fn repeat1(content: Rule) -> Self {
        Self::wrap(RuleType::Repeat1, None, content)
    }

    /// Non-associative precedence.
    #[must_use]
    pub fn prec(level: i32, content: Rule) -> Self {
        Self::wrap(RuleType::Prec, Some(RuleValue::Integer(level)), content)
    }

    /// Left-associative precedence.
    #[must_use]
    pub fn prec_left(level: i32, content: Rule) -> Self {
        Self::wrap(RuleType::PrecLeft, Some(RuleValue::Integer(level)), content)
    }

    /// Right-associative precedence.
    #[must_use]
    pub fn prec_right(level: i32, content: Rule) -> Self {
        Self::wrap(RuleType::PrecRight, Some(RuleValue::Integer(level)), content)
    }

    /// Precedence referring to a level declared in the grammar's `precedences`.
    #[must_use]
    pub fn prec_named(rule_type: RuleType, level: impl Into<String>, content: Rule) -> Self {
        Self::wrap(rule_type, Some(RuleValue::String(level.into())), content)
    }

    /// Labels `content` with the field `name`.
    #[must_use]
    pub fn field(name: impl Into<String>, content: Rule) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::wrap(RuleType::Field, None, content)
        }
    }

    /// Renames the node produced by `content`.
    #[must_use]
    pub fn alias(content: Rule, name: impl Into<String>, named: bool) -> Self {
        Self {
            named: Some(named),
            ..Self::wrap(RuleType::Alias, Some(RuleValue::String(name.into())), content)
        }
    }

    /// Collapses `content` into a single token.
    #[must_use]
    pub fn token(content: Rule) -> Self {
        Self::wrap(RuleType::Token, None, content)
    }

    /// Like [`Rule::token`], but the token may not follow extras.
    #[must_use]
    pub fn immediate_token(content: Rule) -> Self {
        Self::wrap(RuleType::ImmediateToken, None, content)
    }

    /// Returns the canonical string name of this rule type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.rule_type {
            RuleType::Blank => "BLANK",
            RuleType::String => "STRING",
            RuleType::Pattern => "PATTERN",
            RuleType::Symbol => "SYMBOL",
            RuleType::Choice => "CHOICE",
            RuleType::Seq => "SEQ",
            RuleType::Repeat => "REPEAT",
            RuleType::Repeat1 => "REPEAT1",
            RuleType::Prec => "PREC",
            RuleType::PrecLeft => "PREC_LEFT",
            RuleType::PrecRight => "PREC_RIGHT",
            RuleType::PrecDynamic => "PREC_DYNAMIC",
            RuleType::Field => "FIELD",
            RuleType::Alias => "ALIAS",
            RuleType::Token => "TOKEN",
            RuleType::ImmediateToken => "IMMEDIATE_TOKEN",
            RuleType::Reserved => "RESERVED",
        }
    }

    /// Returns `true` if this rule represents a terminal (lexical) token.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.rule_type, RuleType::String | RuleType::Pattern)
    }

    /// Returns `true` if this rule is a symbol reference.
    #[must_use]
    pub fn is_symbol(&self) -> bool {
        matches!(self.rule_type, RuleType::Symbol)
    }

    /// Returns `true` for the precedence wrappers.
    #[must_use]
    pub fn is_prec(&self) -> bool {
        matches!(
            self.rule_type,
            RuleType::Prec | RuleType::PrecLeft | RuleType::PrecRight | RuleType::PrecDynamic
        )
    }

    /// Returns the referenced symbol name, if applicable.
    #[must_use]
    pub fn symbol_name(&self) -> Option<&str> {
        if self.is_symbol() {
            self.name.as_deref()
        } else {
            None
        }
    }

    /// Returns the numeric precedence value if this rule is a precedence wrapper.
    #[must_use]
    pub fn precedence(&self) -> Option<i32> {
        if self.is_prec() {
            self.value.as_ref().and_then(|v| match v {
                RuleValue::Integer(i) => Some(*i),
                RuleValue::String(_) => None,
            })
        } else {
            None
        }
    }

    /// Returns the precedence name if this wrapper uses a named level.
    #[must_use]
    pub fn precedence_name(&self) -> Option<&str> {
        if self.is_prec() {
            self.value.as_ref().and_then(|v| match v {
                RuleValue::String(s) => Some(s.as_str()),
                RuleValue::Integer(_) => None,
            })
        } else {
            None
        }
    }

    /// Returns the literal string value if this is a `STRING` rule.
    #[must_use]
    pub fn string_value(&self) -> Option<&str> {
        if matches!(self.rule_type, RuleType::String) {
            self.text_value()
        } else {
            None
        }
    }

    /// Returns the pattern source if this is a `PATTERN` rule.
    #[must_use]
    pub fn pattern_value(&self) -> Option<&str> {
        if matches!(self.rule_type, RuleType::Pattern) {
            self.text_value()
        } else {
            None
        }
    }

    /// Returns the alias name if this is an `ALIAS` rule.
    #[must_use]
    pub fn alias_value(&self) -> Option<&str> {
        if matches!(self.rule_type, RuleType::Alias) {
            self.text_value()
        } else {
            None
        }
    }

    fn text_value(&self) -> Option<&str> {
        self.value.as_ref().and_then(|v| match v {
            RuleValue::String(s) => Some(s.as_str()),
            RuleValue::Integer(_) => None,
        })
    }

    /// The nested rules of this rule, whatever its kind.
    pub fn children(&self) -> impl Iterator<Item = &Rule> {
        self.content.as_deref().into_iter().chain(self.members.iter())
    }

    /// Returns `true` if no `SYMBOL` occurs anywhere inside this rule.
    #[must_use]
    pub fn is_lexical(&self) -> bool {
        !self.is_symbol() && self.children().all(Rule::is_lexical)
    }
}
