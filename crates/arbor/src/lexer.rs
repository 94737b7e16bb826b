//! Context-aware tokenization.
//!
//! The lexer only considers terminals the parser can act on in the current
//! lexing state, plus the extras. When none of them matches it retries with
//! every terminal, and finally turns a run of unrecognized characters into an
//! `ERROR` token so that the parser always makes progress.

use std::cmp::Reverse;

use crate::language::{Language, TokenMatcher};
use crate::table::{StateId, SymbolId, END, ERROR};

/// One lexed token. Positions are byte offsets into the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token {
    pub symbol: SymbolId,
    pub start: usize,
    pub len: usize,
}

impl Token {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

pub(crate) struct Lexer<'a> {
    language: &'a Language,
    text: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(language: &'a Language, text: &'a str) -> Self {
        Self { language, text }
    }

    /// The token at `pos` among those valid in `state`, falling back to
    /// [`Lexer::lex_any`].
    pub fn lex(&self, state: StateId, pos: usize, after_extra: bool) -> Token {
        if pos >= self.text.len() {
            return self.end_token();
        }
        let table = self.language.table();
        let candidates = table
            .valid_terminals(state)
            .iter()
            .map(|entry| entry.symbol)
            .chain(table.extras.iter().copied())
            .filter_map(|symbol| self.language.matcher(symbol));
        self.best(candidates, pos, after_extra)
            .unwrap_or_else(|| self.lex_any(pos, after_extra))
    }

    /// The token at `pos` among all terminals, used when the context offers
    /// nothing and during error recovery.
    pub fn lex_any(&self, pos: usize, after_extra: bool) -> Token {
        if pos >= self.text.len() {
            return self.end_token();
        }
        if let Some(token) = self.best(self.language.matchers(), pos, after_extra) {
            return token;
        }

        let mut end = pos + self.char_len(pos);
        while end < self.text.len() && self.best(self.language.matchers(), end, false).is_none() {
            end += self.char_len(end);
        }
        Token {
            symbol: ERROR,
            start: pos,
            len: end - pos,
        }
    }

    fn end_token(&self) -> Token {
        Token {
            symbol: END,
            start: self.text.len(),
            len: 0,
        }
    }

    fn char_len(&self, pos: usize) -> usize {
        self.text
            .get(pos..)
            .and_then(|rest| rest.chars().next())
            .map_or(1, char::len_utf8)
    }

    /// Longest match wins, then token precedence, then literals over
    /// patterns, then the lower symbol id.
    fn best<'m>(
        &self,
        candidates: impl Iterator<Item = &'m TokenMatcher>,
        pos: usize,
        after_extra: bool,
    ) -> Option<Token> {
        let rest = self.text.get(pos..)?;
        candidates
            .filter(|matcher| !(after_extra && matcher.immediate))
            .filter_map(|matcher| {
                let len = matcher.matcher.match_len(rest).filter(|&len| len > 0)?;
                if matcher.keyword && !self.word_matches(rest, len) {
                    return None;
                }
                Some((len, matcher.precedence, matcher.is_literal(), Reverse(matcher.symbol)))
            })
            .max()
            .map(|(len, _, _, Reverse(symbol))| Token {
                symbol,
                start: pos,
                len,
            })
    }

    /// A keyword only matches where the word token matches the same text.
    fn word_matches(&self, rest: &str, len: usize) -> bool {
        self.language
            .table()
            .word
            .and_then(|word| self.language.matcher(word))
            .is_some_and(|word| word.matcher.match_len(rest) == Some(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::grammar::{Grammar, Rule};

    fn language(grammar: &Grammar) -> Language {
        Language::from_compiled(compile(grammar).unwrap()).unwrap()
    }

    fn keywords() -> Language {
        language(
            &Grammar::new("kw")
                .rule(
                    "program",
                    Rule::repeat(Rule::choice([
                        Rule::seq([Rule::string("if"), Rule::symbol("identifier")]),
                        Rule::symbol("identifier"),
                    ])),
                )
                .rule("identifier", Rule::pattern("[a-z]+"))
                .extra(Rule::pattern(r"\s"))
                .word("identifier"),
        )
    }

    fn symbol(language: &Language, name: &str, named: bool) -> SymbolId {
        language.table().symbol_for_name(name, named).unwrap()
    }

    #[test]
    fn test_keyword_needs_whole_word() {
        let language = keywords();
        let lexer = Lexer::new(&language, "if iffy");
        let keyword = lexer.lex(0, 0, false);
        assert_eq!(keyword.symbol, symbol(&language, "if", false));
        assert_eq!(keyword.len, 2);

        let word = lexer.lex(0, 3, true);
        assert_eq!(word.symbol, symbol(&language, "identifier", true));
        assert_eq!(word.len, 4);
    }

    #[test]
    fn test_unknown_characters_become_one_error_token() {
        let language = keywords();
        let lexer = Lexer::new(&language, "§§ab");
        let token = lexer.lex(0, 0, false);
        assert_eq!(token.symbol, ERROR);
        assert_eq!((token.start, token.len), (0, 4));
        assert_eq!(lexer.lex(0, 4, false).symbol, symbol(&language, "identifier", true));
        assert_eq!(lexer.lex(0, 6, false).symbol, END);
    }

    #[test]
    fn test_immediate_tokens_do_not_follow_extras() {
        let language = language(
            &Grammar::new("imm")
                .rule(
                    "call",
                    Rule::seq([
                        Rule::symbol("name"),
                        Rule::optional(Rule::immediate_token(Rule::string("("))),
                        Rule::optional(Rule::string("(")),
                    ]),
                )
                .rule("name", Rule::pattern("[a-z]+"))
                .extra(Rule::pattern(" ")),
        );
        let lexer = Lexer::new(&language, "f(");
        let tight = lexer.lex_any(1, false);
        let loose = lexer.lex_any(1, true);
        assert_ne!(tight.symbol, loose.symbol);
        assert!(language.matcher(tight.symbol).unwrap().immediate);
        assert!(!language.matcher(loose.symbol).unwrap().immediate);
    }
}
