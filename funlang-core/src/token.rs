//! Token model and the keyword re-spelling table.

use std::collections::HashMap;

use crate::builtins::Builtin;
use crate::span::Span;

/// Kind of a token produced by the lexer.
///
/// This enumeration is closed: configurable keyword spellings only
/// change which identifier text maps to a keyword kind, never the set
/// of kinds the parser can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals and identifiers
    Int,
    Float,
    Str,
    Ident,

    // Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Caret,    // ^
    Equals,   // =
    EqEq,     // ==
    NotEq,    // !=
    Lt,       // <
    Gt,       // >
    Lte,      // <=
    Gte,      // >=
    Arrow,    // ->

    // Punctuation
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Comma,     // ,
    Semicolon, // ;

    // Keywords
    Fun,
    Var,
    IntType,
    FloatType,
    StringType,
    ListType,
    And,
    Or,
    Not,
    If,
    Elif,
    Else,
    For,
    While,
    Return,
    Break,
    Continue,

    Eof,
}

/// Literal payload carried by `Int`, `Float`, `Str` and `Ident` tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Int(i64),
    Float(f64),
    Str(String),
}

/// A single token with its kind, optional literal value, and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: Option<TokenValue>,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, value: Option<TokenValue>, span: Span) -> Token {
        Token { kind, value, span }
    }

    /// The identifier or string text of this token, if it has one.
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            Some(TokenValue::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// The internal identities of the re-spellable keywords, paired with
/// their token kinds. Order matches the original language definition.
const KEYWORDS: &[(&str, TokenKind)] = &[
    ("fun", TokenKind::Fun),
    ("var", TokenKind::Var),
    ("int", TokenKind::IntType),
    ("float", TokenKind::FloatType),
    ("string", TokenKind::StringType),
    ("list", TokenKind::ListType),
    ("and", TokenKind::And),
    ("or", TokenKind::Or),
    ("not", TokenKind::Not),
    ("if", TokenKind::If),
    ("elif", TokenKind::Elif),
    ("else", TokenKind::Else),
    ("for", TokenKind::For),
    ("while", TokenKind::While),
    ("return", TokenKind::Return),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
];

/// The lexer-level rename table: surface spelling to fixed token kind
/// for keywords, and surface spelling to builtin identity for the
/// builtin functions seeded into the global scope.
///
/// Collision checking between spellings is the responsibility of the
/// configuration loader; the core assumes no two spellings collide.
#[derive(Debug, Clone)]
pub struct LangConfig {
    keywords: HashMap<String, TokenKind>,
    builtins: HashMap<String, Builtin>,
}

impl Default for LangConfig {
    fn default() -> LangConfig {
        let keywords = KEYWORDS
            .iter()
            .map(|(word, kind)| (word.to_string(), *kind))
            .collect();
        let builtins = Builtin::ALL
            .iter()
            .map(|b| (b.name().to_string(), *b))
            .collect();
        LangConfig { keywords, builtins }
    }
}

impl LangConfig {
    pub fn new() -> LangConfig {
        LangConfig::default()
    }

    /// Re-spell the keyword with internal identity `internal` (for
    /// example `"fun"`) to `spelling`. Returns false if `internal`
    /// names no keyword.
    pub fn respell_keyword(&mut self, internal: &str, spelling: &str) -> bool {
        let Some((_, kind)) = KEYWORDS.iter().find(|(word, _)| *word == internal) else {
            return false;
        };
        self.keywords.retain(|_, k| k != kind);
        self.keywords.insert(spelling.to_string(), *kind);
        true
    }

    /// Re-spell the builtin with internal identity `internal` (for
    /// example `"print"`) to `spelling`. Returns false if `internal`
    /// names no builtin.
    pub fn respell_builtin(&mut self, internal: &str, spelling: &str) -> bool {
        let Some(builtin) = Builtin::ALL.iter().find(|b| b.name() == internal) else {
            return false;
        };
        self.builtins.retain(|_, b| b != builtin);
        self.builtins.insert(spelling.to_string(), *builtin);
        true
    }

    /// Token kind for a configured keyword spelling.
    pub fn keyword_kind(&self, word: &str) -> Option<TokenKind> {
        self.keywords.get(word).copied()
    }

    /// Builtin identity for a configured builtin spelling.
    pub fn builtin(&self, word: &str) -> Option<Builtin> {
        self.builtins.get(word).copied()
    }

    /// Every configured builtin spelling with its identity.
    pub fn builtins(&self) -> impl Iterator<Item = (&str, Builtin)> {
        self.builtins.iter().map(|(word, b)| (word.as_str(), *b))
    }

    /// Internal identities of every re-spellable keyword.
    pub fn keyword_internals() -> impl Iterator<Item = &'static str> {
        KEYWORDS.iter().map(|(word, _)| *word)
    }

    /// Internal identities of every re-spellable builtin.
    pub fn builtin_internals() -> impl Iterator<Item = &'static str> {
        Builtin::ALL.iter().map(|b| b.name())
    }

    /// The configured surface spelling of `builtin`, for error
    /// messages and the compiler backend.
    pub fn builtin_spelling(&self, builtin: Builtin) -> &str {
        self.builtins
            .iter()
            .find(|(_, b)| **b == builtin)
            .map(|(word, _)| word.as_str())
            .unwrap_or_else(|| builtin.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_maps_canonical_spellings() {
        let config = LangConfig::new();
        assert_eq!(config.keyword_kind("fun"), Some(TokenKind::Fun));
        assert_eq!(config.keyword_kind("elif"), Some(TokenKind::Elif));
        assert_eq!(config.builtin("print"), Some(Builtin::Print));
        assert_eq!(config.keyword_kind("banana"), None);
    }

    #[test]
    fn respelling_replaces_the_old_spelling() {
        let mut config = LangConfig::new();
        assert!(config.respell_keyword("fun", "fn"));
        assert_eq!(config.keyword_kind("fn"), Some(TokenKind::Fun));
        assert_eq!(config.keyword_kind("fun"), None);

        assert!(config.respell_builtin("print", "say"));
        assert_eq!(config.builtin("say"), Some(Builtin::Print));
        assert_eq!(config.builtin("print"), None);
        assert_eq!(config.builtin_spelling(Builtin::Print), "say");
    }

    #[test]
    fn unknown_internal_names_are_rejected() {
        let mut config = LangConfig::new();
        assert!(!config.respell_keyword("loop", "repeat"));
        assert!(!config.respell_builtin("puts", "say"));
    }
}
