//! Lexer for FunLang source text.
//!
//! The lexer walks the source one character at a time, classifying the
//! character under the cursor. It is stateless beyond the cursor and
//! the injected keyword table; errors abort tokenization immediately
//! and a terminal `Eof` token is appended to every successful result.

use crate::error::{Diagnostic, ErrorKind};
use crate::span::{Position, Span};
use crate::token::{LangConfig, Token, TokenKind, TokenValue};

/// Lex a source string into tokens.
pub fn tokenize(
    file: &str,
    source: &str,
    config: &LangConfig,
) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer {
        file,
        config,
        chars: source.chars().collect(),
        pos: Position::default(),
    };
    lexer.run()
}

struct Lexer<'a> {
    file: &'a str,
    config: &'a LangConfig,
    chars: Vec<char>,
    pos: Position,
}

impl<'a> Lexer<'a> {
    fn run(&mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
                continue;
            }

            if ch.is_alphabetic() || ch == '_' {
                tokens.push(self.read_identifier());
                continue;
            }
            if ch.is_ascii_digit() {
                tokens.push(self.read_number());
                continue;
            }

            let start = self.pos;
            let token = match ch {
                '"' => self.read_string()?,
                '!' => {
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        self.simple(TokenKind::NotEq, start)
                    } else {
                        return Err(self.error(
                            ErrorKind::IllegalCharacter,
                            "Expected '=' after '!'",
                            start,
                        ));
                    }
                }
                '=' => self.one_or_two(TokenKind::Equals, '=', TokenKind::EqEq),
                '<' => self.one_or_two(TokenKind::Lt, '=', TokenKind::Lte),
                '>' => self.one_or_two(TokenKind::Gt, '=', TokenKind::Gte),
                '-' => self.one_or_two(TokenKind::Minus, '>', TokenKind::Arrow),
                '+' => self.single(TokenKind::Plus),
                '*' => self.single(TokenKind::Star),
                '/' => self.single(TokenKind::Slash),
                '^' => self.single(TokenKind::Caret),
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ',' => self.single(TokenKind::Comma),
                ';' => self.single(TokenKind::Semicolon),
                other => {
                    return Err(self.error(
                        ErrorKind::IllegalCharacter,
                        other.to_string(),
                        start,
                    ));
                }
            };
            tokens.push(token);
        }

        let end = Span::new(self.pos, self.pos);
        tokens.push(Token::new(TokenKind::Eof, None, end));
        Ok(tokens)
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.pos;
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let span = Span::new(start, self.pos);

        // Keyword spellings win; builtins lex as ordinary identifiers
        // and resolve through the global scope downstream.
        if let Some(kind) = self.config.keyword_kind(&text) {
            return Token::new(kind, Some(TokenValue::Str(text)), span);
        }
        Token::new(TokenKind::Ident, Some(TokenValue::Str(text)), span)
    }

    fn read_number(&mut self) -> Token {
        let start = self.pos;
        let mut text = String::new();
        let mut dots = 0;
        while let Some(ch) = self.current() {
            if ch == '.' {
                if dots == 1 {
                    break;
                }
                dots += 1;
            } else if !ch.is_ascii_digit() {
                break;
            }
            text.push(ch);
            self.advance();
        }
        let span = Span::new(start, self.pos);

        if dots == 0 {
            // Integers that overflow i64 fall back to floats.
            match text.parse::<i64>() {
                Ok(value) => Token::new(TokenKind::Int, Some(TokenValue::Int(value)), span),
                Err(_) => {
                    let value = text.parse::<f64>().unwrap_or(f64::INFINITY);
                    Token::new(TokenKind::Float, Some(TokenValue::Float(value)), span)
                }
            }
        } else {
            let value = text.parse::<f64>().unwrap_or(0.0);
            Token::new(TokenKind::Float, Some(TokenValue::Float(value)), span)
        }
    }

    fn read_string(&mut self) -> Result<Token, Diagnostic> {
        let start = self.pos;
        self.advance(); // opening quote

        let mut text = String::new();
        let mut escaped = false;
        while let Some(ch) = self.current() {
            if escaped {
                text.push(match ch {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                escaped = false;
                self.advance();
                continue;
            }
            match ch {
                '\\' => {
                    escaped = true;
                    self.advance();
                }
                '"' => {
                    self.advance(); // closing quote
                    let span = Span::new(start, self.pos);
                    return Ok(Token::new(
                        TokenKind::Str,
                        Some(TokenValue::Str(text)),
                        span,
                    ));
                }
                other => {
                    text.push(other);
                    self.advance();
                }
            }
        }

        Err(self.error(
            ErrorKind::UnterminatedString,
            "Unterminated string literal",
            self.pos,
        ))
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        let start = self.pos;
        self.advance();
        self.simple(kind, start)
    }

    /// Emit `two` if the next character is `second`, else `one`.
    fn one_or_two(&mut self, one: TokenKind, second: char, two: TokenKind) -> Token {
        let start = self.pos;
        self.advance();
        if self.current() == Some(second) {
            self.advance();
            self.simple(two, start)
        } else {
            self.simple(one, start)
        }
    }

    fn simple(&self, kind: TokenKind, start: Position) -> Token {
        Token::new(kind, None, Span::new(start, self.pos))
    }

    fn error(&self, kind: ErrorKind, details: impl Into<String>, at: Position) -> Diagnostic {
        Diagnostic::new(kind, details, Span::new(at, self.pos), self.file)
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos.index as usize).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            self.pos.advance(ch);
        }
    }
}
