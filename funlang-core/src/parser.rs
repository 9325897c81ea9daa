//! Recursive-descent parser.
//!
//! Single pass, one token of lookahead, no backtracking. The first
//! syntax error terminates parsing. Precedence, lowest to highest:
//! `var`/assignment and `and`/`or`, then `not` and comparisons, then
//! additive, multiplicative, unary sign, `^` (right-associative), call
//! application, atoms.

use std::rc::Rc;

use crate::ast::{BinOp, Expr, ExprKind, FunctionDef, Param, Program, Stmt, TypeName, UnaryOp};
use crate::error::{Diagnostic, ErrorKind};
use crate::span::Span;
use crate::token::{Token, TokenKind, TokenValue};

/// Parse a token stream into a program.
pub fn parse(file: &str, tokens: &[Token]) -> Result<Program, Diagnostic> {
    let mut parser = Parser {
        file,
        tokens,
        index: 0,
    };
    let body = parser.statements(TokenKind::Eof)?;
    Ok(Program { body })
}

struct Parser<'a> {
    file: &'a str,
    tokens: &'a [Token],
    index: usize,
}

impl<'a> Parser<'a> {
    /// Statements up to (not consuming) `terminator`. Semicolons are
    /// optional separators.
    fn statements(&mut self, terminator: TokenKind) -> Result<Vec<Stmt>, Diagnostic> {
        let mut body = Vec::new();
        loop {
            while self.current().kind == TokenKind::Semicolon {
                self.advance();
            }
            if self.current().kind == terminator {
                return Ok(body);
            }
            body.push(self.statement()?);
        }
    }

    fn statement(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Return => {
                self.advance();
                let value = match self.current().kind {
                    TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => None,
                    _ => Some(self.expression()?),
                };
                let span = match &value {
                    Some(expr) => token.span.to(expr.span),
                    None => token.span,
                };
                Ok(Stmt::Return { value, span })
            }
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::Break { span: token.span })
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::Continue { span: token.span })
            }
            _ => Ok(Stmt::Expr(self.expression()?)),
        }
    }

    fn expression(&mut self) -> Result<Expr, Diagnostic> {
        match self.current().kind {
            TokenKind::Var => self.var_decl(),
            // One token of lookahead separates assignment from every
            // other identifier-headed expression.
            TokenKind::Ident if self.peek_kind() == TokenKind::Equals => {
                let name_token = self.current().clone();
                let name = name_token.text().unwrap_or_default().to_string();
                self.advance(); // identifier
                self.advance(); // '='
                let value = self.expression()?;
                let span = name_token.span.to(value.span);
                Ok(Expr::new(
                    ExprKind::Assign {
                        name,
                        value: Box::new(value),
                    },
                    span,
                ))
            }
            _ => self.logic(),
        }
    }

    fn var_decl(&mut self) -> Result<Expr, Diagnostic> {
        let var_token = self.current().clone();
        self.advance();

        let declared = self.type_name();
        let name_token = self.current().clone();
        if name_token.kind != TokenKind::Ident {
            return Err(self.syntax_error("Expected identifier"));
        }
        let name = name_token.text().unwrap_or_default().to_string();
        self.advance();

        self.expect(TokenKind::Equals, "Expected '='")?;
        let value = self.expression()?;
        let span = var_token.span.to(value.span);
        Ok(Expr::new(
            ExprKind::VarDecl {
                declared,
                name,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn logic(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.current().kind {
                TokenKind::And => BinOp::And,
                TokenKind::Or => BinOp::Or,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.comparison()?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn comparison(&mut self) -> Result<Expr, Diagnostic> {
        if self.current().kind == TokenKind::Not {
            let not_token = self.current().clone();
            self.advance();
            let operand = self.comparison()?;
            let span = not_token.span.to(operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }

        let mut lhs = self.arith()?;
        loop {
            let op = match self.current().kind {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Lte => BinOp::Le,
                TokenKind::Gte => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.arith()?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn arith(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn term(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.factor()?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn factor(&mut self) -> Result<Expr, Diagnostic> {
        let op = match self.current().kind {
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.power(),
        };
        let op_token = self.current().clone();
        self.advance();
        let operand = self.factor()?;
        let span = op_token.span.to(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn power(&mut self) -> Result<Expr, Diagnostic> {
        let lhs = self.call()?;
        if self.current().kind != TokenKind::Caret {
            return Ok(lhs);
        }
        self.advance();
        // The right operand re-enters at the unary level, which makes
        // `^` right-associative and admits `2 ^ -3`.
        let rhs = self.factor()?;
        let span = lhs.span.to(rhs.span);
        Ok(Expr::new(
            ExprKind::Binary {
                op: BinOp::Pow,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        ))
    }

    fn call(&mut self) -> Result<Expr, Diagnostic> {
        let mut callee = self.atom()?;
        while self.current().kind == TokenKind::LParen {
            self.advance();
            let mut args = Vec::new();
            if self.current().kind != TokenKind::RParen {
                args.push(self.expression()?);
                while self.current().kind == TokenKind::Comma {
                    self.advance();
                    args.push(self.expression()?);
                }
            }
            let close = self.current().clone();
            if close.kind != TokenKind::RParen {
                return Err(self.syntax_error("Expected ',' or ')'"));
            }
            self.advance();
            let span = callee.span.to(close.span);
            callee = Expr::new(
                ExprKind::Call {
                    callee: Box::new(callee),
                    args,
                },
                span,
            );
        }
        Ok(callee)
    }

    fn atom(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Int => {
                self.advance();
                let value = match token.value {
                    Some(TokenValue::Int(n)) => n,
                    _ => 0,
                };
                Ok(Expr::new(ExprKind::Int(value), token.span))
            }
            TokenKind::Float => {
                self.advance();
                let value = match token.value {
                    Some(TokenValue::Float(f)) => f,
                    _ => 0.0,
                };
                Ok(Expr::new(ExprKind::Float(value), token.span))
            }
            TokenKind::Str => {
                self.advance();
                let value = token.text().unwrap_or_default().to_string();
                Ok(Expr::new(ExprKind::Str(value), token.span))
            }
            TokenKind::Ident => {
                self.advance();
                let name = token.text().unwrap_or_default().to_string();
                Ok(Expr::new(ExprKind::Ident(name), token.span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                let close = self.current().clone();
                if close.kind != TokenKind::RParen {
                    return Err(self.syntax_error("Expected ')'"));
                }
                self.advance();
                Ok(Expr::new(inner.kind, token.span.to(close.span)))
            }
            TokenKind::LBracket => self.list_literal(),
            TokenKind::If => self.if_expr(),
            TokenKind::For => self.for_expr(),
            TokenKind::While => self.while_expr(),
            TokenKind::Fun => self.fun_expr(),
            _ => Err(self.syntax_error(
                "Expected int, float, identifier, '+', '-', '(', '[', 'if', 'for', 'while' or 'fun'",
            )),
        }
    }

    fn list_literal(&mut self) -> Result<Expr, Diagnostic> {
        let open = self.current().clone();
        self.advance();
        let mut items = Vec::new();
        if self.current().kind != TokenKind::RBracket {
            items.push(self.expression()?);
            while self.current().kind == TokenKind::Comma {
                self.advance();
                items.push(self.expression()?);
            }
        }
        let close = self.current().clone();
        if close.kind != TokenKind::RBracket {
            return Err(self.syntax_error("Expected ',' or ']'"));
        }
        self.advance();
        Ok(Expr::new(ExprKind::List(items), open.span.to(close.span)))
    }

    fn if_expr(&mut self) -> Result<Expr, Diagnostic> {
        let if_token = self.current().clone();
        self.advance();

        let mut cases = Vec::new();
        let mut end = if_token.span;

        let cond = self.expression()?;
        let (body, body_end) = self.block()?;
        cases.push((cond, body));
        end = body_end;

        while self.current().kind == TokenKind::Elif {
            self.advance();
            let cond = self.expression()?;
            let (body, body_end) = self.block()?;
            cases.push((cond, body));
            end = body_end;
        }

        let else_body = if self.current().kind == TokenKind::Else {
            self.advance();
            let (body, body_end) = self.block()?;
            end = body_end;
            Some(body)
        } else {
            None
        };

        Ok(Expr::new(
            ExprKind::If { cases, else_body },
            if_token.span.to(end),
        ))
    }

    fn for_expr(&mut self) -> Result<Expr, Diagnostic> {
        let for_token = self.current().clone();
        self.advance();

        let name_token = self.current().clone();
        if name_token.kind != TokenKind::Ident {
            return Err(self.syntax_error("Expected identifier"));
        }
        let var = name_token.text().unwrap_or_default().to_string();
        self.advance();

        self.expect(TokenKind::Equals, "Expected '='")?;
        let start = self.expression()?;
        self.expect(TokenKind::Comma, "Expected ','")?;
        let end = self.expression()?;

        let step = if self.current().kind == TokenKind::Comma {
            self.advance();
            Some(Box::new(self.expression()?))
        } else {
            None
        };

        let (body, body_end) = self.block()?;
        Ok(Expr::new(
            ExprKind::For {
                var,
                start: Box::new(start),
                end: Box::new(end),
                step,
                body,
            },
            for_token.span.to(body_end),
        ))
    }

    fn while_expr(&mut self) -> Result<Expr, Diagnostic> {
        let while_token = self.current().clone();
        self.advance();
        let cond = self.expression()?;
        let (body, body_end) = self.block()?;
        Ok(Expr::new(
            ExprKind::While {
                cond: Box::new(cond),
                body,
            },
            while_token.span.to(body_end),
        ))
    }

    fn fun_expr(&mut self) -> Result<Expr, Diagnostic> {
        let fun_token = self.current().clone();
        self.advance();

        let return_type = self.type_name();
        let name = if self.current().kind == TokenKind::Ident {
            let text = self.current().text().unwrap_or_default().to_string();
            self.advance();
            Some(text)
        } else {
            None
        };

        self.expect(TokenKind::LParen, "Expected '('")?;
        let mut params = Vec::new();
        if self.current().kind == TokenKind::Ident {
            params.push(self.param());
            while self.current().kind == TokenKind::Comma {
                self.advance();
                if self.current().kind != TokenKind::Ident {
                    return Err(self.syntax_error("Expected parameter after ','"));
                }
                params.push(self.param());
            }
        }
        self.expect(TokenKind::RParen, "Expected ')'")?;

        let (body, body_end) = self.block()?;
        let span = fun_token.span.to(body_end);
        Ok(Expr::new(
            ExprKind::Function(Rc::new(FunctionDef {
                name,
                params,
                return_type,
                body,
                span,
            })),
            span,
        ))
    }

    fn param(&mut self) -> Param {
        let token = self.current().clone();
        self.advance();
        Param {
            name: token.text().unwrap_or_default().to_string(),
            span: token.span,
        }
    }

    /// A brace-delimited statement sequence. Returns the body and the
    /// span of the closing brace.
    fn block(&mut self) -> Result<(Vec<Stmt>, Span), Diagnostic> {
        self.expect(TokenKind::LBrace, "Expected '{'")?;
        let body = self.statements(TokenKind::RBrace)?;
        let close = self.current().clone();
        if close.kind != TokenKind::RBrace {
            return Err(self.syntax_error("Expected '}'"));
        }
        self.advance();
        Ok((body, close.span))
    }

    /// Consume a type keyword if one is under the cursor.
    fn type_name(&mut self) -> Option<TypeName> {
        let name = match self.current().kind {
            TokenKind::IntType => TypeName::Int,
            TokenKind::FloatType => TypeName::Float,
            TokenKind::StringType => TypeName::String,
            TokenKind::ListType => TypeName::List,
            _ => return None,
        };
        self.advance();
        Some(name)
    }

    fn expect(&mut self, kind: TokenKind, expectation: &str) -> Result<(), Diagnostic> {
        if self.current().kind != kind {
            return Err(self.syntax_error(expectation));
        }
        self.advance();
        Ok(())
    }

    fn syntax_error(&self, expectation: &str) -> Diagnostic {
        Diagnostic::new(
            ErrorKind::IllegalSyntax,
            expectation,
            self.current().span,
            self.file,
        )
    }

    fn current(&self) -> &Token {
        // The lexer guarantees a terminal Eof token.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.index + 1)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
    }
}
