//! Parser for the class language
//!
//! A recursive descent parser that produces a [`Program`] from a token stream.

use crate::ast::*;
use crate::common::{IdGenerator, NodeId, Span};
use crate::lexer::{Token, TokenKind};
use miette::Result;

/// Parse a token stream into a program
pub fn parse(tokens: &[Token], _source: &str) -> Result<Program> {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

/// Parser state
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    id_gen: IdGenerator,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            id_gen: IdGenerator::new(),
        }
    }

    fn next_id(&mut self) -> NodeId {
        self.id_gen.next()
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens
                .last()
                .expect("token stream should have at least EOF")
        })
    }

    fn peek(&self) -> TokenKind {
        self.current().kind
    }

    fn peek_n(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> &Token {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)]
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(miette::miette!(
                "Expected `{}`, found `{}` at position {}",
                kind,
                self.peek(),
                self.current().span.start
            ))
        }
    }

    fn span(&self) -> Span {
        self.current().span
    }

    /// Span of the most recently consumed token
    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.span)
            .unwrap_or_default()
    }

    // ==================== PROGRAM ====================

    fn parse_program(&mut self) -> Result<Program> {
        let mut classes = Vec::new();

        while !self.at(TokenKind::Eof) {
            let modifiers = self.parse_modifiers();
            classes.push(self.parse_class(modifiers)?);
        }

        Ok(Program { classes })
    }

    fn parse_modifiers(&mut self) -> Modifiers {
        let mut mods = Modifiers::default();

        loop {
            match self.peek() {
                TokenKind::Final => mods.is_final = true,
                TokenKind::Private => mods.is_private = true,
                TokenKind::Override => mods.is_override = true,
                TokenKind::Abstract => mods.is_abstract = true,
                TokenKind::Lazy => mods.is_lazy = true,
                TokenKind::AtInit => mods.init_safe = true,
                TokenKind::AtPartial => mods.partial = true,
                _ => break,
            }
            self.advance();
        }

        mods
    }

    // ==================== CLASSES ====================

    fn parse_class(&mut self, modifiers: Modifiers) -> Result<ClassDef> {
        let start = self.span();
        self.expect(TokenKind::Class)?;
        let name = self.parse_ident()?;

        let params = if self.at(TokenKind::LParen) {
            self.parse_params()?
        } else {
            Vec::new()
        };

        let parent = if self.eat(TokenKind::Extends) {
            let parent_start = self.span();
            let name = self.parse_ident()?;
            let args = if self.at(TokenKind::LParen) {
                self.parse_args()?
            } else {
                Vec::new()
            };
            Some(ParentRef {
                name,
                args,
                span: parent_start.merge(self.prev_span()),
            })
        } else {
            None
        };

        let mut body = Vec::new();
        if self.eat(TokenKind::LBrace) {
            while !self.at(TokenKind::RBrace) {
                if self.at(TokenKind::Eof) {
                    return Err(miette::miette!("Unexpected end of file in class `{}`", name));
                }
                body.push(self.parse_class_item()?);
            }
            self.expect(TokenKind::RBrace)?;
        }

        Ok(ClassDef {
            id: self.next_id(),
            modifiers,
            name,
            params,
            parent,
            body,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_class_item(&mut self) -> Result<ClassItem> {
        let start = self.span();
        let modifiers = self.parse_modifiers();

        match self.peek() {
            TokenKind::Val | TokenKind::Var => {
                Ok(ClassItem::Field(self.parse_field(modifiers, start)?))
            }
            TokenKind::Def => Ok(ClassItem::Method(self.parse_method(modifiers, start)?)),
            TokenKind::Class => Ok(ClassItem::Class(self.parse_class(modifiers)?)),
            _ if modifiers == Modifiers::default() => Ok(ClassItem::Stmt(self.parse_stmt()?)),
            other => Err(miette::miette!(
                "Expected member definition after modifiers, found `{}` at position {}",
                other,
                start.start
            )),
        }
    }

    fn parse_field(&mut self, modifiers: Modifiers, start: Span) -> Result<FieldDef> {
        let mutable = self.advance().kind == TokenKind::Var;
        let name = self.parse_ident()?;
        let ty = self.parse_type_annotation()?;
        let value = if self.eat(TokenKind::Eq) {
            Some(self.parse_expr_assign()?)
        } else {
            None
        };
        self.eat(TokenKind::Semi);

        Ok(FieldDef {
            id: self.next_id(),
            modifiers,
            mutable,
            name,
            ty,
            value,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_method(&mut self, modifiers: Modifiers, start: Span) -> Result<MethodDef> {
        self.expect(TokenKind::Def)?;
        let name = self.parse_ident()?;
        let params = if self.at(TokenKind::LParen) {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let return_type = self.parse_type_annotation()?;
        let body = if self.eat(TokenKind::Eq) {
            Some(self.parse_expr_assign()?)
        } else if self.at(TokenKind::LBrace) {
            Some(self.parse_block_expr()?)
        } else {
            None
        };
        self.eat(TokenKind::Semi);

        Ok(MethodDef {
            id: self.next_id(),
            modifiers,
            name,
            params,
            return_type,
            body,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();

        while !self.at(TokenKind::RParen) {
            params.push(self.parse_param()?);
            if !self.at(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }

        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_param(&mut self) -> Result<Param> {
        let start = self.span();
        let partial = self.eat(TokenKind::AtPartial);
        let name = self.parse_ident()?;
        let ty = self.parse_type_annotation()?;

        Ok(Param {
            id: self.next_id(),
            name,
            ty,
            partial,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_type_annotation(&mut self) -> Result<Option<TypeExpr>> {
        if self.eat(TokenKind::Colon) {
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }

    fn parse_type(&mut self) -> Result<TypeExpr> {
        let name = self.parse_ident()?;
        let mut args = Vec::new();
        if self.eat(TokenKind::LBracket) {
            while !self.at(TokenKind::RBracket) {
                args.push(self.parse_type()?);
                if !self.at(TokenKind::RBracket) {
                    self.expect(TokenKind::Comma)?;
                }
            }
            self.expect(TokenKind::RBracket)?;
        }
        Ok(TypeExpr { name, args })
    }

    // ==================== STATEMENTS ====================

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();

        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                return Err(miette::miette!("Unexpected end of file in block"));
            }
            stmts.push(self.parse_stmt()?);
        }

        self.expect(TokenKind::RBrace)?;

        Ok(Block { stmts })
    }

    fn parse_block_expr(&mut self) -> Result<Expr> {
        let start = self.span();
        let block = self.parse_block()?;
        Ok(Expr {
            id: self.next_id(),
            kind: ExprKind::Block(block),
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let start = self.span();
        match self.peek() {
            TokenKind::Semi => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Val | TokenKind::Var => {
                let mutable = self.advance().kind == TokenKind::Var;
                let name = self.parse_ident()?;
                let ty = self.parse_type_annotation()?;
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expr_assign()?;
                self.eat(TokenKind::Semi);
                Ok(Stmt::Let {
                    id: self.next_id(),
                    mutable,
                    name,
                    ty,
                    value,
                    span: start.merge(self.prev_span()),
                })
            }
            kind if kind == TokenKind::Def || kind == TokenKind::Class || kind.is_modifier() => {
                let modifiers = self.parse_modifiers();
                if self.at(TokenKind::Class) {
                    Ok(Stmt::Class(self.parse_class(modifiers)?))
                } else {
                    Ok(Stmt::Def(self.parse_method(modifiers, start)?))
                }
            }
            _ => {
                let expr = self.parse_expr_assign()?;
                let has_semi = self.eat(TokenKind::Semi);
                Ok(Stmt::Expr { expr, has_semi })
            }
        }
    }

    // ==================== EXPRESSIONS ====================

    /// Expression optionally followed by `= value`
    fn parse_expr_assign(&mut self) -> Result<Expr> {
        let target = self.parse_expr()?;

        if self.at(TokenKind::Eq) {
            self.advance();
            let value = self.parse_expr_assign()?;
            let span = target.span.merge(value.span);
            return Ok(Expr {
                id: self.next_id(),
                kind: ExprKind::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                span,
            });
        }

        Ok(target)
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_expr_with_precedence(0)
    }

    fn parse_expr_with_precedence(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some((op, prec)) = self.binary_op_info() {
            if prec < min_prec {
                break;
            }

            self.advance();
            // All binary operators are left-associative
            let right = self.parse_expr_with_precedence(prec + 1)?;
            let span = left.span.merge(right.span);

            left = Expr {
                id: self.next_id(),
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }

        Ok(left)
    }

    fn binary_op_info(&self) -> Option<(BinaryOp, u8)> {
        let info = match self.peek() {
            TokenKind::PipePipe => (BinaryOp::Or, 1),
            TokenKind::AmpAmp => (BinaryOp::And, 2),
            TokenKind::EqEq => (BinaryOp::Eq, 3),
            TokenKind::Ne => (BinaryOp::Ne, 3),
            TokenKind::Lt => (BinaryOp::Lt, 4),
            TokenKind::Le => (BinaryOp::Le, 4),
            TokenKind::Gt => (BinaryOp::Gt, 4),
            TokenKind::Ge => (BinaryOp::Ge, 4),
            TokenKind::Plus => (BinaryOp::Add, 5),
            TokenKind::Minus => (BinaryOp::Sub, 5),
            TokenKind::Star => (BinaryOp::Mul, 6),
            TokenKind::Slash => (BinaryOp::Div, 6),
            TokenKind::Percent => (BinaryOp::Rem, 6),
            _ => return None,
        };
        Some(info)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.span();
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let expr = self.parse_unary()?;
        let span = start.merge(expr.span);
        Ok(Expr {
            id: self.next_id(),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
            span,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                TokenKind::LParen => {
                    let args = self.parse_args()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Expr {
                        id: self.next_id(),
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    if self.at(TokenKind::This) {
                        // `Outer.this`
                        self.advance();
                        let ExprKind::Ident(outer) = &expr.kind else {
                            return Err(miette::miette!(
                                "Expected class name before `.this` at position {}",
                                expr.span.start
                            ));
                        };
                        let outer = outer.clone();
                        let span = expr.span.merge(self.prev_span());
                        expr = Expr {
                            id: self.next_id(),
                            kind: ExprKind::OuterThis(outer),
                            span,
                        };
                    } else {
                        let name = self.parse_ident()?;
                        let span = expr.span.merge(self.prev_span());
                        expr = Expr {
                            id: self.next_id(),
                            kind: ExprKind::Select {
                                receiver: Box::new(expr),
                                name,
                            },
                            span,
                        };
                    }
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if !self.at(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.span();
        let kind = match self.peek() {
            TokenKind::IntLit => {
                let text = self.advance().text.clone();
                let value: i64 = text.replace('_', "").parse().unwrap_or(0);
                ExprKind::Literal(Literal::Int(value))
            }
            TokenKind::StringLit => {
                let text = self.advance().text.clone();
                // Remove quotes
                let value = text[1..text.len() - 1].to_string();
                ExprKind::Literal(Literal::String(value))
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Literal(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Literal(Literal::Bool(false))
            }
            TokenKind::Ident => ExprKind::Ident(self.parse_ident()?),
            TokenKind::This => {
                self.advance();
                ExprKind::This
            }
            TokenKind::Super => {
                self.advance();
                ExprKind::Super
            }
            TokenKind::New => {
                self.advance();
                let class = self.parse_ident()?;
                let args = if self.at(TokenKind::LParen) {
                    self.parse_args()?
                } else {
                    Vec::new()
                };
                ExprKind::New { class, args }
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(TokenKind::RParen) {
                    ExprKind::Literal(Literal::Unit)
                } else {
                    let inner = self.parse_expr_assign()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(inner);
                }
            }
            TokenKind::LBrace => return self.parse_block_expr(),
            TokenKind::If => return self.parse_if(),
            TokenKind::While => return self.parse_while(),
            TokenKind::Try => return self.parse_try(),
            TokenKind::Pipe | TokenKind::PipePipe => return self.parse_closure(),
            TokenKind::Return => {
                self.advance();
                let value = if self.starts_expr() {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                ExprKind::Return(value)
            }
            other => {
                return Err(miette::miette!(
                    "Unexpected `{}` in expression at position {}",
                    other,
                    start.start
                ));
            }
        };

        Ok(Expr {
            id: self.next_id(),
            kind,
            span: start.merge(self.prev_span()),
        })
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::IntLit
                | TokenKind::StringLit
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Ident
                | TokenKind::This
                | TokenKind::Super
                | TokenKind::New
                | TokenKind::LParen
                | TokenKind::LBrace
                | TokenKind::If
                | TokenKind::Try
                | TokenKind::Pipe
                | TokenKind::PipePipe
                | TokenKind::Minus
                | TokenKind::Bang
        )
    }

    fn parse_if(&mut self) -> Result<Expr> {
        let start = self.span();
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.parse_expr_assign()?;
        // Allow `;` between the then-branch and `else`
        if self.at(TokenKind::Semi) && self.peek_n(1) == TokenKind::Else {
            self.advance();
        }
        let else_branch = if self.eat(TokenKind::Else) {
            Some(Box::new(self.parse_expr_assign()?))
        } else {
            None
        };

        Ok(Expr {
            id: self.next_id(),
            kind: ExprKind::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch,
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_while(&mut self) -> Result<Expr> {
        let start = self.span();
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_expr_assign()?;

        Ok(Expr {
            id: self.next_id(),
            kind: ExprKind::While {
                condition: Box::new(condition),
                body: Box::new(body),
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_try(&mut self) -> Result<Expr> {
        let start = self.span();
        self.expect(TokenKind::Try)?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.eat(TokenKind::Catch) {
            self.expect(TokenKind::LParen)?;
            let param = self.parse_param()?;
            self.expect(TokenKind::RParen)?;
            let body = self.parse_block()?;
            handlers.push(CatchClause { param, body });
        }

        let finalizer = if self.eat(TokenKind::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Expr {
            id: self.next_id(),
            kind: ExprKind::Try {
                body,
                handlers,
                finalizer,
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_closure(&mut self) -> Result<Expr> {
        let start = self.span();
        let mut params = Vec::new();

        if !self.eat(TokenKind::PipePipe) {
            self.expect(TokenKind::Pipe)?;
            while !self.at(TokenKind::Pipe) {
                params.push(self.parse_param()?);
                if !self.at(TokenKind::Pipe) {
                    self.expect(TokenKind::Comma)?;
                }
            }
            self.expect(TokenKind::Pipe)?;
        }

        let body = self.parse_expr_assign()?;

        Ok(Expr {
            id: self.next_id(),
            kind: ExprKind::Closure {
                params,
                body: Box::new(body),
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_ident(&mut self) -> Result<String> {
        if self.at(TokenKind::Ident) {
            Ok(self.advance().text.clone())
        } else {
            Err(miette::miette!(
                "Expected identifier, found `{}` at position {}",
                self.peek(),
                self.current().span.start
            ))
        }
    }
}
