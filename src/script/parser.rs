//! Purpose: Recursive-descent parser from tokens to the lpy script syntax tree.
//! Exports: `parse_program`, `parse_expression`.
//! Role: Second stage of the script evaluator; also backs import analysis.
//! Invariants: Simple statements end at a newline, `;`, `}` or end of input.
//! Invariants: Blocks are brace-delimited; `elif`/`else` may follow a newline.
//! Invariants: Syntax trees are at most `MAX_NESTING` levels deep.
use std::sync::Arc;

use super::ast::{
    BinaryOp, Expr, ExprKind, FunctionDef, ImportName, Literal, LogicalOp, Param, Stmt,
    StmtKind, UnaryOp,
};
use super::lexer::{Keyword, Token, TokenKind, tokenize};
use super::syntax_error;
use crate::core::error::Error;

/// Nesting limit for brackets, blocks, operator chains and unary prefixes.
pub const MAX_NESTING: usize = 200;

pub fn parse_program(source: &str) -> Result<Vec<Stmt>, Error> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program()
}

/// Parses `source` as exactly one expression.
pub fn parse_expression(source: &str) -> Result<Expr, Error> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_lone_expression()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
    eof: Token,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        let last_line = tokens.last().map(|token| token.line).unwrap_or(1);
        Self {
            tokens,
            current: 0,
            depth: 0,
            eof: Token {
                kind: TokenKind::Eof,
                line: last_line,
            },
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, Error> {
        self.parse_statements(false)
    }

    fn parse_lone_expression(&mut self) -> Result<Expr, Error> {
        self.skip_newlines();
        let expr = self.parse_expression()?;
        self.skip_newlines();
        if !self.check(&TokenKind::Eof) {
            return Err(self.error("expected a single expression"));
        }
        Ok(expr)
    }

    fn parse_statements(&mut self, in_block: bool) -> Result<Vec<Stmt>, Error> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.check(&TokenKind::Eof) {
                if in_block {
                    return Err(self.error("expected '}' to close block"));
                }
                break;
            }
            if in_block && self.check(&TokenKind::RBrace) {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, Error> {
        let line = self.peek().line;
        let kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::Fn)
                if matches!(self.peek_at(1).kind, TokenKind::Name(_)) =>
            {
                return self.parse_function_statement();
            }
            TokenKind::Keyword(Keyword::If) => return self.parse_if(),
            TokenKind::Keyword(Keyword::While) => return self.parse_while(),
            TokenKind::Keyword(Keyword::For) => return self.parse_for(),
            TokenKind::Keyword(Keyword::Import) => self.parse_import()?,
            TokenKind::Keyword(Keyword::From) => self.parse_from_import()?,
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expression()?))
                }
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Keyword(Keyword::Global) => {
                self.advance();
                let mut names = vec![self.consume_identifier("expected name after 'global'")?];
                while self.matches(&TokenKind::Comma) {
                    names.push(self.consume_identifier("expected name after ','")?);
                }
                StmtKind::Global(names)
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                StmtKind::Raise(self.parse_expression()?)
            }
            _ => self.parse_expression_or_assignment()?,
        };
        self.expect_statement_end()?;
        Ok(Stmt { kind, line })
    }

    fn parse_expression_or_assignment(&mut self) -> Result<StmtKind, Error> {
        let expr = self.parse_expression()?;
        let augmented = match self.peek().kind {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            _ => return Ok(StmtKind::Expr(expr)),
        };
        if !expr.is_assignable() {
            return Err(syntax_error(expr.line, "cannot assign to expression"));
        }
        self.advance();
        let value = self.parse_expression()?;
        Ok(match augmented {
            None => StmtKind::Assign {
                target: expr,
                value,
            },
            Some(op) => StmtKind::AugAssign {
                target: expr,
                op,
                value,
            },
        })
    }

    fn parse_import(&mut self) -> Result<StmtKind, Error> {
        self.advance();
        let module = self.parse_dotted_name()?;
        let alias = if self.matches_keyword(Keyword::As) {
            Some(self.consume_identifier("expected alias after 'as'")?)
        } else {
            None
        };
        Ok(StmtKind::Import { module, alias })
    }

    fn parse_from_import(&mut self) -> Result<StmtKind, Error> {
        self.advance();
        let module = self.parse_dotted_name()?;
        if !self.matches_keyword(Keyword::Import) {
            return Err(self.error("expected 'import' after module name"));
        }
        if self.matches(&TokenKind::Star) {
            return Ok(StmtKind::FromImportAll { module });
        }
        let grouped = self.matches(&TokenKind::LParen);
        let mut names = Vec::new();
        loop {
            let name = self.consume_identifier("expected name to import")?;
            let alias = if self.matches_keyword(Keyword::As) {
                Some(self.consume_identifier("expected alias after 'as'")?)
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            if grouped && self.check(&TokenKind::RParen) {
                break;
            }
        }
        if grouped {
            self.consume(&TokenKind::RParen, "expected ')' after imported names")?;
        }
        Ok(StmtKind::FromImport { module, names })
    }

    fn parse_dotted_name(&mut self) -> Result<String, Error> {
        let mut name = self.consume_identifier("expected module name")?;
        while self.matches(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.consume_identifier("expected module segment after '.'")?);
        }
        Ok(name)
    }

    fn parse_function_statement(&mut self) -> Result<Stmt, Error> {
        let line = self.advance().line;
        let name = self.consume_identifier("expected function name")?;
        let def = self.parse_function_rest(Some(name), line)?;
        Ok(Stmt {
            kind: StmtKind::Function(def),
            line,
        })
    }

    fn parse_function_rest(
        &mut self,
        name: Option<String>,
        line: usize,
    ) -> Result<Arc<FunctionDef>, Error> {
        self.consume(&TokenKind::LParen, "expected '(' before parameters")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let param = self.consume_identifier("expected parameter name")?;
            if params.iter().any(|existing| existing.name == param) {
                return Err(self.error(&format!("duplicate parameter '{param}'")));
            }
            let default = if self.matches(&TokenKind::Assign) {
                Some(self.parse_expression()?)
            } else {
                if params.iter().any(|existing| existing.default.is_some()) {
                    return Err(self.error("parameter without a default follows a default"));
                }
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RParen, "expected ')' after parameters")?;
        let body = self.parse_block()?;
        Ok(Arc::new(FunctionDef {
            name,
            params,
            body,
            line,
        }))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Error> {
        self.skip_newlines();
        self.consume(&TokenKind::LBrace, "expected '{' to start block")?;
        self.descend()?;
        let body = self.parse_statements(true)?;
        self.ascend(1);
        self.consume(&TokenKind::RBrace, "expected '}' to close block")?;
        Ok(body)
    }

    fn parse_if(&mut self) -> Result<Stmt, Error> {
        let line = self.advance().line;
        let condition = self.parse_expression()?;
        let mut branches = vec![(condition, self.parse_block()?)];
        let mut otherwise = None;
        loop {
            if self.check_past_newlines(Keyword::Elif) {
                self.skip_newlines();
                self.advance();
                let condition = self.parse_expression()?;
                branches.push((condition, self.parse_block()?));
            } else if self.check_past_newlines(Keyword::Else) {
                self.skip_newlines();
                self.advance();
                otherwise = Some(self.parse_block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::If {
                branches,
                otherwise,
            },
            line,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Error> {
        let line = self.advance().line;
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::While { condition, body },
            line,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Error> {
        let line = self.advance().line;
        let binding = self.consume_identifier("expected loop variable after 'for'")?;
        if !self.matches_keyword(Keyword::In) {
            return Err(self.error("expected 'in' after loop variable"));
        }
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::For {
                binding,
                iterable,
                body,
            },
            line,
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Error> {
        self.descend()?;
        let expr = self.parse_or()?;
        self.ascend(1);
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_and()?;
        let mut links = 0;
        while self.check_keyword(Keyword::Or) {
            let line = self.advance().line;
            self.descend()?;
            links += 1;
            let right = self.parse_and()?;
            expr = logical(LogicalOp::Or, expr, right, line);
        }
        self.ascend(links);
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_not()?;
        let mut links = 0;
        while self.check_keyword(Keyword::And) {
            let line = self.advance().line;
            self.descend()?;
            links += 1;
            let right = self.parse_not()?;
            expr = logical(LogicalOp::And, expr, right, line);
        }
        self.ascend(links);
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, Error> {
        if self.check_keyword(Keyword::Not) {
            let line = self.advance().line;
            self.descend()?;
            let expr = self.parse_not()?;
            self.ascend(1);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                },
                line,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_additive()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::BangEqual => BinaryOp::NotEqual,
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                TokenKind::Keyword(Keyword::In) => BinaryOp::In,
                TokenKind::Keyword(Keyword::Not)
                    if self.peek_at(1).kind == TokenKind::Keyword(Keyword::In) =>
                {
                    self.advance();
                    BinaryOp::NotIn
                }
                _ => break,
            };
            let line = self.advance().line;
            self.descend()?;
            links += 1;
            let right = self.parse_additive()?;
            expr = binary(op, expr, right, line);
        }
        self.ascend(links);
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_multiplicative()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let line = self.advance().line;
            self.descend()?;
            links += 1;
            let right = self.parse_multiplicative()?;
            expr = binary(op, expr, right, line);
        }
        self.ascend(links);
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::DoubleSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let line = self.advance().line;
            self.descend()?;
            links += 1;
            let right = self.parse_unary()?;
            expr = binary(op, expr, right, line);
        }
        self.ascend(links);
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        match self.peek().kind {
            TokenKind::Minus => {
                let line = self.advance().line;
                self.descend()?;
                let expr = self.parse_unary()?;
                self.ascend(1);
                Ok(Expr {
                    kind: ExprKind::Unary {
                        op: UnaryOp::Negate,
                        expr: Box::new(expr),
                    },
                    line,
                })
            }
            TokenKind::Plus => {
                self.advance();
                self.descend()?;
                let expr = self.parse_unary()?;
                self.ascend(1);
                Ok(expr)
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if matches!(
                self.peek().kind,
                TokenKind::LParen | TokenKind::Dot | TokenKind::LBracket
            ) {
                self.descend()?;
                links += 1;
            }
            if self.matches(&TokenKind::LParen) {
                let line = expr.line;
                let args = self.parse_sequence(&TokenKind::RParen, "expected ')' after arguments")?;
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    line,
                };
            } else if self.matches(&TokenKind::Dot) {
                let name = self.consume_identifier("expected attribute name after '.'")?;
                let line = expr.line;
                expr = Expr {
                    kind: ExprKind::Attribute {
                        target: Box::new(expr),
                        name,
                    },
                    line,
                };
            } else if self.matches(&TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.consume(&TokenKind::RBracket, "expected ']' after index")?;
                let line = expr.line;
                expr = Expr {
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                };
            } else {
                break;
            }
        }
        self.ascend(links);
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let token = self.advance();
        let line = token.line;
        let kind = match token.kind {
            TokenKind::Int(value) => ExprKind::Literal(Literal::Int(value)),
            TokenKind::Float(value) => ExprKind::Literal(Literal::Float(value)),
            TokenKind::Str(value) => ExprKind::Literal(Literal::Str(value)),
            TokenKind::Keyword(Keyword::True) => ExprKind::Literal(Literal::Bool(true)),
            TokenKind::Keyword(Keyword::False) => ExprKind::Literal(Literal::Bool(false)),
            TokenKind::Keyword(Keyword::None) => ExprKind::Literal(Literal::None),
            TokenKind::Name(name) => ExprKind::Name(name),
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.consume(&TokenKind::RParen, "expected ')' after expression")?;
                return Ok(expr);
            }
            TokenKind::LBracket => ExprKind::List(
                self.parse_sequence(&TokenKind::RBracket, "expected ']' after list items")?,
            ),
            TokenKind::LBrace => ExprKind::Dict(self.parse_dict_entries()?),
            TokenKind::Keyword(Keyword::Fn) => {
                ExprKind::Function(self.parse_function_rest(None, line)?)
            }
            other => {
                return Err(syntax_error(
                    line,
                    format!("unexpected {}", describe(&other)),
                ));
            }
        };
        Ok(Expr { kind, line })
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn parse_sequence(&mut self, close: &TokenKind, message: &str) -> Result<Vec<Expr>, Error> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expression()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(close, message)?;
        Ok(items)
    }

    fn parse_dict_entries(&mut self) -> Result<Vec<(Expr, Expr)>, Error> {
        let mut entries = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::RBrace) {
            let key = self.parse_expression()?;
            self.skip_newlines();
            self.consume(&TokenKind::Colon, "expected ':' after dict key")?;
            self.skip_newlines();
            let value = self.parse_expression()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.consume(&TokenKind::RBrace, "expected '}' after dict entries")?;
        Ok(entries)
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace
        )
    }

    fn expect_statement_end(&self) -> Result<(), Error> {
        if self.at_statement_end() {
            Ok(())
        } else {
            Err(self.error(&format!(
                "unexpected {} after statement",
                describe(&self.peek().kind)
            )))
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn check_past_newlines(&self, keyword: Keyword) -> bool {
        let mut offset = 0;
        while self.peek_at(offset).kind == TokenKind::Newline {
            offset += 1;
        }
        self.peek_at(offset).kind == TokenKind::Keyword(keyword)
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(&TokenKind::Keyword(keyword))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.check(&TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> Result<Token, Error> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<String, Error> {
        if let TokenKind::Name(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(message))
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        token
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.current + offset).unwrap_or(&self.eof)
    }

    fn descend(&mut self) -> Result<(), Error> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too many nesting levels"));
        }
        self.depth += 1;
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn error(&self, message: &str) -> Error {
        syntax_error(self.peek().line, message)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, line: usize) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr, line: usize) -> Expr {
    Expr {
        kind: ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Name(name) => format!("name '{name}'"),
        TokenKind::Int(value) => format!("number {value}"),
        TokenKind::Float(value) => format!("number {value}"),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Keyword(keyword) => format!("keyword '{}'", format!("{keyword:?}").to_lowercase()),
        TokenKind::Newline => "newline".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("token {other:?}"),
    }
}
