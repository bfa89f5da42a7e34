//! Script parser.
//!
//! Recursive descent over the token stream with precedence climbing for
//! binary operators. Parsing stops at the first structural error, which
//! carries the byte offset plus what was expected and what was found.

use super::ast::{
    Arg, AssignOp, BinOp, DeclMode, Expr, ExprKind, FunctionDef, Header, Literal, Param, Script,
    ScriptKind, Stmt, StmtKind, SwitchArm, UnOp,
};
use super::lexer::{Keyword, Op, Token, TokenKind};
use super::qualifier::Qualifier;
use crate::domain::error::ParseError;

/// Named arguments accepted by `strategy(...)` and `indicator(...)`.
pub const HEADER_ARGS: &[&str] = &[
    "title",
    "shorttitle",
    "overlay",
    "format",
    "precision",
    "initial_capital",
    "default_qty_type",
    "default_qty_value",
    "commission_type",
    "commission_value",
    "slippage",
    "pyramiding",
    "calc_on_every_tick",
    "process_orders_on_close",
    "currency",
    "max_bars_back",
];

const TYPE_NAMES: &[&str] = &["int", "float", "bool", "string", "color"];

/// Deepest expression nesting accepted. Deeper input is a parse error
/// rather than an exhausted stack in this or a later pass.
pub const MAX_NESTING: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            next_id: 0,
            depth: 0,
        }
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn kind_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn at_op(&self, op: Op) -> bool {
        *self.kind() == TokenKind::Op(op)
    }

    fn at_keyword(&self, kw: Keyword) -> bool {
        *self.kind() == TokenKind::Keyword(kw)
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        let token = self.current();
        ParseError {
            position: token.position,
            expected: expected.into(),
            found: token.describe(),
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if *self.kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_op(&mut self, op: Op, expected: &str) -> Result<Token, ParseError> {
        self.expect(TokenKind::Op(op), expected)
    }

    fn expect_ident(&mut self, expected: &str) -> Result<Token, ParseError> {
        self.expect(TokenKind::Ident, expected)
    }

    fn skip_newlines(&mut self) {
        while self.at(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn previous_was_dedent(&self) -> bool {
        self.pos > 0 && self.tokens[self.pos - 1].kind == TokenKind::Dedent
    }

    fn end_statement(&mut self) -> Result<(), ParseError> {
        match self.kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Dedent | TokenKind::Eof => Ok(()),
            _ if self.previous_was_dedent() => Ok(()),
            _ => Err(self.error("end of line")),
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("shallower nesting"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self, kind: ExprKind, position: usize) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        Expr { id, kind, position }
    }

    // --- script structure ---

    fn parse_script(&mut self) -> Result<Script, ParseError> {
        self.skip_newlines();
        let header = self.parse_header()?;
        self.end_statement()?;

        let mut functions = Vec::new();
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&TokenKind::Eof) {
                break;
            }
            if self.at_header_call() {
                return Err(self.error(
                    "a single strategy(...) or indicator(...) declaration",
                ));
            }
            if self.at_function_def() {
                functions.push(self.parse_function()?);
            } else {
                body.push(self.parse_statement()?);
            }
        }

        Ok(Script {
            header,
            functions,
            body,
            expr_count: self.next_id,
        })
    }

    fn at_header_call(&self) -> bool {
        *self.kind() == TokenKind::Ident
            && matches!(self.current().lexeme.as_str(), "strategy" | "indicator")
            && *self.kind_at(1) == TokenKind::LParen
    }

    fn parse_header(&mut self) -> Result<Header, ParseError> {
        if !self.at_header_call() {
            return Err(self.error("strategy(...) or indicator(...) declaration"));
        }
        let token = self.advance();
        let kind = if token.lexeme == "strategy" {
            ScriptKind::Strategy
        } else {
            ScriptKind::Indicator
        };
        self.expect(TokenKind::LParen, "'('")?;
        let args = self.parse_args()?;

        for (index, arg) in args.iter().enumerate() {
            match &arg.name {
                None if index == 0 => {}
                None => {
                    return Err(ParseError {
                        position: arg.position,
                        expected: "named declaration argument".to_string(),
                        found: "positional argument".to_string(),
                    });
                }
                Some(name) if !HEADER_ARGS.contains(&name.as_str()) => {
                    return Err(ParseError {
                        position: arg.position,
                        expected: "declaration argument".to_string(),
                        found: format!("'{name}'"),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(Header {
            kind,
            args,
            position: token.position,
        })
    }

    fn at_function_def(&self) -> bool {
        if *self.kind() != TokenKind::Ident || *self.kind_at(1) != TokenKind::LParen {
            return false;
        }
        let mut depth = 0usize;
        let mut i = self.pos + 1;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self
                            .tokens
                            .get(i + 1)
                            .is_some_and(|t| t.kind == TokenKind::Op(Op::Arrow));
                    }
                }
                TokenKind::Newline | TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_function(&mut self) -> Result<FunctionDef, ParseError> {
        let name = self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                params.push(self.parse_param()?);
                if self.at(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.expect_op(Op::Arrow, "'=>'")?;

        let body = if self.at(&TokenKind::Newline) {
            self.parse_block()?
        } else {
            let position = self.current().position;
            let value = self.parse_expression()?;
            self.end_statement()?;
            vec![Stmt {
                kind: StmtKind::Expr(value),
                position,
            }]
        };

        Ok(FunctionDef {
            name: name.lexeme,
            params,
            body,
            position: name.position,
        })
    }

    fn parse_param(&mut self) -> Result<Param, ParseError> {
        let position = self.current().position;
        let qualifier = self.parse_qualifier_keyword();
        let first = self.expect_ident("parameter name")?;
        if *self.kind() == TokenKind::Ident {
            let name = self.advance();
            return Ok(Param {
                name: name.lexeme,
                qualifier,
                type_name: Some(first.lexeme),
                position,
            });
        }
        Ok(Param {
            name: first.lexeme,
            qualifier,
            type_name: None,
            position,
        })
    }

    fn parse_qualifier_keyword(&mut self) -> Option<Qualifier> {
        let qualifier = match self.kind() {
            TokenKind::Keyword(Keyword::Const) => Qualifier::Const,
            TokenKind::Keyword(Keyword::Simple) => Qualifier::Simple,
            TokenKind::Keyword(Keyword::Series) => Qualifier::Series,
            _ => return None,
        };
        self.advance();
        Some(qualifier)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::Newline, "end of line")?;
        self.expect(TokenKind::Indent, "indented block")?;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&TokenKind::Dedent) {
                self.advance();
                break;
            }
            if self.at(&TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    // --- statements ---

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current().position;
        let kind = match self.kind().clone() {
            TokenKind::Keyword(Keyword::Import) => {
                self.advance();
                let mut path = String::new();
                while !matches!(self.kind(), TokenKind::Newline | TokenKind::Eof) {
                    path.push_str(&self.advance().lexeme);
                }
                StmtKind::Import(path)
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Var) | TokenKind::Keyword(Keyword::Varip) => {
                let mode = if self.at_keyword(Keyword::Var) {
                    DeclMode::Var
                } else {
                    DeclMode::Varip
                };
                self.advance();
                self.parse_declaration(mode, None)?
            }
            TokenKind::Keyword(Keyword::Const)
            | TokenKind::Keyword(Keyword::Simple)
            | TokenKind::Keyword(Keyword::Series) => {
                let qualifier = self.parse_qualifier_keyword();
                self.parse_declaration(DeclMode::Plain, qualifier)?
            }
            TokenKind::LBracket => self.parse_destructure()?,
            TokenKind::Ident if self.at_typed_declaration() => {
                self.parse_declaration(DeclMode::Plain, None)?
            }
            TokenKind::Ident if *self.kind_at(1) == TokenKind::Op(Op::Assign) => {
                let name = self.advance().lexeme;
                self.advance();
                let value = self.parse_expression()?;
                StmtKind::Declare {
                    mode: DeclMode::Plain,
                    qualifier: None,
                    type_name: None,
                    name,
                    value,
                }
            }
            TokenKind::Ident if assign_op(self.kind_at(1)).is_some() => {
                let name = self.advance().lexeme;
                let op = assign_op(self.kind()).unwrap_or(AssignOp::Reassign);
                self.advance();
                let value = self.parse_expression()?;
                StmtKind::Assign { name, op, value }
            }
            TokenKind::Indent => return Err(self.error("statement")),
            _ => {
                let value = self.parse_expression()?;
                StmtKind::Expr(into_order(value))
            }
        };
        self.end_statement()?;
        Ok(Stmt { kind, position })
    }

    fn at_typed_declaration(&self) -> bool {
        TYPE_NAMES.contains(&self.current().lexeme.as_str())
            && *self.kind_at(1) == TokenKind::Ident
            && *self.kind_at(2) == TokenKind::Op(Op::Assign)
    }

    /// `[type] name = value`, after any `var`/`varip`/qualifier keyword.
    fn parse_declaration(
        &mut self,
        mode: DeclMode,
        qualifier: Option<Qualifier>,
    ) -> Result<StmtKind, ParseError> {
        let first = self.expect_ident("variable name")?;
        let (type_name, name) = if *self.kind() == TokenKind::Ident {
            (Some(first.lexeme), self.advance().lexeme)
        } else {
            (None, first.lexeme)
        };
        self.expect_op(Op::Assign, "'='")?;
        let value = self.parse_expression()?;
        Ok(StmtKind::Declare {
            mode,
            qualifier,
            type_name,
            name,
            value,
        })
    }

    fn parse_destructure(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let mut names = vec![self.expect_ident("variable name")?.lexeme];
        while self.at(&TokenKind::Comma) {
            self.advance();
            names.push(self.expect_ident("variable name")?.lexeme);
        }
        self.expect(TokenKind::RBracket, "']'")?;
        self.expect_op(Op::Assign, "'='")?;
        let value = self.parse_expression()?;
        Ok(StmtKind::Destructure { names, value })
    }

    // --- expressions ---

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_ternary)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let position = self.current().position;
        let cond = self.parse_binary(1)?;
        if !self.at_op(Op::Question) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_expression()?;
        self.expect_op(Op::Colon, "':'")?;
        let otherwise = self.parse_expression()?;
        Ok(self.expr(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            position,
        ))
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let outer = self.depth;
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = binary_op(self.kind()) {
            if prec < min_prec {
                break;
            }
            let position = self.advance().position;
            // Each fold deepens the left-leaning tree by one.
            let rhs = self.nested(|p| p.parse_binary(prec + 1))?;
            self.depth += 1;
            lhs = self.expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                position,
            );
        }
        self.depth = outer;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.kind() {
            TokenKind::Op(Op::Minus) => UnOp::Neg,
            TokenKind::Op(Op::Plus) => UnOp::Plus,
            TokenKind::Keyword(Keyword::Not) => UnOp::Not,
            _ => return self.parse_postfix(),
        };
        let position = self.advance().position;
        let operand = self.nested(Self::parse_unary)?;
        Ok(self.expr(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            position,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let outer = self.depth;
        let mut expr = self.parse_primary()?;
        while self.at(&TokenKind::HistoryOpen) {
            let position = self.advance().position;
            let offset = self.parse_expression()?;
            self.depth += 1;
            self.expect(TokenKind::RBracket, "']'")?;
            expr = self.expr(
                ExprKind::History {
                    target: Box::new(expr),
                    offset: Box::new(offset),
                },
                position,
            );
        }
        self.depth = outer;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.current().position;
        let literal = match self.kind().clone() {
            TokenKind::Int(v) => Some(Literal::Int(v)),
            TokenKind::Float(v) => Some(Literal::Float(v)),
            TokenKind::Str(s) => Some(Literal::Str(s)),
            TokenKind::Color(c) => Some(Literal::Color(c)),
            TokenKind::Keyword(Keyword::True) => Some(Literal::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Some(Literal::Bool(false)),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(self.expr(ExprKind::Literal(literal), position));
        }

        match self.kind() {
            TokenKind::Ident => self.parse_name(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = vec![self.parse_expression()?];
                while self.at(&TokenKind::Comma) {
                    self.advance();
                    items.push(self.parse_expression()?);
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(self.expr(ExprKind::Tuple(items), position))
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            _ => Err(self.error("expression")),
        }
    }

    fn parse_name(&mut self) -> Result<Expr, ParseError> {
        let first = self.advance();
        let mut path = first.lexeme;
        while self.at(&TokenKind::Dot) {
            self.advance();
            let part = self.advance();
            if !matches!(part.kind, TokenKind::Ident | TokenKind::Keyword(_)) {
                return Err(ParseError {
                    position: part.position,
                    expected: "member name".to_string(),
                    found: part.describe(),
                });
            }
            path.push('.');
            path.push_str(&part.lexeme);
        }

        if self.at(&TokenKind::LParen) {
            self.advance();
            let args = self.parse_args()?;
            return Ok(self.expr(ExprKind::Call { callee: path, args }, first.position));
        }
        if path == "na" {
            return Ok(self.expr(ExprKind::Literal(Literal::Na), first.position));
        }
        Ok(self.expr(ExprKind::Ident(path), first.position))
    }

    /// Arguments after the opening parenthesis, through the closing one.
    fn parse_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        if self.at(&TokenKind::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            let position = self.current().position;
            let name = if *self.kind() == TokenKind::Ident
                && *self.kind_at(1) == TokenKind::Op(Op::Assign)
            {
                let name = self.advance().lexeme;
                self.advance();
                Some(name)
            } else {
                if args.iter().any(|a: &Arg| a.name.is_some()) {
                    return Err(self.error("named argument"));
                }
                None
            };
            let value = self.parse_expression()?;
            args.push(Arg {
                name,
                value,
                position,
            });
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_if(&mut self) -> Result<Expr, ParseError> {
        let position = self.advance().position;
        let cond = self.parse_expression()?;
        let then = self.parse_block()?;
        let otherwise = if self.at_keyword(Keyword::Else) {
            self.advance();
            if self.at_keyword(Keyword::If) {
                let nested_position = self.current().position;
                let nested = self.nested(Self::parse_if)?;
                Some(vec![Stmt {
                    kind: StmtKind::Expr(nested),
                    position: nested_position,
                }])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(self.expr(
            ExprKind::If {
                cond: Box::new(cond),
                then,
                otherwise,
            },
            position,
        ))
    }

    fn parse_switch(&mut self) -> Result<Expr, ParseError> {
        let position = self.advance().position;
        let subject = if self.at(&TokenKind::Newline) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(TokenKind::Newline, "end of line")?;
        self.expect(TokenKind::Indent, "switch arms")?;

        let mut arms = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&TokenKind::Dedent) {
                self.advance();
                break;
            }
            if self.at(&TokenKind::Eof) {
                break;
            }
            let guard = if self.at_op(Op::Arrow) {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.expect_op(Op::Arrow, "'=>'")?;
            let body = if self.at(&TokenKind::Newline) {
                self.parse_block()?
            } else {
                vec![self.parse_statement()?]
            };
            arms.push(SwitchArm { guard, body });
        }

        Ok(self.expr(ExprKind::Switch { subject, arms }, position))
    }

    fn parse_for(&mut self) -> Result<Expr, ParseError> {
        let position = self.advance().position;
        let var = self.expect_ident("loop variable")?.lexeme;
        self.expect_op(Op::Assign, "'='")?;
        let from = self.parse_expression()?;
        self.expect(TokenKind::Keyword(Keyword::To), "'to'")?;
        let to = self.parse_expression()?;
        let step = if self.at_keyword(Keyword::By) {
            self.advance();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(self.expr(
            ExprKind::For {
                var,
                from: Box::new(from),
                to: Box::new(to),
                step,
                body,
            },
            position,
        ))
    }

    fn parse_while(&mut self) -> Result<Expr, ParseError> {
        let position = self.advance().position;
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(self.expr(
            ExprKind::While {
                cond: Box::new(cond),
                body,
            },
            position,
        ))
    }
}

fn assign_op(kind: &TokenKind) -> Option<AssignOp> {
    match kind {
        TokenKind::Op(Op::Reassign) => Some(AssignOp::Reassign),
        TokenKind::Op(Op::PlusAssign) => Some(AssignOp::Add),
        TokenKind::Op(Op::MinusAssign) => Some(AssignOp::Sub),
        TokenKind::Op(Op::StarAssign) => Some(AssignOp::Mul),
        TokenKind::Op(Op::SlashAssign) => Some(AssignOp::Div),
        TokenKind::Op(Op::PercentAssign) => Some(AssignOp::Mod),
        _ => None,
    }
}

fn binary_op(kind: &TokenKind) -> Option<(BinOp, u8)> {
    let pair = match kind {
        TokenKind::Keyword(Keyword::Or) => (BinOp::Or, 1),
        TokenKind::Keyword(Keyword::And) => (BinOp::And, 2),
        TokenKind::Op(Op::Eq) => (BinOp::Eq, 3),
        TokenKind::Op(Op::NotEq) => (BinOp::NotEq, 3),
        TokenKind::Op(Op::Lt) => (BinOp::Lt, 4),
        TokenKind::Op(Op::Le) => (BinOp::Le, 4),
        TokenKind::Op(Op::Gt) => (BinOp::Gt, 4),
        TokenKind::Op(Op::Ge) => (BinOp::Ge, 4),
        TokenKind::Op(Op::Plus) => (BinOp::Add, 5),
        TokenKind::Op(Op::Minus) => (BinOp::Sub, 5),
        TokenKind::Op(Op::Star) => (BinOp::Mul, 6),
        TokenKind::Op(Op::Slash) => (BinOp::Div, 6),
        TokenKind::Op(Op::Percent) => (BinOp::Mod, 6),
        _ => return None,
    };
    Some(pair)
}

/// A `strategy.*` call used as a statement is an order command.
fn into_order(expr: Expr) -> Expr {
    match expr.kind {
        ExprKind::Call { callee, args } if callee.starts_with("strategy.") => Expr {
            id: expr.id,
            kind: ExprKind::Order {
                command: callee,
                args,
            },
            position: expr.position,
        },
        kind => Expr { kind, ..expr },
    }
}

/// Parse a token stream into a [`Script`].
pub fn parse(tokens: Vec<Token>) -> Result<Script, ParseError> {
    Parser::new(tokens).parse_script()
}
