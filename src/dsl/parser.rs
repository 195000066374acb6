/// Pratt parser for the equation DSL
///
/// Precedence, low to high: OR, XOR, AND, equality, relational, additive,
/// multiplicative, exponent (right-associative). Unary operators bind
/// tighter than exponentiation, so `-2 ^ 2` is `(-2) ^ 2`.

use crate::dsl::ast::{
    BinaryOp, DelayKind, Equation, Expr, ExprKind, LookupPoint, MacroDef, TimeRef, UnaryOp,
};
use crate::dsl::token::{parse_unit_text, Lexer, Span, Tok, Token};
use crate::error::{DiagnosticCode, EquationDiagnostic, Error};
use crate::model::quantity::UnitMap;

/// Parse an equation string into macros plus a body expression.
pub fn parse(source: &str) -> Result<Equation, Error> {
    parse_inner(source).map_err(Error::EquationParse)
}

fn parse_inner(source: &str) -> Result<Equation, EquationDiagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0, source };

    let mut macros = Vec::new();
    while parser.peek_tok() == Some(&Tok::Function) {
        macros.push(parser.function_def()?);
    }

    let body = parser.expr_bp(0)?;
    if let Some(token) = parser.peek() {
        let span = token.span;
        return Err(parser.error_at(
            DiagnosticCode::TrailingInput,
            format!("unexpected input after expression: {:?}", token.tok),
            span,
        ));
    }

    Ok(Equation {
        source: source.to_string(),
        macros,
        body,
    })
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_tok(&self) -> Option<&Tok> {
        self.peek().map(|t| &t.tok)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn end_span(&self) -> Span {
        let end = self.source.len();
        let line = self.source.lines().count().max(1);
        let column = self.source.lines().last().map(|l| l.chars().count() + 1).unwrap_or(1);
        Span { start: end, end, line, column }
    }

    fn error_at(&self, code: DiagnosticCode, message: String, span: Span) -> EquationDiagnostic {
        EquationDiagnostic::new(code, message).with_span(span, self.source)
    }

    fn unexpected(&self, expected: &str) -> EquationDiagnostic {
        match self.peek() {
            Some(token) => self.error_at(
                DiagnosticCode::UnexpectedToken,
                format!("expected {}, found {:?}", expected, token.tok),
                token.span,
            ),
            None => self.error_at(
                DiagnosticCode::UnexpectedToken,
                format!("expected {}, found end of input", expected),
                self.end_span(),
            ),
        }
    }

    fn expect(&mut self, tok: Tok, expected: &str) -> Result<Token, EquationDiagnostic> {
        if self.peek_tok() == Some(&tok) {
            Ok(self.bump().unwrap())
        } else {
            Err(self.unexpected(expected))
        }
    }

    // -- Pratt core --------------------------------------------------------

    fn expr_bp(&mut self, min_bp: u8) -> Result<Expr, EquationDiagnostic> {
        let mut lhs = self.prefix()?;

        while let Some((op, l_bp, r_bp)) = self.peek_binary() {
            if l_bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.expr_bp(r_bp)?;
            let span = lhs.span.merge(&rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                span,
            );
        }

        Ok(lhs)
    }

    fn peek_binary(&self) -> Option<(BinaryOp, u8, u8)> {
        let op = match self.peek_tok()? {
            Tok::Or => (BinaryOp::Or, 1, 2),
            Tok::Xor => (BinaryOp::Xor, 3, 4),
            Tok::And => (BinaryOp::And, 5, 6),
            Tok::Eq => (BinaryOp::Eq, 7, 8),
            Tok::Neq => (BinaryOp::Neq, 7, 8),
            Tok::Lt => (BinaryOp::Lt, 9, 10),
            Tok::Lte => (BinaryOp::Lte, 9, 10),
            Tok::Gt => (BinaryOp::Gt, 9, 10),
            Tok::Gte => (BinaryOp::Gte, 9, 10),
            Tok::Plus => (BinaryOp::Add, 11, 12),
            Tok::Minus => (BinaryOp::Sub, 11, 12),
            Tok::Star => (BinaryOp::Mul, 13, 14),
            Tok::Slash => (BinaryOp::Div, 13, 14),
            Tok::Percent => (BinaryOp::Mod, 13, 14),
            // right-associative
            Tok::Caret => (BinaryOp::Pow, 16, 15),
            _ => return None,
        };
        Some(op)
    }

    /// Unary prefix binding power; tighter than `^`.
    const UNARY_BP: u8 = 17;

    fn prefix(&mut self) -> Result<Expr, EquationDiagnostic> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.unexpected("an expression")),
        };

        match token.tok {
            Tok::Plus | Tok::Minus | Tok::Not => {
                self.bump();
                let op = match token.tok {
                    Tok::Plus => UnaryOp::Pos,
                    Tok::Minus => UnaryOp::Neg,
                    _ => UnaryOp::Not,
                };
                let operand = self.expr_bp(Self::UNARY_BP)?;
                let span = token.span.merge(&operand.span);
                Ok(Expr::new(ExprKind::Unary { op, expr: Box::new(operand) }, span))
            }
            Tok::Num(raw) => {
                self.bump();
                self.quantity_literal(&raw, token.span)
            }
            Tok::UnitLiteral(text) => {
                self.bump();
                let (scale, units) = parse_unit_text(&text, token.span, self.source)?;
                Ok(Expr::new(
                    ExprKind::QuantityLiteral { value: scale, units: Some(units) },
                    token.span,
                ))
            }
            Tok::True => {
                self.bump();
                Ok(Expr::new(ExprKind::BooleanLiteral(true), token.span))
            }
            Tok::False => {
                self.bump();
                Ok(Expr::new(ExprKind::BooleanLiteral(false), token.span))
            }
            Tok::Ident(name) => {
                self.bump();
                if self.peek_tok() == Some(&Tok::LParen) {
                    self.call(name, token.span)
                } else {
                    Ok(Expr::new(ExprKind::Ref { name, bracketed: false }, token.span))
                }
            }
            Tok::BracketedRef(name) => {
                self.bump();
                Ok(Expr::new(ExprKind::Ref { name, bracketed: true }, token.span))
            }
            Tok::Time => {
                self.bump();
                Ok(Expr::new(ExprKind::Time(TimeRef::Time), token.span))
            }
            Tok::TimeStep => {
                self.bump();
                Ok(Expr::new(ExprKind::Time(TimeRef::TimeStep), token.span))
            }
            Tok::InitialTime => {
                self.bump();
                Ok(Expr::new(ExprKind::Time(TimeRef::InitialTime), token.span))
            }
            Tok::FinalTime => {
                self.bump();
                Ok(Expr::new(ExprKind::Time(TimeRef::FinalTime), token.span))
            }
            Tok::If => self.if_chain(token.span),
            Tok::Lookup => self.lookup(token.span),
            Tok::Delay1 => self.delay(DelayKind::Delay1, token.span),
            Tok::Delay3 => self.delay(DelayKind::Delay3, token.span),
            Tok::Smooth => self.delay(DelayKind::Smooth, token.span),
            Tok::Smooth3 => self.delay(DelayKind::Smooth3, token.span),
            Tok::LParen => {
                self.bump();
                let inner = self.expr_bp(0)?;
                let close = self.expect(Tok::RParen, "')'")?;
                let span = token.span.merge(&close.span);
                // keep the inner node but widen its span for diagnostics
                Ok(Expr::new(inner.kind, span))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    // -- Literals ----------------------------------------------------------

    fn quantity_literal(&mut self, raw: &str, span: Span) -> Result<Expr, EquationDiagnostic> {
        let value: f64 = raw.parse().map_err(|_| {
            self.error_at(
                DiagnosticCode::UnexpectedToken,
                format!("invalid number literal '{}'", raw),
                span,
            )
        })?;
        if let Some(Tok::UnitLiteral(text)) = self.peek_tok().cloned() {
            let unit_token = self.bump().unwrap();
            let (scale, units) = parse_unit_text(&text, unit_token.span, self.source)?;
            let span = span.merge(&unit_token.span);
            return Ok(Expr::new(
                ExprKind::QuantityLiteral { value: value * scale, units: Some(units) },
                span,
            ));
        }
        Ok(Expr::new(ExprKind::QuantityLiteral { value, units: None }, span))
    }

    /// A possibly negated number with an optional unit brace, as used in
    /// lookup point lists.
    fn signed_quantity(&mut self) -> Result<(f64, Option<UnitMap>), EquationDiagnostic> {
        let negate = if self.peek_tok() == Some(&Tok::Minus) {
            self.bump();
            true
        } else {
            false
        };
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.unexpected("a number")),
        };
        let raw = match token.tok {
            Tok::Num(raw) => raw,
            _ => return Err(self.unexpected("a number")),
        };
        self.bump();
        let expr = self.quantity_literal(&raw, token.span)?;
        match expr.kind {
            ExprKind::QuantityLiteral { value, units } => {
                Ok((if negate { -value } else { value }, units))
            }
            _ => unreachable!("quantity_literal only builds literals"),
        }
    }

    // -- Compound forms ----------------------------------------------------

    fn call(&mut self, name: String, start: Span) -> Result<Expr, EquationDiagnostic> {
        self.expect(Tok::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek_tok() != Some(&Tok::RParen) {
            loop {
                args.push(self.expr_bp(0)?);
                if self.peek_tok() == Some(&Tok::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let close = self.expect(Tok::RParen, "')'")?;
        let span = start.merge(&close.span);
        Ok(Expr::new(ExprKind::Call { name, args }, span))
    }

    fn if_chain(&mut self, start: Span) -> Result<Expr, EquationDiagnostic> {
        self.expect(Tok::If, "'IF'")?;
        let mut branches = Vec::new();

        let cond = self.expr_bp(0)?;
        self.expect(Tok::Then, "'THEN'")?;
        let then = self.expr_bp(0)?;
        branches.push((cond, then));

        let mut otherwise = None;
        loop {
            match self.peek_tok() {
                Some(Tok::ElseIf) => {
                    self.bump();
                    let cond = self.expr_bp(0)?;
                    self.expect(Tok::Then, "'THEN'")?;
                    let then = self.expr_bp(0)?;
                    branches.push((cond, then));
                }
                Some(Tok::Else) => {
                    self.bump();
                    otherwise = Some(Box::new(self.expr_bp(0)?));
                    break;
                }
                _ => break,
            }
        }

        self.expect(Tok::End, "'END IF'")?;
        let close = self.expect(Tok::If, "'END IF'")?;
        let span = start.merge(&close.span);
        Ok(Expr::new(ExprKind::IfChain { branches, otherwise }, span))
    }

    fn lookup(&mut self, start: Span) -> Result<Expr, EquationDiagnostic> {
        self.expect(Tok::Lookup, "'LOOKUP'")?;
        self.expect(Tok::LParen, "'('")?;
        let input = self.expr_bp(0)?;
        self.expect(Tok::Comma, "','")?;

        let mut points = Vec::new();
        let mut x_units: Option<UnitMap> = None;
        let mut y_units: Option<UnitMap> = None;
        while self.peek_tok() == Some(&Tok::LParen) {
            self.bump();
            let (x, xu) = self.signed_quantity()?;
            self.expect(Tok::Comma, "','")?;
            let (y, yu) = self.signed_quantity()?;
            self.expect(Tok::RParen, "')'")?;
            if x_units.is_none() {
                x_units = xu;
            }
            if y_units.is_none() {
                y_units = yu;
            }
            points.push(LookupPoint { x, y });
        }
        if points.is_empty() {
            return Err(self.unexpected("at least one '(x, y)' lookup point"));
        }

        let close = self.expect(Tok::RParen, "')'")?;
        let span = start.merge(&close.span);
        Ok(Expr::new(
            ExprKind::Lookup1D {
                input: Box::new(input),
                points,
                x_units,
                y_units,
            },
            span,
        ))
    }

    fn delay(&mut self, kind: DelayKind, start: Span) -> Result<Expr, EquationDiagnostic> {
        self.bump(); // the DELAY1/DELAY3/SMOOTH/SMOOTH3 keyword
        self.expect(Tok::LParen, "'('")?;
        let input = self.expr_bp(0)?;
        self.expect(Tok::Comma, "','")?;
        let tau = self.expr_bp(0)?;
        let initial = if self.peek_tok() == Some(&Tok::Comma) {
            self.bump();
            Some(Box::new(self.expr_bp(0)?))
        } else {
            None
        };
        let close = self.expect(Tok::RParen, "')'")?;
        let span = start.merge(&close.span);
        Ok(Expr::new(
            ExprKind::Delay {
                kind,
                input: Box::new(input),
                tau: Box::new(tau),
                initial,
            },
            span,
        ))
    }

    fn function_def(&mut self) -> Result<MacroDef, EquationDiagnostic> {
        let start = self.expect(Tok::Function, "'FUNCTION'")?.span;
        let name = match self.bump() {
            Some(Token { tok: Tok::Ident(name), .. }) => name,
            _ => return Err(self.unexpected("a function name")),
        };
        self.expect(Tok::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek_tok() != Some(&Tok::RParen) {
            loop {
                match self.bump() {
                    Some(Token { tok: Tok::Ident(param), .. }) => params.push(param),
                    _ => return Err(self.unexpected("a parameter name")),
                }
                if self.peek_tok() == Some(&Tok::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, "')'")?;
        let body = self.expr_bp(0)?;
        self.expect(Tok::End, "'END FUNCTION'")?;
        let close = self.expect(Tok::Function, "'END FUNCTION'")?;
        Ok(MacroDef {
            name,
            params,
            body,
            span: start.merge(&close.span),
        })
    }
}
