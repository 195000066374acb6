/// Equation lexer
///
/// Hand-rolled over char indices. Keywords are case-insensitive, whitespace
/// and `//` comments are skipped, and the multi-word keywords `TIME STEP`,
/// `INITIAL TIME` and `FINAL TIME` are folded in a combining pass. The
/// contents of `{ ... }` unit literals are captured raw and handed to the
/// unit sub-lexer at the bottom of this file.

use serde::{Deserialize, Serialize};

use crate::error::{DiagnosticCode, EquationDiagnostic};
use crate::model::quantity::UnitMap;

/// Source span in byte offsets plus the 1-based line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
            column: if other.start < self.start { other.column } else { self.column },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(String),
    True,
    False,
    Ident(String),
    BracketedRef(String),
    UnitLiteral(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Xor,
    Not,
    If,
    Then,
    ElseIf,
    Else,
    End,
    Function,
    Lookup,
    Delay1,
    Delay3,
    Smooth,
    Smooth3,
    Time,
    TimeStep,
    InitialTime,
    FinalTime,
    Per,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
}

fn keyword(word: &str) -> Option<Tok> {
    match word.to_uppercase().as_str() {
        "TRUE" => Some(Tok::True),
        "FALSE" => Some(Tok::False),
        "AND" => Some(Tok::And),
        "OR" => Some(Tok::Or),
        "XOR" => Some(Tok::Xor),
        "NOT" => Some(Tok::Not),
        "IF" => Some(Tok::If),
        "THEN" => Some(Tok::Then),
        "ELSEIF" => Some(Tok::ElseIf),
        "ELSE" => Some(Tok::Else),
        "END" => Some(Tok::End),
        "FUNCTION" => Some(Tok::Function),
        "LOOKUP" => Some(Tok::Lookup),
        "DELAY1" => Some(Tok::Delay1),
        "DELAY3" => Some(Tok::Delay3),
        "SMOOTH" => Some(Tok::Smooth),
        "SMOOTH3" => Some(Tok::Smooth3),
        "TIME" => Some(Tok::Time),
        "PER" => Some(Tok::Per),
        _ => None,
    }
}

pub struct Lexer<'input> {
    text: &'input str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line_starts: Vec<usize>,
}

impl<'input> Lexer<'input> {
    pub fn new(text: &'input str) -> Self {
        let mut line_starts = vec![0];
        for (idx, ch) in text.char_indices() {
            if ch == '\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            text,
            chars: text.char_indices().collect(),
            pos: 0,
            line_starts,
        }
    }

    fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let column = self.text[self.line_starts[line]..offset].chars().count() + 1;
        (line + 1, column)
    }

    fn span(&self, start: usize, end: usize) -> Span {
        let (line, column) = self.line_col(start);
        Span { start, end, line, column }
    }

    fn peek(&self) -> Option<(usize, char)> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<(usize, char)> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let out = self.peek();
        self.pos += 1;
        out
    }

    fn offset(&self) -> usize {
        self.peek().map(|(idx, _)| idx).unwrap_or(self.text.len())
    }

    fn error(&self, code: DiagnosticCode, message: String, start: usize) -> EquationDiagnostic {
        let end = (start + 1).min(self.text.len());
        EquationDiagnostic::new(code, message).with_span(self.span(start, end), self.text)
    }

    /// Lex the whole input, folding multi-word keywords afterwards.
    pub fn tokenize(mut self) -> Result<Vec<Token>, EquationDiagnostic> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(fold_multiword(tokens))
    }

    fn next_token(&mut self) -> Result<Option<Token>, EquationDiagnostic> {
        self.skip_trivia();
        let (start, ch) = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let tok = match ch {
            '+' => self.single(Tok::Plus),
            '-' => self.single(Tok::Minus),
            '*' => self.single(Tok::Star),
            '%' => self.single(Tok::Percent),
            '^' => self.single(Tok::Caret),
            '(' => self.single(Tok::LParen),
            ')' => self.single(Tok::RParen),
            ',' => self.single(Tok::Comma),
            '/' => self.single(Tok::Slash),
            '=' => {
                self.bump();
                if matches!(self.peek(), Some((_, '='))) {
                    self.bump();
                }
                Tok::Eq
            }
            '!' => {
                self.bump();
                if matches!(self.peek(), Some((_, '='))) {
                    self.bump();
                    Tok::Neq
                } else {
                    Tok::Not
                }
            }
            '<' => {
                self.bump();
                match self.peek() {
                    Some((_, '=')) => {
                        self.bump();
                        Tok::Lte
                    }
                    Some((_, '>')) => {
                        self.bump();
                        Tok::Neq
                    }
                    _ => Tok::Lt,
                }
            }
            '>' => {
                self.bump();
                if matches!(self.peek(), Some((_, '='))) {
                    self.bump();
                    Tok::Gte
                } else {
                    Tok::Gt
                }
            }
            '&' => {
                self.bump();
                if matches!(self.peek(), Some((_, '&'))) {
                    self.bump();
                    Tok::And
                } else {
                    return Err(self.error(
                        DiagnosticCode::UnknownKeyword,
                        "expected '&&'".to_string(),
                        start,
                    ));
                }
            }
            '|' => {
                self.bump();
                if matches!(self.peek(), Some((_, '|'))) {
                    self.bump();
                    Tok::Or
                } else {
                    return Err(self.error(
                        DiagnosticCode::UnknownKeyword,
                        "expected '||'".to_string(),
                        start,
                    ));
                }
            }
            '[' => return self.bracketed_ref(start).map(Some),
            '{' => return self.unit_literal(start).map(Some),
            c if c.is_ascii_digit() || (c == '.' && self.next_is_digit()) => {
                return self.number(start).map(Some)
            }
            c if c.is_alphabetic() || c == '_' => {
                let word = self.word(start);
                keyword(&word).unwrap_or(Tok::Ident(word))
            }
            other => {
                return Err(self.error(
                    DiagnosticCode::UnknownKeyword,
                    format!("unexpected character '{}'", other),
                    start,
                ))
            }
        };

        let end = self.offset();
        Ok(Some(Token { tok, span: self.span(start, end) }))
    }

    fn single(&mut self, tok: Tok) -> Tok {
        self.bump();
        tok
    }

    fn next_is_digit(&self) -> bool {
        matches!(self.peek2(), Some((_, c)) if c.is_ascii_digit())
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some((_, c)) if c.is_whitespace() => {
                    self.bump();
                }
                Some((_, '/')) if matches!(self.peek2(), Some((_, '/'))) => {
                    while let Some((_, c)) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn word(&mut self, start: usize) -> String {
        while let Some((_, c)) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        self.text[start..self.offset()].to_string()
    }

    fn number(&mut self, start: usize) -> Result<Token, EquationDiagnostic> {
        while matches!(self.peek(), Some((_, c)) if c.is_ascii_digit()) {
            self.bump();
        }
        if matches!(self.peek(), Some((_, '.'))) && self.next_is_digit() {
            self.bump();
            while matches!(self.peek(), Some((_, c)) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some((_, 'e' | 'E'))) {
            let mark = self.pos;
            self.bump();
            if matches!(self.peek(), Some((_, '+' | '-'))) {
                self.bump();
            }
            if matches!(self.peek(), Some((_, c)) if c.is_ascii_digit()) {
                while matches!(self.peek(), Some((_, c)) if c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                // not an exponent after all, e.g. `2e` where `e` is an ident
                self.pos = mark;
            }
        }
        let end = self.offset();
        let raw = &self.text[start..end];
        if raw.parse::<f64>().is_err() {
            return Err(self.error(
                DiagnosticCode::UnexpectedToken,
                format!("invalid number literal '{}'", raw),
                start,
            ));
        }
        Ok(Token {
            tok: Tok::Num(raw.to_string()),
            span: self.span(start, end),
        })
    }

    fn bracketed_ref(&mut self, start: usize) -> Result<Token, EquationDiagnostic> {
        self.bump(); // [
        let content_start = self.offset();
        while let Some((_, c)) = self.peek() {
            if c == ']' {
                let content = self.text[content_start..self.offset()].trim().to_string();
                self.bump();
                let end = self.offset();
                if content.is_empty() {
                    return Err(self.error(
                        DiagnosticCode::UnexpectedToken,
                        "empty bracketed reference".to_string(),
                        start,
                    ));
                }
                return Ok(Token {
                    tok: Tok::BracketedRef(content),
                    span: self.span(start, end),
                });
            }
            self.bump();
        }
        Err(self.error(
            DiagnosticCode::UnclosedBlock,
            "unclosed '[' reference".to_string(),
            start,
        ))
    }

    fn unit_literal(&mut self, start: usize) -> Result<Token, EquationDiagnostic> {
        self.bump(); // {
        let content_start = self.offset();
        while let Some((_, c)) = self.peek() {
            if c == '}' {
                let content = self.text[content_start..self.offset()].to_string();
                self.bump();
                let end = self.offset();
                return Ok(Token {
                    tok: Tok::UnitLiteral(content),
                    span: self.span(start, end),
                });
            }
            self.bump();
        }
        Err(self.error(
            DiagnosticCode::UnclosedBlock,
            "unclosed '{' unit literal".to_string(),
            start,
        ))
    }
}

/// Fold `TIME STEP`, `INITIAL TIME` and `FINAL TIME` into single tokens.
fn fold_multiword(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        let folded = match (&token.tok, iter.peek()) {
            (Tok::Time, Some(next)) if ident_is(&next.tok, "STEP") => {
                let next = iter.next().unwrap();
                Some(Token { tok: Tok::TimeStep, span: token.span.merge(&next.span) })
            }
            (Tok::Ident(word), Some(next))
                if word.eq_ignore_ascii_case("INITIAL") && next.tok == Tok::Time =>
            {
                let next = iter.next().unwrap();
                Some(Token { tok: Tok::InitialTime, span: token.span.merge(&next.span) })
            }
            (Tok::Ident(word), Some(next))
                if word.eq_ignore_ascii_case("FINAL") && next.tok == Tok::Time =>
            {
                let next = iter.next().unwrap();
                Some(Token { tok: Tok::FinalTime, span: token.span.merge(&next.span) })
            }
            _ => None,
        };
        out.push(folded.unwrap_or(token));
    }
    out
}

fn ident_is(tok: &Tok, word: &str) -> bool {
    matches!(tok, Tok::Ident(s) if s.eq_ignore_ascii_case(word))
}

// ---------------------------------------------------------------------------
// Unit sub-lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum UnitTok {
    Ident(String),
    Num(f64),
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize_units(text: &str, outer: &Span, source: &str) -> Result<Vec<UnitTok>, EquationDiagnostic> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '*' => {
                tokens.push(UnitTok::Star);
                i += 1;
            }
            '/' => {
                tokens.push(UnitTok::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(UnitTok::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(UnitTok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(UnitTok::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let value = raw.parse::<f64>().map_err(|_| {
                    EquationDiagnostic::new(
                        DiagnosticCode::InvalidUnitToken,
                        format!("invalid number '{}' in unit expression", raw),
                    )
                    .with_span(*outer, source)
                })?;
                tokens.push(UnitTok::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(UnitTok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(EquationDiagnostic::new(
                    DiagnosticCode::InvalidUnitToken,
                    format!("unexpected character '{}' in unit expression", other),
                )
                .with_span(*outer, source));
            }
        }
    }
    Ok(tokens)
}

struct UnitParser<'a> {
    tokens: Vec<UnitTok>,
    pos: usize,
    outer: Span,
    source: &'a str,
}

impl<'a> UnitParser<'a> {
    fn peek(&self) -> Option<&UnitTok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<UnitTok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn error(&self, code: DiagnosticCode, message: String) -> EquationDiagnostic {
        EquationDiagnostic::new(code, message).with_span(self.outer, self.source)
    }

    /// expr := product (('/' | 'per') product)*
    fn expr(&mut self) -> Result<(f64, UnitMap), EquationDiagnostic> {
        let (mut scale, mut units) = self.product()?;
        loop {
            let divide = match self.peek() {
                Some(UnitTok::Slash) => true,
                Some(UnitTok::Ident(word)) if word.eq_ignore_ascii_case("per") => true,
                _ => false,
            };
            if !divide {
                break;
            }
            self.bump();
            let (rhs_scale, rhs_units) = self.product()?;
            scale /= rhs_scale;
            units = units.divide(&rhs_units);
        }
        Ok((scale, units))
    }

    /// product := postfix (('*')? postfix)*  -- adjacency multiplies
    fn product(&mut self) -> Result<(f64, UnitMap), EquationDiagnostic> {
        let (mut scale, mut units) = self.postfix()?;
        loop {
            match self.peek() {
                Some(UnitTok::Star) => {
                    self.bump();
                }
                Some(UnitTok::Ident(word)) if word.eq_ignore_ascii_case("per") => break,
                Some(UnitTok::Ident(_)) | Some(UnitTok::Num(_)) | Some(UnitTok::LParen) => {}
                _ => break,
            }
            let (rhs_scale, rhs_units) = self.postfix()?;
            scale *= rhs_scale;
            units = units.multiply(&rhs_units);
        }
        Ok((scale, units))
    }

    /// postfix := atom ('^' num)? ('squared' | 'cubed')?
    fn postfix(&mut self) -> Result<(f64, UnitMap), EquationDiagnostic> {
        let (mut scale, mut units) = self.atom()?;
        if matches!(self.peek(), Some(UnitTok::Caret)) {
            self.bump();
            match self.bump() {
                Some(UnitTok::Num(exp)) if exp.is_finite() => {
                    scale = scale.powf(exp);
                    units = units.raise(exp);
                }
                _ => {
                    return Err(self.error(
                        DiagnosticCode::InvalidUnitExponent,
                        "expected a finite number after '^'".to_string(),
                    ))
                }
            }
        }
        if let Some(UnitTok::Ident(word)) = self.peek() {
            let power = if word.eq_ignore_ascii_case("squared") {
                Some(2.0)
            } else if word.eq_ignore_ascii_case("cubed") {
                Some(3.0)
            } else {
                None
            };
            if let Some(power) = power {
                self.bump();
                scale = scale.powf(power);
                units = units.raise(power);
            }
        }
        Ok((scale, units))
    }

    fn atom(&mut self) -> Result<(f64, UnitMap), EquationDiagnostic> {
        match self.bump() {
            Some(UnitTok::Ident(symbol)) => Ok((1.0, UnitMap::base(&symbol.to_lowercase()))),
            Some(UnitTok::Num(value)) => Ok((value, UnitMap::new())),
            Some(UnitTok::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(UnitTok::RParen) => Ok(inner),
                    _ => Err(self.error(
                        DiagnosticCode::UnclosedBlock,
                        "unclosed '(' in unit expression".to_string(),
                    )),
                }
            }
            other => Err(self.error(
                DiagnosticCode::InvalidUnitToken,
                format!("unexpected unit token {:?}", other),
            )),
        }
    }
}

/// Parse the raw text of a `{ ... }` literal into a numeric scale (1.0 when
/// no leading number is given) and a unit map.
pub fn parse_unit_text(
    text: &str,
    outer: Span,
    source: &str,
) -> Result<(f64, UnitMap), EquationDiagnostic> {
    let tokens = tokenize_units(text, &outer, source)?;
    if tokens.is_empty() {
        return Ok((1.0, UnitMap::new()));
    }
    let mut parser = UnitParser { tokens, pos: 0, outer, source };
    let out = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error(
            DiagnosticCode::InvalidUnitToken,
            "trailing input in unit expression".to_string(),
        ));
    }
    Ok(out)
}

/// Parse a model-level unit declaration string (e.g. a stock's `units`
/// field). Declarations have no leading scale.
pub fn parse_unit_declaration(text: &str) -> Result<UnitMap, EquationDiagnostic> {
    let span = Span { start: 0, end: text.len(), line: 1, column: 1 };
    let (scale, units) = parse_unit_text(text, span, text)?;
    if (scale - 1.0).abs() > f64::EPSILON {
        return Err(EquationDiagnostic::new(
            DiagnosticCode::InvalidUnitToken,
            format!("unit declaration '{}' must not carry a numeric scale", text),
        ));
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<Tok> {
        Lexer::new(text)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_operators_and_numbers() {
        assert_eq!(
            lex("1 + 2.5 * x"),
            vec![
                Tok::Num("1".into()),
                Tok::Plus,
                Tok::Num("2.5".into()),
                Tok::Star,
                Tok::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(lex("if THEN eLsE"), vec![Tok::If, Tok::Then, Tok::Else]);
        assert_eq!(lex("true FALSE"), vec![Tok::True, Tok::False]);
    }

    #[test]
    fn test_multiword_keywords() {
        assert_eq!(lex("TIME STEP"), vec![Tok::TimeStep]);
        assert_eq!(lex("initial time"), vec![Tok::InitialTime]);
        assert_eq!(lex("Final Time"), vec![Tok::FinalTime]);
        // bare TIME stays TIME
        assert_eq!(lex("TIME + 1"), vec![Tok::Time, Tok::Plus, Tok::Num("1".into())]);
    }

    #[test]
    fn test_bracketed_reference_keeps_spaces() {
        assert_eq!(
            lex("[Total Population] * 2"),
            vec![
                Tok::BracketedRef("Total Population".into()),
                Tok::Star,
                Tok::Num("2".into()),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            lex("1 // the rest is noise\n+ 2"),
            vec![Tok::Num("1".into()), Tok::Plus, Tok::Num("2".into())]
        );
    }

    #[test]
    fn test_comparison_spellings() {
        assert_eq!(lex("a <> b"), vec![Tok::Ident("a".into()), Tok::Neq, Tok::Ident("b".into())]);
        assert_eq!(lex("a != b"), vec![Tok::Ident("a".into()), Tok::Neq, Tok::Ident("b".into())]);
        assert_eq!(lex("a == b"), vec![Tok::Ident("a".into()), Tok::Eq, Tok::Ident("b".into())]);
        assert_eq!(lex("a = b"), vec![Tok::Ident("a".into()), Tok::Eq, Tok::Ident("b".into())]);
        assert_eq!(lex("a && !b"), vec![Tok::Ident("a".into()), Tok::And, Tok::Not, Tok::Ident("b".into())]);
    }

    #[test]
    fn test_unclosed_brace_is_diagnosed() {
        let err = Lexer::new("2 {person").tokenize().unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnclosedBlock);
        let err = Lexer::new("[Population").tokenize().unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnclosedBlock);
    }

    #[test]
    fn test_unknown_character() {
        let err = Lexer::new("1 @ 2").tokenize().unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnknownKeyword);
    }

    fn units(text: &str) -> (f64, UnitMap) {
        let span = Span { start: 0, end: text.len(), line: 1, column: 1 };
        parse_unit_text(text, span, text).unwrap()
    }

    #[test]
    fn test_unit_simple() {
        let (scale, map) = units("person");
        assert_eq!(scale, 1.0);
        assert_eq!(map, UnitMap::base("person"));
    }

    #[test]
    fn test_unit_per_and_slash() {
        let (_, a) = units("person per tick");
        let (_, b) = units("person / tick");
        assert_eq!(a, b);
        assert_eq!(a, UnitMap::from_pairs([("person", 1.0), ("tick", -1.0)]));
    }

    #[test]
    fn test_unit_squared_cubed() {
        let (_, a) = units("meter squared");
        assert_eq!(a, UnitMap::from_pairs([("meter", 2.0)]));
        let (_, b) = units("meter cubed per second");
        assert_eq!(b, UnitMap::from_pairs([("meter", 3.0), ("second", -1.0)]));
    }

    #[test]
    fn test_unit_caret_exponent() {
        let (_, a) = units("meter^2 / second^2");
        assert_eq!(a, UnitMap::from_pairs([("meter", 2.0), ("second", -2.0)]));
        let (_, b) = units("tick^-1");
        assert_eq!(b, UnitMap::from_pairs([("tick", -1.0)]));
    }

    #[test]
    fn test_unit_leading_scale() {
        let (scale, map) = units("1 tick");
        assert_eq!(scale, 1.0);
        assert_eq!(map, UnitMap::base("tick"));

        let (scale, map) = units("100 person");
        assert_eq!(scale, 100.0);
        assert_eq!(map, UnitMap::base("person"));
    }

    #[test]
    fn test_unit_bad_exponent() {
        let span = Span { start: 0, end: 7, line: 1, column: 1 };
        let err = parse_unit_text("meter^x", span, "meter^x").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::InvalidUnitExponent);
    }

    #[test]
    fn test_unit_declaration_rejects_scale() {
        assert!(parse_unit_declaration("person / tick").is_ok());
        assert!(parse_unit_declaration("10 person").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // the lexer reports diagnostics, it never panics
            #[test]
            fn lexing_arbitrary_ascii_never_panics(s in "[ -~]{0,60}") {
                let _ = Lexer::new(&s).tokenize();
            }

            #[test]
            fn lexed_numbers_round_trip(v in 0.0_f64..1e9) {
                let text = format!("{}", v);
                let tokens = Lexer::new(&text).tokenize().unwrap();
                prop_assert_eq!(tokens.len(), 1);
                match &tokens[0].tok {
                    Tok::Num(raw) => prop_assert_eq!(raw.parse::<f64>().unwrap(), v),
                    other => prop_assert!(false, "expected a number, got {:?}", other),
                }
            }
        }
    }
}
