/// Equation AST
///
/// Every node carries its source span and a stable id derived from it
/// (`n:{start}:{end}`), so diagnostics and run-scoped delay state can refer
/// to nodes across evaluations. The `Display` impl prints a canonical form
/// that re-parses to the same structure.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dsl::token::Span;
use crate::model::quantity::UnitMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
        }
    }
}

/// Which delay/smoothing primitive a `Delay` node denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayKind {
    Delay1,
    Delay3,
    Smooth,
    Smooth3,
}

impl DelayKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            DelayKind::Delay1 => "DELAY1",
            DelayKind::Delay3 => "DELAY3",
            DelayKind::Smooth => "SMOOTH",
            DelayKind::Smooth3 => "SMOOTH3",
        }
    }

    /// Number of cascaded stages the primitive carries.
    pub fn stages(&self) -> usize {
        match self {
            DelayKind::Delay1 | DelayKind::Smooth => 1,
            DelayKind::Delay3 | DelayKind::Smooth3 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRef {
    Time,
    TimeStep,
    InitialTime,
    FinalTime,
}

impl TimeRef {
    /// The alias under which the value is bound in the evaluation scope.
    pub fn alias(&self) -> &'static str {
        match self {
            TimeRef::Time => "TIME",
            TimeRef::TimeStep => "TIME STEP",
            TimeRef::InitialTime => "INITIAL TIME",
            TimeRef::FinalTime => "FINAL TIME",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookupPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    QuantityLiteral {
        value: f64,
        units: Option<UnitMap>,
    },
    BooleanLiteral(bool),
    Ref {
        name: String,
        bracketed: bool,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IfChain {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Lookup1D {
        input: Box<Expr>,
        points: Vec<LookupPoint>,
        x_units: Option<UnitMap>,
        y_units: Option<UnitMap>,
    },
    Delay {
        kind: DelayKind,
        input: Box<Expr>,
        tau: Box<Expr>,
        initial: Option<Box<Expr>>,
    },
    Time(TimeRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: String,
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            id: format!("n:{}:{}", span.start, span.end),
            span,
            kind,
        }
    }

    /// Structural equality that ignores spans and the ids derived from them.
    pub fn same_shape(&self, other: &Expr) -> bool {
        self.to_string() == other.to_string()
    }
}

/// A `FUNCTION name(params) body END FUNCTION` macro definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
    pub span: Span,
}

/// A parsed equation: zero or more macros plus the expression body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub source: String,
    pub macros: Vec<MacroDef>,
    pub body: Expr,
}

fn ident_like(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::QuantityLiteral { value, units } => match units {
                Some(units) if !units.is_empty() => write!(f, "{} {{{}}}", value, units),
                Some(_) | None => write!(f, "{}", value),
            },
            ExprKind::BooleanLiteral(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            ExprKind::Ref { name, .. } => {
                if ident_like(name) {
                    write!(f, "{}", name)
                } else {
                    write!(f, "[{}]", name)
                }
            }
            ExprKind::Unary { op, expr } => match op {
                UnaryOp::Neg => write!(f, "(-{})", expr),
                UnaryOp::Pos => write!(f, "(+{})", expr),
                UnaryOp::Not => write!(f, "(NOT {})", expr),
            },
            ExprKind::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            ExprKind::IfChain { branches, otherwise } => {
                for (i, (cond, then)) in branches.iter().enumerate() {
                    if i == 0 {
                        write!(f, "IF {} THEN {}", cond, then)?;
                    } else {
                        write!(f, " ELSEIF {} THEN {}", cond, then)?;
                    }
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                write!(f, " END IF")
            }
            ExprKind::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            ExprKind::Lookup1D { input, points, x_units, y_units } => {
                write!(f, "LOOKUP({}, ", input)?;
                for (i, point) in points.iter().enumerate() {
                    if i == 0 {
                        match (x_units, y_units) {
                            (Some(xu), Some(yu)) if !xu.is_empty() || !yu.is_empty() => {
                                write!(f, "({} {{{}}}, {} {{{}}})", point.x, xu, point.y, yu)?
                            }
                            (Some(xu), None) if !xu.is_empty() => {
                                write!(f, "({} {{{}}}, {})", point.x, xu, point.y)?
                            }
                            (None, Some(yu)) if !yu.is_empty() => {
                                write!(f, "({}, {} {{{}}})", point.x, point.y, yu)?
                            }
                            _ => write!(f, "({}, {})", point.x, point.y)?,
                        }
                    } else {
                        write!(f, "({}, {})", point.x, point.y)?;
                    }
                }
                write!(f, ")")
            }
            ExprKind::Delay { kind, input, tau, initial } => {
                write!(f, "{}({}, {}", kind.keyword(), input, tau)?;
                if let Some(initial) = initial {
                    write!(f, ", {}", initial)?;
                }
                write!(f, ")")
            }
            ExprKind::Time(time) => write!(f, "{}", time.alias()),
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for def in &self.macros {
            write!(f, "FUNCTION {}(", def.name)?;
            for (i, param) in def.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", param)?;
            }
            writeln!(f, ") {} END FUNCTION", def.body)?;
        }
        write!(f, "{}", self.body)
    }
}
