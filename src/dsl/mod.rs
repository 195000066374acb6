/// Equation DSL: lexer, parser, AST and evaluator

pub mod ast;
pub mod eval;
pub mod parser;
pub mod token;

pub use ast::{BinaryOp, DelayKind, Equation, Expr, ExprKind, MacroDef, TimeRef, UnaryOp};
pub use eval::{evaluate, DelayContext, Scope};
pub use parser::parse;
pub use token::{parse_unit_declaration, Span};
