/// Equation evaluator
///
/// Walks the AST against an immutable scope of named quantities. Delay and
/// smoothing primitives read and (when committing) update a run-scoped
/// `DelayStateStore` supplied by the solver layer.

use std::collections::HashMap;

use crate::dsl::ast::{BinaryOp, DelayKind, Equation, Expr, ExprKind, MacroDef, UnaryOp};
use crate::error::Error;
use crate::model::quantity::{Quantity, QuantityError, UnitMap, UNIT_EPSILON};
use crate::simulation::delay::{DelayStateEntry, DelayStateStore};

/// Immutable scope chain; macro invocation pushes a child frame.
#[derive(Debug, Default)]
pub struct Scope<'a> {
    vars: HashMap<String, Quantity>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn root() -> Self {
        Self { vars: HashMap::new(), parent: None }
    }

    pub fn child(&'a self) -> Scope<'a> {
        Scope { vars: HashMap::new(), parent: Some(self) }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Quantity) {
        self.vars.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&Quantity> {
        self.vars
            .get(name)
            .or_else(|| self.parent.and_then(|p| p.lookup(name)))
    }
}

/// Mutable delay access for one evaluation: the store, the id of the flow or
/// variable that owns the equation, and whether stage updates persist.
pub struct DelayContext<'a> {
    pub store: &'a mut DelayStateStore,
    pub owner: String,
    pub commit: bool,
}

/// Evaluate an equation body against `scope`.
pub fn evaluate(
    equation: &Equation,
    scope: &Scope<'_>,
    delay: Option<&mut DelayContext<'_>>,
) -> Result<Quantity, Error> {
    let macros: HashMap<&str, &MacroDef> = equation
        .macros
        .iter()
        .map(|def| (def.name.as_str(), def))
        .collect();
    let mut evaluator = Evaluator {
        source: &equation.source,
        macros,
        delay,
        call_stack: Vec::new(),
    };
    evaluator.eval(&equation.body, scope)
}

struct Evaluator<'a, 'd> {
    source: &'a str,
    macros: HashMap<&'a str, &'a MacroDef>,
    delay: Option<&'a mut DelayContext<'d>>,
    call_stack: Vec<String>,
}

const BUILTINS_ONE_ARG: &[&str] = &[
    "abs", "acos", "asin", "atan", "ceil", "cos", "exp", "floor", "log", "log10", "round", "sin",
    "sqrt", "tan",
];
const BUILTINS_TWO_ARG: &[&str] = &["max", "min", "pow"];

impl<'a, 'd> Evaluator<'a, 'd> {
    fn fail(&self, problem: impl Into<String>) -> Error {
        Error::evaluation(problem, self.source)
    }

    fn quantity_err(&self, err: QuantityError) -> Error {
        self.fail(err.to_string())
    }

    fn truthy(q: &Quantity) -> bool {
        q.value != 0.0
    }

    fn boolean(value: bool) -> Quantity {
        Quantity::unitless(if value { 1.0 } else { 0.0 })
    }

    fn eval(&mut self, expr: &Expr, scope: &Scope<'_>) -> Result<Quantity, Error> {
        match &expr.kind {
            ExprKind::QuantityLiteral { value, units } => Ok(Quantity::new(
                *value,
                units.clone().unwrap_or_default(),
            )),
            ExprKind::BooleanLiteral(b) => Ok(Self::boolean(*b)),
            ExprKind::Ref { name, .. } => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| self.fail(format!("identifier '{}' not found", name))),
            ExprKind::Time(time) => scope
                .lookup(time.alias())
                .cloned()
                .ok_or_else(|| self.fail(format!("'{}' is not bound in this scope", time.alias()))),
            ExprKind::Unary { op, expr: inner } => {
                let value = self.eval(inner, scope)?;
                Ok(match op {
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Pos => value,
                    UnaryOp::Not => Self::boolean(!Self::truthy(&value)),
                })
            }
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, scope),
            ExprKind::IfChain { branches, otherwise } => {
                for (cond, then) in branches {
                    let cond = self.eval(cond, scope)?;
                    if Self::truthy(&cond) {
                        return self.eval(then, scope);
                    }
                }
                match otherwise {
                    Some(otherwise) => self.eval(otherwise, scope),
                    None => Err(self.fail("no IF branch matched and there is no ELSE")),
                }
            }
            ExprKind::Call { name, args } => self.eval_call(name, args, scope),
            ExprKind::Lookup1D { input, points, x_units, y_units } => {
                self.eval_lookup(input, points, x_units, y_units, scope)
            }
            ExprKind::Delay { kind, input, tau, initial } => {
                self.eval_delay(expr, *kind, input, tau, initial.as_deref(), scope)
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Scope<'_>,
    ) -> Result<Quantity, Error> {
        let a = self.eval(left, scope)?;
        let b = self.eval(right, scope)?;

        match op {
            BinaryOp::Add => a.add(&b).map_err(|e| self.quantity_err(e)),
            BinaryOp::Sub => a.sub(&b).map_err(|e| self.quantity_err(e)),
            BinaryOp::Mul => Ok(a.mul(&b)),
            BinaryOp::Div => Ok(a.div(&b)),
            BinaryOp::Mod => {
                if !a.is_unitless() || !b.is_unitless() {
                    return Err(self.fail("'%' requires dimensionless operands"));
                }
                Ok(Quantity::unitless(a.value % b.value))
            }
            BinaryOp::Pow => a.pow(&b).map_err(|e| self.quantity_err(e)),
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt
            | BinaryOp::Gte => {
                if a.units != b.units {
                    return Err(self.fail(format!(
                        "cannot compare '{}' with '{}'",
                        a.units, b.units
                    )));
                }
                let out = match op {
                    BinaryOp::Eq => (a.value - b.value).abs() <= UNIT_EPSILON,
                    BinaryOp::Neq => (a.value - b.value).abs() > UNIT_EPSILON,
                    BinaryOp::Lt => a.value < b.value,
                    BinaryOp::Lte => a.value <= b.value,
                    BinaryOp::Gt => a.value > b.value,
                    BinaryOp::Gte => a.value >= b.value,
                    _ => unreachable!(),
                };
                Ok(Self::boolean(out))
            }
            BinaryOp::And => Ok(Self::boolean(Self::truthy(&a) && Self::truthy(&b))),
            BinaryOp::Or => Ok(Self::boolean(Self::truthy(&a) || Self::truthy(&b))),
            BinaryOp::Xor => Ok(Self::boolean(Self::truthy(&a) != Self::truthy(&b))),
        }
    }

    fn eval_call(
        &mut self,
        name: &str,
        args: &[Expr],
        scope: &Scope<'_>,
    ) -> Result<Quantity, Error> {
        // user macros shadow builtins
        if let Some(def) = self.macros.get(name).copied() {
            return self.eval_macro(def, args, scope);
        }

        let lower = name.to_lowercase();
        let arity = if BUILTINS_ONE_ARG.contains(&lower.as_str()) {
            1
        } else if BUILTINS_TWO_ARG.contains(&lower.as_str()) {
            2
        } else {
            return Err(self.fail(format!("unsupported function '{}'", name)));
        };
        if args.len() != arity {
            return Err(self.fail(format!(
                "{} expects {} argument(s), got {}",
                name,
                arity,
                args.len()
            )));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let q = self.eval(arg, scope)?;
            if !q.is_unitless() {
                return Err(self.fail(format!(
                    "{} requires dimensionless arguments, got '{}'",
                    name, q.units
                )));
            }
            values.push(q.value);
        }

        let out = match lower.as_str() {
            "abs" => values[0].abs(),
            "acos" => values[0].acos(),
            "asin" => values[0].asin(),
            "atan" => values[0].atan(),
            "ceil" => values[0].ceil(),
            "cos" => values[0].cos(),
            "exp" => values[0].exp(),
            "floor" => values[0].floor(),
            "log" => values[0].ln(),
            "log10" => values[0].log10(),
            "round" => values[0].round(),
            "sin" => values[0].sin(),
            "sqrt" => values[0].sqrt(),
            "tan" => values[0].tan(),
            "max" => values[0].max(values[1]),
            "min" => values[0].min(values[1]),
            "pow" => values[0].powf(values[1]),
            _ => unreachable!("arity table covers the builtin set"),
        };
        Ok(Quantity::unitless(out))
    }

    fn eval_macro(
        &mut self,
        def: &MacroDef,
        args: &[Expr],
        scope: &Scope<'_>,
    ) -> Result<Quantity, Error> {
        if self.call_stack.iter().any(|n| n == &def.name) {
            return Err(self.fail(format!("recursive call to macro '{}'", def.name)));
        }
        if args.len() != def.params.len() {
            return Err(self.fail(format!(
                "{} expects {} argument(s), got {}",
                def.name,
                def.params.len(),
                args.len()
            )));
        }

        let mut frame = scope.child();
        for (param, arg) in def.params.iter().zip(args) {
            let value = self.eval(arg, scope)?;
            frame.bind(param.clone(), value);
        }

        self.call_stack.push(def.name.clone());
        let out = self.eval(&def.body, &frame);
        self.call_stack.pop();
        out
    }

    fn eval_lookup(
        &mut self,
        input: &Expr,
        points: &[crate::dsl::ast::LookupPoint],
        x_units: &Option<UnitMap>,
        y_units: &Option<UnitMap>,
        scope: &Scope<'_>,
    ) -> Result<Quantity, Error> {
        for pair in points.windows(2) {
            if pair[1].x <= pair[0].x {
                return Err(self.fail(format!(
                    "lookup x values must be strictly increasing ({} then {})",
                    pair[0].x, pair[1].x
                )));
            }
        }

        let arg = self.eval(input, scope)?;
        if let Some(x_units) = x_units {
            if &arg.units != x_units {
                return Err(self.fail(format!(
                    "lookup argument has units '{}' but the table declares '{}'",
                    arg.units, x_units
                )));
            }
        }

        let x = arg.value;
        let value = if x <= points[0].x {
            points[0].y
        } else if x >= points[points.len() - 1].x {
            points[points.len() - 1].y
        } else {
            let mut out = points[points.len() - 1].y;
            for pair in points.windows(2) {
                if x <= pair[1].x {
                    let alpha = (x - pair[0].x) / (pair[1].x - pair[0].x);
                    out = pair[0].y + alpha * (pair[1].y - pair[0].y);
                    break;
                }
            }
            out
        };

        Ok(Quantity::new(value, y_units.clone().unwrap_or_default()))
    }

    fn eval_delay(
        &mut self,
        node: &Expr,
        kind: DelayKind,
        input: &Expr,
        tau: &Expr,
        initial: Option<&Expr>,
        scope: &Scope<'_>,
    ) -> Result<Quantity, Error> {
        let dt = scope
            .lookup("TIME STEP")
            .cloned()
            .ok_or_else(|| self.fail(format!("{} requires TIME STEP in scope", kind.keyword())))?;

        let input_q = self.eval(input, scope)?;
        let tau_q = self.eval(tau, scope)?;
        if tau_q.units != dt.units {
            return Err(self.fail(format!(
                "{} tau has units '{}' but TIME STEP is '{}'",
                kind.keyword(),
                tau_q.units,
                dt.units
            )));
        }
        if !(tau_q.value.is_finite() && tau_q.value > 0.0) {
            return Err(self.fail(format!(
                "{} tau must be a positive finite time, got {}",
                kind.keyword(),
                tau_q.value
            )));
        }

        let initial_value = match initial {
            Some(initial) => self.eval(initial, scope)?.value,
            None => input_q.value,
        };

        let source = self.source;
        let ctx = match self.delay.as_mut() {
            Some(ctx) => ctx,
            None => {
                return Err(Error::evaluation(
                    format!("{} requires a delay state store", kind.keyword()),
                    source,
                ))
            }
        };

        let key = format!("{}/{}", ctx.owner, node.id);
        let mut entry = match ctx.store.get(&key) {
            Some(entry) => {
                if entry.units != input_q.units {
                    return Err(Error::evaluation(
                        format!(
                            "{} input units changed from '{}' to '{}' mid-run",
                            kind.keyword(),
                            entry.units,
                            input_q.units
                        ),
                        source,
                    ));
                }
                entry.clone()
            }
            None => DelayStateEntry::new(initial_value, kind.stages(), input_q.units.clone()),
        };

        let stage_tau = tau_q.value / kind.stages() as f64;
        let alpha = (dt.value / stage_tau).clamp(0.0, 1.0);

        let mut upstream = input_q.value;
        for stage in entry.stages.iter_mut() {
            *stage += alpha * (upstream - *stage);
            upstream = *stage;
        }
        let output = *entry.stages.last().expect("stage count is 1 or 3");

        if ctx.commit {
            ctx.store.insert(key, entry);
        }

        Ok(Quantity::new(output, input_q.units))
    }
}
