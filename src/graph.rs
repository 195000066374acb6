/// Variable dependency compiler
///
/// Builds a DAG over the model's variables (an edge `u -> v` means `v`
/// references `u`), topologically orders it, and packages everything a
/// simulation needs per model: evaluation order, parsed ASTs, name lookup
/// maps, flow ASTs and unit metadata. The result is computed once per model
/// and shared read-only behind an `Arc`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::dsl;
use crate::dsl::ast::{Equation, Expr, ExprKind};
use crate::error::Error;
use crate::model::quantity::UnitMap;
use crate::model::units::UnitRegistry;
use crate::model::{FlowId, Model, StockId, VariableId, VariableKind};

/// Topologically ordered evaluation plan for a model's variables.
#[derive(Debug, Clone)]
pub struct CompiledEquationGraph {
    /// Variable ids in dependency order (constants first by construction).
    pub order: Vec<VariableId>,
    /// Parsed expressions, auxiliaries only.
    pub asts: HashMap<VariableId, Equation>,
    /// Case-exact and bracketed reference names to their variable.
    pub by_name: HashMap<String, VariableId>,
}

/// Everything derived from a model that simulations share by reference.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub graph: CompiledEquationGraph,
    pub flow_asts: HashMap<FlowId, Equation>,
    pub flow_units: HashMap<FlowId, Option<UnitMap>>,
    pub stock_order: Vec<StockId>,
    pub stock_units: HashMap<StockId, UnitMap>,
    pub constant_units: HashMap<VariableId, UnitMap>,
    pub time_unit: UnitMap,
}

/// Validate and compile a model.
pub fn compile(model: &Model, registry: &UnitRegistry) -> Result<Arc<ModelMetadata>, Error> {
    model.validate(registry)?;

    let graph = compile_variables(model)?;

    let mut flow_asts = HashMap::new();
    let mut flow_units = HashMap::new();
    for flow in &model.flows {
        flow_asts.insert(flow.id.clone(), dsl::parse(&flow.rate)?);
        let declared = match &flow.units {
            Some(text) => Some(dsl::parse_unit_declaration(text).map_err(Error::EquationParse)?),
            None => None,
        };
        flow_units.insert(flow.id.clone(), declared);
    }

    let mut stock_units = HashMap::new();
    let mut stock_order = Vec::with_capacity(model.stocks.len());
    for stock in &model.stocks {
        stock_order.push(stock.id.clone());
        stock_units.insert(stock.id.clone(), model.stock_units(stock)?);
    }

    let mut constant_units = HashMap::new();
    for variable in &model.variables {
        if variable.kind == VariableKind::Constant {
            let units = match &variable.units {
                Some(text) => dsl::parse_unit_declaration(text).map_err(Error::EquationParse)?,
                None => UnitMap::new(),
            };
            constant_units.insert(variable.id.clone(), units);
        }
    }

    Ok(Arc::new(ModelMetadata {
        graph,
        flow_asts,
        flow_units,
        stock_order,
        stock_units,
        constant_units,
        time_unit: model.time_unit(),
    }))
}

fn compile_variables(model: &Model) -> Result<CompiledEquationGraph, Error> {
    let mut by_name = HashMap::new();
    for variable in &model.variables {
        if by_name
            .insert(variable.name.clone(), variable.id.clone())
            .is_some()
        {
            return Err(Error::EquationGraphBuild {
                detail: format!("duplicate variable '{}'", variable.name),
            });
        }
        by_name.insert(format!("[{}]", variable.name), variable.id.clone());
    }

    let known_stocks: HashSet<&str> = model.stocks.iter().map(|s| s.name.as_str()).collect();

    // one graph node per variable, in model order
    let mut graph: DiGraph<VariableId, ()> = DiGraph::new();
    let mut node_of: HashMap<&str, NodeIndex> = HashMap::new();
    for variable in &model.variables {
        let node = graph.add_node(variable.id.clone());
        node_of.insert(variable.name.as_str(), node);
    }

    let mut asts = HashMap::new();
    for variable in &model.variables {
        if variable.kind != VariableKind::Auxiliary {
            continue;
        }
        let equation = dsl::parse(&variable.expression)?;
        for reference in referenced_names(&equation) {
            if let Some(&dep) = node_of.get(reference.as_str()) {
                // a self-edge makes the toposort report the cycle
                let this = node_of[variable.name.as_str()];
                graph.add_edge(dep, this, ());
            } else if !known_stocks.contains(reference.as_str()) {
                return Err(Error::EquationGraphBuild {
                    detail: format!(
                        "variable '{}' references unknown name '{}'",
                        variable.name, reference
                    ),
                });
            }
        }
        asts.insert(variable.id.clone(), equation);
    }

    let order = match toposort(&graph, None) {
        Ok(nodes) => nodes.into_iter().map(|n| graph[n].clone()).collect(),
        Err(_) => {
            let name_of = |n: NodeIndex| {
                let id = &graph[n];
                model
                    .variables
                    .iter()
                    .find(|v| &v.id == id)
                    .map(|v| v.name.clone())
                    .unwrap_or_else(|| id.to_string())
            };
            let mut cycle_names: Vec<String> = Vec::new();
            for component in tarjan_scc(&graph) {
                let cyclic = component.len() > 1
                    || component
                        .first()
                        .map(|&n| graph.find_edge(n, n).is_some())
                        .unwrap_or(false);
                if cyclic {
                    cycle_names.extend(component.iter().map(|&n| name_of(n)));
                }
            }
            return Err(Error::EquationGraphCycle { nodes: cycle_names });
        }
    };

    Ok(CompiledEquationGraph { order, asts, by_name })
}

/// Names referenced by an equation: body plus macro bodies, minus each
/// macro's own parameters.
fn referenced_names(equation: &Equation) -> Vec<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut record = |name: &str| {
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    };

    visit_refs(&equation.body, &mut record);
    for def in &equation.macros {
        let params: HashSet<&str> = def.params.iter().map(String::as_str).collect();
        let mut scoped = |name: &str| {
            if !params.contains(name) {
                record(name);
            }
        };
        visit_refs(&def.body, &mut scoped);
    }
    names
}

fn visit_refs(expr: &Expr, record: &mut impl FnMut(&str)) {
    match &expr.kind {
        ExprKind::Ref { name, .. } => record(name),
        ExprKind::Unary { expr, .. } => visit_refs(expr, record),
        ExprKind::Binary { left, right, .. } => {
            visit_refs(left, record);
            visit_refs(right, record);
        }
        ExprKind::IfChain { branches, otherwise } => {
            for (cond, then) in branches {
                visit_refs(cond, record);
                visit_refs(then, record);
            }
            if let Some(otherwise) = otherwise {
                visit_refs(otherwise, record);
            }
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                visit_refs(arg, record);
            }
        }
        ExprKind::Lookup1D { input, .. } => visit_refs(input, record),
        ExprKind::Delay { input, tau, initial, .. } => {
            visit_refs(input, record);
            visit_refs(tau, record);
            if let Some(initial) = initial {
                visit_refs(initial, record);
            }
        }
        ExprKind::QuantityLiteral { .. }
        | ExprKind::BooleanLiteral(_)
        | ExprKind::Time(_) => {}
    }
}
