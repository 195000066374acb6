/// Shared derivative routine
///
/// Evaluates the compiled variable graph, then every flow's rate equation,
/// validates rate units against the connected stocks and the model time
/// unit, and accumulates signed contributions per stock. All integrators
/// drive the same routine, varying only the probe state and the commit flag.

use std::collections::HashMap;

use crate::dsl::eval::{evaluate, DelayContext, Scope};
use crate::error::Error;
use crate::graph::ModelMetadata;
use crate::model::quantity::{Quantity, UnitMap};
use crate::model::{Flow, Model, StockId, VariableId, VariableKind};
use crate::simulation::delay::DelayStateStore;

/// Output of one derivative evaluation.
#[derive(Debug, Clone)]
pub struct Dynamics {
    pub rates: HashMap<StockId, f64>,
    pub variables: HashMap<VariableId, f64>,
    pub variable_units: HashMap<VariableId, UnitMap>,
    pub rate_units: HashMap<StockId, UnitMap>,
}

/// Evaluate stock derivatives at `(time, stocks)`.
///
/// `dt` is bound as `TIME STEP` in the evaluation scope; delay primitives
/// use it for their stage updates, persisting them only when `commit` is
/// set.
pub fn compute_dynamics(
    model: &Model,
    meta: &ModelMetadata,
    stocks: &HashMap<StockId, f64>,
    time: f64,
    dt: f64,
    delays: &mut DelayStateStore,
    commit: bool,
) -> Result<Dynamics, Error> {
    let time_unit = &meta.time_unit;

    let mut scope = Scope::root();
    for stock in &model.stocks {
        let value = stocks.get(&stock.id).copied().unwrap_or(stock.initial_value);
        let units = meta.stock_units[&stock.id].clone();
        scope.bind(stock.name.clone(), Quantity::new(value, units));
    }
    scope.bind("TIME", Quantity::new(time, time_unit.clone()));
    scope.bind("TIME STEP", Quantity::new(dt, time_unit.clone()));
    scope.bind("INITIAL TIME", Quantity::new(model.time.start, time_unit.clone()));
    scope.bind("FINAL TIME", Quantity::new(model.time.end, time_unit.clone()));

    // variables in dependency order, each seeing everything before it
    let mut variables = HashMap::new();
    let mut variable_units = HashMap::new();
    for id in &meta.graph.order {
        let variable = model
            .variables
            .iter()
            .find(|v| &v.id == id)
            .expect("compiled order only contains model variables");
        let quantity = match variable.kind {
            VariableKind::Constant => Quantity::new(
                variable.value.expect("validated constants carry a value"),
                meta.constant_units[id].clone(),
            ),
            VariableKind::Auxiliary => {
                let equation = &meta.graph.asts[id];
                let mut delay_ctx = DelayContext {
                    store: delays,
                    owner: id.to_string(),
                    commit,
                };
                evaluate(equation, &scope, Some(&mut delay_ctx))?
            }
        };
        if !quantity.value.is_finite() {
            return Err(Error::evaluation(
                format!("variable '{}' produced a non-finite value", variable.name),
                &variable.expression,
            ));
        }
        variables.insert(id.clone(), quantity.value);
        variable_units.insert(id.clone(), quantity.units.clone());
        scope.bind(variable.name.clone(), quantity);
    }

    // zeroed rate map in stock declaration order
    let mut rates: HashMap<StockId, f64> = HashMap::with_capacity(meta.stock_order.len());
    for id in &meta.stock_order {
        rates.insert(id.clone(), 0.0);
    }

    for flow in &model.flows {
        let equation = &meta.flow_asts[&flow.id];
        let mut delay_ctx = DelayContext {
            store: delays,
            owner: flow.id.to_string(),
            commit,
        };
        let rate = evaluate(equation, &scope, Some(&mut delay_ctx))?;
        if !rate.value.is_finite() {
            return Err(Error::evaluation(
                format!("flow '{}' produced a non-finite rate", flow.name),
                &flow.rate,
            ));
        }

        validate_rate_units(meta, flow_endpoint_units(meta, flow), flow, &rate)?;

        if let Some(source) = &flow.source {
            *rates.get_mut(source).expect("validated endpoint") -= rate.value;
        }
        if let Some(target) = &flow.target {
            *rates.get_mut(target).expect("validated endpoint") += rate.value;
        }
    }

    let mut rate_units = HashMap::new();
    for id in &meta.stock_order {
        rate_units.insert(id.clone(), meta.stock_units[id].divide(time_unit));
    }

    Ok(Dynamics { rates, variables, variable_units, rate_units })
}

/// Units of the stock(s) a flow touches, if any. Endpoint unit agreement is
/// checked at model validation, so one endpoint is representative.
fn flow_endpoint_units<'a>(meta: &'a ModelMetadata, flow: &Flow) -> Option<&'a UnitMap> {
    flow.source
        .as_ref()
        .or(flow.target.as_ref())
        .map(|id| &meta.stock_units[id])
}

fn validate_rate_units(
    meta: &ModelMetadata,
    endpoint_units: Option<&UnitMap>,
    flow: &Flow,
    rate: &Quantity,
) -> Result<(), Error> {
    let declared = &meta.flow_units[&flow.id];

    match endpoint_units {
        Some(stock_units) => {
            let expected = stock_units.divide(&meta.time_unit);
            if rate.units != expected {
                return Err(Error::evaluation(
                    format!(
                        "flow '{}' has rate units '{}' but the connected stock requires '{}'",
                        flow.name, rate.units, expected
                    ),
                    &flow.rate,
                ));
            }
            if let Some(declared) = declared {
                if declared != &rate.units {
                    return Err(Error::evaluation(
                        format!(
                            "flow '{}' declares units '{}' but its rate evaluates to '{}'",
                            flow.name, declared, rate.units
                        ),
                        &flow.rate,
                    ));
                }
            }
        }
        None => {
            let expected = declared.clone().unwrap_or_default();
            if rate.units != expected {
                return Err(Error::evaluation(
                    format!(
                        "unconnected flow '{}' has rate units '{}', expected '{}'",
                        flow.name, rate.units, expected
                    ),
                    &flow.rate,
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::compile;
    use crate::model::units::UnitRegistry;
    use crate::model::{Flow, Stock, TimeConfig, Variable};
    use approx::assert_relative_eq;

    fn compiled(model: &Model) -> std::sync::Arc<ModelMetadata> {
        compile(model, &UnitRegistry::standard()).unwrap()
    }

    fn initial_stocks(model: &Model) -> HashMap<StockId, f64> {
        model
            .stocks
            .iter()
            .map(|s| (s.id.clone(), s.initial_value))
            .collect()
    }

    fn growth_model() -> Model {
        let mut model = Model::new("growth");
        model.time = TimeConfig { start: 0.0, end: 10.0, step: 1.0, units: Some("tick".into()) };
        model
            .add_stock(Stock::new("Population", 100.0).with_units("person"))
            .unwrap();
        model
            .add_variable(Variable::constant("GrowthRate", 0.1))
            .unwrap();
        model
            .add_flow(
                Flow::new("births", "[Population] * GrowthRate / {1 tick}")
                    .with_target(StockId::new("Population")),
            )
            .unwrap();
        model
    }

    #[test]
    fn test_rates_accumulate_signed_contributions() {
        let model = growth_model();
        let meta = compiled(&model);
        let mut delays = DelayStateStore::new();
        let dynamics = compute_dynamics(
            &model,
            &meta,
            &initial_stocks(&model),
            0.0,
            1.0,
            &mut delays,
            true,
        )
        .unwrap();

        assert_relative_eq!(dynamics.rates[&StockId::new("Population")], 10.0);
        assert_relative_eq!(dynamics.variables[&VariableId::new("GrowthRate")], 0.1);
        assert_eq!(
            dynamics.rate_units[&StockId::new("Population")],
            UnitMap::from_pairs([("person", 1.0), ("tick", -1.0)])
        );
    }

    #[test]
    fn test_two_stock_flow_conserves() {
        let mut model = Model::new("transfer");
        model.time = TimeConfig { start: 0.0, end: 1.0, step: 0.5, units: None };
        model.add_stock(Stock::new("A", 10.0).with_units("item")).unwrap();
        model.add_stock(Stock::new("B", 0.0).with_units("item")).unwrap();
        model
            .add_flow(
                Flow::new("move", "{2 item / tick}")
                    .with_source(StockId::new("A"))
                    .with_target(StockId::new("B")),
            )
            .unwrap();

        let meta = compiled(&model);
        let mut delays = DelayStateStore::new();
        let dynamics =
            compute_dynamics(&model, &meta, &initial_stocks(&model), 0.0, 0.5, &mut delays, true)
                .unwrap();
        assert_relative_eq!(dynamics.rates[&StockId::new("A")], -2.0);
        assert_relative_eq!(dynamics.rates[&StockId::new("B")], 2.0);
    }

    #[test]
    fn test_rate_unit_mismatch_is_rejected() {
        let mut model = Model::new("bad-units");
        model.time = TimeConfig { start: 0.0, end: 1.0, step: 0.5, units: None };
        model
            .add_stock(Stock::new("Population", 1.0).with_units("person"))
            .unwrap();
        // rate is person, not person/tick
        model
            .add_flow(
                Flow::new("births", "{1 person}").with_target(StockId::new("Population")),
            )
            .unwrap();

        let meta = compiled(&model);
        let mut delays = DelayStateStore::new();
        let err =
            compute_dynamics(&model, &meta, &initial_stocks(&model), 0.0, 0.5, &mut delays, true)
                .unwrap_err();
        assert_eq!(err.tag(), "EquationEvaluationError");
    }

    #[test]
    fn test_declared_flow_units_must_match() {
        let mut model = Model::new("declared");
        model.time = TimeConfig { start: 0.0, end: 1.0, step: 0.5, units: None };
        model
            .add_stock(Stock::new("Population", 1.0).with_units("person"))
            .unwrap();
        model
            .add_flow(
                Flow::new("births", "{1 person / tick}")
                    .with_target(StockId::new("Population"))
                    .with_units("item / tick"),
            )
            .unwrap();

        let meta = compiled(&model);
        let mut delays = DelayStateStore::new();
        let err =
            compute_dynamics(&model, &meta, &initial_stocks(&model), 0.0, 0.5, &mut delays, true)
                .unwrap_err();
        assert_eq!(err.tag(), "EquationEvaluationError");
    }

    #[test]
    fn test_unconnected_flow_defaults_to_dimensionless() {
        let mut model = Model::new("boundary");
        model.time = TimeConfig { start: 0.0, end: 1.0, step: 0.5, units: None };
        model.add_stock(Stock::new("S", 1.0)).unwrap();
        model.add_flow(Flow::new("noise", "0.5")).unwrap();

        let meta = compiled(&model);
        let mut delays = DelayStateStore::new();
        // dimensionless rate on an unconnected flow is fine
        compute_dynamics(&model, &meta, &initial_stocks(&model), 0.0, 0.5, &mut delays, true)
            .unwrap();
    }

    #[test]
    fn test_variables_feed_flows_through_scope() {
        let mut model = Model::new("aux");
        model.time = TimeConfig { start: 0.0, end: 1.0, step: 0.5, units: None };
        model.add_stock(Stock::new("S", 4.0)).unwrap();
        model.add_variable(Variable::constant("k", 2.0)).unwrap();
        model
            .add_variable(Variable::auxiliary("scaled", "[S] * k"))
            .unwrap();
        model
            .add_flow(Flow::new("in", "scaled / {1 tick}").with_target(StockId::new("S")))
            .unwrap();

        let meta = compiled(&model);
        let mut delays = DelayStateStore::new();
        let dynamics =
            compute_dynamics(&model, &meta, &initial_stocks(&model), 0.0, 0.5, &mut delays, true)
                .unwrap();
        assert_relative_eq!(dynamics.variables[&VariableId::new("scaled")], 8.0);
        assert_relative_eq!(dynamics.rates[&StockId::new("S")], 8.0);
    }
}
