/// Scenario engine: overrides, single runs and parallel comparison
///
/// A scenario is a set of `{name -> value}` overrides applied to a base
/// model before simulation. Stocks are overridden at their initial value,
/// constants at their value; auxiliaries cannot be overridden. When a name
/// matches both a stock and a constant, the stock wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{Model, ModelId, ScenarioId, VariableKind};
use crate::simulation::engine::{
    simulate_eager, simulate_final, simulate_parallel, ParallelOptions, Parallelism,
};
use crate::simulation::{SimState, SimulationConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: ScenarioId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_model_id: Option<ModelId>,
    #[serde(default)]
    pub overrides: BTreeMap<String, f64>,
}

impl ScenarioDefinition {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: ScenarioId::new(id),
            name: name.to_string(),
            base_model_id: None,
            overrides: BTreeMap::new(),
        }
    }

    /// The implicit zero-override baseline used by `compare`.
    pub fn baseline() -> Self {
        Self::new("baseline", "Baseline")
    }

    pub fn with_override(mut self, name: &str, value: f64) -> Self {
        self.overrides.insert(name.to_string(), value);
        self
    }

    pub fn for_model(mut self, model: &Model) -> Self {
        self.base_model_id = Some(model.id.clone());
        self
    }
}

/// Apply overrides, returning a new model with a fresh id.
pub fn apply_overrides(
    model: &Model,
    overrides: &BTreeMap<String, f64>,
    scenario_id: Option<&ScenarioId>,
) -> Result<Model, Error> {
    let mut next = model.clone();
    next.id = ModelId::generate();

    let mut missing = Vec::new();
    for (name, value) in overrides {
        if !value.is_finite() {
            return Err(Error::ScenarioUnsupportedOverride {
                scenario_id: scenario_id.cloned(),
                target: name.clone(),
                reason: format!("override value {} is not finite", value),
            });
        }

        // stock wins over a constant that shares the name
        if let Some(stock) = next.stocks.iter_mut().find(|s| &s.name == name) {
            stock.initial_value = *value;
            continue;
        }
        if let Some(variable) = next.variables.iter_mut().find(|v| &v.name == name) {
            match variable.kind {
                VariableKind::Constant => {
                    variable.value = Some(*value);
                    continue;
                }
                VariableKind::Auxiliary => {
                    return Err(Error::ScenarioUnsupportedOverride {
                        scenario_id: scenario_id.cloned(),
                        target: name.clone(),
                        reason: "auxiliaries are computed, not overridable".to_string(),
                    });
                }
            }
        }
        missing.push(name.clone());
    }

    if !missing.is_empty() {
        return Err(Error::ScenarioOverrideNotFound {
            scenario_id: scenario_id.cloned(),
            targets: missing,
        });
    }
    Ok(next)
}

/// Metric resolution by name: stocks first, then variables.
pub fn metric_value(model: &Model, state: &SimState, name: &str) -> Result<f64, Error> {
    if let Some(stock) = model.stock_by_name(name) {
        if let Some(value) = state.stock(&stock.id) {
            return Ok(value);
        }
    }
    if let Some(variable) = model.variable_by_name(name) {
        if let Some(value) = state.variable(&variable.id) {
            return Ok(value);
        }
    }
    Err(Error::ScenarioMetricNotFound { name: name.to_string() })
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioRunOptions {
    pub collect_states: bool,
    pub config: SimulationConfig,
    pub parallelism: Parallelism,
}

/// One executed scenario.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub definition: ScenarioDefinition,
    pub model: Model,
    pub final_state: SimState,
    pub states: Option<Vec<SimState>>,
}

/// Apply a scenario to a model and simulate it.
pub fn run(
    model: &Model,
    definition: &ScenarioDefinition,
    options: &ScenarioRunOptions,
) -> Result<ScenarioRun, Error> {
    if let Some(expected) = &definition.base_model_id {
        if expected != &model.id {
            return Err(Error::ScenarioModelMismatch {
                scenario_id: definition.id.clone(),
                expected: expected.to_string(),
                actual: model.id.to_string(),
            });
        }
    }

    let overridden = apply_overrides(model, &definition.overrides, Some(&definition.id))?;
    let (final_state, states) = if options.collect_states {
        let states = simulate_eager(&overridden, &options.config)?;
        let final_state = states.last().cloned().ok_or(Error::EmptySimulation)?;
        (final_state, Some(states))
    } else {
        (simulate_final(&overridden, &options.config)?, None)
    };

    Ok(ScenarioRun {
        definition: definition.clone(),
        model: overridden,
        final_state,
        states,
    })
}

/// Per-scenario summary with deltas against the baseline, keyed by name.
#[derive(Debug, Clone)]
pub struct ScenarioSummary {
    pub definition: ScenarioDefinition,
    pub final_state: SimState,
    pub delta_stocks: BTreeMap<String, f64>,
    pub delta_variables: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ScenarioComparison {
    pub baseline: ScenarioSummary,
    pub scenarios: Vec<ScenarioSummary>,
}

/// Run all scenarios plus an implicit baseline in parallel and report
/// deltas, in the input order of `definitions`.
pub fn compare(
    model: &Model,
    definitions: &[ScenarioDefinition],
    options: &ScenarioRunOptions,
) -> Result<ScenarioComparison, Error> {
    let baseline_def = ScenarioDefinition::baseline();
    let mut all = Vec::with_capacity(definitions.len() + 1);
    all.push(baseline_def.clone());
    all.extend(definitions.iter().cloned());

    let targets = all
        .iter()
        .map(|def| {
            apply_overrides(model, &def.overrides, Some(&def.id))
                .map(|m| (m, options.config.clone()))
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let runs = simulate_parallel(
        &targets,
        &ParallelOptions {
            collect_states: options.collect_states,
            parallelism: options.parallelism,
        },
    )?;

    let baseline_state = runs[0].final_state.clone();
    let summarize = |def: &ScenarioDefinition, state: &SimState| {
        let mut delta_stocks = BTreeMap::new();
        for stock in &model.stocks {
            let base = baseline_state.stock(&stock.id).unwrap_or(0.0);
            let scen = state.stock(&stock.id).unwrap_or(0.0);
            delta_stocks.insert(stock.name.clone(), scen - base);
        }
        let mut delta_variables = BTreeMap::new();
        for variable in &model.variables {
            let base = baseline_state.variable(&variable.id).unwrap_or(0.0);
            let scen = state.variable(&variable.id).unwrap_or(0.0);
            delta_variables.insert(variable.name.clone(), scen - base);
        }
        ScenarioSummary {
            definition: def.clone(),
            final_state: state.clone(),
            delta_stocks,
            delta_variables,
        }
    };

    let baseline = summarize(&baseline_def, &baseline_state);
    let scenarios = definitions
        .iter()
        .zip(runs.iter().skip(1))
        .map(|(def, run)| summarize(def, &run.final_state))
        .collect();

    Ok(ScenarioComparison { baseline, scenarios })
}
