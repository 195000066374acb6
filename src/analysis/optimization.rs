/// Parameter optimization over scenario overrides
///
/// Two built-in strategies: an evenly spaced grid over the constraint box
/// and uniform random search. Ties keep the first evaluated combination.
/// Custom strategies plug in through the `Strategy` trait.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::analysis::rng::{Mulberry32, DEFAULT_SEED};
use crate::analysis::scenario::{apply_overrides, metric_value};
use crate::error::Error;
use crate::model::Model;
use crate::simulation::engine::simulate_eager;
use crate::simulation::{SimState, SimulationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

/// What to optimize: a metric sampled at `at_time` (or the final state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub metric: String,
    pub direction: ObjectiveDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_time: Option<f64>,
}

impl Objective {
    pub fn maximize(metric: &str) -> Self {
        Self { metric: metric.to_string(), direction: ObjectiveDirection::Maximize, at_time: None }
    }

    pub fn minimize(metric: &str) -> Self {
        Self { metric: metric.to_string(), direction: ObjectiveDirection::Minimize, at_time: None }
    }

    pub fn at(mut self, time: f64) -> Self {
        self.at_time = Some(time);
        self
    }

    fn better(&self, candidate: f64, incumbent: f64) -> bool {
        match self.direction {
            ObjectiveDirection::Maximize => candidate > incumbent,
            ObjectiveDirection::Minimize => candidate < incumbent,
        }
    }
}

/// Box constraint on one overridable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
}

impl Constraint {
    pub fn new(parameter: &str, min: f64, max: f64) -> Self {
        Self { parameter: parameter.to_string(), min, max }
    }

    fn at_fraction(&self, fraction: f64) -> f64 {
        self.min + (self.max - self.min) * fraction
    }
}

/// Outcome a strategy hands back to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub best_parameters: BTreeMap<String, f64>,
    pub best_value: f64,
    pub iterations: usize,
}

/// Everything a strategy needs to evaluate candidate parameter sets.
pub struct OptimizationContext<'a> {
    pub model: &'a Model,
    pub objective: &'a Objective,
    pub constraints: &'a [Constraint],
    pub config: &'a SimulationConfig,
}

impl<'a> OptimizationContext<'a> {
    /// Objective value for one override combination: the first state whose
    /// time reaches `at_time`, the final state otherwise.
    pub fn evaluate(&self, parameters: &BTreeMap<String, f64>) -> Result<f64, Error> {
        let candidate = apply_overrides(self.model, parameters, None)?;
        let states = simulate_eager(&candidate, self.config)?;
        let state: &SimState = match self.objective.at_time {
            Some(at) => states
                .iter()
                .find(|s| s.time >= at)
                .or(states.last())
                .ok_or(Error::EmptySimulation)?,
            None => states.last().ok_or(Error::EmptySimulation)?,
        };
        metric_value(&candidate, state, &self.objective.metric)
    }
}

/// A pluggable search strategy.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn optimize(&self, ctx: &OptimizationContext<'_>) -> Result<StrategyOutcome, Error>;
}

/// Evenly spaced samples per constraint, full Cartesian product.
#[derive(Debug, Clone, Default)]
pub struct GridSearch {
    pub steps_per_parameter: Option<usize>,
}

impl Strategy for GridSearch {
    fn name(&self) -> &str {
        "grid"
    }

    fn optimize(&self, ctx: &OptimizationContext<'_>) -> Result<StrategyOutcome, Error> {
        let steps = self.steps_per_parameter.unwrap_or(5).max(2);
        let axes: Vec<Vec<f64>> = ctx
            .constraints
            .iter()
            .map(|c| {
                (0..steps)
                    .map(|i| c.at_fraction(i as f64 / (steps - 1) as f64))
                    .collect()
            })
            .collect();

        let mut best: Option<(BTreeMap<String, f64>, f64)> = None;
        let mut iterations = 0;

        // odometer over the Cartesian product, in constraint order
        let mut indices = vec![0usize; axes.len()];
        loop {
            let parameters: BTreeMap<String, f64> = ctx
                .constraints
                .iter()
                .enumerate()
                .map(|(i, c)| (c.parameter.clone(), axes[i][indices[i]]))
                .collect();
            let value = ctx.evaluate(&parameters)?;
            iterations += 1;

            let replace = match &best {
                Some((_, incumbent)) => ctx.objective.better(value, *incumbent),
                None => true,
            };
            if replace {
                best = Some((parameters, value));
            }

            // advance the odometer; empty constraint list means one pass
            let mut digit = 0;
            loop {
                if digit == indices.len() {
                    let (best_parameters, best_value) =
                        best.expect("at least one combination evaluated");
                    return Ok(StrategyOutcome { best_parameters, best_value, iterations });
                }
                indices[digit] += 1;
                if indices[digit] < axes[digit].len() {
                    break;
                }
                indices[digit] = 0;
                digit += 1;
            }
        }
    }
}

/// Uniform random draws; always evaluates the zero-override baseline first.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    pub iterations: usize,
    pub seed: u32,
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self { iterations: 50, seed: DEFAULT_SEED }
    }
}

impl Strategy for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn optimize(&self, ctx: &OptimizationContext<'_>) -> Result<StrategyOutcome, Error> {
        let mut rng = Mulberry32::new(self.seed);

        let baseline = BTreeMap::new();
        let mut best_value = ctx.evaluate(&baseline)?;
        let mut best_parameters = baseline;
        let mut iterations = 1;

        for _ in 0..self.iterations {
            let parameters: BTreeMap<String, f64> = ctx
                .constraints
                .iter()
                .map(|c| (c.parameter.clone(), c.at_fraction(rng.next_f64())))
                .collect();
            let value = ctx.evaluate(&parameters)?;
            iterations += 1;
            if ctx.objective.better(value, best_value) {
                best_value = value;
                best_parameters = parameters;
            }
        }

        Ok(StrategyOutcome { best_parameters, best_value, iterations })
    }
}

/// Strategy selection for `optimize`.
#[derive(Clone)]
pub enum OptimizationStrategy {
    Grid(GridSearch),
    Random(RandomSearch),
    Custom(Arc<dyn Strategy>),
}

impl Default for OptimizationStrategy {
    fn default() -> Self {
        OptimizationStrategy::Grid(GridSearch::default())
    }
}

#[derive(Clone, Default)]
pub struct OptimizationOptions {
    pub strategy: OptimizationStrategy,
    pub config: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub strategy: String,
    pub best_parameters: BTreeMap<String, f64>,
    pub best_value: f64,
    pub iterations: usize,
}

/// Search the constraint box for the best objective value.
pub fn optimize(
    model: &Model,
    objective: &Objective,
    constraints: &[Constraint],
    options: &OptimizationOptions,
) -> Result<OptimizationResult, Error> {
    let ctx = OptimizationContext {
        model,
        objective,
        constraints,
        config: &options.config,
    };

    let (name, outcome) = match &options.strategy {
        OptimizationStrategy::Grid(grid) => (grid.name().to_string(), grid.optimize(&ctx)?),
        OptimizationStrategy::Random(random) => {
            (random.name().to_string(), random.optimize(&ctx)?)
        }
        OptimizationStrategy::Custom(custom) => {
            (custom.name().to_string(), custom.optimize(&ctx)?)
        }
    };
    debug!(
        "optimization '{}' finished after {} iterations with value {}",
        name, outcome.iterations, outcome.best_value
    );

    Ok(OptimizationResult {
        strategy: name,
        best_parameters: outcome.best_parameters,
        best_value: outcome.best_value,
        iterations: outcome.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Flow, Stock, StockId, TimeConfig, Variable};
    use approx::assert_relative_eq;

    fn growth_model() -> Model {
        let mut model = Model::new("opt");
        model.time = TimeConfig { start: 0.0, end: 5.0, step: 1.0, units: Some("tick".into()) };
        model.add_stock(Stock::new("P", 100.0).with_units("person")).unwrap();
        model.add_variable(Variable::constant("r", 0.1)).unwrap();
        model
            .add_flow(Flow::new("growth", "[P] * r / {1 tick}").with_target(StockId::new("P")))
            .unwrap();
        model
    }

    #[test]
    fn test_grid_finds_the_growth_extreme() {
        let model = growth_model();
        let constraints = vec![Constraint::new("r", 0.0, 0.2)];
        let result = optimize(
            &model,
            &Objective::maximize("P"),
            &constraints,
            &OptimizationOptions::default(),
        )
        .unwrap();

        // monotone objective: the best grid point is the upper bound
        assert_relative_eq!(result.best_parameters["r"], 0.2);
        assert_eq!(result.iterations, 5);
        assert_eq!(result.strategy, "grid");
    }

    #[test]
    fn test_grid_minimize_picks_lower_bound() {
        let model = growth_model();
        let constraints = vec![Constraint::new("r", 0.0, 0.2)];
        let result = optimize(
            &model,
            &Objective::minimize("P"),
            &constraints,
            &OptimizationOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(result.best_parameters["r"], 0.0);
    }

    #[test]
    fn test_grid_first_wins_on_ties() {
        // the objective is a constant, so every combination ties
        let model = growth_model();
        let constraints = vec![Constraint::new("r", 0.0, 0.2)];
        let result = optimize(
            &model,
            &Objective::maximize("r"),
            &constraints,
            &OptimizationOptions {
                strategy: OptimizationStrategy::Grid(GridSearch { steps_per_parameter: Some(3) }),
                ..OptimizationOptions::default()
            },
        )
        .unwrap();
        // metric == r itself climbs with the override, so not a tie; use a
        // genuinely flat metric instead: the initial stock P at time 0
        assert!(result.iterations == 3);
        assert_relative_eq!(result.best_parameters["r"], 0.2);

        let flat = optimize(
            &model,
            &Objective::maximize("P").at(0.0),
            &constraints,
            &OptimizationOptions {
                strategy: OptimizationStrategy::Grid(GridSearch { steps_per_parameter: Some(3) }),
                ..OptimizationOptions::default()
            },
        )
        .unwrap();
        // all combinations produce P(0) = 100; the first grid point keeps
        // the lead
        assert_relative_eq!(flat.best_value, 100.0);
        assert_relative_eq!(flat.best_parameters["r"], 0.0);
    }

    #[test]
    fn test_grid_covers_cartesian_product() {
        let mut model = growth_model();
        model
            .add_variable(Variable::constant("boost", 0.0))
            .unwrap();
        model.flows[0].rate = "[P] * (r + boost) / {1 tick}".to_string();

        let constraints = vec![
            Constraint::new("r", 0.0, 0.1),
            Constraint::new("boost", 0.0, 0.05),
        ];
        let result = optimize(
            &model,
            &Objective::maximize("P"),
            &constraints,
            &OptimizationOptions {
                strategy: OptimizationStrategy::Grid(GridSearch { steps_per_parameter: Some(3) }),
                ..OptimizationOptions::default()
            },
        )
        .unwrap();
        assert_eq!(result.iterations, 9);
        assert_relative_eq!(result.best_parameters["r"], 0.1);
        assert_relative_eq!(result.best_parameters["boost"], 0.05);
    }

    #[test]
    fn test_random_search_is_seeded_and_baseline_first() {
        let model = growth_model();
        let constraints = vec![Constraint::new("r", 0.0, 0.2)];
        let options = OptimizationOptions {
            strategy: OptimizationStrategy::Random(RandomSearch { iterations: 20, seed: 99 }),
            ..OptimizationOptions::default()
        };

        let a = optimize(&model, &Objective::maximize("P"), &constraints, &options).unwrap();
        let b = optimize(&model, &Objective::maximize("P"), &constraints, &options).unwrap();
        assert_eq!(a.best_parameters, b.best_parameters);
        assert_eq!(a.best_value.to_bits(), b.best_value.to_bits());
        assert_eq!(a.iterations, 21); // baseline + 20 draws
        // random draws can only improve on the evaluated baseline
        let baseline = 100.0 * 1.1_f64.powi(5);
        assert!(a.best_value >= baseline - 1e-9);
    }

    #[test]
    fn test_custom_strategy_plugs_in() {
        struct Fixed;
        impl Strategy for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn optimize(&self, ctx: &OptimizationContext<'_>) -> Result<StrategyOutcome, Error> {
                let parameters: BTreeMap<String, f64> = [("r".to_string(), 0.15)].into();
                let best_value = ctx.evaluate(&parameters)?;
                Ok(StrategyOutcome { best_parameters: parameters, best_value, iterations: 1 })
            }
        }

        let model = growth_model();
        let result = optimize(
            &model,
            &Objective::maximize("P"),
            &[Constraint::new("r", 0.0, 0.2)],
            &OptimizationOptions {
                strategy: OptimizationStrategy::Custom(Arc::new(Fixed)),
                ..OptimizationOptions::default()
            },
        )
        .unwrap();
        assert_eq!(result.strategy, "fixed");
        assert_eq!(result.iterations, 1);
        assert_relative_eq!(result.best_parameters["r"], 0.15);
    }

    #[test]
    fn test_objective_at_time_picks_first_reaching_state() {
        let model = growth_model();
        let ctx = OptimizationContext {
            model: &model,
            objective: &Objective::maximize("P").at(2.5),
            constraints: &[],
            config: &SimulationConfig::default(),
        };
        // states at t = 0..5; first with t >= 2.5 is t = 3 -> 100 * 1.1^3
        let value = ctx.evaluate(&BTreeMap::new()).unwrap();
        assert_relative_eq!(value, 100.0 * 1.1_f64.powi(3), epsilon = 1e-9);
    }
}
