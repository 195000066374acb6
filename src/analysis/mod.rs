/// Analysis module: scenarios, sensitivity, optimization and Monte Carlo

pub mod monte_carlo;
pub mod optimization;
pub mod rng;
pub mod scenario;
pub mod sensitivity;

pub use monte_carlo::{Concurrency, McParameter, MetricSummary, MonteCarloConfig, MonteCarloResult};
pub use optimization::{
    optimize, Constraint, GridSearch, Objective, ObjectiveDirection, OptimizationOptions,
    OptimizationResult, OptimizationStrategy, RandomSearch, Strategy, StrategyOutcome,
};
pub use rng::{Mulberry32, ParameterSampler, DEFAULT_SEED};
pub use scenario::{
    apply_overrides, compare, metric_value, run as run_scenario, ScenarioComparison,
    ScenarioDefinition, ScenarioRun, ScenarioRunOptions, ScenarioSummary,
};
pub use sensitivity::{analyze as analyze_sensitivity, Direction, SensitivityResult};
