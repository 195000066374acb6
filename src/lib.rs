/// sdengine - system dynamics simulation engine
///
/// A numerical kernel for stock/flow models with:
/// - An equation DSL with dimensional quantity arithmetic
/// - Topologically ordered variable evaluation
/// - Euler, Heun, RK4 and adaptive Dormand-Prince 5(4) solvers
/// - Scenario comparison, sensitivity, optimization and Monte Carlo tooling

pub mod error;
pub mod model;
pub mod dsl;
pub mod graph;
pub mod simulation;
pub mod analysis;

pub use error::Error;
pub use model::quantity::{Quantity, UnitMap};
pub use model::units::{UnitDefinition, UnitRegistry};
pub use model::{Flow, Model, Stock, TimeConfig, Variable, VariableKind};
pub use model::{FlowId, ModelId, ScenarioId, StockId, VariableId};
pub use simulation::engine::{
    simulate, simulate_eager, simulate_final, simulate_parallel, ParallelOptions, Parallelism,
    Simulation,
};
pub use simulation::{SimState, SimUnits, SimulationConfig, SolverKind};
