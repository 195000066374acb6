/// Simulation module - state, configuration and the solver layer

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::quantity::UnitMap;
use crate::model::{StockId, VariableId};

pub mod delay;
pub mod dynamics;
pub mod engine;
pub mod integrator;

pub use engine::Simulation;
pub use integrator::{AdaptiveOptions, Solver, Tolerance};

/// Unit snapshot carried by every emitted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimUnits {
    pub stocks: HashMap<StockId, UnitMap>,
    pub variables: HashMap<VariableId, UnitMap>,
    pub rates: HashMap<StockId, UnitMap>,
    pub time: UnitMap,
}

/// Simulation state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimState {
    pub time: f64,
    pub stocks: HashMap<StockId, f64>,
    pub variables: HashMap<VariableId, f64>,
    pub units: SimUnits,
}

impl SimState {
    pub fn stock(&self, id: &StockId) -> Option<f64> {
        self.stocks.get(id).copied()
    }

    pub fn variable(&self, id: &VariableId) -> Option<f64> {
        self.variables.get(id).copied()
    }
}

/// Which integrator advances the simulation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SolverKind {
    #[default]
    Euler,
    Heun,
    Rk4,
    DormandPrince45(AdaptiveOptions),
}

/// Simulation configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimulationConfig {
    pub solver: SolverKind,
}

impl SimulationConfig {
    pub fn with_solver(solver: SolverKind) -> Self {
        Self { solver }
    }
}

/// Time series of one stock across an eager run.
pub fn stock_series(states: &[SimState], id: &StockId) -> Option<Vec<f64>> {
    states.iter().map(|s| s.stock(id)).collect()
}

/// Time series of one variable across an eager run. The initial state has
/// no variable values yet, so the series starts at the first step.
pub fn variable_series(states: &[SimState], id: &VariableId) -> Option<Vec<f64>> {
    states
        .iter()
        .filter(|s| !s.variables.is_empty())
        .map(|s| s.variable(id))
        .collect()
}
