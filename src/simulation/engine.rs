/// Simulation stream - lazy, eager, final and parallel runs
///
/// `simulate` returns an iterator that yields the initial state first and
/// then one state per solver step until the horizon is reached. Parallel
/// fan-out runs each target model independently on a rayon pool.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use rayon::prelude::*;

use crate::error::Error;
use crate::graph::{compile, ModelMetadata};
use crate::model::units::UnitRegistry;
use crate::model::Model;
use crate::simulation::delay::DelayStateStore;
use crate::simulation::integrator::{Solver, StepContext};
use crate::simulation::{SimState, SimUnits, SimulationConfig};

/// A lazily stepped simulation. Iteration yields `Result<SimState, _>`;
/// the first error is terminal.
pub struct Simulation {
    model: Arc<Model>,
    meta: Arc<ModelMetadata>,
    solver: Box<dyn Solver>,
    delays: DelayStateStore,
    current: SimState,
    emitted_initial: bool,
    failed: bool,
}

impl Simulation {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn current_state(&self) -> &SimState {
        &self.current
    }

    fn horizon_reached(&self) -> bool {
        let end = self.model.time.end;
        self.current.time >= end - 1e-12 * end.abs().max(1.0)
    }
}

impl Iterator for Simulation {
    type Item = Result<SimState, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if !self.emitted_initial {
            self.emitted_initial = true;
            return Some(Ok(self.current.clone()));
        }
        if self.horizon_reached() {
            return None;
        }

        let ctx = StepContext { model: &self.model, meta: &self.meta };
        match self
            .solver
            .step(&ctx, &self.current, &mut self.delays, self.model.time.step)
        {
            Ok(state) => {
                self.current = state;
                Some(Ok(self.current.clone()))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

fn initial_state(model: &Model, meta: &ModelMetadata) -> SimState {
    let stocks: HashMap<_, _> = model
        .stocks
        .iter()
        .map(|s| (s.id.clone(), s.initial_value))
        .collect();
    let rates = meta
        .stock_order
        .iter()
        .map(|id| (id.clone(), meta.stock_units[id].divide(&meta.time_unit)))
        .collect();
    SimState {
        time: model.time.start,
        stocks,
        variables: HashMap::new(),
        units: SimUnits {
            stocks: meta.stock_units.clone(),
            variables: HashMap::new(),
            rates,
            time: meta.time_unit.clone(),
        },
    }
}

/// Start a lazy simulation against the standard unit registry.
pub fn simulate(model: &Model, config: &SimulationConfig) -> Result<Simulation, Error> {
    simulate_with_registry(model, config, &UnitRegistry::standard())
}

pub fn simulate_with_registry(
    model: &Model,
    config: &SimulationConfig,
    registry: &UnitRegistry,
) -> Result<Simulation, Error> {
    let meta = compile(model, registry)?;
    let current = initial_state(model, &meta);
    let mut solver = config.solver.build();
    solver.reset();
    debug!(
        "simulating '{}' with {} from {} to {} (step {})",
        model.name,
        solver.name(),
        model.time.start,
        model.time.end,
        model.time.step
    );
    Ok(Simulation {
        model: Arc::new(model.clone()),
        meta,
        solver,
        delays: DelayStateStore::new(),
        current,
        emitted_initial: false,
        failed: false,
    })
}

/// Materialise the full state array.
pub fn simulate_eager(model: &Model, config: &SimulationConfig) -> Result<Vec<SimState>, Error> {
    simulate(model, config)?.collect()
}

/// Run to the horizon and return only the last state.
pub fn simulate_final(model: &Model, config: &SimulationConfig) -> Result<SimState, Error> {
    let mut last = None;
    for state in simulate(model, config)? {
        last = Some(state?);
    }
    last.ok_or(Error::EmptySimulation)
}

/// Parallelism bound for multi-model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parallelism {
    #[default]
    Unbounded,
    Bounded(usize),
}

#[derive(Debug, Clone, Default)]
pub struct ParallelOptions {
    pub collect_states: bool,
    pub parallelism: Parallelism,
}

/// One completed run out of a parallel batch.
#[derive(Debug, Clone)]
pub struct ParallelRun {
    pub final_state: SimState,
    pub states: Option<Vec<SimState>>,
}

/// Run several models concurrently; the first failure wins (fail-fast) and
/// results come back in input order.
pub fn simulate_parallel(
    targets: &[(Model, SimulationConfig)],
    options: &ParallelOptions,
) -> Result<Vec<ParallelRun>, Error> {
    let run = || {
        targets
            .par_iter()
            .map(|(model, config)| {
                let states = simulate_eager(model, config)?;
                let final_state = states.last().cloned().ok_or(Error::EmptySimulation)?;
                Ok(ParallelRun {
                    final_state,
                    states: if options.collect_states { Some(states) } else { None },
                })
            })
            .collect::<Result<Vec<_>, Error>>()
    };

    match options.parallelism {
        Parallelism::Unbounded => run(),
        Parallelism::Bounded(limit) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(limit.max(1))
                .build()
                .map_err(|e| Error::ParallelExecution { reason: e.to_string() })?;
            pool.install(run)
        }
    }
}
