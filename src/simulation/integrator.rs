/// Integration methods for numerical simulation
///
/// All integrators advance stocks through the shared derivative routine in
/// `dynamics`. Multi-stage methods probe intermediate states with
/// `commit = false` so delay stages are only written once per accepted
/// step, and rejected adaptive attempts leave no trace.

use std::collections::HashMap;

use log::{debug, trace};

use crate::error::Error;
use crate::graph::ModelMetadata;
use crate::model::{Model, StockId};
use crate::simulation::delay::DelayStateStore;
use crate::simulation::dynamics::{compute_dynamics, Dynamics};
use crate::simulation::{SimState, SimUnits};

/// Borrowed model context threaded through every step.
pub struct StepContext<'a> {
    pub model: &'a Model,
    pub meta: &'a ModelMetadata,
}

/// A function advancing `(model, state, dt) -> state`.
pub trait Solver: Send {
    fn name(&self) -> &'static str;

    fn step(
        &mut self,
        ctx: &StepContext<'_>,
        state: &SimState,
        delays: &mut DelayStateStore,
        dt: f64,
    ) -> Result<SimState, Error>;

    /// Re-initialise any per-simulation memory (adaptive step size).
    fn reset(&mut self) {}
}

fn guard_dt(dt: f64, min: f64, max: f64) -> Result<(), Error> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(Error::InvalidTimeStep { dt, min, max });
    }
    Ok(())
}

/// Effective step: shrink to the horizon when nearing `end`.
fn effective_step(ctx: &StepContext<'_>, time: f64, dt: f64) -> Result<f64, Error> {
    let remaining = ctx.model.time.end - time;
    if remaining <= 0.0 {
        return Err(Error::InvalidTimeStep { dt, min: 0.0, max: remaining.max(0.0) });
    }
    Ok(dt.min(remaining))
}

fn state_from(
    ctx: &StepContext<'_>,
    time: f64,
    stocks: HashMap<StockId, f64>,
    dynamics: &Dynamics,
) -> Result<SimState, Error> {
    for id in &ctx.meta.stock_order {
        if !stocks[id].is_finite() {
            return Err(Error::evaluation(
                format!("stock '{}' became non-finite at t={}", id, time),
                &ctx.model.name,
            ));
        }
    }
    Ok(SimState {
        time,
        stocks,
        variables: dynamics.variables.clone(),
        units: SimUnits {
            stocks: ctx.meta.stock_units.clone(),
            variables: dynamics.variable_units.clone(),
            rates: dynamics.rate_units.clone(),
            time: ctx.meta.time_unit.clone(),
        },
    })
}

fn advanced(
    meta: &ModelMetadata,
    base: &HashMap<StockId, f64>,
    k: &HashMap<StockId, f64>,
    h: f64,
) -> HashMap<StockId, f64> {
    let mut out = base.clone();
    for id in &meta.stock_order {
        *out.get_mut(id).expect("rate map covers all stocks") = base[id] + h * k[id];
    }
    out
}

fn clamp_to_end(ctx: &StepContext<'_>, time: f64) -> f64 {
    if time >= ctx.model.time.end { ctx.model.time.end } else { time }
}

/// Euler (forward) integration method
#[derive(Debug, Default)]
pub struct EulerSolver;

impl Solver for EulerSolver {
    fn name(&self) -> &'static str {
        "euler"
    }

    fn step(
        &mut self,
        ctx: &StepContext<'_>,
        state: &SimState,
        delays: &mut DelayStateStore,
        dt: f64,
    ) -> Result<SimState, Error> {
        guard_dt(dt, 0.0, f64::INFINITY)?;
        let h = effective_step(ctx, state.time, dt)?;

        // commit into a clone so a failing step leaves the store untouched
        let mut store = delays.clone();
        let dynamics = compute_dynamics(
            ctx.model,
            ctx.meta,
            &state.stocks,
            state.time,
            h,
            &mut store,
            true,
        )?;

        let mut stocks = state.stocks.clone();
        for id in &ctx.meta.stock_order {
            *stocks.get_mut(id).expect("state covers all stocks") += dynamics.rates[id] * h;
        }

        *delays = store;
        state_from(ctx, clamp_to_end(ctx, state.time + h), stocks, &dynamics)
    }
}

/// Heun's method (improved Euler): predictor/corrector, second order.
#[derive(Debug, Default)]
pub struct HeunSolver;

impl Solver for HeunSolver {
    fn name(&self) -> &'static str {
        "heun"
    }

    fn step(
        &mut self,
        ctx: &StepContext<'_>,
        state: &SimState,
        delays: &mut DelayStateStore,
        dt: f64,
    ) -> Result<SimState, Error> {
        guard_dt(dt, 0.0, f64::INFINITY)?;
        let h = effective_step(ctx, state.time, dt)?;
        let t = state.time;

        let mut probe = delays.clone();
        let k1 = compute_dynamics(ctx.model, ctx.meta, &state.stocks, t, h, &mut probe, false)?;

        let predicted = advanced(ctx.meta, &state.stocks, &k1.rates, h);
        let k2 = compute_dynamics(ctx.model, ctx.meta, &predicted, t + h, h, &mut probe, false)?;

        let mut stocks = state.stocks.clone();
        for id in &ctx.meta.stock_order {
            *stocks.get_mut(id).expect("state covers all stocks") +=
                (k1.rates[id] + k2.rates[id]) * h / 2.0;
        }

        let mut store = delays.clone();
        let dynamics =
            compute_dynamics(ctx.model, ctx.meta, &stocks, t + h, h, &mut store, true)?;
        *delays = store;
        state_from(ctx, clamp_to_end(ctx, t + h), stocks, &dynamics)
    }
}

/// RK4 (classical Runge-Kutta 4th order) integration method
#[derive(Debug, Default)]
pub struct Rk4Solver;

impl Solver for Rk4Solver {
    fn name(&self) -> &'static str {
        "rk4"
    }

    fn step(
        &mut self,
        ctx: &StepContext<'_>,
        state: &SimState,
        delays: &mut DelayStateStore,
        dt: f64,
    ) -> Result<SimState, Error> {
        guard_dt(dt, 0.0, f64::INFINITY)?;
        let h = effective_step(ctx, state.time, dt)?;
        let t = state.time;
        let y = &state.stocks;

        // four derivative samples, none of which touch persistent delay state
        let mut probe = delays.clone();
        let k1 = compute_dynamics(ctx.model, ctx.meta, y, t, h, &mut probe, false)?;
        let y2 = advanced(ctx.meta, y, &k1.rates, h / 2.0);
        let k2 = compute_dynamics(ctx.model, ctx.meta, &y2, t + h / 2.0, h, &mut probe, false)?;
        let y3 = advanced(ctx.meta, y, &k2.rates, h / 2.0);
        let k3 = compute_dynamics(ctx.model, ctx.meta, &y3, t + h / 2.0, h, &mut probe, false)?;
        let y4 = advanced(ctx.meta, y, &k3.rates, h);
        let k4 = compute_dynamics(ctx.model, ctx.meta, &y4, t + h, h, &mut probe, false)?;

        let mut stocks = y.clone();
        for id in &ctx.meta.stock_order {
            let blend =
                k1.rates[id] + 2.0 * k2.rates[id] + 2.0 * k3.rates[id] + k4.rates[id];
            *stocks.get_mut(id).expect("state covers all stocks") += blend * h / 6.0;
        }

        // one committing evaluation finalises delay stages and variables
        let mut store = delays.clone();
        let dynamics =
            compute_dynamics(ctx.model, ctx.meta, &stocks, t + h, h, &mut store, true)?;
        *delays = store;
        state_from(ctx, clamp_to_end(ctx, t + h), stocks, &dynamics)
    }
}

/// Absolute/relative tolerance, scalar or per stock.
#[derive(Debug, Clone, PartialEq)]
pub enum Tolerance {
    Scalar(f64),
    PerStock {
        default: f64,
        overrides: HashMap<StockId, f64>,
    },
}

impl Tolerance {
    pub fn get(&self, id: &StockId) -> f64 {
        match self {
            Tolerance::Scalar(value) => *value,
            Tolerance::PerStock { default, overrides } => {
                overrides.get(id).copied().unwrap_or(*default)
            }
        }
    }
}

/// Configuration for the adaptive Dormand-Prince 5(4) solver.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveOptions {
    /// First attempted step; the requested `dt` when unset.
    pub initial_step: Option<f64>,
    pub min_step: f64,
    pub max_step: f64,
    pub safety_factor: f64,
    pub growth_limit: f64,
    pub shrink_limit: f64,
    pub absolute_tolerance: Tolerance,
    pub relative_tolerance: Tolerance,
    pub max_attempts_per_step: usize,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            initial_step: None,
            min_step: 1e-10,
            max_step: f64::INFINITY,
            safety_factor: 0.9,
            growth_limit: 5.0,
            shrink_limit: 0.2,
            absolute_tolerance: Tolerance::Scalar(1e-6),
            relative_tolerance: Tolerance::Scalar(1e-3),
            max_attempts_per_step: 12,
        }
    }
}

// Dormand-Prince 5(4) tableau (FSAL form, 7 stages).
const DP_C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const DP_A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
const DP_B5: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];
const DP_B4: [f64; 7] = [
    5179.0 / 57600.0,
    0.0,
    7571.0 / 16695.0,
    393.0 / 640.0,
    -92097.0 / 339200.0,
    187.0 / 2100.0,
    1.0 / 40.0,
];

struct Attempt {
    y5: HashMap<StockId, f64>,
    err: f64,
}

/// Adaptive Dormand-Prince 5(4) with a persistent per-simulation step size.
#[derive(Debug)]
pub struct DormandPrince45 {
    options: AdaptiveOptions,
    current_step: Option<f64>,
}

impl DormandPrince45 {
    pub fn new(options: AdaptiveOptions) -> Self {
        Self { options, current_step: None }
    }

    fn attempt(
        &self,
        ctx: &StepContext<'_>,
        y: &HashMap<StockId, f64>,
        t: f64,
        h: f64,
        delays: &mut DelayStateStore,
    ) -> Result<Attempt, Error> {
        let meta = ctx.meta;
        let mut ks: Vec<HashMap<StockId, f64>> = Vec::with_capacity(7);

        for stage in 0..7 {
            let mut ys = y.clone();
            for id in &meta.stock_order {
                let mut acc = 0.0;
                for (j, k) in ks.iter().enumerate() {
                    acc += DP_A[stage][j] * k[id];
                }
                *ys.get_mut(id).expect("state covers all stocks") = y[id] + h * acc;
            }
            let dynamics = compute_dynamics(
                ctx.model,
                ctx.meta,
                &ys,
                t + DP_C[stage] * h,
                h,
                delays,
                false,
            )?;
            ks.push(dynamics.rates);
        }

        let mut y5 = y.clone();
        let mut err_sq_sum = 0.0;
        for id in &meta.stock_order {
            let mut hi = 0.0;
            let mut lo = 0.0;
            for (j, k) in ks.iter().enumerate() {
                hi += DP_B5[j] * k[id];
                lo += DP_B4[j] * k[id];
            }
            let y5_i = y[id] + h * hi;
            let y4_i = y[id] + h * lo;
            *y5.get_mut(id).expect("state covers all stocks") = y5_i;

            let scale = self.options.absolute_tolerance.get(id)
                + self.options.relative_tolerance.get(id) * y[id].abs().max(y5_i.abs());
            let delta = (y5_i - y4_i) / scale;
            err_sq_sum += delta * delta;
        }
        let err = (err_sq_sum / meta.stock_order.len().max(1) as f64).sqrt();

        Ok(Attempt { y5, err })
    }
}

impl Solver for DormandPrince45 {
    fn name(&self) -> &'static str {
        "dormand-prince-45"
    }

    fn reset(&mut self) {
        self.current_step = None;
    }

    fn step(
        &mut self,
        ctx: &StepContext<'_>,
        state: &SimState,
        delays: &mut DelayStateStore,
        dt: f64,
    ) -> Result<SimState, Error> {
        let opts = self.options.clone();
        guard_dt(dt, opts.min_step, opts.max_step)?;
        let span = effective_step(ctx, state.time, dt)?;
        let target = state.time + span;

        let mut t = state.time;
        let mut y = state.stocks.clone();
        let mut h = self
            .current_step
            .or(opts.initial_step)
            .unwrap_or(span)
            .clamp(opts.min_step, opts.max_step);
        let mut last_dynamics: Option<Dynamics> = None;

        let time_eps = 1e-12 * target.abs().max(1.0);
        while t < target - time_eps {
            let remaining = target - t;
            // a truncated final sub-step may drop below min_step; it never
            // feeds back into the stored step size
            let truncated = remaining < h;
            let mut h_try = if truncated { remaining } else { h };

            let mut attempts = 0;
            loop {
                attempts += 1;
                let mut probe = delays.clone();
                let attempt = self.attempt(ctx, &y, t, h_try, &mut probe)?;

                if attempt.err <= 1.0 {
                    trace!(
                        "dp45 accept t={} h={} err={} (attempt {})",
                        t, h_try, attempt.err, attempts
                    );
                    let mut store = delays.clone();
                    let dynamics = compute_dynamics(
                        ctx.model,
                        ctx.meta,
                        &attempt.y5,
                        t + h_try,
                        h_try,
                        &mut store,
                        true,
                    )?;
                    *delays = store;
                    t += h_try;
                    y = attempt.y5;
                    last_dynamics = Some(dynamics);

                    if !truncated {
                        let factor = if attempt.err > 0.0 && attempt.err.is_finite() {
                            (opts.safety_factor * attempt.err.powf(-0.2))
                                .clamp(opts.shrink_limit, opts.growth_limit)
                        } else {
                            opts.growth_limit
                        };
                        h = (h_try * factor).clamp(opts.min_step, opts.max_step);
                        self.current_step = Some(h);
                    }
                    break;
                }

                debug!(
                    "dp45 reject t={} h={} err={} (attempt {})",
                    t, h_try, attempt.err, attempts
                );
                let factor = if attempt.err.is_finite() {
                    (opts.safety_factor * attempt.err.powf(-0.2))
                        .clamp(opts.shrink_limit, opts.growth_limit)
                        .min(1.0)
                } else {
                    opts.shrink_limit
                };
                let shrunk = h_try * factor;
                if attempts >= opts.max_attempts_per_step || shrunk < opts.min_step {
                    return Err(Error::Convergence {
                        model: ctx.model.name.clone(),
                        time_step: h_try,
                        error: attempt.err,
                    });
                }
                h_try = shrunk;
            }
        }

        let dynamics = match last_dynamics {
            Some(dynamics) => dynamics,
            // span smaller than resolvable: evaluate once at the target
            None => {
                let mut store = delays.clone();
                let dynamics = compute_dynamics(
                    ctx.model, ctx.meta, &y, target, span, &mut store, true,
                )?;
                *delays = store;
                dynamics
            }
        };
        state_from(ctx, clamp_to_end(ctx, target), y, &dynamics)
    }
}

impl crate::simulation::SolverKind {
    pub fn build(&self) -> Box<dyn Solver> {
        match self {
            crate::simulation::SolverKind::Euler => Box::new(EulerSolver),
            crate::simulation::SolverKind::Heun => Box::new(HeunSolver),
            crate::simulation::SolverKind::Rk4 => Box::new(Rk4Solver),
            crate::simulation::SolverKind::DormandPrince45(options) => {
                Box::new(DormandPrince45::new(options.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::compile;
    use crate::model::units::UnitRegistry;
    use crate::model::{Flow, Stock, TimeConfig, Variable};
    use crate::simulation::SimUnits;
    use approx::assert_relative_eq;

    fn growth_model(end: f64, step: f64) -> Model {
        let mut model = Model::new("growth");
        model.time = TimeConfig { start: 0.0, end, step, units: Some("tick".into()) };
        model
            .add_stock(Stock::new("P", 100.0).with_units("person"))
            .unwrap();
        model
            .add_variable(Variable::constant("r", 0.1))
            .unwrap();
        model
            .add_flow(
                Flow::new("growth", "[P] * r / {1 tick}").with_target(StockId::new("P")),
            )
            .unwrap();
        model
    }

    fn initial_state(model: &Model) -> (std::sync::Arc<ModelMetadata>, SimState) {
        let meta = compile(model, &UnitRegistry::standard()).unwrap();
        let stocks: HashMap<StockId, f64> = model
            .stocks
            .iter()
            .map(|s| (s.id.clone(), s.initial_value))
            .collect();
        let state = SimState {
            time: model.time.start,
            stocks,
            variables: HashMap::new(),
            units: SimUnits {
                stocks: meta.stock_units.clone(),
                variables: HashMap::new(),
                rates: HashMap::new(),
                time: meta.time_unit.clone(),
            },
        };
        (meta, state)
    }

    fn run_fixed(model: &Model, solver: &mut dyn Solver) -> SimState {
        let (meta, mut state) = initial_state(model);
        let ctx = StepContext { model, meta: &meta };
        let mut delays = DelayStateStore::new();
        while state.time < model.time.end {
            state = solver.step(&ctx, &state, &mut delays, model.time.step).unwrap();
        }
        state
    }

    #[test]
    fn test_euler_exponential_growth() {
        // 10 unit steps of 10% growth compound to 100 * 1.1^10
        let model = growth_model(10.0, 1.0);
        let state = run_fixed(&model, &mut EulerSolver);
        assert_relative_eq!(state.time, 10.0);
        assert_relative_eq!(
            state.stocks[&StockId::new("P")],
            100.0 * 1.1_f64.powi(10),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rk4_tracks_exact_exponential() {
        let model = growth_model(1.0, 0.5);
        let state = run_fixed(&model, &mut Rk4Solver);
        let exact = 100.0 * (0.1_f64).exp();
        assert!(
            (state.stocks[&StockId::new("P")] - exact).abs() < 1e-4,
            "rk4 end value {} too far from {}",
            state.stocks[&StockId::new("P")],
            exact
        );
    }

    #[test]
    fn test_heun_sits_between_euler_and_exact() {
        let model = growth_model(1.0, 1.0);
        let euler = run_fixed(&model, &mut EulerSolver).stocks[&StockId::new("P")];
        let heun = run_fixed(&model, &mut HeunSolver).stocks[&StockId::new("P")];
        let exact = 100.0 * (0.1_f64).exp();
        assert!(euler < heun && heun < exact + 1e-6, "euler={} heun={} exact={}", euler, heun, exact);
    }

    #[test]
    fn test_final_step_is_shrunk_to_horizon() {
        // step 0.4 over [0, 1]: 0.4, 0.4, then 0.2
        let model = growth_model(1.0, 0.4);
        let state = run_fixed(&model, &mut EulerSolver);
        assert_relative_eq!(state.time, 1.0);
    }

    #[test]
    fn test_dt_guard_rejects_zero_and_nan() {
        let model = growth_model(1.0, 0.5);
        let (meta, state) = initial_state(&model);
        let ctx = StepContext { model: &model, meta: &meta };
        let mut delays = DelayStateStore::new();

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = EulerSolver.step(&ctx, &state, &mut delays, bad).unwrap_err();
            assert_eq!(err.tag(), "InvalidTimeStepError", "dt={}", bad);
        }
    }

    #[test]
    fn test_adaptive_matches_exact_solution() {
        let model = growth_model(1.0, 1.0);
        let mut solver = DormandPrince45::new(AdaptiveOptions::default());
        let state = run_fixed(&model, &mut solver);
        let exact = 100.0 * (0.1_f64).exp();
        assert!(
            (state.stocks[&StockId::new("P")] - exact).abs() / exact < 1e-3,
            "adaptive end value {} too far from {}",
            state.stocks[&StockId::new("P")],
            exact
        );
    }

    fn decay_model(rate: f64) -> Model {
        let mut model = Model::new("decay");
        model.time = TimeConfig { start: 0.0, end: 1.0, step: 0.1, units: Some("tick".into()) };
        model.add_stock(Stock::new("Y", 1.0).with_units("item")).unwrap();
        model
            .add_flow(
                Flow::new("drain", &format!("[Y] * {} / {{1 tick}}", rate))
                    .with_source(StockId::new("Y")),
            )
            .unwrap();
        model
    }

    #[test]
    fn test_adaptive_stiff_decay_converges() {
        let model = decay_model(50.0);
        let options = AdaptiveOptions {
            absolute_tolerance: Tolerance::Scalar(1e-6),
            relative_tolerance: Tolerance::Scalar(1e-6),
            ..AdaptiveOptions::default()
        };
        let mut solver = DormandPrince45::new(options);
        let state = run_fixed(&model, &mut solver);
        // exact value is e^-50 ~ 1.9e-22; the controller keeps the numeric
        // solution within the absolute tolerance envelope
        let y = state.stocks[&StockId::new("Y")];
        assert!(y.abs() < 1e-4, "stiff decay ended at {}", y);
        assert_relative_eq!(state.time, 1.0);
    }

    #[test]
    fn test_adaptive_exhausts_attempts_on_violent_stiffness() {
        let model = decay_model(1_000_000.0);
        let options = AdaptiveOptions {
            initial_step: Some(0.1),
            min_step: 0.05,
            max_attempts_per_step: 3,
            ..AdaptiveOptions::default()
        };
        let mut solver = DormandPrince45::new(options);
        let (meta, state) = initial_state(&model);
        let ctx = StepContext { model: &model, meta: &meta };
        let mut delays = DelayStateStore::new();

        let err = solver.step(&ctx, &state, &mut delays, 0.1).unwrap_err();
        match err {
            Error::Convergence { model, error, .. } => {
                assert_eq!(model, "decay");
                assert!(error > 1.0);
            }
            other => panic!("expected convergence failure, got {:?}", other),
        }
    }

    #[test]
    fn test_adaptive_keeps_step_memory_and_resets() {
        let model = growth_model(10.0, 1.0);
        let mut solver = DormandPrince45::new(AdaptiveOptions::default());
        let (meta, state) = initial_state(&model);
        let ctx = StepContext { model: &model, meta: &meta };
        let mut delays = DelayStateStore::new();

        let _ = solver.step(&ctx, &state, &mut delays, 1.0).unwrap();
        assert!(solver.current_step.is_some());
        solver.reset();
        assert!(solver.current_step.is_none());
    }

    #[test]
    fn test_rk4_probes_do_not_pollute_delay_state() {
        let mut model = Model::new("delayed");
        model.time = TimeConfig { start: 0.0, end: 2.0, step: 1.0, units: Some("tick".into()) };
        model.add_stock(Stock::new("S", 0.0).with_units("item")).unwrap();
        model
            .add_flow(
                Flow::new("in", "SMOOTH({5 item / tick}, {2 tick}, {0 item / tick})")
                    .with_target(StockId::new("S")),
            )
            .unwrap();

        let (meta, state) = initial_state(&model);
        let ctx = StepContext { model: &model, meta: &meta };

        // Euler applies exactly one committed stage update per step; RK4's
        // four probes plus commit must land on the same delay trajectory.
        let mut euler_delays = DelayStateStore::new();
        let euler = EulerSolver
            .step(&ctx, &state, &mut euler_delays, 1.0)
            .unwrap();
        let mut rk4_delays = DelayStateStore::new();
        let _ = Rk4Solver.step(&ctx, &state, &mut rk4_delays, 1.0).unwrap();

        assert_eq!(euler_delays.len(), 1);
        assert_eq!(rk4_delays.len(), 1);
        assert!(euler.stocks[&StockId::new("S")] > 0.0);
    }

    #[test]
    fn test_two_stock_transfer_conserves_mass() {
        let mut model = Model::new("conserve");
        model.time = TimeConfig { start: 0.0, end: 5.0, step: 0.5, units: None };
        model.add_stock(Stock::new("A", 10.0).with_units("item")).unwrap();
        model.add_stock(Stock::new("B", 2.0).with_units("item")).unwrap();
        model
            .add_flow(
                Flow::new("move", "[A] * 0.3 / {1 tick}")
                    .with_source(StockId::new("A"))
                    .with_target(StockId::new("B")),
            )
            .unwrap();

        for solver in [&mut EulerSolver as &mut dyn Solver, &mut Rk4Solver as &mut dyn Solver] {
            let state = run_fixed(&model, solver);
            let total = state.stocks[&StockId::new("A")] + state.stocks[&StockId::new("B")];
            assert_relative_eq!(total, 12.0, epsilon = 1e-9);
        }
    }
}
