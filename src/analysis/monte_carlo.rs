/// Monte Carlo simulation over sampled parameters
///
/// Draws every iteration's parameter set upfront from the seeded mulberry
/// generator, runs the simulations (serially or on the rayon pool) and
/// aggregates each metric at the final state. Fixed seed means fixed
/// samples, so results are reproducible run to run.

use std::collections::BTreeMap;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::rng::{Mulberry32, ParameterSampler, DEFAULT_SEED};
use crate::analysis::scenario::{apply_overrides, metric_value};
use crate::error::Error;
use crate::model::quantity::UNIT_EPSILON;
use crate::model::Model;
use crate::simulation::engine::simulate_final;
use crate::simulation::SimulationConfig;

/// One sampled parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McParameter {
    pub name: String,
    pub sampler: ParameterSampler,
}

impl McParameter {
    pub fn new(name: &str, sampler: ParameterSampler) -> Self {
        Self { name: name.to_string(), sampler }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    #[default]
    Serial,
    Parallel,
}

#[derive(Debug, Clone)]
pub struct MonteCarloConfig {
    pub iterations: usize,
    /// Metric names resolved against stocks, then variables.
    pub metrics: Vec<String>,
    pub parameters: Vec<McParameter>,
    pub seed: u32,
    /// Requested percentiles; clamped to [0, 1], sorted, deduplicated.
    pub percentiles: Vec<f64>,
    pub concurrency: Concurrency,
    pub sim_config: SimulationConfig,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            metrics: Vec::new(),
            parameters: Vec::new(),
            seed: DEFAULT_SEED,
            percentiles: vec![0.5, 0.9, 0.95],
            concurrency: Concurrency::Serial,
            sim_config: SimulationConfig::default(),
        }
    }
}

/// Summary statistics for one metric across all iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub mean: f64,
    /// Sample variance (n - 1 denominator).
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    /// `(percentile, value)` pairs in ascending percentile order.
    pub percentiles: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub iterations: usize,
    pub metrics: Vec<MetricSummary>,
}

impl MonteCarloResult {
    /// CSV export of the metric summaries, one row per metric.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("metric,mean,variance,min,max");
        if let Some(first) = self.metrics.first() {
            for (p, _) in &first.percentiles {
                csv.push_str(&format!(",p{}", p * 100.0));
            }
        }
        csv.push('\n');
        for metric in &self.metrics {
            csv.push_str(&format!(
                "{},{},{},{},{}",
                metric.name, metric.mean, metric.variance, metric.min, metric.max
            ));
            for (_, value) in &metric.percentiles {
                csv.push_str(&format!(",{}", value));
            }
            csv.push('\n');
        }
        csv
    }
}

fn normalized_percentiles(requested: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = requested
        .iter()
        .filter(|p| !p.is_nan())
        .map(|p| p.clamp(0.0, 1.0))
        .collect();
    out.sort_by(|a, b| a.partial_cmp(b).expect("NaN filtered above"));
    out.dedup_by(|a, b| (*a - *b).abs() <= UNIT_EPSILON);
    out
}

/// Linear-interpolation percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = p * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = index - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

fn validate(config: &MonteCarloConfig) -> Result<(), Error> {
    if config.iterations == 0 {
        return Err(Error::MonteCarloConfiguration {
            reason: "iterations must be positive".to_string(),
        });
    }
    if config.metrics.is_empty() {
        return Err(Error::MonteCarloConfiguration {
            reason: "at least one metric is required".to_string(),
        });
    }
    Ok(())
}

/// Run the Monte Carlo study.
pub fn run(model: &Model, config: &MonteCarloConfig) -> Result<MonteCarloResult, Error> {
    validate(config)?;
    let percentiles = normalized_percentiles(&config.percentiles);

    // all samples are drawn upfront so the RNG stream never depends on
    // execution order
    let mut rng = Mulberry32::new(config.seed);
    let mut samples: Vec<BTreeMap<String, f64>> = Vec::with_capacity(config.iterations);
    for _ in 0..config.iterations {
        let mut overrides = BTreeMap::new();
        for parameter in &config.parameters {
            overrides.insert(parameter.name.clone(), parameter.sampler.sample(&mut rng)?);
        }
        samples.push(overrides);
    }

    let evaluate = |overrides: &BTreeMap<String, f64>| -> Result<Vec<f64>, Error> {
        let candidate = apply_overrides(model, overrides, None)?;
        let state = simulate_final(&candidate, &config.sim_config)?;
        config
            .metrics
            .iter()
            .map(|name| metric_value(&candidate, &state, name))
            .collect()
    };

    let per_iteration: Vec<Vec<f64>> = match config.concurrency {
        Concurrency::Serial => samples
            .iter()
            .map(evaluate)
            .collect::<Result<Vec<_>, Error>>()?,
        Concurrency::Parallel => samples
            .par_iter()
            .map(evaluate)
            .collect::<Result<Vec<_>, Error>>()?,
    };
    debug!(
        "monte carlo on '{}' finished {} iterations",
        model.name, per_iteration.len()
    );

    let metrics = config
        .metrics
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let mut values: Vec<f64> =
                per_iteration.iter().map(|row| row[index]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).expect("finite metric values"));

            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = if values.len() > 1 {
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
            } else {
                0.0
            };

            MetricSummary {
                name: name.clone(),
                mean,
                variance,
                min: values[0],
                max: values[values.len() - 1],
                percentiles: percentiles
                    .iter()
                    .map(|&p| (p, percentile(&values, p)))
                    .collect(),
            }
        })
        .collect();

    Ok(MonteCarloResult { iterations: config.iterations, metrics })
}
