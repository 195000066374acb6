/// Error taxonomy for the simulation kernel
///
/// Every variant carries a stable tag name (see [`Error::tag`]) so callers
/// can pattern-match across language boundaries without depending on the
/// rendered message text.

use thiserror::Error;

use crate::dsl::token::Span;
use crate::model::ScenarioId;

/// Phase in which an equation diagnostic was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticPhase {
    Parse,
}

/// Canonical diagnostic codes for lexing/parsing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DiagnosticCode {
    UnexpectedToken,
    UnclosedBlock,
    TrailingInput,
    InvalidUnitExponent,
    InvalidUnitToken,
    UnknownKeyword,
}

/// A parse-phase diagnostic with optional location and caret snippet.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EquationDiagnostic {
    pub phase: DiagnosticPhase,
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Option<Span>,
    pub snippet: Option<String>,
}

impl EquationDiagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            phase: DiagnosticPhase::Parse,
            code,
            message: message.into(),
            span: None,
            snippet: None,
        }
    }

    pub fn with_span(mut self, span: Span, source: &str) -> Self {
        self.snippet = Some(render_snippet(source, &span));
        self.span = Some(span);
        self
    }
}

impl std::fmt::Display for EquationDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.span {
            Some(span) => write!(
                f,
                "{:?} at line {}, column {}: {}",
                self.code, span.line, span.column, self.message
            ),
            None => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

/// Render the offending source line with a caret run under the span.
fn render_snippet(source: &str, span: &Span) -> String {
    let line = source.lines().nth(span.line.saturating_sub(1)).unwrap_or("");
    let col = span.column.saturating_sub(1);
    let width = span.end.saturating_sub(span.start).max(1).min(line.len().saturating_sub(col).max(1));
    let mut out = String::with_capacity(line.len() + col + width + 1);
    out.push_str(line);
    out.push('\n');
    out.extend(std::iter::repeat(' ').take(col));
    out.extend(std::iter::repeat('^').take(width));
    out
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("equation parse error: {0}")]
    EquationParse(EquationDiagnostic),

    #[error("equation evaluation error: {problem} (in `{expression}`)")]
    EquationEvaluation { problem: String, expression: String },

    #[error("equation graph build error: {detail}")]
    EquationGraphBuild { detail: String },

    #[error("equation graph cycle through: {}", nodes.join(" -> "))]
    EquationGraphCycle { nodes: Vec<String> },

    #[error("invalid time step {dt} (allowed range [{min}, {max}])")]
    InvalidTimeStep { dt: f64, min: f64, max: f64 },

    #[error("adaptive solver failed to converge on model '{model}' at step {time_step} (error norm {error})")]
    Convergence { model: String, time_step: f64, error: f64 },

    #[error("unit '{symbol}' is not registered")]
    UnitNotFound { symbol: String },

    #[error("cannot convert '{from}' ({from_dimension}) to '{to}' ({to_dimension})")]
    UnitDimensionMismatch {
        from: String,
        to: String,
        from_dimension: String,
        to_dimension: String,
    },

    #[error("unsupported quantity: {reason}")]
    UnsupportedQuantity { reason: String },

    #[error("override target(s) not found: {}", targets.join(", "))]
    ScenarioOverrideNotFound {
        scenario_id: Option<ScenarioId>,
        targets: Vec<String>,
    },

    #[error("unsupported override of '{target}': {reason}")]
    ScenarioUnsupportedOverride {
        scenario_id: Option<ScenarioId>,
        target: String,
        reason: String,
    },

    #[error("metric '{name}' not found in simulation output")]
    ScenarioMetricNotFound { name: String },

    #[error("scenario '{scenario_id}' targets model '{expected}' but was run against '{actual}'")]
    ScenarioModelMismatch {
        scenario_id: ScenarioId,
        expected: String,
        actual: String,
    },

    #[error("invalid Monte Carlo configuration: {reason}")]
    MonteCarloConfiguration { reason: String },

    #[error("simulation produced no states")]
    EmptySimulation,

    #[error("parallel execution failed: {reason}")]
    ParallelExecution { reason: String },

    #[error("invalid model: {detail}")]
    InvalidModel { detail: String },
}

impl Error {
    /// Stable tag name for cross-boundary pattern matching.
    pub fn tag(&self) -> &'static str {
        match self {
            Error::EquationParse(_) => "EquationParseError",
            Error::EquationEvaluation { .. } => "EquationEvaluationError",
            Error::EquationGraphBuild { .. } => "EquationGraphBuildError",
            Error::EquationGraphCycle { .. } => "EquationGraphCycleError",
            Error::InvalidTimeStep { .. } => "InvalidTimeStepError",
            Error::Convergence { .. } => "ConvergenceError",
            Error::UnitNotFound { .. } => "UnitNotFoundError",
            Error::UnitDimensionMismatch { .. } => "UnitDimensionMismatchError",
            Error::UnsupportedQuantity { .. } => "UnsupportedQuantityError",
            Error::ScenarioOverrideNotFound { .. } => "ScenarioOverrideNotFoundError",
            Error::ScenarioUnsupportedOverride { .. } => "ScenarioUnsupportedOverrideError",
            Error::ScenarioMetricNotFound { .. } => "ScenarioMetricNotFoundError",
            Error::ScenarioModelMismatch { .. } => "ScenarioModelMismatchError",
            Error::MonteCarloConfiguration { .. } => "MonteCarloConfigurationError",
            Error::EmptySimulation => "EmptySimulationError",
            Error::ParallelExecution { .. } => "ParallelExecutionError",
            Error::InvalidModel { .. } => "InvalidModelError",
        }
    }

    pub(crate) fn evaluation(problem: impl Into<String>, expression: impl Into<String>) -> Self {
        Error::EquationEvaluation {
            problem: problem.into(),
            expression: expression.into(),
        }
    }
}
