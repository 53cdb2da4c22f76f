//! Data produced by an improvement session.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::bayesian::Prediction;
use crate::core::config::CoverageMetric;
use crate::detectors::coverage::CoverageRecord;
use crate::detectors::gaps::Strategy;
use crate::toolchain::TestCase;

/// Longest compiler summary kept in a failure
const MAX_SUMMARY_CHARS: usize = 240;

/// Recoverable per-iteration failure.
///
/// These never abort a session; they are carried by coverage records,
/// strategy outcomes and isolation warnings and surface in the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationFailure {
    /// A dependency stand-in had to be guessed
    MockIncomplete { dependency: String, reason: String },
    /// The test binary could not be built
    CompileFailed { summary: String },
    /// The test binary died; partial coverage is retained
    RuntimeCrashed {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    /// The test binary was killed after the run timeout
    RuntimeTimedOut { timeout_secs: u64 },
    /// No usable tests came back from the generator
    GeneratorUnavailable { reason: String },
}

impl IterationFailure {
    /// Stable snake_case name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MockIncomplete { .. } => "mock_incomplete",
            Self::CompileFailed { .. } => "compile_failed",
            Self::RuntimeCrashed { .. } => "runtime_crashed",
            Self::RuntimeTimedOut { .. } => "runtime_timed_out",
            Self::GeneratorUnavailable { .. } => "generator_unavailable",
        }
    }

    /// One-line digest of compiler output: the first line mentioning an
    /// error, else the first non-blank line.
    pub fn summarize(errors: &str) -> String {
        let line = errors
            .lines()
            .map(str::trim)
            .find(|l| l.contains("error"))
            .or_else(|| errors.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("compilation failed without diagnostics");
        if line.chars().count() > MAX_SUMMARY_CHARS {
            let cut: String = line.chars().take(MAX_SUMMARY_CHARS).collect();
            format!("{cut}…")
        } else {
            line.to_string()
        }
    }
}

impl fmt::Display for IterationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MockIncomplete { dependency, reason } => {
                write!(f, "incomplete mock for {dependency}: {reason}")
            }
            Self::CompileFailed { summary } => write!(f, "compile failed: {summary}"),
            Self::RuntimeCrashed { exit_code, signal } => match (exit_code, signal) {
                (_, Some(sig)) => write!(f, "test binary crashed (signal {sig})"),
                (Some(code), None) => write!(f, "test binary crashed (exit code {code})"),
                (None, None) => write!(f, "test binary crashed"),
            },
            Self::RuntimeTimedOut { timeout_secs } => {
                write!(f, "test binary timed out after {timeout_secs}s")
            }
            Self::GeneratorUnavailable { reason } => write!(f, "generator unavailable: {reason}"),
        }
    }
}

/// One entry of the append-only outcome log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub unit_id: String,
    pub iteration: usize,
    pub strategy: Strategy,
    /// Qualified name of the targeted function
    pub function: String,
    /// Change in the session metric, in percentage points; zero when nothing was measured
    pub delta: f64,
    /// Session metric after this iteration
    pub coverage_after: f64,
    /// Whether the candidate tests joined the accepted set
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<IterationFailure>,
    pub recorded_at: DateTime<Utc>,
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    TargetReached,
    MaxIterations,
    AllStrategiesPlateaued,
    /// Every remaining gap was gated out or none were left
    NoActionableGaps,
    TimeBudgetExhausted,
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TargetReached => "target_reached",
            Self::MaxIterations => "max_iterations",
            Self::AllStrategiesPlateaued => "all_strategies_plateaued",
            Self::NoActionableGaps => "no_actionable_gaps",
            Self::TimeBudgetExhausted => "time_budget_exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a terminated session retains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub unit_id: String,
    pub source: PathBuf,
    pub metric: CoverageMetric,
    pub target_coverage: f64,
    /// Cold-start estimate made before the first measurement
    pub initial_prediction: Prediction,
    /// Record of the accepted test set when the session stopped
    pub final_record: CoverageRecord,
    /// Highest-scoring record seen in any iteration
    pub best_record: CoverageRecord,
    pub outcomes: Vec<StrategyOutcome>,
    /// Isolation and bootstrap problems that did not belong to one outcome
    pub warnings: Vec<IterationFailure>,
    pub accepted_tests: Vec<TestCase>,
    pub iterations: usize,
    pub termination: TerminationReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
