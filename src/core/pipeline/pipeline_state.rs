//! Loop state machine and per-session iteration state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pipeline_results::TerminationReason;
use crate::core::config::CoverageMetric;
use crate::core::errors::{CovforgeError, Result};
use crate::detectors::coverage::CoverageRecord;
use crate::detectors::gaps::Strategy;

/// Phase of an improvement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Analyzing,
    Improving,
    Measuring,
    Evaluating,
    Terminated(TerminationReason),
}

impl LoopState {
    /// Whether the machine may move from `self` to `next`.
    ///
    /// `Improving → Evaluating` covers an iteration whose generator produced
    /// nothing to measure. Cancellation and budget checks may terminate from
    /// any non-terminal state.
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::{Analyzing, Evaluating, Idle, Improving, Measuring, Terminated};
        match (self, next) {
            (Terminated(_), _) => false,
            (_, Terminated(_)) => true,
            (Idle, Analyzing)
            | (Analyzing, Improving)
            | (Improving, Measuring | Evaluating)
            | (Measuring, Evaluating)
            | (Evaluating, Analyzing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Analyzing => f.write_str("analyzing"),
            Self::Improving => f.write_str("improving"),
            Self::Measuring => f.write_str("measuring"),
            Self::Evaluating => f.write_str("evaluating"),
            Self::Terminated(reason) => write!(f, "terminated({reason})"),
        }
    }
}

/// Value of `metric` for `record`.
///
/// Branch coverage of a unit without any branches is meaningless, so it falls
/// back to line coverage.
pub fn metric_value(metric: CoverageMetric, record: &CoverageRecord) -> f64 {
    match metric {
        CoverageMetric::Line => record.line_percent(),
        CoverageMetric::Branch if record.branches.total == 0 => record.line_percent(),
        CoverageMetric::Branch => record.branch_percent(),
        CoverageMetric::Function => record.function_percent(),
    }
}

/// The loop's own bookkeeping for one source unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    pub state: LoopState,
    /// Improvement iterations started so far
    pub iteration: usize,
    pub current_coverage: f64,
    pub best_coverage: f64,
    pub target_coverage: f64,
    /// Sub-threshold streak of the most recently applied strategy
    pub plateau_counter: usize,
    /// Enabled strategies ordered by current confidence, highest first
    pub ranking: Vec<(Strategy, f64)>,
}

impl IterationState {
    pub fn new(target_coverage: f64) -> Self {
        Self {
            state: LoopState::Idle,
            iteration: 0,
            current_coverage: 0.0,
            best_coverage: 0.0,
            target_coverage,
            plateau_counter: 0,
            ranking: Vec::new(),
        }
    }

    /// Move to `next`, rejecting transitions the machine does not allow
    pub fn transition(&mut self, next: LoopState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CovforgeError::internal(format!(
                "illegal loop transition {} -> {next}",
                self.state
            )));
        }
        debug!(from = %self.state, to = %next, iteration = self.iteration, "loop transition");
        self.state = next;
        Ok(())
    }

    pub fn target_reached(&self) -> bool {
        self.current_coverage >= self.target_coverage
    }

    pub fn record_coverage(&mut self, coverage: f64) {
        self.current_coverage = coverage;
        if coverage > self.best_coverage {
            self.best_coverage = coverage;
        }
    }

    /// The termination reason, once terminated
    pub fn termination(&self) -> Option<TerminationReason> {
        match self.state {
            LoopState::Terminated(reason) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::coverage::Counts;

    #[test]
    fn happy_cycle_is_allowed() {
        let mut state = IterationState::new(80.0);
        for next in [
            LoopState::Analyzing,
            LoopState::Improving,
            LoopState::Measuring,
            LoopState::Evaluating,
            LoopState::Analyzing,
            LoopState::Terminated(TerminationReason::TargetReached),
        ] {
            state.transition(next).unwrap();
        }
        assert_eq!(state.termination(), Some(TerminationReason::TargetReached));
    }

    #[test]
    fn terminated_is_final() {
        let mut state = IterationState::new(80.0);
        state
            .transition(LoopState::Terminated(TerminationReason::Cancelled))
            .unwrap();
        assert!(state.transition(LoopState::Analyzing).is_err());
        assert!(state
            .transition(LoopState::Terminated(TerminationReason::MaxIterations))
            .is_err());
    }

    #[test]
    fn skipping_analysis_is_rejected() {
        let mut state = IterationState::new(80.0);
        assert!(state.transition(LoopState::Measuring).is_err());
        state.transition(LoopState::Analyzing).unwrap();
        assert!(state.transition(LoopState::Evaluating).is_err());
    }

    #[test]
    fn best_coverage_never_drops() {
        let mut state = IterationState::new(90.0);
        state.record_coverage(60.0);
        state.record_coverage(40.0);
        assert_eq!(state.current_coverage, 40.0);
        assert_eq!(state.best_coverage, 60.0);
        assert!(!state.target_reached());
    }

    #[test]
    fn branch_metric_falls_back_without_branches() {
        let mut record = CoverageRecord::empty("u", 1);
        record.lines = Counts::new(3, 4);
        assert_eq!(metric_value(CoverageMetric::Branch, &record), 75.0);
        record.branches = Counts::new(1, 4);
        assert_eq!(metric_value(CoverageMetric::Branch, &record), 25.0);
        assert_eq!(metric_value(CoverageMetric::Line, &record), 75.0);
    }
}
