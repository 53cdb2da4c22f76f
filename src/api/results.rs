//! Session and project results for public API consumption.
//!
//! The improvement loop hands back a [`SessionOutcome`]; this module folds it
//! into reporter-facing shapes. Nothing here formats output.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::bayesian::{CoveragePredictor, Prediction, StructuralFeatures};
use crate::core::config::CoverageMetric;
use crate::core::pipeline::{
    metric_value, IterationFailure, SessionOutcome, StrategyOutcome, TerminationReason,
};
use crate::detectors::coverage::{BuildStatus, Counts, CoverageRecord};
use crate::lang::common::SourceUnit;

/// Line, branch and function coverage of one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageFigures {
    pub lines: Counts,
    pub branches: Counts,
    pub functions: Counts,
    pub line_percent: f64,
    pub branch_percent: f64,
    pub function_percent: f64,
}

impl CoverageFigures {
    pub fn of(record: &CoverageRecord) -> Self {
        Self {
            lines: record.lines,
            branches: record.branches,
            functions: record.functions,
            line_percent: record.line_percent(),
            branch_percent: record.branch_percent(),
            function_percent: record.function_percent(),
        }
    }
}

/// Everything the reporter needs about one finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub unit_id: String,
    pub source: PathBuf,
    pub termination: TerminationReason,
    pub iterations: usize,
    pub metric: CoverageMetric,
    pub target_coverage: f64,
    pub target_met: bool,
    /// Cold-start prediction made before the baseline
    pub prediction: Prediction,
    pub final_status: BuildStatus,
    pub final_coverage: CoverageFigures,
    pub best_coverage: CoverageFigures,
    /// Best value of the session metric
    pub best_metric: f64,
    /// Failures by kind across outcomes and warnings
    pub failure_counts: BTreeMap<String, usize>,
    pub outcomes: Vec<StrategyOutcome>,
    pub warnings: Vec<IterationFailure>,
    /// Names of the accepted generated tests
    pub accepted_tests: Vec<String>,
    /// Where the accepted tests were written, if they were
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn from_outcome(outcome: &SessionOutcome) -> Self {
        let mut failure_counts: BTreeMap<String, usize> = BTreeMap::new();
        let failures = outcome
            .outcomes
            .iter()
            .filter_map(|o| o.failure.as_ref())
            .chain(outcome.warnings.iter());
        for failure in failures {
            *failure_counts.entry(failure.kind().to_string()).or_insert(0) += 1;
        }

        let best_metric = metric_value(outcome.metric, &outcome.best_record);
        Self {
            session_id: outcome.session_id.clone(),
            unit_id: outcome.unit_id.clone(),
            source: outcome.source.clone(),
            termination: outcome.termination,
            iterations: outcome.iterations,
            metric: outcome.metric,
            target_coverage: outcome.target_coverage,
            target_met: best_metric >= outcome.target_coverage,
            prediction: outcome.initial_prediction,
            final_status: outcome.final_record.status,
            final_coverage: CoverageFigures::of(&outcome.final_record),
            best_coverage: CoverageFigures::of(&outcome.best_record),
            best_metric,
            failure_counts,
            outcomes: outcome.outcomes.clone(),
            warnings: outcome.warnings.clone(),
            accepted_tests: outcome.accepted_tests.iter().map(|t| t.name.clone()).collect(),
            tests_dir: None,
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// A source file that could not be improved at all
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitError {
    pub source: PathBuf,
    pub message: String,
}

/// Aggregate view over every session of a project run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub sessions: Vec<SessionReport>,
    pub errors: Vec<UnitError>,
    /// Sums over each unit's best record
    pub lines: Counts,
    pub branches: Counts,
    pub functions: Counts,
    pub terminations: BTreeMap<String, usize>,
    pub failure_counts: BTreeMap<String, usize>,
    pub units_meeting_target: usize,
}

impl ProjectSummary {
    /// Fold session reports; sessions are ordered by source path
    pub fn from_sessions(mut sessions: Vec<SessionReport>, errors: Vec<UnitError>) -> Self {
        sessions.sort_by(|a, b| a.source.cmp(&b.source));

        let mut summary = Self {
            errors,
            ..Self::default()
        };
        for session in &sessions {
            summary.lines.add(session.best_coverage.lines);
            summary.branches.add(session.best_coverage.branches);
            summary.functions.add(session.best_coverage.functions);
            *summary
                .terminations
                .entry(session.termination.as_str().to_string())
                .or_insert(0) += 1;
            for (kind, count) in &session.failure_counts {
                *summary.failure_counts.entry(kind.clone()).or_insert(0) += count;
            }
            if session.target_met {
                summary.units_meeting_target += 1;
            }
        }
        summary.sessions = sessions;
        summary
    }

    pub fn line_coverage_percent(&self) -> f64 {
        self.lines.percent()
    }

    pub fn branch_coverage_percent(&self) -> f64 {
        self.branches.percent()
    }

    pub fn function_coverage_percent(&self) -> f64 {
        self.functions.percent()
    }

    /// Whether every unit could at least be attempted
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structure and cold-start prediction for one function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionAnalysis {
    pub name: String,
    pub line: usize,
    pub complexity: u32,
    pub branch_sites: usize,
    pub boundaries: usize,
    pub params: usize,
    pub prediction: Prediction,
}

/// Result of analyzing a unit without building it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitAnalysis {
    pub unit_id: String,
    pub source: PathBuf,
    pub header: Option<PathBuf>,
    pub target_type: String,
    pub dependencies: Vec<String>,
    pub functions: Vec<FunctionAnalysis>,
    pub prediction: Prediction,
}

impl UnitAnalysis {
    pub fn new(unit: &SourceUnit, predictor: &dyn CoveragePredictor) -> Self {
        let functions = unit
            .functions
            .iter()
            .map(|function| FunctionAnalysis {
                name: function.qualified_name(),
                line: function.span.start,
                complexity: function.complexity,
                branch_sites: function.branch_sites.len(),
                boundaries: function.boundaries.len(),
                params: function.params.len(),
                prediction: predictor.predict(&StructuralFeatures::from_function(function)),
            })
            .collect();
        Self {
            unit_id: unit.unit_id(),
            source: unit.path.clone(),
            header: unit.header.clone(),
            target_type: unit.target_type.clone(),
            dependencies: unit
                .dependencies
                .iter()
                .map(|d| d.type_name.clone())
                .collect(),
            functions,
            prediction: predictor.predict_unit(unit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bayesian::BayesianPredictor;
    use crate::detectors::gaps::Strategy;
    use crate::lang::common::fixtures::{function, unit};
    use approx::assert_relative_eq;

    fn record(lines: (usize, usize), status: BuildStatus) -> CoverageRecord {
        let mut record = CoverageRecord::empty("Program-1", 1);
        record.status = status;
        record.lines = Counts::new(lines.0, lines.1);
        record
    }

    fn outcome(source: &str, best: (usize, usize), termination: TerminationReason) -> SessionOutcome {
        let now = Utc::now();
        SessionOutcome {
            session_id: "s".to_string(),
            unit_id: "Program-1".to_string(),
            source: PathBuf::from(source),
            metric: CoverageMetric::Line,
            target_coverage: 80.0,
            initial_prediction: Prediction {
                coverage: 90.0,
                confidence: 0.2,
                samples: 0,
            },
            final_record: record(best, BuildStatus::Passed),
            best_record: record(best, BuildStatus::Passed),
            outcomes: vec![StrategyOutcome {
                unit_id: "Program-1".to_string(),
                iteration: 1,
                strategy: Strategy::Branch,
                function: "Program::run".to_string(),
                delta: 0.0,
                coverage_after: 0.0,
                accepted: false,
                failure: Some(IterationFailure::CompileFailed {
                    summary: "error".to_string(),
                }),
                recorded_at: now,
            }],
            warnings: vec![IterationFailure::MockIncomplete {
                dependency: "Logger".to_string(),
                reason: "header not found".to_string(),
            }],
            accepted_tests: Vec::new(),
            iterations: 1,
            termination,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn session_report_counts_failures_by_kind() {
        let report = SessionReport::from_outcome(&outcome("a.cpp", (9, 10), TerminationReason::TargetReached));
        assert_eq!(report.failure_counts.get("compile_failed"), Some(&1));
        assert_eq!(report.failure_counts.get("mock_incomplete"), Some(&1));
        assert!(report.target_met);
        assert_relative_eq!(report.best_metric, 90.0);
    }

    #[test]
    fn project_summary_sums_best_records() {
        let sessions = vec![
            SessionReport::from_outcome(&outcome("b.cpp", (1, 4), TerminationReason::MaxIterations)),
            SessionReport::from_outcome(&outcome("a.cpp", (3, 4), TerminationReason::TargetReached)),
        ];
        let summary = ProjectSummary::from_sessions(sessions, Vec::new());

        assert_eq!(summary.sessions[0].source, PathBuf::from("a.cpp"));
        assert_eq!(summary.lines, Counts::new(4, 8));
        assert_relative_eq!(summary.line_coverage_percent(), 50.0);
        assert_eq!(summary.terminations.get("max_iterations"), Some(&1));
        assert_eq!(summary.failure_counts.get("compile_failed"), Some(&2));
        assert_eq!(summary.units_meeting_target, 0);
        assert!(summary.is_complete());
    }

    #[test]
    fn unit_analysis_lists_functions_with_predictions() {
        let mut busy = function("busy", None, 10, 40);
        busy.complexity = 8;
        let source = unit(vec![function("run", Some("Program"), 1, 5), busy]);
        let analysis = UnitAnalysis::new(&source, &BayesianPredictor::default());

        assert_eq!(analysis.functions.len(), 2);
        assert_relative_eq!(analysis.functions[0].prediction.coverage, 100.0);
        assert!(analysis.functions[1].prediction.coverage < 100.0);
        assert!(analysis.prediction.coverage < 100.0);
    }
}
