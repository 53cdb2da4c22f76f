//! Improvement loop driving one source unit from baseline to termination.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pipeline_results::{IterationFailure, SessionOutcome, StrategyOutcome, TerminationReason};
use super::pipeline_selector::{Selection, StrategySelector};
use super::pipeline_state::{metric_value, IterationState, LoopState};
use crate::core::bayesian::{
    BayesianPredictor, CoveragePredictor, Observation, PlateauDetector, StructuralFeatures,
};
use crate::core::config::{CovforgeConfig, SessionConfig};
use crate::core::errors::{CovforgeError, Result};
use crate::detectors::coverage::CoverageRecord;
use crate::detectors::gaps::{BoundaryKey, GapAnalyzer, GapContext, Strategy};
use crate::generator::{validate_test_source, GenerationRequest, TestGenerator};
use crate::io::journal::OutcomeJournal;
use crate::isolation::{IsolationBuilder, IsolationUnit};
use crate::lang::common::{Function, SourceUnit};
use crate::toolchain::{MeasureRunner, TestCase};

/// Called after the baseline and after every evaluated iteration with the
/// unit id and the current session metric
pub type ProgressCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;

/// Collaborators a session runs against
#[derive(Clone)]
pub struct LoopServices {
    pub isolation: Arc<IsolationBuilder>,
    pub runner: Arc<MeasureRunner>,
    pub generator: Arc<dyn TestGenerator>,
    /// Shared outcome log, if outcomes should be persisted
    pub journal: Option<Arc<OutcomeJournal>>,
}

/// Per-unit improvement session.
///
/// Runs `Idle → Analyzing → Improving → Measuring → Evaluating` until the
/// target is met, every enabled strategy has plateaued, nothing actionable is
/// left, or an iteration, time or cancellation limit is hit. Per-iteration
/// failures are recorded as outcomes and never abort the session.
pub struct ImprovementLoop {
    session: SessionConfig,
    analyzer: GapAnalyzer,
    selector: StrategySelector,
    predictor: Box<dyn CoveragePredictor>,
    plateau: PlateauDetector,
    services: LoopServices,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

/// Mutable data of one running session
struct SessionData {
    state: IterationState,
    current: CoverageRecord,
    best: CoverageRecord,
    accepted: Vec<TestCase>,
    outcomes: Vec<StrategyOutcome>,
    warnings: Vec<IterationFailure>,
    last_compile_errors: Option<String>,
    confirmed_boundaries: BTreeSet<BoundaryKey>,
}

/// Target sources handed to the generator
struct SourceTexts {
    source: String,
    header: Option<String>,
    header_include: Option<String>,
}

impl ImprovementLoop {
    pub fn new(config: &CovforgeConfig, services: LoopServices) -> Self {
        Self {
            session: config.session.clone(),
            analyzer: GapAnalyzer::new(config.strategies.clone()),
            selector: StrategySelector::from_config(config),
            predictor: Box::new(BayesianPredictor::from_plateau_config(&config.plateau)),
            plateau: PlateauDetector::from_config(&config.plateau),
            services,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Replace the default Bayesian predictor
    pub fn with_predictor(mut self, predictor: Box<dyn CoveragePredictor>) -> Self {
        self.predictor = predictor;
        self
    }

    /// Stop between iterations once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run the session to termination.
    ///
    /// Errors are limited to broken loop invariants; every toolchain,
    /// generator and filesystem failure inside an iteration is absorbed.
    pub async fn run(mut self, unit: &SourceUnit) -> Result<SessionOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let session_id = Uuid::new_v4().to_string();
        let unit_id = unit.unit_id();
        let metric = self.session.coverage_metric;
        let initial_prediction = self.predictor.predict_unit(unit);

        info!(
            unit = %unit_id,
            source = %unit.path.display(),
            functions = unit.functions.len(),
            target = self.session.target_coverage,
            predicted = initial_prediction.coverage,
            "improvement session started"
        );

        let empty = CoverageRecord::empty(&unit_id, unit.functions.len());
        let mut data = SessionData {
            state: IterationState::new(self.session.target_coverage),
            current: empty.clone(),
            best: empty,
            accepted: Vec::new(),
            outcomes: Vec::new(),
            warnings: Vec::new(),
            last_compile_errors: None,
            confirmed_boundaries: BTreeSet::new(),
        };

        let termination = if self.cancel.is_cancelled() {
            TerminationReason::Cancelled
        } else {
            let texts = read_sources(unit).await;
            self.baseline(unit, &texts, &mut data).await;
            data.state.transition(LoopState::Analyzing)?;
            self.iterate(unit, &texts, &mut data, clock).await?
        };
        data.state.transition(LoopState::Terminated(termination))?;

        info!(
            unit = %unit_id,
            reason = %termination,
            iterations = data.state.iteration,
            final_coverage = metric_value(metric, &data.current),
            best_coverage = metric_value(metric, &data.best),
            "improvement session terminated"
        );

        Ok(SessionOutcome {
            session_id,
            unit_id,
            source: unit.path.clone(),
            metric,
            target_coverage: self.session.target_coverage,
            initial_prediction,
            final_record: data.current,
            best_record: data.best,
            outcomes: data.outcomes,
            warnings: data.warnings,
            accepted_tests: data.accepted,
            iterations: data.state.iteration,
            termination,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Iteration 0: measure the unit with optional bootstrap tests
    async fn baseline(&mut self, unit: &SourceUnit, texts: &SourceTexts, data: &mut SessionData) {
        let isolation = self.services.isolation.describe(unit, None);
        data.warnings.extend(isolation.warnings.iter().cloned());
        self.materialize(&isolation).await;

        if self.session.bootstrap_tests {
            let tests = self.bootstrap(unit, texts, &isolation, data).await;
            data.accepted = tests;
        }

        let mut record = self.measure(unit, &isolation, &data.accepted, 0).await;
        if !record.status.compiled() && !data.accepted.is_empty() {
            warn!(
                unit = %isolation.unit_id,
                tests = data.accepted.len(),
                "bootstrap tests failed to compile, measuring without them"
            );
            data.warnings.extend(record.failure.clone());
            data.accepted.clear();
            record = self.measure(unit, &isolation, &[], 0).await;
        }
        if !record.status.compiled() {
            data.warnings.extend(record.failure.clone());
        }

        data.last_compile_errors = record.compile_errors.clone();
        data.best = record.clone();
        data.current = record;
        let coverage = metric_value(self.session.coverage_metric, &data.current);
        data.state.record_coverage(coverage);
        self.report_progress(&isolation.unit_id, coverage);
    }

    async fn bootstrap(
        &self,
        unit: &SourceUnit,
        texts: &SourceTexts,
        isolation: &IsolationUnit,
        data: &mut SessionData,
    ) -> Vec<TestCase> {
        let mut tests = Vec::new();
        for function in &unit.functions {
            let request = generation_request(unit, texts, isolation, function, None, Vec::new(), false);
            match self.generate(&request).await {
                Ok(text) => {
                    tests.push(TestCase::new(0, None, &function.qualified_name(), text));
                }
                Err(e) => {
                    debug!(function = %function.qualified_name(), error = %e, "no bootstrap test");
                    data.warnings.push(IterationFailure::GeneratorUnavailable {
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(unit = %isolation.unit_id, tests = tests.len(), "bootstrap tests generated");
        tests
    }

    async fn iterate(
        &mut self,
        unit: &SourceUnit,
        texts: &SourceTexts,
        data: &mut SessionData,
        clock: Instant,
    ) -> Result<TerminationReason> {
        let enabled = self.selector.enabled();
        loop {
            if let Some(reason) = self.stop_reason(&data.state, &enabled, clock) {
                return Ok(reason);
            }

            // Analyzing
            let report = self.analyzer.analyze(
                unit,
                &data.current,
                GapContext {
                    confirmed_boundaries: Some(&data.confirmed_boundaries),
                    compile_errors: data.last_compile_errors.as_deref(),
                },
            );
            data.state.ranking = self.selector.ranking(self.predictor.as_ref(), &self.plateau);
            // target unmet here: an empty or fully gated report falls back to
            // the least-covered function
            let selection = self
                .selector
                .select(&report, self.predictor.as_ref(), &self.plateau)
                .or_else(|| {
                    self.selector
                        .fallback(unit, &data.current, self.predictor.as_ref(), &self.plateau)
                });
            let Some(selection) = selection else {
                debug!(gaps = report.items.len(), "no actionable gap");
                return Ok(if self.plateau.all_plateaued(&enabled) {
                    TerminationReason::AllStrategiesPlateaued
                } else {
                    TerminationReason::NoActionableGaps
                });
            };
            let Some(function) = unit.function(&selection.function) else {
                return Err(CovforgeError::internal(format!(
                    "selected function {} is not part of {}",
                    selection.function,
                    unit.path.display()
                )));
            };

            data.state.iteration += 1;
            let iteration = data.state.iteration;
            info!(
                unit = %data.current.unit_id,
                iteration,
                strategy = %selection.strategy,
                function = %selection.function,
                gaps = selection.gaps.len(),
                confidence = selection.confidence,
                "improving"
            );

            // Improving
            data.state.transition(LoopState::Improving)?;
            let isolation = self.services.isolation.describe(unit, Some(function));
            let request = generation_request(
                unit,
                texts,
                &isolation,
                function,
                Some(selection.strategy),
                selection.gaps.clone(),
                report.needs_simpler_tests,
            );
            let generated = self.generate(&request).await;
            let candidate = match generated {
                Ok(text) => Some(TestCase::new(
                    iteration,
                    Some(selection.strategy),
                    &selection.function,
                    text,
                )),
                Err(e) => {
                    warn!(iteration, error = %e, "generator produced no usable tests");
                    data.state.transition(LoopState::Evaluating)?;
                    self.evaluate(unit, function, &selection, None, Some(e.to_string()), data);
                    None
                }
            };

            // Measuring
            if let Some(candidate) = candidate {
                data.state.transition(LoopState::Measuring)?;
                self.materialize(&isolation).await;
                let mut tests = data.accepted.clone();
                tests.push(candidate.clone());
                let record = self.measure(unit, &isolation, &tests, iteration).await;
                data.state.transition(LoopState::Evaluating)?;
                self.evaluate(unit, function, &selection, Some((record, candidate)), None, data);
            }

            // Evaluating decides
            if let Some(reason) = self.stop_reason(&data.state, &enabled, clock) {
                return Ok(reason);
            }
            data.state.transition(LoopState::Analyzing)?;
        }
    }

    /// Fold one iteration into the session: delta, acceptance, outcome log,
    /// plateau and predictor updates
    fn evaluate(
        &mut self,
        unit: &SourceUnit,
        function: &Function,
        selection: &Selection,
        measured: Option<(CoverageRecord, TestCase)>,
        generator_error: Option<String>,
        data: &mut SessionData,
    ) {
        let metric = self.session.coverage_metric;
        let iteration = data.state.iteration;
        let before = metric_value(metric, &data.current);

        let (delta, accepted, failure, achieved) = match measured {
            None => (
                0.0,
                false,
                Some(IterationFailure::GeneratorUnavailable {
                    reason: generator_error.unwrap_or_else(|| "no tests generated".to_string()),
                }),
                None,
            ),
            Some((record, _)) if !record.status.compiled() => {
                if metric_value(metric, &record) > metric_value(metric, &data.best) {
                    data.best = record.clone();
                }
                data.last_compile_errors = record.compile_errors.clone();
                (0.0, false, record.failure, None)
            }
            Some((record, candidate)) => {
                let after = metric_value(metric, &record);
                let delta = after - before;
                let achieved = Some(record.function_coverage(&selection.function));
                let failure = record.failure.clone();
                if after > metric_value(metric, &data.best) {
                    data.best = record.clone();
                }
                if delta < 0.0 {
                    debug!(iteration, delta, "candidate lowered coverage, rejected");
                    (delta, false, failure, achieved)
                } else {
                    if selection.strategy == Strategy::Boundary {
                        data.confirmed_boundaries.extend(
                            selection
                                .gaps
                                .iter()
                                .map(|g| (g.function.clone(), g.line)),
                        );
                    }
                    data.accepted.push(candidate);
                    data.current = record;
                    data.last_compile_errors = None;
                    (delta, true, failure, achieved)
                }
            }
        };

        let coverage_after = metric_value(metric, &data.current);
        data.state.record_coverage(coverage_after);

        let plateaued = self.plateau.record(selection.strategy, delta);
        data.state.plateau_counter = self.plateau.streak(selection.strategy);
        self.predictor.observe(&Observation {
            strategy: Some(selection.strategy),
            features: StructuralFeatures::from_function(function),
            achieved_coverage: achieved,
            delta,
        });

        let outcome = StrategyOutcome {
            unit_id: unit.unit_id(),
            iteration,
            strategy: selection.strategy,
            function: selection.function.clone(),
            delta,
            coverage_after,
            accepted,
            failure,
            recorded_at: Utc::now(),
        };
        if let Some(journal) = &self.services.journal {
            if let Err(e) = journal.append(&outcome) {
                warn!(error = %e, "failed to journal outcome");
            }
        }
        info!(
            unit = %outcome.unit_id,
            iteration,
            strategy = %selection.strategy,
            delta,
            coverage = coverage_after,
            accepted,
            "iteration evaluated"
        );
        if plateaued {
            info!(
                unit = %outcome.unit_id,
                strategy = %selection.strategy,
                window = self.plateau.window(),
                "strategy plateaued"
            );
        }
        data.outcomes.push(outcome);
        self.report_progress(&data.current.unit_id, coverage_after);
    }

    fn stop_reason(
        &self,
        state: &IterationState,
        enabled: &[Strategy],
        clock: Instant,
    ) -> Option<TerminationReason> {
        if state.target_reached() {
            return Some(TerminationReason::TargetReached);
        }
        if self.plateau.all_plateaued(enabled) {
            return Some(TerminationReason::AllStrategiesPlateaued);
        }
        if state.iteration >= self.session.max_iterations {
            return Some(TerminationReason::MaxIterations);
        }
        if let Some(budget) = self.session.time_budget_secs {
            if clock.elapsed() >= Duration::from_secs(budget) {
                return Some(TerminationReason::TimeBudgetExhausted);
            }
        }
        if self.cancel.is_cancelled() {
            return Some(TerminationReason::Cancelled);
        }
        None
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let text = self.services.generator.generate(request).await?;
        validate_test_source(&text)?;
        Ok(text)
    }

    async fn materialize(&self, isolation: &IsolationUnit) {
        if let Err(e) = self.services.isolation.materialize(isolation).await {
            warn!(unit = %isolation.unit_id, error = %e, "failed to materialize isolation unit");
        }
    }

    async fn measure(
        &self,
        unit: &SourceUnit,
        isolation: &IsolationUnit,
        tests: &[TestCase],
        iteration: usize,
    ) -> CoverageRecord {
        match self
            .services
            .runner
            .measure(unit, isolation, tests, iteration)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(unit = %isolation.unit_id, iteration, error = %e, "measurement failed");
                CoverageRecord::not_compiled(
                    unit.unit_id(),
                    iteration,
                    unit.functions.len(),
                    e.to_string(),
                )
            }
        }
    }

    fn report_progress(&self, unit_id: &str, coverage: f64) {
        if let Some(callback) = &self.progress {
            callback(unit_id, coverage);
        }
    }
}

async fn read_sources(unit: &SourceUnit) -> SourceTexts {
    let source = read_optional(&unit.path).await.unwrap_or_default();
    let header = match &unit.header {
        Some(path) => read_optional(path).await,
        None => None,
    };
    let header_include = unit
        .header
        .as_ref()
        .and_then(|h| h.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    SourceTexts {
        source,
        header,
        header_include,
    }
}

async fn read_optional(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "source not readable, generator gets no text");
            None
        }
    }
}

fn generation_request(
    unit: &SourceUnit,
    texts: &SourceTexts,
    isolation: &IsolationUnit,
    function: &Function,
    strategy: Option<Strategy>,
    gaps: Vec<crate::detectors::gaps::GapItem>,
    prefer_simple: bool,
) -> GenerationRequest {
    GenerationRequest {
        target_type: unit.target_type.clone(),
        header_include: texts.header_include.clone(),
        function: function.clone(),
        strategy,
        gaps,
        prefer_simple,
        mocked_types: isolation.mocks.keys().cloned().collect(),
        source_text: texts.source.clone(),
        header_text: texts.header.clone(),
    }
}

#[cfg(test)]
#[path = "pipeline_executor_tests.rs"]
mod tests;
