//! Main coverage engine implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::results::{ProjectSummary, SessionReport, UnitAnalysis, UnitError};
use crate::core::bayesian::BayesianPredictor;
use crate::core::config::CovforgeConfig;
use crate::core::errors::{CovforgeError, Result};
use crate::core::pipeline::{ImprovementLoop, LoopServices, ProgressCallback};
use crate::generator::{OllamaGenerator, TestGenerator};
use crate::io::journal::OutcomeJournal;
use crate::io::reports::{self, SESSION_STEM, SUMMARY_STEM};
use crate::isolation::{purge_dir, IsolationBuilder};
use crate::lang::common::StructureProvider;
use crate::lang::cpp::CppStructureProvider;
use crate::toolchain::{GccToolchain, MeasureRunner, Toolchain};

/// Runs improvement sessions over a set of C++ source files
pub struct CoverageEngine {
    config: Arc<CovforgeConfig>,
    provider: Arc<CppStructureProvider>,
    toolchain: Arc<dyn Toolchain>,
    generator: Arc<dyn TestGenerator>,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl CoverageEngine {
    /// Create an engine with explicit toolchain and generator.
    ///
    /// The configuration is validated here; an invalid one never reaches a
    /// session.
    pub fn new(
        config: CovforgeConfig,
        toolchain: Arc<dyn Toolchain>,
        generator: Arc<dyn TestGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        let provider = Arc::new(CppStructureProvider::new(
            config.toolchain.include_roots.clone(),
        ));
        Ok(Self {
            config: Arc::new(config),
            provider,
            toolchain,
            generator,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    /// Create an engine backed by g++/gcov and the configured Ollama endpoint
    pub fn with_defaults(config: CovforgeConfig) -> Result<Self> {
        config.validate()?;
        let toolchain = Arc::new(GccToolchain::new(config.toolchain.clone()));
        let generator = Arc::new(OllamaGenerator::new(config.generator.clone())?);
        Self::new(config, toolchain, generator)
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &CovforgeConfig {
        &self.config
    }

    /// Token that stops every running session between iterations
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Parse a unit and predict its coverage without building anything
    pub fn analyze(&self, path: &Path) -> Result<UnitAnalysis> {
        let unit = self.provider.analyze(path)?;
        let predictor = BayesianPredictor::from_plateau_config(&self.config.plateau);
        Ok(UnitAnalysis::new(&unit, &predictor))
    }

    /// Improve every file in `sources`, at most
    /// `performance.max_parallel_units` at a time.
    ///
    /// A file that cannot be parsed is reported in the summary's errors; it
    /// does not stop the other sessions.
    pub async fn run_project(&self, sources: &[PathBuf]) -> Result<ProjectSummary> {
        let io = &self.config.io;
        let units_root = io.output_dir.join("units");
        if io.clean_output_before_run {
            purge_dir(&units_root).await?;
        }

        let journal = Arc::new(OutcomeJournal::open(io.journal_path())?);
        let services = LoopServices {
            isolation: Arc::new(IsolationBuilder::new(Arc::clone(&self.provider), &units_root)),
            runner: Arc::new(MeasureRunner::new(
                Arc::clone(&self.toolchain),
                &self.config.toolchain,
            )),
            generator: Arc::clone(&self.generator),
            journal: Some(journal),
        };

        info!(
            units = sources.len(),
            parallel = self.config.performance.max_parallel_units,
            toolchain = services.runner.toolchain_name(),
            generator = self.generator.name(),
            "project run started"
        );

        let results: Vec<(PathBuf, Result<SessionReport>)> = stream::iter(sources.iter().cloned())
            .map(|path| {
                let services = services.clone();
                async move {
                    let result = self.run_unit(&path, services).await;
                    (path, result)
                }
            })
            .buffer_unordered(self.config.performance.max_parallel_units.max(1))
            .collect()
            .await;

        let mut sessions = Vec::new();
        let mut errors = Vec::new();
        for (source, result) in results {
            match result {
                Ok(report) => sessions.push(report),
                Err(e) => {
                    error!(source = %source.display(), error = %e, "unit could not be improved");
                    errors.push(UnitError {
                        source,
                        message: e.to_string(),
                    });
                }
            }
        }
        errors.sort_by(|a, b| a.source.cmp(&b.source));

        let summary = ProjectSummary::from_sessions(sessions, errors);
        reports::write_report(&summary, &io.output_dir, SUMMARY_STEM, io.report_format).await?;
        info!(
            sessions = summary.sessions.len(),
            errors = summary.errors.len(),
            line_coverage = summary.line_coverage_percent(),
            "project run finished"
        );
        Ok(summary)
    }

    async fn run_unit(&self, path: &Path, services: LoopServices) -> Result<SessionReport> {
        let unit = self.provider.analyze(path)?;
        if unit.functions.is_empty() {
            return Err(CovforgeError::unsupported(format!(
                "{} defines no functions to test",
                path.display()
            )));
        }
        let unit_dir = services.isolation.unit_dir(&unit);

        let mut session = ImprovementLoop::new(&self.config, services)
            .with_cancellation(self.cancel.child_token());
        if let Some(progress) = &self.progress {
            session = session.with_progress(Arc::clone(progress));
        }
        let outcome = session.run(&unit).await?;

        let mut report = SessionReport::from_outcome(&outcome);
        if !outcome.accepted_tests.is_empty() {
            let tests_dir = unit_dir.join("tests");
            match reports::write_tests(&tests_dir, &outcome.accepted_tests).await {
                Ok(_) => report.tests_dir = Some(tests_dir),
                Err(e) => warn!(unit = %outcome.unit_id, error = %e, "failed to write accepted tests"),
            }
        }
        if let Err(e) =
            reports::write_report(&report, &unit_dir, SESSION_STEM, self.config.io.report_format).await
        {
            warn!(unit = %outcome.unit_id, error = %e, "failed to write session report");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;
    use tempfile::TempDir;

    fn engine(output: &Path) -> CoverageEngine {
        let mut config = CovforgeConfig::default();
        config.io.output_dir = output.to_path_buf();
        CoverageEngine::new(
            config,
            Arc::new(GccToolchain::new(Default::default())),
            Arc::new(ScriptedGenerator::default()),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = CovforgeConfig::default();
        config.session.target_coverage = 140.0;
        let result = CoverageEngine::new(
            config,
            Arc::new(GccToolchain::new(Default::default())),
            Arc::new(ScriptedGenerator::default()),
        );
        assert!(matches!(result, Err(CovforgeError::Config { .. })));
    }

    #[test]
    fn analyze_reports_structure_without_building() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("Counter.cpp");
        std::fs::write(
            &source,
            "int Counter::bump(int x) {\n  if (x > 0) {\n    return x + 1;\n  }\n  return 0;\n}\n",
        )
        .unwrap();

        let analysis = engine(&dir.path().join(".covforge")).analyze(&source).unwrap();
        assert_eq!(analysis.functions.len(), 1);
        assert_eq!(analysis.functions[0].name, "Counter::bump");
        assert_eq!(analysis.functions[0].branch_sites, 1);
    }

    #[tokio::test]
    async fn unreadable_sources_become_unit_errors() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join(".covforge");
        let summary = engine(&output)
            .run_project(&[dir.path().join("missing.cpp")])
            .await
            .unwrap();

        assert!(summary.sessions.is_empty());
        assert_eq!(summary.errors.len(), 1);
        assert!(output.join("summary.json").is_file());
    }
}
