//! Build-and-measure runner.
//!
//! [`Toolchain`] is the process boundary: compile sources with coverage
//! instrumentation, run the resulting binary under a timeout, and collect raw
//! execution counts. [`MeasureRunner`] drives one measurement pass over an
//! isolation unit and folds every outcome, failures included, into a
//! [`CoverageRecord`].

pub mod gcc;

pub use gcc::GccToolchain;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::ToolchainConfig;
use crate::core::errors::{CovforgeError, Result};
use crate::core::pipeline::IterationFailure;
use crate::detectors::coverage::{rollup, BuildStatus, CoverageRecord, RawCoverage};
use crate::detectors::gaps::Strategy;
use crate::isolation::IsolationUnit;
use crate::lang::common::SourceUnit;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

/// Name of the instrumented test binary inside the build directory
pub const TEST_BINARY: &str = "covforge_tests";

/// Inputs to one compile-and-link step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub sources: Vec<PathBuf>,
    /// Search path in precedence order
    pub include_dirs: Vec<PathBuf>,
    /// Directory receiving objects, notes files and the binary
    pub build_dir: PathBuf,
    pub output: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Binary(PathBuf),
    Failed { errors: String },
}

/// Result of executing a test binary
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutcome {
    pub status: Option<BuildStatus>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutcome {
    pub fn status(&self) -> BuildStatus {
        self.status.unwrap_or(BuildStatus::Crashed)
    }
}

/// Compiler and coverage tooling
#[async_trait]
pub trait Toolchain: Send + Sync {
    fn name(&self) -> &str;

    async fn compile(&self, request: &CompileRequest) -> Result<CompileOutcome>;

    /// Run `binary` in `workdir`, killing it once `timeout` elapses
    async fn run(&self, binary: &Path, workdir: &Path, timeout: Duration) -> Result<RunOutcome>;

    /// Collect execution counts for `sources` from artifacts in `build_dir`
    async fn collect(&self, build_dir: &Path, sources: &[PathBuf]) -> Result<RawCoverage>;
}

/// One generated gtest source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// File stem, unique within a session
    pub name: String,
    pub source: String,
    /// Strategy that produced the test, `None` for baseline tests
    pub strategy: Option<Strategy>,
    pub iteration: usize,
}

impl TestCase {
    pub fn new(
        iteration: usize,
        strategy: Option<Strategy>,
        function: &str,
        source: impl Into<String>,
    ) -> Self {
        let tag = strategy.map_or("baseline", Strategy::as_str);
        let ident: String = function
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self {
            name: format!("test_{iteration:03}_{tag}_{ident}"),
            source: source.into(),
            strategy,
            iteration,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.cpp", self.name)
    }
}

/// Compiles, runs and measures isolation units
pub struct MeasureRunner {
    toolchain: Arc<dyn Toolchain>,
    include_roots: Vec<PathBuf>,
    compile_timeout: Duration,
    run_timeout: Duration,
}

impl MeasureRunner {
    pub fn new(toolchain: Arc<dyn Toolchain>, config: &ToolchainConfig) -> Self {
        Self {
            toolchain,
            include_roots: config.include_roots.clone(),
            compile_timeout: Duration::from_secs(config.compile_timeout_secs),
            run_timeout: Duration::from_secs(config.run_timeout_secs),
        }
    }

    pub fn toolchain_name(&self) -> &str {
        self.toolchain.name()
    }

    /// Measure `tests` against the materialized `isolation` unit.
    ///
    /// Compile failures, crashes and timeouts come back as records, not
    /// errors. Only filesystem problems in the build directory are errors.
    pub async fn measure(
        &self,
        unit: &SourceUnit,
        isolation: &IsolationUnit,
        tests: &[TestCase],
        iteration: usize,
    ) -> Result<CoverageRecord> {
        let build_dir = isolation.build_dir();
        crate::isolation::purge_dir(&build_dir).await?;

        let mut sources = vec![isolation.staged_source()];
        for test in tests {
            let path = build_dir.join(test.file_name());
            tokio::fs::write(&path, &test.source).await.map_err(|e| {
                CovforgeError::io(format!("Failed to write test {}", path.display()), e)
            })?;
            sources.push(path);
        }

        let request = CompileRequest {
            sources,
            include_dirs: isolation.include_dirs(&self.include_roots),
            output: build_dir.join(TEST_BINARY),
            build_dir: build_dir.clone(),
            timeout: self.compile_timeout,
        };

        let binary = match self.toolchain.compile(&request).await {
            Ok(CompileOutcome::Binary(binary)) => binary,
            Ok(CompileOutcome::Failed { errors }) => {
                info!(unit = %isolation.unit_id, iteration, "compilation failed");
                return Ok(CoverageRecord::not_compiled(
                    &isolation.unit_id,
                    iteration,
                    unit.functions.len(),
                    errors,
                ));
            }
            Err(e) => {
                warn!(unit = %isolation.unit_id, iteration, error = %e, "compiler invocation failed");
                return Ok(CoverageRecord::not_compiled(
                    &isolation.unit_id,
                    iteration,
                    unit.functions.len(),
                    e.to_string(),
                ));
            }
        };

        let run = match self.toolchain.run(&binary, &build_dir, self.run_timeout).await {
            Ok(run) => run,
            Err(e) => {
                warn!(unit = %isolation.unit_id, iteration, error = %e, "test binary could not run");
                RunOutcome {
                    stderr: e.to_string(),
                    ..RunOutcome::default()
                }
            }
        };
        let status = run.status();
        let failure = match status {
            BuildStatus::Crashed => Some(IterationFailure::RuntimeCrashed {
                exit_code: run.exit_code,
                signal: run.signal,
            }),
            BuildStatus::TimedOut => Some(IterationFailure::RuntimeTimedOut {
                timeout_secs: self.run_timeout.as_secs(),
            }),
            _ => None,
        };

        // Whatever the binary flushed before dying still counts
        let raw = match self
            .toolchain
            .collect(&build_dir, &[isolation.staged_source()])
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(unit = %isolation.unit_id, iteration, error = %e, "coverage collection failed");
                RawCoverage::default()
            }
        };

        let record = rollup(unit, &raw, status, iteration, failure);
        debug!(
            unit = %isolation.unit_id,
            iteration,
            status = ?status,
            lines = %format!("{}/{}", record.lines.covered, record.lines.total),
            branches = %format!("{}/{}", record.branches.covered, record.branches.total),
            "measurement complete"
        );
        Ok(record)
    }
}
