//! In-process toolchain double for runner and loop tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CompileOutcome, CompileRequest, RunOutcome, Toolchain};
use crate::core::errors::Result;
use crate::detectors::coverage::{BuildStatus, FileCoverage, RawCoverage};

/// What one scripted build produces
#[derive(Debug, Clone)]
pub enum ScriptedBuild {
    CompileError(String),
    Run { status: BuildStatus, raw: RawCoverage },
}

impl ScriptedBuild {
    /// A passing run with the given line hits for `Program.cpp`
    pub fn passing(lines: &[(usize, u64)]) -> Self {
        Self::run(BuildStatus::Passed, lines)
    }

    pub fn run(status: BuildStatus, lines: &[(usize, u64)]) -> Self {
        let mut file = FileCoverage::new("Program.cpp");
        file.lines.extend(lines.iter().copied());
        let mut raw = RawCoverage::default();
        raw.insert(file);
        Self::Run { status, raw }
    }
}

/// Replays [`ScriptedBuild`]s in order, one per compile call
#[derive(Debug, Default)]
pub struct ScriptedToolchain {
    script: Mutex<VecDeque<ScriptedBuild>>,
    current: Mutex<Option<(BuildStatus, RawCoverage)>>,
    compiled: Mutex<Vec<CompileRequest>>,
}

impl ScriptedToolchain {
    pub fn new(script: impl IntoIterator<Item = ScriptedBuild>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every compile request seen so far
    pub fn requests(&self) -> Vec<CompileRequest> {
        self.compiled.lock().clone()
    }
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn compile(&self, request: &CompileRequest) -> Result<CompileOutcome> {
        self.compiled.lock().push(request.clone());
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedBuild::CompileError("script exhausted".to_string()));
        match step {
            ScriptedBuild::CompileError(errors) => Ok(CompileOutcome::Failed { errors }),
            ScriptedBuild::Run { status, raw } => {
                *self.current.lock() = Some((status, raw));
                Ok(CompileOutcome::Binary(request.output.clone()))
            }
        }
    }

    async fn run(&self, _binary: &Path, _workdir: &Path, _timeout: Duration) -> Result<RunOutcome> {
        let status = self
            .current
            .lock()
            .as_ref()
            .map_or(BuildStatus::Crashed, |(status, _)| *status);
        Ok(RunOutcome {
            status: Some(status),
            exit_code: (status == BuildStatus::Passed).then_some(0),
            signal: (status == BuildStatus::Crashed).then_some(11),
            ..RunOutcome::default()
        })
    }

    async fn collect(&self, _build_dir: &Path, _sources: &[PathBuf]) -> Result<RawCoverage> {
        Ok(self
            .current
            .lock()
            .take()
            .map(|(_, raw)| raw)
            .unwrap_or_default())
    }
}
