use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::pipeline::IterationFailure;

/// Coverage artifact format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageFormat {
    /// `.gcov` text produced by `gcov`
    Gcov,
    /// LCOV tracefile
    Lcov,
    /// Cobertura XML (as written by gcovr)
    Cobertura,
    Unknown,
}

/// Executed-function record from a coverage artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionHits {
    pub line: usize,
    pub calls: u64,
}

/// Raw per-file execution data, before it is mapped onto functions.
///
/// `branches` holds one entry per branch on a line, in the order the tool
/// reports them; `None` means the branch's block was never executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: PathBuf,
    pub lines: BTreeMap<usize, u64>,
    pub branches: BTreeMap<usize, Vec<Option<u64>>>,
    pub functions: BTreeMap<String, FunctionHits>,
}

impl FileCoverage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Fold another report for the same file into this one, keeping the larger count per entry
    pub fn merge(&mut self, other: FileCoverage) {
        for (line, hits) in other.lines {
            self.lines
                .entry(line)
                .and_modify(|existing| *existing = (*existing).max(hits))
                .or_insert(hits);
        }
        for (line, branches) in other.branches {
            let entry = self.branches.entry(line).or_default();
            if entry.len() < branches.len() {
                entry.resize(branches.len(), None);
            }
            for (slot, taken) in entry.iter_mut().zip(branches) {
                *slot = match (*slot, taken) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
        }
        for (name, hits) in other.functions {
            self.functions
                .entry(name)
                .and_modify(|existing| existing.calls = existing.calls.max(hits.calls))
                .or_insert(hits);
        }
    }
}

/// All files found in one measurement pass, keyed by normalised path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCoverage {
    pub files: BTreeMap<PathBuf, FileCoverage>,
}

impl RawCoverage {
    pub fn insert(&mut self, file: FileCoverage) {
        match self.files.get_mut(&file.path) {
            Some(existing) => existing.merge(file),
            None => {
                self.files.insert(file.path.clone(), file);
            }
        }
    }

    /// Coverage for `source`, matched by full path, then by path suffix, then by file name.
    pub fn file_for(&self, source: &Path) -> Option<&FileCoverage> {
        if let Some(exact) = self.files.get(source) {
            return Some(exact);
        }
        if let Some(suffix) = self
            .files
            .values()
            .find(|f| f.path.ends_with(source) || source.ends_with(&f.path))
        {
            return Some(suffix);
        }
        let name = source.file_name()?;
        self.files
            .values()
            .find(|f| f.path.file_name() == Some(name))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Covered/total pair. `covered <= total` holds for every value built through this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub covered: usize,
    pub total: usize,
}

impl Counts {
    pub fn new(covered: usize, total: usize) -> Self {
        Self {
            covered: covered.min(total),
            total,
        }
    }

    /// Percentage in [0, 100]; zero when there is nothing to cover
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.covered as f64 * 100.0 / self.total as f64
        }
    }

    pub fn add(&mut self, other: Counts) {
        self.covered += other.covered;
        self.total += other.total;
    }
}

/// Outcome of building and running an isolation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// The test binary could not be built
    NotCompiled,
    /// Built, ran, all tests passed
    Passed,
    /// Built and ran to completion with failing assertions
    TestsFailed,
    /// Terminated by a signal or abnormal exit
    Crashed,
    /// Killed after exceeding the run timeout
    TimedOut,
}

impl BuildStatus {
    pub fn compiled(self) -> bool {
        !matches!(self, Self::NotCompiled)
    }

    /// Ran to completion, with or without failing tests
    pub fn completed(self) -> bool {
        matches!(self, Self::Passed | Self::TestsFailed)
    }

    pub fn crashed_or_timed_out(self) -> bool {
        matches!(self, Self::Crashed | Self::TimedOut)
    }
}

/// Coverage of one function of the unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCoverage {
    pub lines: Counts,
    pub branches: Counts,
    pub executed: bool,
}

impl FunctionCoverage {
    pub fn percent(&self) -> f64 {
        self.lines.percent()
    }
}

/// Result of one build-run-measure pass over an isolation unit.
///
/// Records are never mutated after construction; each pass produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub unit_id: String,
    pub iteration: usize,
    pub status: BuildStatus,
    pub lines: Counts,
    pub branches: Counts,
    pub functions: Counts,
    /// Hit count per executable line of the target source
    pub line_hits: BTreeMap<usize, u64>,
    /// Taken / not-taken flag per branch, grouped by line
    pub branch_taken: BTreeMap<usize, Vec<bool>>,
    /// Keyed by qualified function name
    pub per_function: BTreeMap<String, FunctionCoverage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_errors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<IterationFailure>,
}

impl CoverageRecord {
    /// Zero-coverage record for a build that produced no binary
    pub fn not_compiled(
        unit_id: impl Into<String>,
        iteration: usize,
        function_total: usize,
        errors: impl Into<String>,
    ) -> Self {
        let errors = errors.into();
        Self {
            unit_id: unit_id.into(),
            iteration,
            status: BuildStatus::NotCompiled,
            lines: Counts::default(),
            branches: Counts::default(),
            functions: Counts::new(0, function_total),
            line_hits: BTreeMap::new(),
            branch_taken: BTreeMap::new(),
            per_function: BTreeMap::new(),
            failure: Some(IterationFailure::CompileFailed {
                summary: IterationFailure::summarize(&errors),
            }),
            compile_errors: Some(errors),
        }
    }

    /// Empty record used before any measurement exists
    pub fn empty(unit_id: impl Into<String>, function_total: usize) -> Self {
        Self {
            unit_id: unit_id.into(),
            iteration: 0,
            status: BuildStatus::NotCompiled,
            lines: Counts::default(),
            branches: Counts::default(),
            functions: Counts::new(0, function_total),
            line_hits: BTreeMap::new(),
            branch_taken: BTreeMap::new(),
            per_function: BTreeMap::new(),
            compile_errors: None,
            failure: None,
        }
    }

    pub fn line_percent(&self) -> f64 {
        self.lines.percent()
    }

    pub fn branch_percent(&self) -> f64 {
        self.branches.percent()
    }

    pub fn function_percent(&self) -> f64 {
        self.functions.percent()
    }

    /// Line coverage of a function; zero when the function never ran
    pub fn function_coverage(&self, qualified_name: &str) -> f64 {
        self.per_function
            .get(qualified_name)
            .map_or(0.0, FunctionCoverage::percent)
    }

    pub fn hits(&self, line: usize) -> Option<u64> {
        self.line_hits.get(&line).copied()
    }

    /// Whether `line` is executable and ran at least once
    pub fn executed(&self, line: usize) -> bool {
        self.hits(line).is_some_and(|h| h > 0)
    }
}
