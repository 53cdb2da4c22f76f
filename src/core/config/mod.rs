//! Configuration types and management for covforge.
//!
//! Every section and field carries a serde default, so a partial YAML file
//! (or none at all) yields a runnable configuration. [`CovforgeConfig::validate`]
//! is the single gate that must pass before a session is allowed to start.

pub mod validation;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{CovforgeError, Result};
use crate::detectors::gaps::Strategy;

pub use validation::{
    validate_non_empty, validate_non_negative, validate_percentage, validate_positive_u64,
    validate_positive_usize, validate_unit_range,
};

/// File name looked for in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = ".covforge.yml";

/// Main configuration for the covforge improvement engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CovforgeConfig {
    /// Per-session loop limits and targets
    #[serde(default)]
    pub session: SessionConfig,

    /// Gap strategy switches and weights
    #[serde(default)]
    pub strategies: StrategyConfig,

    /// Plateau detection parameters
    #[serde(default)]
    pub plateau: PlateauConfig,

    /// Compiler and coverage tool settings
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// External test generator settings
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Output locations and report format
    #[serde(default)]
    pub io: IoConfig,

    /// Parallelism limits
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// Configuration construction and I/O methods for [`CovforgeConfig`].
impl CovforgeConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            CovforgeError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            CovforgeError::config(format!("Invalid config file {}: {e}", path.display()))
        })
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| {
            CovforgeError::io(
                format!("Failed to write config file: {}", path.display()),
                e,
            )
        })
    }

    /// Look for [`DEFAULT_CONFIG_FILE`] in `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        candidate.is_file().then_some(candidate)
    }

    /// Validate configuration settings.
    ///
    /// Any failure is reported as [`CovforgeError::Config`] naming the
    /// offending section.
    pub fn validate(&self) -> Result<()> {
        let sections: [(&str, Result<()>); 7] = [
            ("session", self.session.validate()),
            ("strategies", self.strategies.validate()),
            ("plateau", self.plateau.validate()),
            ("toolchain", self.toolchain.validate()),
            ("generator", self.generator.validate()),
            ("io", self.io.validate()),
            ("performance", self.performance.validate()),
        ];

        for (section, outcome) in sections {
            outcome.map_err(|e| match e {
                CovforgeError::Validation { message, .. } => {
                    CovforgeError::config_field(message, section)
                }
                other => other,
            })?;
        }

        if !Strategy::ALL.iter().any(|s| self.strategies.is_enabled(*s)) {
            return Err(CovforgeError::config_field(
                "at least one strategy must be enabled",
                "strategies",
            ));
        }

        Ok(())
    }
}

/// Which coverage figure the session target is measured against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMetric {
    /// Line coverage percentage
    #[default]
    Line,
    /// Branch coverage percentage
    Branch,
    /// Function coverage percentage
    Function,
}

/// Limits and targets for a single improvement session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Coverage percentage at which the session stops
    #[serde(default = "SessionConfig::default_target_coverage")]
    pub target_coverage: f64,

    /// Hard cap on improvement iterations
    #[serde(default = "SessionConfig::default_max_iterations")]
    pub max_iterations: usize,

    /// Minimum strategy confidence for a gap to be acted upon
    #[serde(default = "SessionConfig::default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Metric compared against `target_coverage`
    #[serde(default)]
    pub coverage_metric: CoverageMetric,

    /// Wall-clock budget for one session
    #[serde(default)]
    pub time_budget_secs: Option<u64>,

    /// Generate one baseline test per function before the first analysis
    #[serde(default = "SessionConfig::default_bootstrap_tests")]
    pub bootstrap_tests: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_coverage: Self::default_target_coverage(),
            max_iterations: Self::default_max_iterations(),
            confidence_threshold: Self::default_confidence_threshold(),
            coverage_metric: CoverageMetric::default(),
            time_budget_secs: None,
            bootstrap_tests: Self::default_bootstrap_tests(),
        }
    }
}

impl SessionConfig {
    const fn default_target_coverage() -> f64 {
        80.0
    }

    const fn default_max_iterations() -> usize {
        10
    }

    const fn default_confidence_threshold() -> f64 {
        0.3
    }

    const fn default_bootstrap_tests() -> bool {
        true
    }

    /// Validate session configuration
    pub fn validate(&self) -> Result<()> {
        validate_percentage(self.target_coverage, "target_coverage")?;
        validate_positive_usize(self.max_iterations, "max_iterations")?;
        validate_unit_range(self.confidence_threshold, "confidence_threshold")?;
        if let Some(budget) = self.time_budget_secs {
            validate_positive_u64(budget, "time_budget_secs")?;
        }
        Ok(())
    }
}

/// Per-strategy relative weights applied to gap impact scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyWeights {
    /// Weight of branch gaps
    #[serde(default = "StrategyWeights::default_branch")]
    pub branch: f64,
    /// Weight of path gaps
    #[serde(default = "StrategyWeights::default_path")]
    pub path: f64,
    /// Weight of boundary gaps
    #[serde(default = "StrategyWeights::default_boundary")]
    pub boundary: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            branch: Self::default_branch(),
            path: Self::default_path(),
            boundary: Self::default_boundary(),
        }
    }
}

impl StrategyWeights {
    const fn default_branch() -> f64 {
        1.0
    }

    const fn default_path() -> f64 {
        0.9
    }

    const fn default_boundary() -> f64 {
        0.5
    }
}

/// Gap strategy switches and tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Enable branch gap analysis
    #[serde(default = "StrategyConfig::default_enabled")]
    pub branch: bool,

    /// Enable path gap analysis
    #[serde(default = "StrategyConfig::default_enabled")]
    pub path: bool,

    /// Enable boundary gap analysis
    #[serde(default = "StrategyConfig::default_enabled")]
    pub boundary: bool,

    /// Functions above this cyclomatic complexity get a path gap
    #[serde(default = "StrategyConfig::default_path_complexity_threshold")]
    pub path_complexity_threshold: u32,

    /// Maximum number of gaps sent to the generator per request
    #[serde(default = "StrategyConfig::default_max_gaps_per_request")]
    pub max_gaps_per_request: usize,

    /// Relative strategy weights
    #[serde(default)]
    pub weights: StrategyWeights,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            branch: true,
            path: true,
            boundary: true,
            path_complexity_threshold: Self::default_path_complexity_threshold(),
            max_gaps_per_request: Self::default_max_gaps_per_request(),
            weights: StrategyWeights::default(),
        }
    }
}

impl StrategyConfig {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_path_complexity_threshold() -> u32 {
        4
    }

    const fn default_max_gaps_per_request() -> usize {
        5
    }

    /// Whether a strategy is switched on
    pub fn is_enabled(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::Branch => self.branch,
            Strategy::Path => self.path,
            Strategy::Boundary => self.boundary,
        }
    }

    /// Configured weight of a strategy
    pub fn weight(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Branch => self.weights.branch,
            Strategy::Path => self.weights.path,
            Strategy::Boundary => self.weights.boundary,
        }
    }

    /// Validate strategy configuration
    pub fn validate(&self) -> Result<()> {
        validate_positive_usize(self.max_gaps_per_request, "max_gaps_per_request")?;
        validate_non_negative(self.weights.branch, "weights.branch")?;
        validate_non_negative(self.weights.path, "weights.path")?;
        validate_non_negative(self.weights.boundary, "weights.boundary")?;
        Ok(())
    }
}

/// Plateau detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Number of consecutive low-gain iterations that mark a plateau
    #[serde(default = "PlateauConfig::default_window")]
    pub window: usize,

    /// Gain (percentage points) below which an iteration counts as low-gain
    #[serde(default = "PlateauConfig::default_delta_threshold")]
    pub delta_threshold: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            window: Self::default_window(),
            delta_threshold: Self::default_delta_threshold(),
        }
    }
}

impl PlateauConfig {
    const fn default_window() -> usize {
        3
    }

    const fn default_delta_threshold() -> f64 {
        0.5
    }

    /// Validate plateau configuration
    pub fn validate(&self) -> Result<()> {
        validate_positive_usize(self.window, "window")?;
        validate_non_negative(self.delta_threshold, "delta_threshold")?;
        Ok(())
    }
}

/// Compiler and coverage tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// C++ compiler driver
    #[serde(default = "ToolchainConfig::default_compiler")]
    pub compiler: String,

    /// gcov executable
    #[serde(default = "ToolchainConfig::default_gcov")]
    pub gcov: String,

    /// Language standard passed as `-std=`
    #[serde(default = "ToolchainConfig::default_std")]
    pub std: String,

    /// Extra compiler flags appended after the coverage flags
    #[serde(default)]
    pub flags: Vec<String>,

    /// Directory holding the gtest headers, when not on the default path
    #[serde(default)]
    pub gtest_include: Option<PathBuf>,

    /// Linker arguments for gtest
    #[serde(default = "ToolchainConfig::default_gtest_libs")]
    pub gtest_libs: Vec<String>,

    /// Project include roots, searched after the mock and target directories
    #[serde(default)]
    pub include_roots: Vec<PathBuf>,

    /// Compilation timeout in seconds
    #[serde(default = "ToolchainConfig::default_compile_timeout_secs")]
    pub compile_timeout_secs: u64,

    /// Test execution timeout in seconds
    #[serde(default = "ToolchainConfig::default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Preprocessor definitions (`NAME` or `NAME=VALUE`)
    #[serde(default)]
    pub defines: Vec<String>,

    /// Tool that turns `.gcda` data into a coverage report
    #[serde(default)]
    pub collector: CoverageCollector,

    /// Executable for the `lcov` and `gcovr` collectors, when not on `PATH`
    /// under its own name
    #[serde(default)]
    pub collector_command: Option<String>,
}

/// Coverage collection backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageCollector {
    /// `gcov --branch-counts`, one `.gcov` file per source
    #[default]
    Gcov,
    /// `lcov --capture` into an LCOV tracefile
    Lcov,
    /// `gcovr --xml` into a Cobertura report
    Gcovr,
}

impl CoverageCollector {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gcov => "gcov",
            Self::Lcov => "lcov",
            Self::Gcovr => "gcovr",
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: Self::default_compiler(),
            gcov: Self::default_gcov(),
            std: Self::default_std(),
            flags: Vec::new(),
            gtest_include: None,
            gtest_libs: Self::default_gtest_libs(),
            include_roots: Vec::new(),
            compile_timeout_secs: Self::default_compile_timeout_secs(),
            run_timeout_secs: Self::default_run_timeout_secs(),
            defines: Vec::new(),
            collector: CoverageCollector::default(),
            collector_command: None,
        }
    }
}

impl ToolchainConfig {
    fn default_compiler() -> String {
        "g++".to_string()
    }

    fn default_gcov() -> String {
        "gcov".to_string()
    }

    fn default_std() -> String {
        "c++17".to_string()
    }

    fn default_gtest_libs() -> Vec<String> {
        vec![
            "-lgtest".to_string(),
            "-lgtest_main".to_string(),
            "-lpthread".to_string(),
        ]
    }

    const fn default_compile_timeout_secs() -> u64 {
        120
    }

    const fn default_run_timeout_secs() -> u64 {
        30
    }

    /// Validate toolchain configuration
    pub fn validate(&self) -> Result<()> {
        validate_non_empty(&self.compiler, "compiler")?;
        validate_non_empty(&self.gcov, "gcov")?;
        validate_non_empty(&self.std, "std")?;
        validate_positive_u64(self.compile_timeout_secs, "compile_timeout_secs")?;
        validate_positive_u64(self.run_timeout_secs, "run_timeout_secs")?;
        if let Some(command) = &self.collector_command {
            validate_non_empty(command, "collector_command")?;
        }
        Ok(())
    }
}

/// External test generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Generation endpoint
    #[serde(default = "GeneratorConfig::default_endpoint")]
    pub endpoint: String,

    /// Model name sent with each request
    #[serde(default = "GeneratorConfig::default_model")]
    pub model: String,

    /// Per-request timeout in seconds
    #[serde(default = "GeneratorConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// When false every generation request reports the generator as unavailable
    #[serde(default = "GeneratorConfig::default_enabled")]
    pub enabled: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            model: Self::default_model(),
            request_timeout_secs: Self::default_request_timeout_secs(),
            enabled: Self::default_enabled(),
        }
    }
}

impl GeneratorConfig {
    fn default_endpoint() -> String {
        "http://localhost:11434/api/generate".to_string()
    }

    fn default_model() -> String {
        "codellama".to_string()
    }

    const fn default_request_timeout_secs() -> u64 {
        120
    }

    const fn default_enabled() -> bool {
        true
    }

    /// Validate generator configuration
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        validate_non_empty(&self.endpoint, "endpoint")?;
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(CovforgeError::validation(
                "endpoint must be an http(s) URL",
            ));
        }
        validate_non_empty(&self.model, "model")?;
        validate_positive_u64(self.request_timeout_secs, "request_timeout_secs")?;
        Ok(())
    }
}

/// Available report formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// JSON format
    #[default]
    Json,
    /// YAML format
    Yaml,
}

/// Output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Root of unit build directories, the journal and reports
    #[serde(default = "IoConfig::default_output_dir")]
    pub output_dir: PathBuf,

    /// Strategy outcome journal file name, relative to `output_dir`
    #[serde(default = "IoConfig::default_journal")]
    pub journal: String,

    /// Remove stale unit directories before a run
    #[serde(default = "IoConfig::default_clean_output_before_run")]
    pub clean_output_before_run: bool,

    /// Format of the persisted project summary
    #[serde(default)]
    pub report_format: ReportFormat,

    /// Globs excluded when a directory is given as a source
    #[serde(default = "IoConfig::default_exclude")]
    pub exclude: Vec<String>,

    /// Read `CMakeLists.txt` in a source directory for its sources and include directories
    #[serde(default = "IoConfig::default_cmake")]
    pub cmake: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            output_dir: Self::default_output_dir(),
            journal: Self::default_journal(),
            clean_output_before_run: Self::default_clean_output_before_run(),
            report_format: ReportFormat::default(),
            exclude: Self::default_exclude(),
            cmake: Self::default_cmake(),
        }
    }
}

impl IoConfig {
    fn default_output_dir() -> PathBuf {
        PathBuf::from(".covforge")
    }

    fn default_journal() -> String {
        "outcomes.jsonl".to_string()
    }

    const fn default_clean_output_before_run() -> bool {
        true
    }

    fn default_exclude() -> Vec<String> {
        ["**/test/**", "**/tests/**", "**/build/**", "**/third_party/**", "**/.covforge/**"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    const fn default_cmake() -> bool {
        true
    }

    /// Directory owned by one unit's session
    pub fn unit_dir(&self, unit_id: &str) -> PathBuf {
        self.output_dir.join("units").join(unit_id)
    }

    /// Full path of the outcome journal
    pub fn journal_path(&self) -> PathBuf {
        self.output_dir.join(&self.journal)
    }

    /// Validate I/O configuration
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(CovforgeError::validation("output_dir must not be empty"));
        }
        validate_non_empty(&self.journal, "journal")?;
        for pattern in &self.exclude {
            globset::Glob::new(pattern).map_err(|e| {
                CovforgeError::validation(format!("invalid exclude glob '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Parallelism limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Number of source units improved concurrently
    #[serde(default = "PerformanceConfig::default_max_parallel_units")]
    pub max_parallel_units: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_parallel_units: Self::default_max_parallel_units(),
        }
    }
}

impl PerformanceConfig {
    const fn default_max_parallel_units() -> usize {
        2
    }

    /// Validate performance configuration
    pub fn validate(&self) -> Result<()> {
        validate_positive_usize(self.max_parallel_units, "max_parallel_units")
    }
}

#[cfg(test)]
mod tests;
