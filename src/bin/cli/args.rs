//! CLI Argument Structures
//!
//! Command definitions and the value enums that map onto configuration types.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use covforge::core::config::{CoverageMetric, ReportFormat};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Iterative coverage improvement for C++ sources
#[derive(Parser)]
#[command(name = "covforge")]
#[command(version = VERSION)]
#[command(about = "Covforge - raise C++ unit test coverage with generated gtest cases")]
#[command(long_about = "
Isolate C++ translation units behind generated mocks, measure coverage with
gcov, and iterate test generation until the target is met or progress stalls.
Production sources are never modified.

Common Usage:

  # Improve two units up to 90% line coverage
  covforge run --target 90 src/Parser/Parser.cpp src/Lexer/Lexer.cpp

  # Every translation unit under src/, branch strategy only
  covforge run --no-path --no-boundary src/

  # Inspect structure and the cold-start prediction without building
  covforge analyze src/Parser/Parser.cpp

  # Start from the defaults
  covforge print-default-config > .covforge.yml
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run improvement sessions over C++ source files
    Run(Box<RunArgs>),

    /// Print structure and predicted coverage of one source file
    Analyze(AnalyzeArgs),

    /// Print default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,

    /// Validate a covforge configuration file
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// C++ source files, or directories to search for them
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Configuration file (defaults to ./.covforge.yml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target coverage percentage (0-100)
    #[arg(long)]
    pub target: Option<f64>,

    /// Maximum improvement iterations per unit
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Coverage metric compared against the target
    #[arg(long, value_enum)]
    pub metric: Option<MetricArg>,

    /// Output directory for units, journal and reports
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Report file format
    #[arg(long, value_enum)]
    pub format: Option<ReportFormatArg>,

    /// Units processed concurrently
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Generator model name
    #[arg(long, env = "COVFORGE_MODEL")]
    pub model: Option<String>,

    /// Generator endpoint URL
    #[arg(long, env = "COVFORGE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Disable the branch strategy
    #[arg(long)]
    pub no_branch: bool,

    /// Disable the path strategy
    #[arg(long)]
    pub no_path: bool,

    /// Disable the boundary strategy
    #[arg(long)]
    pub no_boundary: bool,

    /// Skip baseline test generation
    #[arg(long)]
    pub no_bootstrap: bool,

    /// Walk directories instead of reading their CMakeLists.txt
    #[arg(long)]
    pub no_cmake: bool,

    /// Suppress progress and tables
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// C++ source file to analyze
    pub file: PathBuf,

    /// Configuration file (defaults to ./.covforge.yml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the analysis as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateConfigArgs {
    /// Configuration file to validate
    pub config: PathBuf,

    /// Show every effective setting
    #[arg(long)]
    pub details: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MetricArg {
    Line,
    Branch,
    Function,
}

impl From<MetricArg> for CoverageMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Line => CoverageMetric::Line,
            MetricArg::Branch => CoverageMetric::Branch,
            MetricArg::Function => CoverageMetric::Function,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ReportFormatArg {
    Json,
    Yaml,
}

impl From<ReportFormatArg> for ReportFormat {
    fn from(arg: ReportFormatArg) -> Self {
        match arg {
            ReportFormatArg::Json => ReportFormat::Json,
            ReportFormatArg::Yaml => ReportFormat::Yaml,
        }
    }
}
