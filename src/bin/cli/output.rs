//! Output Formatting and Display Functions
//!
//! Styled headers, configuration tables, the progress spinner and the
//! end-of-run summaries.

use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::Duration;
use tabled::{settings::Style as TableStyle, Table, Tabled};

use covforge::api::results::{ProjectSummary, UnitAnalysis};
use covforge::core::config::{CoverageMetric, CovforgeConfig};
use covforge::detectors::gaps::Strategy;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Print covforge header with version info
pub fn print_header() {
    if Term::stdout().size().1 >= 80 {
        println!(
            "{}",
            "┌".cyan().bold().to_string() + &"─".repeat(60).cyan().to_string() + &"┐".cyan().bold().to_string()
        );
        println!(
            "{} {} {}",
            "│".cyan().bold(),
            format!("⚙️  Covforge v{} - C++ Coverage Improvement", VERSION).bright_cyan().bold(),
            "│".cyan().bold()
        );
        println!(
            "{}",
            "└".cyan().bold().to_string() + &"─".repeat(60).cyan().to_string() + &"┘".cyan().bold().to_string()
        );
    } else {
        println!("{} {}", "⚙️".bright_cyan(), format!("Covforge v{}", VERSION).bright_cyan().bold());
    }
    println!();
}

fn metric_name(metric: CoverageMetric) -> &'static str {
    match metric {
        CoverageMetric::Line => "line",
        CoverageMetric::Branch => "branch",
        CoverageMetric::Function => "function",
    }
}

/// Display configuration summary in a formatted table
pub fn display_config_summary(config: &CovforgeConfig) {
    #[derive(Tabled)]
    struct ConfigRow {
        setting: String,
        value: String,
    }

    let strategies: Vec<&str> = Strategy::ALL
        .iter()
        .filter(|s| config.strategies.is_enabled(**s))
        .map(|s| s.as_str())
        .collect();

    let rows = vec![
        ConfigRow {
            setting: "Target".to_string(),
            value: format!(
                "{:.1}% {} coverage",
                config.session.target_coverage,
                metric_name(config.session.coverage_metric)
            ),
        },
        ConfigRow {
            setting: "Max Iterations".to_string(),
            value: config.session.max_iterations.to_string(),
        },
        ConfigRow {
            setting: "Strategies".to_string(),
            value: strategies.join(", "),
        },
        ConfigRow {
            setting: "Generator".to_string(),
            value: if config.generator.enabled {
                format!("{} @ {}", config.generator.model, config.generator.endpoint)
            } else {
                "disabled".to_string()
            },
        },
        ConfigRow {
            setting: "Output".to_string(),
            value: config.io.output_dir.display().to_string(),
        },
    ];

    let mut table = Table::new(rows);
    table.with(TableStyle::rounded());
    println!("{}", table);
    println!();
}

/// Every effective setting, for `validate-config --details`
pub fn display_config_details(config: &CovforgeConfig) {
    #[derive(Tabled)]
    struct DetailRow {
        setting: String,
        value: String,
    }

    let rows = vec![
        ("session.confidence_threshold", config.session.confidence_threshold.to_string()),
        (
            "session.time_budget_secs",
            config
                .session
                .time_budget_secs
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("session.bootstrap_tests", config.session.bootstrap_tests.to_string()),
        (
            "strategies.path_complexity_threshold",
            config.strategies.path_complexity_threshold.to_string(),
        ),
        (
            "strategies.max_gaps_per_request",
            config.strategies.max_gaps_per_request.to_string(),
        ),
        ("plateau.window", config.plateau.window.to_string()),
        ("plateau.delta_threshold", config.plateau.delta_threshold.to_string()),
        ("toolchain.compiler", config.toolchain.compiler.clone()),
        ("toolchain.gcov", config.toolchain.gcov.clone()),
        ("toolchain.std", config.toolchain.std.clone()),
        ("toolchain.run_timeout_secs", config.toolchain.run_timeout_secs.to_string()),
        ("performance.max_parallel_units", config.performance.max_parallel_units.to_string()),
    ]
    .into_iter()
    .map(|(setting, value)| DetailRow {
        setting: setting.to_string(),
        value,
    })
    .collect::<Vec<_>>();

    println!("{}", "🔧 Detailed Settings".bright_blue().bold());
    println!();
    let mut table = Table::new(rows);
    table.with(TableStyle::rounded());
    println!("{}", table);
}

/// Spinner updated from session progress callbacks
pub fn progress_spinner(units: usize) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!("Improving {units} units"));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Per-unit results table
pub fn display_project_summary(summary: &ProjectSummary) {
    #[derive(Tabled)]
    struct SessionRow {
        unit: String,
        termination: String,
        iterations: usize,
        best: String,
        target: String,
        accepted: usize,
        failures: usize,
    }

    let rows: Vec<SessionRow> = summary
        .sessions
        .iter()
        .map(|session| SessionRow {
            unit: session.unit_id.clone(),
            termination: session.termination.to_string(),
            iterations: session.iterations,
            best: format!("{:.1}%", session.best_metric),
            target: if session.target_met {
                "✅ met".to_string()
            } else {
                format!("❌ {:.1}%", session.target_coverage)
            },
            accepted: session.accepted_tests.len(),
            failures: session.failure_counts.values().sum(),
        })
        .collect();

    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(TableStyle::rounded());
        println!("{}", table);
        println!();
    }

    for error in &summary.errors {
        println!("  {} {}: {}", "❌".red(), error.source.display(), error.message);
    }
}

/// Totals and output locations
pub fn display_completion_summary(summary: &ProjectSummary, out_dir: &Path) {
    println!("{}", "📊 Project Coverage".bright_blue().bold());
    println!(
        "   Lines:     {:>6.1}% ({}/{})",
        summary.line_coverage_percent(),
        summary.lines.covered,
        summary.lines.total
    );
    println!(
        "   Branches:  {:>6.1}% ({}/{})",
        summary.branch_coverage_percent(),
        summary.branches.covered,
        summary.branches.total
    );
    println!(
        "   Functions: {:>6.1}% ({}/{})",
        summary.function_coverage_percent(),
        summary.functions.covered,
        summary.functions.total
    );
    println!(
        "   Units meeting target: {}/{}",
        summary.units_meeting_target,
        summary.sessions.len()
    );
    println!();
    println!("{} {}", "📁 Reports written to".bold(), out_dir.display().to_string().cyan());
    if !summary.is_complete() {
        println!(
            "{}",
            format!("⚠️  {} units could not be processed", summary.errors.len()).yellow()
        );
    }
}

/// Structure table for `analyze`
pub fn display_unit_analysis(analysis: &UnitAnalysis) {
    #[derive(Tabled)]
    struct FunctionRow {
        function: String,
        line: usize,
        complexity: u32,
        branches: usize,
        boundaries: usize,
        predicted: String,
    }

    println!(
        "{} {} ({})",
        "📄".bold(),
        analysis.source.display().to_string().cyan(),
        analysis.unit_id
    );
    if let Some(header) = &analysis.header {
        println!("   Header: {}", header.display());
    }
    if !analysis.dependencies.is_empty() {
        println!("   Dependencies: {}", analysis.dependencies.join(", "));
    }
    println!();

    let rows: Vec<FunctionRow> = analysis
        .functions
        .iter()
        .map(|f| FunctionRow {
            function: f.name.clone(),
            line: f.line,
            complexity: f.complexity,
            branches: f.branch_sites,
            boundaries: f.boundaries,
            predicted: format!(
                "{:.1}% (confidence {:.2})",
                f.prediction.coverage, f.prediction.confidence
            ),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(TableStyle::rounded());
    println!("{}", table);
    println!();
    println!(
        "{} {:.1}% (confidence {:.2})",
        "🔮 Predicted unit coverage:".bold(),
        analysis.prediction.coverage,
        analysis.prediction.confidence
    );
}
