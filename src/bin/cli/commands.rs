//! Command Execution Logic
//!
//! Configuration layering (file, discovered file, flags), engine construction
//! and the four subcommands.

use crate::cli::args::*;
use crate::cli::output::*;
use anyhow::Context;
use console::style;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use covforge::core::config::CovforgeConfig;
use covforge::core::pipeline::ProgressCallback;
use covforge::io::discovery::discover_project;
use covforge::CoverageEngine;

/// Run improvement sessions over the given files and directories
pub async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    if !args.quiet {
        print_header();
    }

    let mut config = load_configuration(args.config.as_deref()).await?;
    apply_run_overrides(&mut config, &args);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let project = match discover_project(&args.paths, &config.io.exclude, config.io.cmake) {
        Ok(project) => project,
        Err(e) => {
            eprintln!("  {} {}", "❌".red(), e);
            std::process::exit(1);
        }
    };
    for dir in project.include_roots {
        if !config.toolchain.include_roots.contains(&dir) {
            config.toolchain.include_roots.push(dir);
        }
    }
    let sources = project.sources;
    if sources.is_empty() {
        eprintln!("{}", "❌ No C++ sources found".red());
        std::process::exit(1);
    }

    if !args.quiet {
        display_config_summary(&config);
    }

    let out_dir = config.io.output_dir.clone();
    let spinner = (!args.quiet).then(|| progress_spinner(sources.len()));
    let mut engine = CoverageEngine::with_defaults(config)?;
    if let Some(pb) = &spinner {
        let pb = pb.clone();
        let callback: ProgressCallback = Arc::new(move |unit: &str, coverage: f64| {
            pb.set_message(format!("{unit} at {coverage:.1}%"));
        });
        engine = engine.with_progress(callback);
    }

    // Ctrl-C stops every session at its next iteration boundary
    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current iterations");
            token.cancel();
        }
    });

    info!("Starting improvement for {} source files", sources.len());
    let summary = engine
        .run_project(&sources)
        .await
        .context("Project run failed")?;

    if let Some(pb) = spinner {
        pb.finish_with_message("Improvement complete");
    }

    if !args.quiet {
        println!();
        display_project_summary(&summary);
        display_completion_summary(&summary, &out_dir);
    }

    if summary.sessions.is_empty() && !summary.errors.is_empty() {
        anyhow::bail!("No unit could be improved");
    }
    Ok(())
}

/// Print the structure and cold-start prediction of one file
pub async fn analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let config = load_configuration(args.config.as_deref()).await?;
    let engine = CoverageEngine::with_defaults(config)?;
    let analysis = engine
        .analyze(&args.file)
        .with_context(|| format!("Failed to analyze {}", args.file.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        display_unit_analysis(&analysis);
    }
    Ok(())
}

/// Print default configuration in YAML format
pub async fn print_default_config() -> anyhow::Result<()> {
    println!("{}", style("# Default covforge configuration").dim());
    println!("{}", style("# Save this as .covforge.yml and customize as needed").dim());
    println!();

    let yaml_output = serde_yaml::to_string(&CovforgeConfig::default())?;
    println!("{}", yaml_output);
    Ok(())
}

/// Validate a covforge configuration file
pub async fn validate_config(args: ValidateConfigArgs) -> anyhow::Result<()> {
    println!(
        "{} {}",
        style("🔍 Validating configuration:").blue().bold(),
        style(args.config.display()).cyan()
    );
    println!();

    let loaded = CovforgeConfig::from_yaml_file(&args.config)
        .and_then(|config| config.validate().map(|_| config));
    let config = match loaded {
        Ok(config) => {
            println!("{}", style("✅ Configuration file is valid!").green().bold());
            println!();
            config
        }
        Err(e) => {
            eprintln!("{} {}", style("❌ Configuration validation failed:").red(), e);
            eprintln!();
            eprintln!("{}", style("🔧 Common issues:").blue().bold());
            eprintln!("   • Check YAML syntax (indentation, colons, quotes)");
            eprintln!("   • Percentages lie in 0-100, confidence threshold in 0-1");
            eprintln!("   • At least one of branch, path, boundary must stay enabled");
            eprintln!();
            eprintln!(
                "{}",
                style("💡 Tip: Use 'covforge print-default-config' to see valid format").dim()
            );
            std::process::exit(1);
        }
    };

    display_config_summary(&config);
    if args.details {
        display_config_details(&config);
    }
    Ok(())
}

/// Load configuration from `path`, else `./.covforge.yml`, else defaults
pub async fn load_configuration(path: Option<&Path>) -> anyhow::Result<CovforgeConfig> {
    let path: Option<PathBuf> = match path {
        Some(path) => Some(path.to_path_buf()),
        None => CovforgeConfig::discover(&std::env::current_dir()?),
    };

    match path {
        Some(path) => {
            info!(config = %path.display(), "loading configuration");
            CovforgeConfig::from_yaml_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => Ok(CovforgeConfig::default()),
    }
}

/// Layer `run` flags over the loaded configuration
pub fn apply_run_overrides(config: &mut CovforgeConfig, args: &RunArgs) {
    if let Some(target) = args.target {
        config.session.target_coverage = target;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.session.max_iterations = max_iterations;
    }
    if let Some(metric) = args.metric {
        config.session.coverage_metric = metric.into();
    }
    if args.no_bootstrap {
        config.session.bootstrap_tests = false;
    }
    if args.no_cmake {
        config.io.cmake = false;
    }
    if let Some(out) = &args.out {
        config.io.output_dir = out.clone();
    }
    if let Some(format) = args.format {
        config.io.report_format = format.into();
    }
    if let Some(parallel) = args.parallel {
        config.performance.max_parallel_units = parallel;
    }
    if let Some(model) = &args.model {
        config.generator.model = model.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        config.generator.endpoint = endpoint.clone();
    }
    if args.no_branch {
        config.strategies.branch = false;
    }
    if args.no_path {
        config.strategies.path = false;
    }
    if args.no_boundary {
        config.strategies.boundary = false;
    }
}
