use super::*;
use crate::core::errors::CovforgeError;
use tempfile::TempDir;

fn expect_config_error<T: std::fmt::Debug>(result: Result<T>) -> CovforgeError {
    result.expect_err("expected config failure")
}

#[test]
fn default_configs_validate_successfully() {
    CovforgeConfig::default()
        .validate()
        .expect("covforge default");
    SessionConfig::default().validate().expect("session default");
    StrategyConfig::default()
        .validate()
        .expect("strategies default");
    PlateauConfig::default().validate().expect("plateau default");
    ToolchainConfig::default()
        .validate()
        .expect("toolchain default");
    GeneratorConfig::default()
        .validate()
        .expect("generator default");
    IoConfig::default().validate().expect("io default");
    PerformanceConfig::default()
        .validate()
        .expect("performance default");
}

#[test]
fn defaults_match_documented_values() {
    let config = CovforgeConfig::default();
    assert_eq!(config.session.target_coverage, 80.0);
    assert_eq!(config.session.max_iterations, 10);
    assert_eq!(config.session.coverage_metric, CoverageMetric::Line);
    assert!(config.session.bootstrap_tests);
    assert_eq!(config.strategies.path_complexity_threshold, 4);
    assert_eq!(config.plateau.window, 3);
    assert_eq!(config.plateau.delta_threshold, 0.5);
    assert_eq!(config.toolchain.run_timeout_secs, 30);
    assert_eq!(
        config.generator.endpoint,
        "http://localhost:11434/api/generate"
    );
    assert_eq!(config.io.output_dir, PathBuf::from(".covforge"));
    assert!(config.io.cmake);
    assert_eq!(config.toolchain.collector, CoverageCollector::Gcov);
    assert_eq!(config.performance.max_parallel_units, 2);
}

#[test]
fn invalid_session_values_become_config_errors() {
    let mut config = CovforgeConfig::default();
    config.session.target_coverage = 120.0;
    let err = expect_config_error(config.validate());
    assert!(err.is_fatal_config());
    assert!(
        format!("{err}").contains("target_coverage"),
        "unexpected error message: {err}"
    );

    let mut config = CovforgeConfig::default();
    config.session.confidence_threshold = 1.5;
    match expect_config_error(config.validate()) {
        CovforgeError::Config { field, .. } => assert_eq!(field.as_deref(), Some("session")),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn plateau_window_must_be_positive() {
    let mut config = CovforgeConfig::default();
    config.plateau.window = 0;
    let err = expect_config_error(config.validate());
    assert!(format!("{err}").contains("window"));
}

#[test]
fn all_strategies_disabled_is_rejected() {
    let mut config = CovforgeConfig::default();
    config.strategies.branch = false;
    config.strategies.path = false;
    config.strategies.boundary = false;
    let err = expect_config_error(config.validate());
    assert!(format!("{err}").contains("at least one strategy"));
}

#[test]
fn disabled_generator_skips_endpoint_checks() {
    let mut config = GeneratorConfig::default();
    config.endpoint = "not a url".to_string();
    assert!(config.validate().is_err());

    config.enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn strategy_lookup_follows_flags_and_weights() {
    let mut config = StrategyConfig::default();
    config.boundary = false;
    assert!(config.is_enabled(Strategy::Branch));
    assert!(!config.is_enabled(Strategy::Boundary));
    assert_eq!(config.weight(Strategy::Path), 0.9);
    assert_eq!(config.weight(Strategy::Boundary), 0.5);
}

#[test]
fn partial_yaml_fills_in_defaults() {
    let yaml = r#"
session:
  target_coverage: 92.5
  coverage_metric: branch
strategies:
  boundary: false
toolchain:
  include_roots: ["include", "third_party"]
  collector: lcov
io:
  cmake: false
"#;
    let config: CovforgeConfig = serde_yaml::from_str(yaml).expect("parse yaml");
    assert_eq!(config.session.target_coverage, 92.5);
    assert_eq!(config.session.coverage_metric, CoverageMetric::Branch);
    assert_eq!(config.session.max_iterations, 10);
    assert!(!config.strategies.boundary);
    assert!(config.strategies.branch);
    assert_eq!(config.toolchain.include_roots.len(), 2);
    assert_eq!(config.toolchain.compiler, "g++");
    assert_eq!(config.toolchain.collector, CoverageCollector::Lcov);
    assert!(!config.io.cmake);
    config.validate().expect("valid partial config");
}

#[test]
fn yaml_file_round_trip_and_discovery() {
    let dir = TempDir::new().expect("temp dir");
    assert!(CovforgeConfig::discover(dir.path()).is_none());

    let path = dir.path().join(DEFAULT_CONFIG_FILE);
    let mut config = CovforgeConfig::default();
    config.session.max_iterations = 4;
    config.to_yaml_file(&path).expect("write config");

    assert_eq!(CovforgeConfig::discover(dir.path()), Some(path.clone()));
    let loaded = CovforgeConfig::from_yaml_file(&path).expect("load config");
    assert_eq!(loaded.session.max_iterations, 4);
}

#[test]
fn malformed_yaml_is_a_config_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("broken.yml");
    std::fs::write(&path, "session: [not, a, map]").expect("write");
    let err = CovforgeConfig::from_yaml_file(&path).expect_err("should fail");
    assert!(err.is_fatal_config());
}

#[test]
fn missing_file_is_an_io_error() {
    let err = CovforgeConfig::from_yaml_file("/definitely/not/here.yml").expect_err("missing");
    assert!(matches!(err, CovforgeError::Io { .. }));
}

#[test]
fn io_paths_are_rooted_in_output_dir() {
    let io = IoConfig::default();
    assert_eq!(
        io.unit_dir("abc"),
        PathBuf::from(".covforge").join("units").join("abc")
    );
    assert_eq!(
        io.journal_path(),
        PathBuf::from(".covforge").join("outcomes.jsonl")
    );
}
