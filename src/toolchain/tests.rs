use super::testing::{ScriptedBuild, ScriptedToolchain};
use super::*;
use crate::core::config::ToolchainConfig;
use crate::detectors::coverage::Counts;
use crate::lang::common::fixtures::{function, unit};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn isolation(dir: &TempDir) -> IsolationUnit {
    IsolationUnit {
        unit_id: "Program-test".to_string(),
        original_source: PathBuf::from("src/Program/Program.cpp"),
        target_header: Some(PathBuf::from("src/Program/Program.h")),
        target_function: None,
        mocks: BTreeMap::new(),
        resolutions: BTreeMap::new(),
        unit_dir: dir.path().join("units/Program-test"),
        warnings: Vec::new(),
    }
}

fn runner(toolchain: Arc<ScriptedToolchain>) -> MeasureRunner {
    MeasureRunner::new(toolchain, &ToolchainConfig::default())
}

fn baseline_test() -> TestCase {
    TestCase::new(0, None, "Program::run", "TEST(Program, Runs) { EXPECT_TRUE(true); }")
}

#[tokio::test]
async fn compile_failure_becomes_zero_coverage_record() {
    let dir = TempDir::new().unwrap();
    let toolchain = Arc::new(ScriptedToolchain::new([ScriptedBuild::CompileError(
        "test.cpp:3: error: 'Foo' was not declared in this scope".to_string(),
    )]));
    let source = unit(vec![function("run", Some("Program"), 1, 5)]);

    let record = runner(Arc::clone(&toolchain))
        .measure(&source, &isolation(&dir), &[baseline_test()], 1)
        .await
        .unwrap();

    assert_eq!(record.status, BuildStatus::NotCompiled);
    assert_eq!(record.lines, Counts::default());
    assert!(record.compile_errors.as_deref().unwrap().contains("not declared"));
    assert!(matches!(
        record.failure,
        Some(IterationFailure::CompileFailed { .. })
    ));
}

#[tokio::test]
async fn crashed_run_keeps_partial_coverage() {
    let dir = TempDir::new().unwrap();
    let toolchain = Arc::new(ScriptedToolchain::new([ScriptedBuild::run(
        BuildStatus::Crashed,
        &[(1, 1), (2, 1), (3, 0)],
    )]));
    let source = unit(vec![function("run", None, 1, 5)]);

    let record = runner(toolchain)
        .measure(&source, &isolation(&dir), &[baseline_test()], 2)
        .await
        .unwrap();

    assert_eq!(record.status, BuildStatus::Crashed);
    assert_eq!(record.lines, Counts::new(2, 3));
    assert!(matches!(
        record.failure,
        Some(IterationFailure::RuntimeCrashed { signal: Some(11), .. })
    ));
}

#[tokio::test]
async fn timed_out_run_reports_timeout() {
    let dir = TempDir::new().unwrap();
    let toolchain = Arc::new(ScriptedToolchain::new([ScriptedBuild::run(
        BuildStatus::TimedOut,
        &[(1, 0)],
    )]));
    let source = unit(vec![function("run", None, 1, 5)]);

    let record = runner(toolchain)
        .measure(&source, &isolation(&dir), &[], 1)
        .await
        .unwrap();

    assert_eq!(
        record.failure,
        Some(IterationFailure::RuntimeTimedOut {
            timeout_secs: ToolchainConfig::default().run_timeout_secs
        })
    );
}

#[tokio::test]
async fn measurement_writes_tests_and_purges_stale_artifacts() {
    let dir = TempDir::new().unwrap();
    let isolation = isolation(&dir);
    std::fs::create_dir_all(isolation.build_dir()).unwrap();
    let stale = isolation.build_dir().join("old.gcda");
    std::fs::write(&stale, b"stale").unwrap();

    let toolchain = Arc::new(ScriptedToolchain::new([ScriptedBuild::passing(&[(1, 1)])]));
    let test = baseline_test();
    let source = unit(vec![function("run", None, 1, 5)]);

    runner(Arc::clone(&toolchain))
        .measure(&source, &isolation, std::slice::from_ref(&test), 1)
        .await
        .unwrap();

    assert!(!stale.exists());
    let written = isolation.build_dir().join(test.file_name());
    assert_eq!(std::fs::read_to_string(&written).unwrap(), test.source);

    let requests = toolchain.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sources[0], isolation.staged_source());
    assert_eq!(requests[0].sources[1], written);
    assert_eq!(requests[0].include_dirs[0], isolation.mock_dir());
}

#[test]
fn test_case_names_are_descriptive_and_stable() {
    let case = TestCase::new(3, Some(Strategy::Branch), "Program::run", "");
    assert_eq!(case.name, "test_003_branch_Program__run");
    assert_eq!(case.file_name(), "test_003_branch_Program__run.cpp");
    assert_eq!(baseline_test().name, "test_000_baseline_Program__run");
}
