//! Builds instrumented binaries with the real compiler that die from a signal
//! or hang past their timeout, and checks that the lines they executed before
//! dying are still reported. Skipped when `g++` is not installed.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use covforge::core::config::ToolchainConfig;
use covforge::detectors::coverage::{BuildStatus, RawCoverage};
use covforge::toolchain::{CompileOutcome, CompileRequest, GccToolchain, Toolchain};

const CRASHING: &str = r#"#include <csignal>

int work(int n) {
    int total = 0;
    for (int i = 0; i < n; ++i) {
        total += i;
    }
    return total;
}

int main() {
    int value = work(3);
    if (value >= 0) {
        std::raise(SIGSEGV);
    }
    return value;
}
"#;

const HANGING: &str = r#"int work(int n) {
    int total = 0;
    for (int i = 0; i < n; ++i) {
        total += i;
    }
    return total;
}

volatile bool spin = true;

int main() {
    int value = work(3);
    while (spin) {
    }
    return value;
}
"#;

fn compiler_available() -> bool {
    std::process::Command::new("g++")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn line_of(source: &str, needle: &str) -> usize {
    source
        .lines()
        .position(|line| line.contains(needle))
        .map(|index| index + 1)
        .unwrap()
}

async fn build_run_collect(
    dir: &Path,
    name: &str,
    text: &str,
    timeout: Duration,
) -> (BuildStatus, RawCoverage) {
    let source = dir.join(format!("{name}.cpp"));
    fs::write(&source, text).unwrap();
    let build_dir = dir.join("build");
    fs::create_dir_all(&build_dir).unwrap();

    let toolchain = GccToolchain::new(ToolchainConfig {
        gtest_libs: Vec::new(),
        ..ToolchainConfig::default()
    });
    let request = CompileRequest {
        sources: vec![source.clone()],
        include_dirs: Vec::new(),
        output: build_dir.join(name),
        build_dir: build_dir.clone(),
        timeout: Duration::from_secs(120),
    };
    let binary = match toolchain.compile(&request).await.unwrap() {
        CompileOutcome::Binary(binary) => binary,
        CompileOutcome::Failed { errors } => panic!("{name} failed to compile:\n{errors}"),
    };

    let run = toolchain.run(&binary, &build_dir, timeout).await.unwrap();
    let raw = toolchain.collect(&build_dir, &[source]).await.unwrap();
    (run.status(), raw)
}

#[tokio::test]
async fn crashed_binary_keeps_executed_lines() {
    if !compiler_available() {
        eprintln!("g++ not found, skipping crash coverage check");
        return;
    }
    let dir = TempDir::new().unwrap();
    let (status, raw) =
        build_run_collect(dir.path(), "crashing", CRASHING, Duration::from_secs(30)).await;

    assert_eq!(status, BuildStatus::Crashed);
    let file = raw.file_for(Path::new("crashing.cpp")).unwrap();
    assert_eq!(file.lines.get(&line_of(CRASHING, "total += i;")), Some(&3));
    assert_eq!(file.lines.get(&line_of(CRASHING, "int value = work(3);")), Some(&1));
    assert_eq!(file.lines.get(&line_of(CRASHING, "return value;")), Some(&0));
}

#[tokio::test]
async fn timed_out_binary_keeps_executed_lines() {
    if !compiler_available() {
        eprintln!("g++ not found, skipping timeout coverage check");
        return;
    }
    let dir = TempDir::new().unwrap();
    let (status, raw) =
        build_run_collect(dir.path(), "hanging", HANGING, Duration::from_secs(1)).await;

    assert_eq!(status, BuildStatus::TimedOut);
    let file = raw.file_for(Path::new("hanging.cpp")).unwrap();
    assert_eq!(file.lines.get(&line_of(HANGING, "total += i;")), Some(&3));
    assert_eq!(file.lines.get(&line_of(HANGING, "return value;")), Some(&0));
}
