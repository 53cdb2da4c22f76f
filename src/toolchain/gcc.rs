//! GCC + gcov toolchain adapter.
//!
//! Each source is compiled to its own object in the build directory so the
//! `.gcno`/`.gcda` files land beside it under predictable names, then linked
//! against gtest together with a small flush shim. The shim dumps the gcov
//! counters from fatal-signal and SIGTERM handlers, so crashed and timed-out
//! binaries still leave `.gcda` data behind. Coverage is read back with
//! `gcov`, `lcov` or `gcovr` depending on the configured collector.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CompileOutcome, CompileRequest, RunOutcome, Toolchain};
use crate::core::config::{CoverageCollector, ToolchainConfig};
use crate::core::errors::{CovforgeError, Result};
use crate::detectors::coverage::{parse_gcov_dir, parse_report, BuildStatus, RawCoverage};

/// gtest exits with 1 when assertions fail
const GTEST_FAILURE_EXIT: i32 = 1;

/// Keep compiler output bounded in records and journals
const MAX_DIAGNOSTIC_BYTES: usize = 16 * 1024;

/// Time a timed-out binary gets to dump counters after SIGTERM
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// File stem of the generated flush shim
pub const FLUSH_SHIM_STEM: &str = "covforge_gcov_flush";

/// Dumps gcov counters before the process dies from a signal
pub const FLUSH_SHIM_SOURCE: &str = r#"#include <csignal>

extern "C" void __gcov_dump(void);

namespace {

void covforge_flush_and_reraise(int sig) {
    __gcov_dump();
    std::signal(sig, SIG_DFL);
    std::raise(sig);
}

struct CovforgeFlushInstaller {
    CovforgeFlushInstaller() {
        std::signal(SIGSEGV, covforge_flush_and_reraise);
        std::signal(SIGABRT, covforge_flush_and_reraise);
        std::signal(SIGFPE, covforge_flush_and_reraise);
        std::signal(SIGILL, covforge_flush_and_reraise);
        std::signal(SIGTERM, covforge_flush_and_reraise);
    }
};

CovforgeFlushInstaller covforge_flush_installer;

}  // namespace
"#;

const LCOV_REPORT: &str = "coverage.info";
const GCOVR_REPORT: &str = "coverage.xml";

/// `g++ --coverage` and gcov-family collectors driven through `tokio::process`
#[derive(Debug, Clone)]
pub struct GccToolchain {
    config: ToolchainConfig,
}

impl GccToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Arguments compiling one source into `object`
    pub fn object_args(&self, source: &Path, object: &Path, include_dirs: &[PathBuf]) -> Vec<String> {
        let mut args = vec![
            format!("-std={}", self.config.std),
            "-g".to_string(),
            "-O0".to_string(),
            "--coverage".to_string(),
        ];
        args.extend(self.config.flags.iter().cloned());
        args.extend(self.config.defines.iter().map(|d| format!("-D{d}")));
        args.extend(include_dirs.iter().map(|dir| format!("-I{}", dir.display())));
        if let Some(gtest) = &self.config.gtest_include {
            args.push(format!("-I{}", gtest.display()));
        }
        args.push("-c".to_string());
        args.push(source.display().to_string());
        args.push("-o".to_string());
        args.push(object.display().to_string());
        args
    }

    /// Arguments linking `objects` into `output`
    pub fn link_args(&self, objects: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args = vec!["--coverage".to_string()];
        args.extend(objects.iter().map(|o| o.display().to_string()));
        args.push("-o".to_string());
        args.push(output.display().to_string());
        args.extend(self.config.gtest_libs.iter().cloned());
        args
    }

    /// Collector program, its arguments, and the report it writes (none for
    /// gcov, which leaves `.gcov` files in `build_dir`)
    pub fn collector_invocation(
        &self,
        build_dir: &Path,
        sources: &[PathBuf],
    ) -> (String, Vec<String>, Option<PathBuf>) {
        let dir = build_dir.display().to_string();
        match self.config.collector {
            CoverageCollector::Gcov => {
                let mut args = vec![
                    "--branch-probabilities".to_string(),
                    "--branch-counts".to_string(),
                    "--object-directory".to_string(),
                    dir,
                ];
                args.extend(sources.iter().map(|s| s.display().to_string()));
                (self.config.gcov.clone(), args, None)
            }
            CoverageCollector::Lcov => {
                let report = build_dir.join(LCOV_REPORT);
                let args = vec![
                    "--capture".to_string(),
                    "--directory".to_string(),
                    dir,
                    "--gcov-tool".to_string(),
                    self.config.gcov.clone(),
                    "--rc".to_string(),
                    "lcov_branch_coverage=1".to_string(),
                    "--output-file".to_string(),
                    report.display().to_string(),
                ];
                (self.collector_program(), args, Some(report))
            }
            CoverageCollector::Gcovr => {
                let report = build_dir.join(GCOVR_REPORT);
                let root = sources
                    .first()
                    .and_then(|s| s.parent())
                    .unwrap_or(build_dir);
                let args = vec![
                    "--root".to_string(),
                    root.display().to_string(),
                    "--gcov-executable".to_string(),
                    self.config.gcov.clone(),
                    "--xml".to_string(),
                    "--output".to_string(),
                    report.display().to_string(),
                    dir,
                ];
                (self.collector_program(), args, Some(report))
            }
        }
    }

    fn collector_program(&self) -> String {
        self.config
            .collector_command
            .clone()
            .unwrap_or_else(|| self.config.collector.as_str().to_string())
    }

    async fn invoke(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<Option<Output>> {
        debug!(program, args = %args.join(" "), "invoking toolchain");
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) => Ok(Some(output)),
            Ok(Err(e)) => Err(CovforgeError::toolchain(
                program,
                format!("failed to spawn: {e}"),
            )),
            Err(_) => Ok(None),
        }
    }

    /// Compile one source into an object, appending diagnostics to `errors`
    async fn compile_object(
        &self,
        source: &Path,
        request: &CompileRequest,
        errors: &mut String,
    ) -> Result<Option<PathBuf>> {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("source");
        let object = request.build_dir.join(format!("{stem}.o"));
        let args = self.object_args(source, &object, &request.include_dirs);
        match self
            .invoke(&self.config.compiler, &args, &request.build_dir, request.timeout)
            .await?
        {
            None => {
                errors.push_str(&format!(
                    "compilation of {} timed out after {}s\n",
                    source.display(),
                    request.timeout.as_secs()
                ));
                Ok(None)
            }
            Some(output) if output.status.success() => Ok(Some(object)),
            Some(output) => {
                errors.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Toolchain for GccToolchain {
    fn name(&self) -> &str {
        "gcc"
    }

    async fn compile(&self, request: &CompileRequest) -> Result<CompileOutcome> {
        let mut objects = Vec::with_capacity(request.sources.len() + 1);
        let mut errors = String::new();

        for source in &request.sources {
            if let Some(object) = self.compile_object(source, request, &mut errors).await? {
                objects.push(object);
            }
        }
        if !errors.is_empty() {
            return Ok(CompileOutcome::Failed {
                errors: truncate(errors),
            });
        }

        let shim = request.build_dir.join(format!("{FLUSH_SHIM_STEM}.cpp"));
        tokio::fs::write(&shim, FLUSH_SHIM_SOURCE).await.map_err(|e| {
            CovforgeError::io(format!("Failed to write {}", shim.display()), e)
        })?;
        match self.compile_object(&shim, request, &mut errors).await? {
            Some(object) => objects.push(object),
            None => {
                return Ok(CompileOutcome::Failed {
                    errors: truncate(errors),
                })
            }
        }

        let args = self.link_args(&objects, &request.output);
        match self
            .invoke(&self.config.compiler, &args, &request.build_dir, request.timeout)
            .await?
        {
            None => Ok(CompileOutcome::Failed {
                errors: format!("link timed out after {}s", request.timeout.as_secs()),
            }),
            Some(output) if output.status.success() => {
                info!(binary = %request.output.display(), "test binary built");
                Ok(CompileOutcome::Binary(request.output.clone()))
            }
            Some(output) => Ok(CompileOutcome::Failed {
                errors: truncate(String::from_utf8_lossy(&output.stderr).into_owned()),
            }),
        }
    }

    async fn run(&self, binary: &Path, workdir: &Path, timeout: Duration) -> Result<RunOutcome> {
        let mut child = Command::new(binary)
            .current_dir(workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CovforgeError::toolchain(
                    binary.display().to_string(),
                    format!("failed to spawn test binary: {e}"),
                )
            })?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                return Err(CovforgeError::toolchain(
                    binary.display().to_string(),
                    format!("failed waiting for test binary: {e}"),
                ))
            }
            Err(_) => {
                info!(binary = %binary.display(), timeout_secs = timeout.as_secs(), "test binary timed out");
                (terminate(&mut child, TERMINATE_GRACE).await, true)
            }
        };

        let stdout = collect_output(stdout).await;
        let stderr = collect_output(stderr).await;
        if timed_out {
            return Ok(RunOutcome {
                status: Some(BuildStatus::TimedOut),
                exit_code: None,
                signal: status.as_ref().and_then(exit_signal),
                stdout,
                stderr,
            });
        }

        let exit_code = status.as_ref().and_then(ExitStatus::code);
        let signal = status.as_ref().and_then(exit_signal);
        Ok(RunOutcome {
            status: Some(classify_exit(exit_code, signal)),
            exit_code,
            signal,
            stdout,
            stderr,
        })
    }

    async fn collect(&self, build_dir: &Path, sources: &[PathBuf]) -> Result<RawCoverage> {
        let (program, args, report) = self.collector_invocation(build_dir, sources);
        let timeout = Duration::from_secs(self.config.compile_timeout_secs);
        match self.invoke(&program, &args, build_dir, timeout).await? {
            None => {
                return Err(CovforgeError::toolchain(
                    &program,
                    format!("timed out after {}s", timeout.as_secs()),
                ))
            }
            Some(output) if !output.status.success() => {
                return Err(CovforgeError::toolchain(
                    &program,
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                ))
            }
            Some(_) => {}
        }
        match report {
            None => parse_gcov_dir(build_dir),
            Some(report) => read_report(&report),
        }
    }
}

/// Read an LCOV or Cobertura report into raw coverage
pub fn read_report(path: &Path) -> Result<RawCoverage> {
    let (format, files) = parse_report(path)?;
    debug!(report = %path.display(), ?format, files = files.len(), "coverage report parsed");
    let mut raw = RawCoverage::default();
    for file in files {
        raw.insert(file);
    }
    Ok(raw)
}

/// Ask a timed-out child to exit with SIGTERM so the flush shim can dump
/// counters, then kill it once `grace` runs out
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if send_sigterm(child).await {
        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            return Some(status);
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill timed-out test binary");
    }
    child.wait().await.ok()
}

#[cfg(unix)]
async fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await
        .is_ok_and(|status| status.success())
}

#[cfg(not(unix))]
async fn send_sigterm(_child: &Child) -> bool {
    false
}

fn drain<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "test output stream closed early");
        }
        truncate(String::from_utf8_lossy(&buf).into_owned())
    })
}

async fn collect_output(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Map an exit code / signal pair onto a build status
pub fn classify_exit(exit_code: Option<i32>, signal: Option<i32>) -> BuildStatus {
    match (exit_code, signal) {
        (Some(0), _) => BuildStatus::Passed,
        (Some(GTEST_FAILURE_EXIT), _) => BuildStatus::TestsFailed,
        _ => BuildStatus::Crashed,
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_DIAGNOSTIC_BYTES {
        let mut cut = MAX_DIAGNOSTIC_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n[output truncated]");
    }
    text
}
