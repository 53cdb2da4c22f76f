//! Report persistence.
//!
//! Sessions and project summaries are written as JSON or YAML; accepted
//! generated tests are written as individual `.cpp` files so they can be
//! dropped into the project's own test build.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::core::config::ReportFormat;
use crate::core::errors::{Result, ResultExt};
use crate::toolchain::TestCase;

/// File name of the project summary, without extension
pub const SUMMARY_STEM: &str = "summary";

/// File name of a unit's session report, without extension
pub const SESSION_STEM: &str = "session";

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Yaml => "yaml",
        }
    }
}

/// Serialize `value` in `format`
pub fn render<T: Serialize + ?Sized>(value: &T, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        ReportFormat::Yaml => Ok(serde_yaml::to_string(value)?),
    }
}

/// Write `value` to `<dir>/<stem>.<ext>` and return the path
pub async fn write_report<T: Serialize + ?Sized>(
    value: &T,
    dir: &Path,
    stem: &str,
    format: ReportFormat,
) -> Result<PathBuf> {
    let content = render(value, format)?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{stem}.{}", format.extension()));
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    info!(report = %path.display(), "report written");
    Ok(path)
}

/// Write each test as `<dir>/<name>.cpp`
pub async fn write_tests(dir: &Path, tests: &[TestCase]) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut written = Vec::with_capacity(tests.len());
    for test in tests {
        let path = dir.join(test.file_name());
        tokio::fs::write(&path, &test.source)
            .await
            .with_context(|| format!("Failed to write test {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
