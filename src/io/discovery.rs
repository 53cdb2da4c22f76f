//! Source file discovery for project runs.
//!
//! Explicit files are taken as given. A directory holding a `CMakeLists.txt`
//! that declares sources contributes those sources and its include
//! directories; any other directory is walked for C++ translation units.
//! Exclude globs apply to directory-derived sources in both cases.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::errors::{CovforgeError, Result};
use crate::io::cmake::{CmakeProject, CMAKE_LISTS};

/// Extensions treated as translation units
pub const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c++"];

/// What a set of source paths expands to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSources {
    /// Sorted, de-duplicated translation units
    pub sources: Vec<PathBuf>,
    /// Include directories declared by CMake projects, in declaration order
    pub include_roots: Vec<PathBuf>,
}

pub fn build_exclude_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            CovforgeError::config_field(format!("invalid exclude glob '{pattern}': {e}"), "io")
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CovforgeError::config_field(format!("failed to build exclude globs: {e}"), "io"))
}

pub(crate) fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

fn is_excluded(globset: &GlobSet, root: &Path, path: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    if globset.is_match(rel) {
        debug!(path = %path.display(), "excluded source");
        return true;
    }
    false
}

/// Expand `paths` into translation units and project include directories
pub fn discover_project(paths: &[PathBuf], exclude: &[String], use_cmake: bool) -> Result<ProjectSources> {
    let globset = build_exclude_globset(exclude)?;
    let mut found = BTreeSet::new();
    let mut include_roots: Vec<PathBuf> = Vec::new();

    for root in paths {
        if root.is_file() {
            found.insert(root.clone());
            continue;
        }
        if !root.is_dir() {
            return Err(CovforgeError::validation(format!(
                "source path does not exist: {}",
                root.display()
            )));
        }

        if use_cmake && root.join(CMAKE_LISTS).is_file() {
            let project = CmakeProject::load(root)?;
            if !project.is_empty() {
                info!(
                    root = %root.display(),
                    sources = project.sources.len(),
                    include_dirs = project.include_dirs.len(),
                    "using CMake project sources"
                );
                found.extend(
                    project
                        .sources
                        .into_iter()
                        .filter(|path| !is_excluded(&globset, root, path)),
                );
                for dir in project.include_dirs {
                    if !include_roots.contains(&dir) {
                        include_roots.push(dir);
                    }
                }
                continue;
            }
            warn!(root = %root.display(), "{CMAKE_LISTS} declares no sources, walking the directory");
        }

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| {
                CovforgeError::io(format!("Failed to walk {}", root.display()), e.into())
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_source(path) {
                continue;
            }
            if is_excluded(&globset, root, path) {
                continue;
            }
            found.insert(path.to_path_buf());
        }
    }

    Ok(ProjectSources {
        sources: found.into_iter().collect(),
        include_roots,
    })
}
