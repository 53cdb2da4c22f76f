//! Isolation unit assembly.
//!
//! An isolation unit is the target source and its genuine header plus one
//! synthesized mock header per dependency type. Search paths are ordered so a
//! bare `"Type.h"` include finds the mock first while the target's own header
//! always resolves to the real file:
//!
//! 1. `<unit>/mocks`
//! 2. `<unit>/target` (staged copies of the target source and header)
//! 3. the target's original directory, then the project include roots
//!
//! The target is compiled from its staged copy because a quoted include is
//! looked up in the including file's directory before any `-I` entry, which
//! would otherwise let a real dependency header sitting next to the target
//! win over its mock.

pub mod mocks;

pub use mocks::{MockMember, MockSpec, RequiredMember, SignatureSource};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::errors::{CovforgeError, Result};
use crate::core::pipeline::IterationFailure;
use crate::lang::common::{Dependency, Function, SourceUnit};
use crate::lang::cpp::{CppStructureProvider, HeaderDeclarations};

#[cfg(test)]
mod tests;

const MOCK_DIR: &str = "mocks";
const TARGET_DIR: &str = "target";
const BUILD_DIR: &str = "build";

/// Where each dependency include will come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencyResolution {
    /// Shadowed by a synthesized mock
    Mocked,
    /// Left to resolve to the real header (no class of that name to replace)
    PassThrough { header: PathBuf },
}

/// Self-contained build description for one source unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationUnit {
    pub unit_id: String,
    /// The target source as found in the project
    pub original_source: PathBuf,
    /// The target's real header, if any
    pub target_header: Option<PathBuf>,
    /// Function the current tests aim at
    pub target_function: Option<String>,
    /// Dependency type name → mock
    pub mocks: BTreeMap<String, MockSpec>,
    pub resolutions: BTreeMap<String, DependencyResolution>,
    pub unit_dir: PathBuf,
    /// Non-fatal problems found while building mocks
    pub warnings: Vec<IterationFailure>,
}

impl IsolationUnit {
    pub fn mock_dir(&self) -> PathBuf {
        self.unit_dir.join(MOCK_DIR)
    }

    pub fn target_dir(&self) -> PathBuf {
        self.unit_dir.join(TARGET_DIR)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.unit_dir.join(BUILD_DIR)
    }

    /// Staged copy of the target source that gets compiled
    pub fn staged_source(&self) -> PathBuf {
        let name = self
            .original_source
            .file_name()
            .map_or_else(|| PathBuf::from("target.cpp"), PathBuf::from);
        self.target_dir().join(name)
    }

    /// Compiler search path, in precedence order
    pub fn include_dirs(&self, include_roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut dirs = vec![self.mock_dir(), self.target_dir()];
        if let Some(parent) = self.original_source.parent() {
            dirs.push(parent.to_path_buf());
        }
        if let Some(parent) = self.target_header.as_deref().and_then(Path::parent) {
            if !dirs.iter().any(|d| d == parent) {
                dirs.push(parent.to_path_buf());
            }
        }
        for root in include_roots {
            if !dirs.contains(root) {
                dirs.push(root.clone());
            }
        }
        dirs
    }

    pub fn is_mocked(&self, type_name: &str) -> bool {
        self.mocks.contains_key(type_name)
    }
}

/// Assembles [`IsolationUnit`]s and writes them to disk.
///
/// Mocks are cached per unit and dependency signature, so repeated iterations
/// over the same unit produce byte-identical headers.
pub struct IsolationBuilder {
    provider: Arc<CppStructureProvider>,
    units_root: PathBuf,
    mock_cache: DashMap<(String, String), Arc<MockSpec>>,
}

impl IsolationBuilder {
    pub fn new(provider: Arc<CppStructureProvider>, units_root: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            units_root: units_root.into(),
            mock_cache: DashMap::new(),
        }
    }

    pub fn unit_dir(&self, unit: &SourceUnit) -> PathBuf {
        self.units_root.join(unit.unit_id())
    }

    /// Describe the isolation build for `unit`, targeting `target` when given.
    ///
    /// Never fails: dependencies whose members cannot be determined get a
    /// best-effort mock and a `MockIncomplete` warning.
    pub fn describe(&self, unit: &SourceUnit, target: Option<&Function>) -> IsolationUnit {
        let unit_id = unit.unit_id();
        let search_from = unit.path.parent();
        let mut mocks = BTreeMap::new();
        let mut resolutions = BTreeMap::new();
        let mut warnings = Vec::new();

        for dependency in &unit.dependencies {
            if unit.is_target_type(&dependency.type_name) {
                continue;
            }

            let real_path = self
                .provider
                .resolve_include(&dependency.include, search_from);
            let real = real_path.as_deref().and_then(|path| self.read_header(path));
            let referenced = unit.bindings.values().any(|t| t == &dependency.type_name);
            let declares_class = real
                .as_ref()
                .is_some_and(|d| d.class(&dependency.type_name).is_some());

            if let (Some(path), false, false) = (&real_path, declares_class, referenced) {
                debug!(
                    unit = %unit_id,
                    dependency = %dependency.type_name,
                    header = %path.display(),
                    "no class to replace, using real header"
                );
                resolutions.insert(
                    dependency.type_name.clone(),
                    DependencyResolution::PassThrough {
                        header: path.clone(),
                    },
                );
                continue;
            }

            let spec = self.mock_for(unit, &unit_id, dependency, real.as_ref(), real_path.is_none());
            if let Some(reason) = &spec.incomplete_reason {
                warn!(unit = %unit_id, dependency = %dependency.type_name, %reason, "incomplete mock");
                warnings.push(IterationFailure::MockIncomplete {
                    dependency: dependency.type_name.clone(),
                    reason: reason.clone(),
                });
            }
            resolutions.insert(dependency.type_name.clone(), DependencyResolution::Mocked);
            mocks.insert(dependency.type_name.clone(), (*spec).clone());
        }

        IsolationUnit {
            unit_dir: self.units_root.join(&unit_id),
            unit_id,
            original_source: unit.path.clone(),
            target_header: unit.header.clone(),
            target_function: target.map(Function::qualified_name),
            mocks,
            resolutions,
            warnings,
        }
    }

    /// Write mocks and staged target files, purging the previous iteration's
    /// mocks, staged copies and build artifacts first.
    pub async fn materialize(&self, isolation: &IsolationUnit) -> Result<()> {
        for dir in [
            isolation.mock_dir(),
            isolation.target_dir(),
            isolation.build_dir(),
        ] {
            purge_dir(&dir).await?;
        }

        for spec in isolation.mocks.values() {
            let path = isolation.mock_dir().join(mock_relative_path(&spec.include));
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    CovforgeError::io(format!("Failed to create {}", parent.display()), e)
                })?;
            }
            tokio::fs::write(&path, &spec.header_text).await.map_err(|e| {
                CovforgeError::io(format!("Failed to write mock {}", path.display()), e)
            })?;
        }

        copy_into(&isolation.original_source, &isolation.target_dir()).await?;
        if let Some(header) = &isolation.target_header {
            copy_into(header, &isolation.target_dir()).await?;
        }

        debug!(
            unit = %isolation.unit_id,
            mocks = isolation.mocks.len(),
            dir = %isolation.unit_dir.display(),
            "isolation unit materialized"
        );
        Ok(())
    }

    fn read_header(&self, path: &Path) -> Option<HeaderDeclarations> {
        let text = std::fs::read_to_string(path).ok()?;
        match self.provider.parse_header(&text) {
            Ok(decls) => Some(decls),
            Err(e) => {
                debug!(header = %path.display(), error = %e, "header parse failed");
                None
            }
        }
    }

    fn mock_for(
        &self,
        unit: &SourceUnit,
        unit_id: &str,
        dependency: &Dependency,
        real: Option<&HeaderDeclarations>,
        header_missing: bool,
    ) -> Arc<MockSpec> {
        let required = mocks::required_members(unit, &dependency.type_name);
        let inputs = mocks::MockInputs {
            dependency,
            required: &required,
            real,
            header_missing,
        };
        let key = (unit_id.to_string(), inputs.fingerprint());
        self.mock_cache
            .entry(key)
            .or_insert_with(|| Arc::new(mocks::synthesize(&inputs)))
            .clone()
    }
}

/// Include spelling reduced to components that stay inside the mock directory
fn mock_relative_path(include: &str) -> PathBuf {
    Path::new(include)
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

pub(crate) async fn purge_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(CovforgeError::io(
                format!("Failed to purge {}", dir.display()),
                e,
            ))
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CovforgeError::io(format!("Failed to create {}", dir.display()), e))
}

async fn copy_into(file: &Path, dir: &Path) -> Result<()> {
    let name = file.file_name().ok_or_else(|| {
        CovforgeError::validation(format!("Not a file path: {}", file.display()))
    })?;
    let dest = dir.join(name);
    tokio::fs::copy(file, &dest).await.map_err(|e| {
        CovforgeError::io(
            format!("Failed to stage {} into {}", file.display(), dir.display()),
            e,
        )
    })?;
    Ok(())
}
