//! Multi-strategy coverage gap analysis.
//!
//! The analyzer walks the structure of a [`SourceUnit`] against its latest
//! [`CoverageRecord`] and produces [`GapItem`]s for three strategies:
//!
//! - **branch**: a branch site with at least one arm that was never taken;
//! - **path**: a function whose cyclomatic complexity exceeds the configured
//!   threshold, regardless of branch completeness;
//! - **boundary**: an executed boundary-sensitive expression that no outside
//!   signal has confirmed as exercised at its edge values.

pub mod scoring;
pub mod types;

pub use types::{GapItem, GapReport, Strategy};

use std::collections::BTreeSet;

use tracing::debug;

use crate::core::config::StrategyConfig;
use crate::detectors::coverage::CoverageRecord;
use crate::lang::common::{BranchKind, BranchSite, Function, SourceUnit};

#[cfg(test)]
mod tests;

/// `(qualified function name, line)` of a boundary expression known to have
/// been exercised with edge inputs.
pub type BoundaryKey = (String, usize);

/// Compiler diagnostics that usually mean the generated test reached for API
/// the isolated build does not provide.
const SIMPLER_TEST_MARKERS: &[&str] = &[
    "was not declared in this scope",
    "has no member named",
    "no matching function for call",
    "undefined reference to",
    "is private within this context",
    "incomplete type",
    "no member named",
    "use of undeclared identifier",
];

/// Side inputs for one analysis pass
#[derive(Debug, Default, Clone, Copy)]
pub struct GapContext<'a> {
    /// Boundary expressions an external signal marked as satisfied
    pub confirmed_boundaries: Option<&'a BTreeSet<BoundaryKey>>,
    /// Compiler output of the most recent rejected candidate, if any
    pub compile_errors: Option<&'a str>,
}

/// Produces ranked [`GapItem`]s for enabled strategies
#[derive(Debug, Clone)]
pub struct GapAnalyzer {
    config: StrategyConfig,
}

impl GapAnalyzer {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Analyze `record` against `unit` and return gaps in priority order.
    ///
    /// Every returned item names a function of `unit`. Ordering is total and
    /// deterministic for identical inputs.
    pub fn analyze(
        &self,
        unit: &SourceUnit,
        record: &CoverageRecord,
        context: GapContext<'_>,
    ) -> GapReport {
        let mut items = Vec::new();

        for function in &unit.functions {
            let name = function.qualified_name();
            let coverage = record.function_coverage(&name);

            if self.config.is_enabled(Strategy::Branch) {
                items.extend(self.branch_gaps(function, &name, coverage, record));
            }
            if self.config.is_enabled(Strategy::Path) {
                items.extend(self.path_gap(function, &name, coverage));
            }
            if self.config.is_enabled(Strategy::Boundary) {
                items.extend(self.boundary_gaps(function, &name, coverage, record, context));
            }
        }

        scoring::rank(&mut items);

        let simpler = context.compile_errors.is_some_and(|errors| needs_simpler_tests(errors));

        debug!(
            unit = %unit.path.display(),
            gaps = items.len(),
            needs_simpler_tests = simpler,
            "gap analysis complete"
        );

        GapReport {
            items,
            needs_simpler_tests: simpler,
        }
    }

    fn branch_gaps(
        &self,
        function: &Function,
        name: &str,
        coverage: f64,
        record: &CoverageRecord,
    ) -> Vec<GapItem> {
        let weight = self.config.weight(Strategy::Branch);
        function
            .branch_sites
            .iter()
            .filter_map(|site| {
                let uncovered: Vec<String> = arm_hits(site, record)
                    .into_iter()
                    .zip(&site.arms)
                    .filter(|(hits, _)| *hits == Some(0))
                    .map(|(_, arm)| arm.label.clone())
                    .collect();
                if uncovered.is_empty() {
                    return None;
                }
                Some(GapItem {
                    function: name.to_string(),
                    strategy: Strategy::Branch,
                    line: site.line,
                    description: format!(
                        "{} at line {} (`{}`): arm(s) {} never taken",
                        kind_label(site.kind),
                        site.line,
                        site.condition,
                        uncovered.join(", ")
                    ),
                    impact: weight * scoring::arm_score(uncovered.len()),
                    function_coverage: coverage,
                    uncovered_arms: uncovered,
                })
            })
            .collect()
    }

    fn path_gap(&self, function: &Function, name: &str, coverage: f64) -> Option<GapItem> {
        if function.complexity <= self.config.path_complexity_threshold {
            return None;
        }
        Some(GapItem {
            function: name.to_string(),
            strategy: Strategy::Path,
            line: function.span.start,
            description: format!(
                "{name} has cyclomatic complexity {} (threshold {}); combine conditions across {} branch sites",
                function.complexity,
                self.config.path_complexity_threshold,
                function.branch_sites.len()
            ),
            impact: self.config.weight(Strategy::Path)
                * scoring::path_score(function.complexity, coverage),
            function_coverage: coverage,
            uncovered_arms: Vec::new(),
        })
    }

    fn boundary_gaps(
        &self,
        function: &Function,
        name: &str,
        coverage: f64,
        record: &CoverageRecord,
        context: GapContext<'_>,
    ) -> Vec<GapItem> {
        let weight = self.config.weight(Strategy::Boundary);
        function
            .boundaries
            .iter()
            .filter(|expr| record.executed(expr.line))
            .filter(|expr| {
                context
                    .confirmed_boundaries
                    .map_or(true, |confirmed| !confirmed.contains(&(name.to_string(), expr.line)))
            })
            .map(|expr| GapItem {
                function: name.to_string(),
                strategy: Strategy::Boundary,
                line: expr.line,
                description: format!(
                    "`{}` at line {} is executed but edge values are unverified",
                    expr.text, expr.line
                ),
                impact: weight * scoring::boundary_score(),
                function_coverage: coverage,
                uncovered_arms: Vec::new(),
            })
            .collect()
    }
}

/// Hit counts per arm of `site`, `None` where the data cannot tell.
///
/// Arms spelled on their own line read that line's count. A missing `else`
/// or `default` gets whatever the site executed beyond its explicit arms.
/// Arms sharing the condition's line fall back to gcov's per-branch flags,
/// but only when gcov reports exactly one branch per arm.
pub fn arm_hits(site: &BranchSite, record: &CoverageRecord) -> Vec<Option<u64>> {
    let gcov = record
        .branch_taken
        .get(&site.line)
        .filter(|flags| flags.len() == site.arms.len());
    let from_gcov = |idx: usize| gcov.and_then(|flags| flags.get(idx)).map(|t| u64::from(*t));

    let mut hits: Vec<Option<u64>> = site
        .arms
        .iter()
        .enumerate()
        .map(|(idx, arm)| match arm.line {
            Some(line) if line != site.line => record.hits(line).or_else(|| from_gcov(idx)),
            Some(_) => from_gcov(idx),
            None => None,
        })
        .collect();

    if matches!(site.kind, BranchKind::If | BranchKind::Switch) {
        if let Some(site_hits) = record.hits(site.line) {
            let explicit: Option<u64> = site
                .arms
                .iter()
                .zip(&hits)
                .filter(|(arm, _)| !arm.is_implicit())
                .map(|(_, h)| *h)
                .sum();
            for (idx, arm) in site.arms.iter().enumerate() {
                if arm.is_implicit() {
                    hits[idx] = explicit.map(|e| site_hits.saturating_sub(e));
                }
            }
        }
    }

    for (idx, arm) in site.arms.iter().enumerate() {
        if arm.is_implicit() && hits[idx].is_none() && site.kind != BranchKind::Loop {
            hits[idx] = from_gcov(idx);
        }
    }
    hits
}

/// Whether compiler output suggests asking for simpler, narrower tests
pub fn needs_simpler_tests(compile_errors: &str) -> bool {
    SIMPLER_TEST_MARKERS
        .iter()
        .any(|marker| compile_errors.contains(marker))
}

fn kind_label(kind: BranchKind) -> &'static str {
    match kind {
        BranchKind::If => "if",
        BranchKind::Switch => "switch",
        BranchKind::Ternary => "conditional",
        BranchKind::Loop => "loop",
        BranchKind::Try => "try",
    }
}
