//! Coverage artifact parsing and per-unit coverage records.
//!
//! Parsers turn gcov, LCOV or Cobertura output into [`RawCoverage`]; [`rollup`]
//! maps the target source file's line and branch data onto the functions of a
//! [`SourceUnit`] to produce an immutable [`CoverageRecord`].

pub mod parsers;
pub mod types;

pub use parsers::{parse_cobertura, parse_gcov, parse_gcov_dir, parse_lcov, parse_report};
pub use types::*;

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::pipeline::IterationFailure;
use crate::lang::common::SourceUnit;


/// Build a [`CoverageRecord`] for `unit` from raw execution data.
///
/// Only the target source file contributes. Lines outside every function count
/// toward the file totals but not toward any per-function rollup. A crashed or
/// timed-out run still yields whatever coverage it flushed before dying.
pub fn rollup(
    unit: &SourceUnit,
    raw: &RawCoverage,
    status: BuildStatus,
    iteration: usize,
    failure: Option<IterationFailure>,
) -> CoverageRecord {
    let unit_id = unit.unit_id();
    let mut record = CoverageRecord::empty(unit_id, unit.functions.len());
    record.iteration = iteration;
    record.status = status;
    record.failure = failure;

    let Some(file) = raw.file_for(&unit.path) else {
        debug!(unit = %unit.path.display(), "no coverage data for target source");
        return record;
    };

    let line_hits: BTreeMap<usize, u64> = file.lines.clone();
    let branch_taken: BTreeMap<usize, Vec<bool>> = file
        .branches
        .iter()
        .map(|(line, entries)| {
            (
                *line,
                entries.iter().map(|e| e.is_some_and(|n| n > 0)).collect(),
            )
        })
        .collect();

    let lines_covered = line_hits.values().filter(|h| **h > 0).count();
    record.lines = Counts::new(lines_covered, line_hits.len());

    let (branches_covered, branches_total) = branch_taken
        .values()
        .fold((0, 0), |(covered, total), flags| {
            (
                covered + flags.iter().filter(|t| **t).count(),
                total + flags.len(),
            )
        });
    record.branches = Counts::new(branches_covered, branches_total);

    let mut functions_covered = 0;
    for function in &unit.functions {
        let mut lines = Counts::default();
        for (_, hits) in line_hits.range(function.span.start..=function.span.end) {
            lines.add(Counts::new(usize::from(*hits > 0), 1));
        }
        let mut branches = Counts::default();
        for (_, flags) in branch_taken.range(function.span.start..=function.span.end) {
            let taken = flags.iter().filter(|t| **t).count();
            branches.add(Counts::new(taken, flags.len()));
        }
        let executed = lines.covered > 0;
        if executed {
            functions_covered += 1;
        }
        record.per_function.insert(
            function.qualified_name(),
            FunctionCoverage {
                lines,
                branches,
                executed,
            },
        );
    }
    record.functions = Counts::new(functions_covered, unit.functions.len());
    record.line_hits = line_hits;
    record.branch_taken = branch_taken;
    record
}
