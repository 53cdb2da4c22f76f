//! Impact scoring and ranking for coverage gaps.
//!
//! Scores share one scale so gaps from different strategies can be ranked
//! together: a branch gap with one uncovered arm scores 0.5 before weighting.

use std::cmp::Ordering;

use super::types::GapItem;

/// Boundary gaps cannot be confirmed from line data alone, so they rank below
/// branch and path gaps of the same size.
pub const BOUNDARY_DAMPING: f64 = 0.5;

/// Saturating score for a number of uncovered arms: 1 → 0.5, 2 → 0.67, 3 → 0.75.
pub fn arm_score(uncovered_arms: usize) -> f64 {
    let x = uncovered_arms as f64;
    x / (x + 1.0)
}

/// Normalize complexity to a 0-1 score using exponential decay.
pub fn normalize_complexity_score(complexity: f64) -> f64 {
    1.0 - (-complexity / 10.0).exp()
}

/// Path gap impact: complexity-driven, scaled up for poorly covered functions.
pub fn path_score(complexity: u32, function_coverage_percent: f64) -> f64 {
    let uncovered = (1.0 - function_coverage_percent / 100.0).clamp(0.0, 1.0);
    normalize_complexity_score(f64::from(complexity)) * (0.5 + 0.5 * uncovered)
}

/// Boundary gap impact before weighting
pub fn boundary_score() -> f64 {
    arm_score(1) * BOUNDARY_DAMPING
}

/// Order gaps by impact, breaking ties toward the least-covered function,
/// then by function name, line and strategy so the order is total.
pub fn rank(gaps: &mut [GapItem]) {
    gaps.sort_by(|a, b| {
        b.impact
            .partial_cmp(&a.impact)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.function_coverage
                    .partial_cmp(&b.function_coverage)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.function.cmp(&b.function))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.strategy.cmp(&b.strategy))
    });
}
