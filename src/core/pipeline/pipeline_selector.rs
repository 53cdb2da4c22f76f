//! Strategy selection over ranked gaps.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::bayesian::{CoveragePredictor, PlateauDetector};
use crate::core::config::{CovforgeConfig, StrategyConfig};
use crate::detectors::coverage::CoverageRecord;
use crate::detectors::gaps::{GapItem, GapReport, Strategy};
use crate::lang::common::SourceUnit;

/// What the loop will ask the generator for next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub strategy: Strategy,
    /// Qualified name of the targeted function
    pub function: String,
    /// Gaps of `strategy` inside `function`, most valuable first; empty for a
    /// fallback selection
    pub gaps: Vec<GapItem>,
    pub confidence: f64,
    /// Impact times confidence of the leading gap
    pub score: f64,
}

/// Picks the highest-value actionable strategy for the next iteration.
///
/// A strategy is actionable when it is enabled, not plateaued, and the
/// predictor's confidence in it exceeds the configured threshold.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    strategies: StrategyConfig,
    confidence_threshold: f64,
}

impl StrategySelector {
    pub fn new(strategies: StrategyConfig, confidence_threshold: f64) -> Self {
        Self {
            strategies,
            confidence_threshold,
        }
    }

    pub fn from_config(config: &CovforgeConfig) -> Self {
        Self::new(
            config.strategies.clone(),
            config.session.confidence_threshold,
        )
    }

    /// Enabled strategies in default priority order
    pub fn enabled(&self) -> Vec<Strategy> {
        Strategy::ALL
            .into_iter()
            .filter(|s| self.strategies.is_enabled(*s))
            .collect()
    }

    /// Enabled, non-plateaued strategies by descending confidence
    pub fn ranking(
        &self,
        predictor: &dyn CoveragePredictor,
        plateau: &PlateauDetector,
    ) -> Vec<(Strategy, f64)> {
        let mut ranking: Vec<(Strategy, f64)> = self
            .enabled()
            .into_iter()
            .filter(|s| !plateau.is_plateaued(*s))
            .map(|s| (s, predictor.strategy_confidence(s)))
            .collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranking
    }

    fn actionable_confidence(
        &self,
        strategy: Strategy,
        predictor: &dyn CoveragePredictor,
        plateau: &PlateauDetector,
    ) -> Option<f64> {
        if !self.strategies.is_enabled(strategy) || plateau.is_plateaued(strategy) {
            return None;
        }
        let confidence = predictor.strategy_confidence(strategy);
        (confidence > self.confidence_threshold).then_some(confidence)
    }

    /// Choose the best gap in `report`; `None` when every gap is gated out
    pub fn select(
        &self,
        report: &GapReport,
        predictor: &dyn CoveragePredictor,
        plateau: &PlateauDetector,
    ) -> Option<Selection> {
        let mut best: Option<(&GapItem, f64, f64)> = None;
        for item in &report.items {
            let Some(confidence) = self.actionable_confidence(item.strategy, predictor, plateau)
            else {
                debug!(strategy = %item.strategy, line = item.line, "gap gated out");
                continue;
            };
            let score = item.impact * confidence;
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((item, confidence, score));
            }
        }

        let (lead, confidence, score) = best?;
        let gaps: Vec<GapItem> = report
            .items
            .iter()
            .filter(|g| g.strategy == lead.strategy && g.function == lead.function)
            .take(self.strategies.max_gaps_per_request.max(1))
            .cloned()
            .collect();

        Some(Selection {
            strategy: lead.strategy,
            function: lead.function.clone(),
            gaps,
            confidence,
            score,
        })
    }

    /// Selection used when no gap is actionable while the target is unmet:
    /// the most trusted actionable strategy aimed at the least-covered
    /// function, with no gap list.
    pub fn fallback(
        &self,
        unit: &SourceUnit,
        record: &CoverageRecord,
        predictor: &dyn CoveragePredictor,
        plateau: &PlateauDetector,
    ) -> Option<Selection> {
        let (strategy, confidence) = self
            .ranking(predictor, plateau)
            .into_iter()
            .find(|(_, c)| *c > self.confidence_threshold)?;

        let mut target: Option<(String, f64)> = None;
        for function in &unit.functions {
            let name = function.qualified_name();
            let coverage = record.function_coverage(&name);
            if target.as_ref().map_or(true, |(_, c)| coverage < *c) {
                target = Some((name, coverage));
            }
        }
        let (function, _) = target?;

        Some(Selection {
            strategy,
            function,
            gaps: Vec::new(),
            confidence,
            score: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bayesian::{BayesianPredictor, Observation, StructuralFeatures};
    use crate::lang::common::fixtures::{function, unit};

    fn gap(function: &str, strategy: Strategy, line: usize, impact: f64) -> GapItem {
        GapItem {
            function: function.to_string(),
            strategy,
            line,
            description: format!("{strategy} gap at {line}"),
            impact,
            function_coverage: 50.0,
            uncovered_arms: Vec::new(),
        }
    }

    fn report(items: Vec<GapItem>) -> GapReport {
        GapReport {
            items,
            needs_simpler_tests: false,
        }
    }

    fn selector() -> StrategySelector {
        StrategySelector::new(StrategyConfig::default(), 0.3)
    }

    fn fail(predictor: &mut BayesianPredictor, strategy: Strategy) {
        predictor.observe(&Observation {
            strategy: Some(strategy),
            features: StructuralFeatures::default(),
            achieved_coverage: None,
            delta: 0.0,
        });
    }

    #[test]
    fn highest_impact_times_confidence_wins() {
        let predictor = BayesianPredictor::default();
        let plateau = PlateauDetector::new(3, 0.5);
        let report = report(vec![
            gap("Program::run", Strategy::Path, 3, 0.6),
            gap("Program::run", Strategy::Branch, 4, 0.5),
            gap("Program::run", Strategy::Branch, 8, 0.4),
            gap("Program::stop", Strategy::Branch, 20, 0.3),
        ]);

        let selection = selector().select(&report, &predictor, &plateau).unwrap();
        // branch 0.5 * 0.8 beats path 0.6 * 0.6
        assert_eq!(selection.strategy, Strategy::Branch);
        assert_eq!(selection.function, "Program::run");
        let lines: Vec<usize> = selection.gaps.iter().map(|g| g.line).collect();
        assert_eq!(lines, vec![4, 8]);
    }

    #[test]
    fn plateaued_strategy_is_skipped() {
        let predictor = BayesianPredictor::default();
        let mut plateau = PlateauDetector::new(1, 0.5);
        plateau.record(Strategy::Branch, 0.0);
        let report = report(vec![
            gap("Program::run", Strategy::Branch, 4, 0.9),
            gap("Program::run", Strategy::Path, 3, 0.2),
        ]);

        let selection = selector().select(&report, &predictor, &plateau).unwrap();
        assert_eq!(selection.strategy, Strategy::Path);
    }

    #[test]
    fn low_confidence_strategy_is_gated() {
        let mut predictor = BayesianPredictor::default();
        fail(&mut predictor, Strategy::Boundary);
        fail(&mut predictor, Strategy::Boundary);
        let plateau = PlateauDetector::new(3, 0.5);
        let report = report(vec![gap("Program::run", Strategy::Boundary, 5, 0.25)]);

        assert!(predictor.strategy_confidence(Strategy::Boundary) < 0.3);
        assert!(selector().select(&report, &predictor, &plateau).is_none());
    }

    #[test]
    fn gap_list_is_capped() {
        let predictor = BayesianPredictor::default();
        let plateau = PlateauDetector::new(3, 0.5);
        let items = (0..10)
            .map(|i| gap("Program::run", Strategy::Branch, 10 + i, 0.5))
            .collect();
        let selector = StrategySelector::new(
            StrategyConfig {
                max_gaps_per_request: 3,
                ..StrategyConfig::default()
            },
            0.3,
        );
        let selection = selector.select(&report(items), &predictor, &plateau).unwrap();
        assert_eq!(selection.gaps.len(), 3);
    }

    #[test]
    fn fallback_targets_least_covered_function() {
        let predictor = BayesianPredictor::default();
        let plateau = PlateauDetector::new(3, 0.5);
        let source = unit(vec![
            function("run", Some("Program"), 1, 5),
            function("stop", Some("Program"), 7, 9),
        ]);
        let record = CoverageRecord::empty(source.unit_id(), 2);

        let selection = selector()
            .fallback(&source, &record, &predictor, &plateau)
            .unwrap();
        assert_eq!(selection.strategy, Strategy::Branch);
        assert_eq!(selection.function, "Program::run");
        assert!(selection.gaps.is_empty());
    }

    #[test]
    fn ranking_orders_by_confidence_and_drops_plateaued() {
        let predictor = BayesianPredictor::default();
        let mut plateau = PlateauDetector::new(1, 0.5);
        plateau.record(Strategy::Path, 0.1);
        let ranking = selector().ranking(&predictor, &plateau);
        let order: Vec<Strategy> = ranking.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, vec![Strategy::Branch, Strategy::Boundary]);
    }
}
