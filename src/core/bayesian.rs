//! Coverage prediction with Bayesian shrinkage and plateau detection.
//!
//! The predictor estimates the line coverage a function can reach from its
//! structure alone, then refines that estimate with coverage actually achieved
//! by structurally similar functions during the session. Strategy effectiveness
//! is tracked with Beta priors so a strategy that keeps failing loses the
//! confidence it needs to pass the selector's gate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::PlateauConfig;
use crate::detectors::gaps::Strategy;
use crate::lang::common::{Function, SourceUnit};

/// Confidence levels for variance estimation based on sample characteristics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VarianceConfidence {
    /// >50 samples with good variance (high statistical power)
    High,
    /// 10-50 samples with some variance (moderate statistical power)
    Medium,
    /// 5-10 samples with minimal variance (low statistical power)
    Low,
    /// 2-5 samples (very low statistical power)
    VeryLow,
    /// <2 samples (insufficient for inference)
    Insufficient,
}

impl VarianceConfidence {
    /// Get the numeric confidence score (0.0-1.0)
    pub fn score(self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.7,
            Self::Low => 0.5,
            Self::VeryLow => 0.3,
            Self::Insufficient => 0.1,
        }
    }

    /// Determine confidence from sample size and spread.
    ///
    /// Unlike feature normalization, a tight spread is good news here: it means
    /// similar functions keep landing on the same coverage.
    pub fn from_samples(n_samples: usize, variance: f64, threshold: f64) -> Self {
        if n_samples < 2 {
            Self::Insufficient
        } else if n_samples >= 50 && variance <= threshold {
            Self::High
        } else if n_samples >= 10 && variance <= threshold * 2.0 {
            Self::Medium
        } else if n_samples >= 5 && variance <= threshold * 4.0 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

/// Beta prior over "an iteration with this strategy gains coverage"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyPrior {
    pub strategy: Strategy,
    /// Successes + prior pseudo-count
    pub alpha: f64,
    /// Failures + prior pseudo-count
    pub beta: f64,
}

impl StrategyPrior {
    pub fn new(strategy: Strategy, alpha: f64, beta: f64) -> Self {
        Self {
            strategy,
            alpha,
            beta,
        }
    }

    /// Default priors: branch gaps are the most reliably closed, boundary the least
    pub fn default_for(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Branch => Self::new(strategy, 4.0, 1.0),
            Strategy::Path => Self::new(strategy, 3.0, 2.0),
            Strategy::Boundary => Self::new(strategy, 2.0, 3.0),
        }
    }

    /// Posterior mean of the Beta distribution
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn variance(&self) -> f64 {
        let ab = self.alpha + self.beta;
        (self.alpha * self.beta) / (ab * ab * (ab + 1.0))
    }

    pub fn update(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }
}

/// Structure-derived inputs to the predictor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralFeatures {
    pub branch_count: usize,
    pub complexity: u32,
    pub param_count: usize,
    pub size_lines: usize,
}

impl StructuralFeatures {
    pub fn from_function(function: &Function) -> Self {
        Self {
            branch_count: function.branch_count(),
            complexity: function.complexity.max(1),
            param_count: function.params.len(),
            size_lines: function.size_lines,
        }
    }

    /// Complexity bucket used to pool observations of similar functions
    pub fn bucket(&self) -> ComplexityBucket {
        match self.complexity {
            0..=1 => ComplexityBucket::Trivial,
            2..=4 => ComplexityBucket::Simple,
            5..=9 => ComplexityBucket::Moderate,
            _ => ComplexityBucket::Complex,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBucket {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

/// Predicted achievable coverage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Percent, 0-100
    pub coverage: f64,
    /// 0-1
    pub confidence: f64,
    /// Observations that informed the estimate
    pub samples: usize,
}

/// Something learned from one measured iteration
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Strategy applied, `None` for the bootstrap baseline
    pub strategy: Option<Strategy>,
    pub features: StructuralFeatures,
    /// Function-level line coverage reached, `None` when nothing was measured
    pub achieved_coverage: Option<f64>,
    /// Change in the session's coverage metric
    pub delta: f64,
}

/// Pluggable coverage model.
///
/// Implementations must fold observations in without forgetting earlier ones
/// so estimates do not silently degrade as a session progresses.
pub trait CoveragePredictor: Send + Sync {
    /// Estimate achievable coverage for a function with these features
    fn predict(&self, features: &StructuralFeatures) -> Prediction;

    /// Confidence (0-1) that applying `strategy` will gain coverage
    fn strategy_confidence(&self, strategy: Strategy) -> f64;

    /// Incorporate a measured outcome
    fn observe(&mut self, observation: &Observation);

    /// Size-weighted estimate over every function of a unit
    fn predict_unit(&self, unit: &SourceUnit) -> Prediction {
        let mut weighted = 0.0;
        let mut weight = 0.0;
        let mut confidence = 1.0_f64;
        let mut samples = 0;
        for function in &unit.functions {
            let features = StructuralFeatures::from_function(function);
            let p = self.predict(&features);
            let w = features.size_lines.max(1) as f64;
            weighted += p.coverage * w;
            weight += w;
            confidence = confidence.min(p.confidence);
            samples += p.samples;
        }
        if weight == 0.0 {
            return Prediction {
                coverage: 100.0,
                confidence: VarianceConfidence::Insufficient.score(),
                samples: 0,
            };
        }
        Prediction {
            coverage: weighted / weight,
            confidence,
            samples,
        }
    }
}

/// Pseudo-observations the structural heuristic is worth
const PRIOR_STRENGTH: f64 = 3.0;

/// Spread (in squared percentage points) considered tight
const VARIANCE_THRESHOLD: f64 = 100.0;

/// Heuristic prediction shrunk toward per-bucket observed coverage
#[derive(Debug, Clone)]
pub struct BayesianPredictor {
    success_delta: f64,
    observations: BTreeMap<ComplexityBucket, Vec<f64>>,
    priors: BTreeMap<Strategy, StrategyPrior>,
}

impl BayesianPredictor {
    /// `success_delta` is the coverage gain an iteration needs to count as a
    /// strategy success; the plateau threshold is the natural choice.
    pub fn new(success_delta: f64) -> Self {
        let priors = Strategy::ALL
            .iter()
            .map(|s| (*s, StrategyPrior::default_for(*s)))
            .collect();
        Self {
            success_delta,
            observations: BTreeMap::new(),
            priors,
        }
    }

    pub fn from_plateau_config(config: &PlateauConfig) -> Self {
        Self::new(config.delta_threshold)
    }

    /// Cold-start estimate: coverage falls off with complexity and parameter count.
    pub fn structural_estimate(features: &StructuralFeatures) -> f64 {
        let extra = f64::from(features.complexity.saturating_sub(1));
        let param_penalty = 1.0 - 0.02 * features.param_count.min(5) as f64;
        (100.0 / (1.0 + 0.08 * extra) * param_penalty).clamp(0.0, 100.0)
    }

    pub fn prior(&self, strategy: Strategy) -> Option<&StrategyPrior> {
        self.priors.get(&strategy)
    }

    pub fn observation_count(&self) -> usize {
        self.observations.values().map(Vec::len).sum()
    }
}

impl Default for BayesianPredictor {
    fn default() -> Self {
        Self::from_plateau_config(&PlateauConfig::default())
    }
}

impl CoveragePredictor for BayesianPredictor {
    fn predict(&self, features: &StructuralFeatures) -> Prediction {
        let heuristic = Self::structural_estimate(features);
        let Some(values) = self
            .observations
            .get(&features.bucket())
            .filter(|v| !v.is_empty())
        else {
            let confidence = if features.complexity <= 1 {
                VarianceConfidence::VeryLow
            } else {
                VarianceConfidence::Insufficient
            };
            return Prediction {
                coverage: heuristic,
                confidence: confidence.score(),
                samples: 0,
            };
        };

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = if values.len() > 1 {
            values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        let posterior = (PRIOR_STRENGTH * heuristic + n * mean) / (PRIOR_STRENGTH + n);

        Prediction {
            coverage: posterior.clamp(0.0, 100.0),
            confidence: VarianceConfidence::from_samples(values.len(), variance, VARIANCE_THRESHOLD)
                .score(),
            samples: values.len(),
        }
    }

    fn strategy_confidence(&self, strategy: Strategy) -> f64 {
        self.priors
            .get(&strategy)
            .map_or(0.0, StrategyPrior::mean)
    }

    fn observe(&mut self, observation: &Observation) {
        if let Some(achieved) = observation.achieved_coverage {
            self.observations
                .entry(observation.features.bucket())
                .or_default()
                .push(achieved.clamp(0.0, 100.0));
        }

        if let Some(strategy) = observation.strategy {
            let success = observation.delta >= self.success_delta;
            let prior = self
                .priors
                .entry(strategy)
                .or_insert_with(|| StrategyPrior::default_for(strategy));
            prior.update(success);
            debug!(
                strategy = %strategy,
                delta = observation.delta,
                success,
                confidence = prior.mean(),
                "strategy prior updated"
            );
        }
    }
}

/// Tracks consecutive sub-threshold deltas per strategy
#[derive(Debug, Clone)]
pub struct PlateauDetector {
    window: usize,
    delta_threshold: f64,
    streaks: BTreeMap<Strategy, usize>,
}

impl PlateauDetector {
    pub fn new(window: usize, delta_threshold: f64) -> Self {
        Self {
            window: window.max(1),
            delta_threshold,
            streaks: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &PlateauConfig) -> Self {
        Self::new(config.window, config.delta_threshold)
    }

    /// Record one iteration's delta for `strategy`; returns true when the
    /// strategy has just reached (or remains at) a plateau.
    pub fn record(&mut self, strategy: Strategy, delta: f64) -> bool {
        let streak = self.streaks.entry(strategy).or_insert(0);
        if delta < self.delta_threshold {
            *streak += 1;
        } else {
            *streak = 0;
        }
        *streak >= self.window
    }

    pub fn is_plateaued(&self, strategy: Strategy) -> bool {
        self.streak(strategy) >= self.window
    }

    /// Current run of sub-threshold iterations for `strategy`
    pub fn streak(&self, strategy: Strategy) -> usize {
        self.streaks.get(&strategy).copied().unwrap_or(0)
    }

    pub fn all_plateaued(&self, strategies: &[Strategy]) -> bool {
        !strategies.is_empty() && strategies.iter().all(|s| self.is_plateaued(*s))
    }

    pub fn window(&self) -> usize {
        self.window
    }
}
