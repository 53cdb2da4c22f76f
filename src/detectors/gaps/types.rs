use serde::{Deserialize, Serialize};
use std::fmt;

/// Gap-analysis and test-targeting approach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Branch,
    Path,
    Boundary,
}

impl Strategy {
    /// All strategies in default priority order
    pub const ALL: [Strategy; 3] = [Strategy::Branch, Strategy::Path, Strategy::Boundary];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Branch => "branch",
            Strategy::Path => "path",
            Strategy::Boundary => "boundary",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = crate::core::errors::CovforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "branch" => Ok(Strategy::Branch),
            "path" => Ok(Strategy::Path),
            "boundary" => Ok(Strategy::Boundary),
            other => Err(crate::core::errors::CovforgeError::validation(format!(
                "Unknown strategy '{other}'"
            ))),
        }
    }
}

/// A ranked, strategy-tagged coverage deficiency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapItem {
    /// Qualified name of the function the gap lies in
    pub function: String,
    pub strategy: Strategy,
    /// Line of the branch site, boundary expression, or function start
    pub line: usize,
    pub description: String,
    /// Estimated impact; higher is more valuable
    pub impact: f64,
    /// Line coverage of `function` when the gap was found
    pub function_coverage: f64,
    /// Labels of arms with zero hits (branch gaps only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncovered_arms: Vec<String>,
}

/// Ordered gaps plus the compile-failure reclassification signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub items: Vec<GapItem>,
    /// Latest candidate failed to compile for reasons simpler tests may avoid
    pub needs_simpler_tests: bool,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn by_strategy(&self, strategy: Strategy) -> impl Iterator<Item = &GapItem> {
        self.items.iter().filter(move |g| g.strategy == strategy)
    }

    pub fn count(&self, strategy: Strategy) -> usize {
        self.by_strategy(strategy).count()
    }
}
