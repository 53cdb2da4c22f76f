//! Improvement Loop Module
//!
//! Drives one source unit through repeated analyze → improve → measure →
//! evaluate cycles until coverage converges.
//!
//! ## Key Components
//!
//! - **ImprovementLoop**: the per-unit state machine and its collaborators
//! - **StrategySelector**: picks the next strategy and gaps from a ranked report
//! - **IterationState**: iteration count, coverage, plateau counter, ranking
//! - **SessionOutcome**: final and best records plus the outcome history
//!
//! ## Usage
//!
//! ```ignore
//! use covforge::core::pipeline::{ImprovementLoop, LoopServices};
//!
//! let outcome = ImprovementLoop::new(&config, services).run(&unit).await?;
//! println!("{} after {} iterations", outcome.termination, outcome.iterations);
//! ```

pub use pipeline_executor::{ImprovementLoop, LoopServices, ProgressCallback};
pub use pipeline_results::{IterationFailure, SessionOutcome, StrategyOutcome, TerminationReason};
pub use pipeline_selector::{Selection, StrategySelector};
pub use pipeline_state::{metric_value, IterationState, LoopState};

mod pipeline_executor;
mod pipeline_results;
mod pipeline_selector;
mod pipeline_state;
