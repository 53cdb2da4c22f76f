//! # Covforge: Iterative Coverage Improvement for C++
//!
//! Covforge raises unit-test coverage of an existing, unmodifiable C++ codebase.
//! For each source file it isolates the code under test behind synthesized mock
//! headers, asks an external generator for tests, compiles and measures them with
//! gcov instrumentation, and keeps iterating on the most valuable coverage gaps
//! until the target is met or the improvement strategies plateau.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     API / Project Engine                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Improvement Loop │ Gap Analyzer │ Predictor │ Isolation      │
//! │                  │              │           │ Builder        │
//! │ • State machine  │ • Branch     │ • Bayesian│ • Mock headers │
//! │ • Selector       │ • Path       │ • Plateau │ • Include order│
//! │ • Outcome log    │ • Boundary   │           │                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Toolchain (g++/gcov)  │  Coverage parsers  │  C++ structure  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use covforge::{CoverageEngine, CovforgeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = CovforgeConfig::default();
//!     config.session.target_coverage = 85.0;
//!
//!     let engine = CoverageEngine::with_defaults(config)?;
//!     let summary = engine.run_project(&["src/Program/Program.cpp".into()]).await?;
//!
//!     println!("Best line coverage: {:.1}%", summary.line_coverage_percent());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core control loop, prediction, and configuration
pub mod core {
    //! Error taxonomy, configuration, prediction, and the improvement loop.

    pub mod bayesian;
    pub mod config;
    pub mod errors;
    pub mod pipeline;
}

// Coverage measurement and gap analysis
pub mod detectors {
    //! Coverage parsing, record rollups, and gap analysis.

    pub mod coverage;
    pub mod gaps;
}

// Language-specific structure extraction
pub mod lang {
    //! Source structure extraction for C++ translation units.

    pub mod common;
    pub mod cpp;
}

// Isolation unit assembly
pub mod isolation;

// Compiler and coverage toolchain integration
pub mod toolchain;

// External test generation
pub mod generator;

// I/O, journaling, and reports
pub mod io {
    //! Source discovery, outcome journaling, and report persistence.

    pub mod cmake;
    pub mod discovery;
    pub mod journal;
    pub mod reports;
}

// Public API and engine interface
pub mod api {
    //! High-level engine interface and result aggregation.

    pub mod engine;
    pub mod results;
}

// Re-export primary types for convenience
pub use api::engine::CoverageEngine;
pub use api::results::{ProjectSummary, SessionReport};
pub use core::config::CovforgeConfig;
pub use core::errors::{CovforgeError, Result, ResultExt};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
