//! CLI Module Organization
//!
//! - args: CLI argument structures and value enums
//! - commands: command execution and configuration layering
//! - output: tables, progress bars and styled summaries

pub mod args;
pub mod commands;
pub mod output;

pub use args::*;
pub use commands::*;
