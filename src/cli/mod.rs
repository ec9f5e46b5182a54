//! Command-line interface for article-forge.
//!
//! Provides commands for running the pipeline, inspecting and cancelling
//! jobs, and managing agent personas.

mod commands;
pub mod personas;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
