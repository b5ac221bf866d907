//! Command-line interface for debate-forge.
//!
//! Provides commands for running a debate and inspecting the persona catalog.

mod commands;

pub use commands::{parse_cli, parse_persona_spec, run, run_with_cli, Cli, Commands};
