//! CLI module for the fabric deployment tool.
//!
//! This module provides the command-line interface for rendering,
//! planning and deploying fabric configs.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
