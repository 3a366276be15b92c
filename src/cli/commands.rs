//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fabric - config synthesis and deployment for NX-OS and EOS fabrics.
#[derive(Parser, Debug)]
#[command(name = "fabric")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the settings file.
    #[arg(short, long, global = true, env = "FABRIC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate settings and inventory.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the resolved variables of one device.
    Resolve {
        /// Device name.
        device: String,
    },

    /// Render configs without pushing.
    Render {
        /// Limit to these devices (repeatable).
        #[arg(short, long)]
        device: Vec<String>,

        /// Write `<device>.cfg` files into this directory.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Show the push plan against stored baselines.
    Plan {
        /// Limit to these devices (repeatable).
        #[arg(short, long)]
        device: Vec<String>,

        /// Show block-level changes.
        #[arg(long)]
        detailed: bool,
    },

    /// Push, verify and record.
    Deploy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Limit to these devices (repeatable).
        #[arg(short, long)]
        device: Vec<String>,
    },

    /// Show the last run report.
    Status,

    /// Show link adjacency across the inventory.
    Links,

    /// Inspect or repair the content store.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Content store subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show stored baselines and the run lock.
    Show,

    /// Release the run lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Release whatever lock is held.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy_with_devices() {
        let cli = Cli::try_parse_from([
            "fabric",
            "deploy",
            "--yes",
            "--device",
            "dub-st1-lf1",
            "-d",
            "dub-st1-sp1",
        ])
        .expect("parse");

        match cli.command {
            Commands::Deploy { yes, device } => {
                assert!(yes);
                assert_eq!(device, vec!["dub-st1-lf1", "dub-st1-sp1"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["fabric", "status", "--output", "json", "-v", "--log-json"])
            .expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.verbose);
        assert!(cli.log_json);
    }

    #[test]
    fn test_resolve_requires_device() {
        assert!(Cli::try_parse_from(["fabric", "resolve"]).is_err());
    }
}
