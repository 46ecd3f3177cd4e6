//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::operations::Operation;
use crate::trampoline::DEFAULT_MAX_ATTEMPTS;

/// Nimbus - lifecycle operations for declared `OpenStack` resources.
#[derive(Parser, Debug)]
#[command(name = "nimbus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the node document.
    #[arg(short, long, global = true, env = "NIMBUS_NODE")]
    pub node: Option<PathBuf>,

    /// Directory of the runtime-property store (defaults to `.nimbus` next
    /// to the node document).
    #[arg(long, global = true, env = "NIMBUS_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

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
    /// Run one lifecycle operation on the node.
    Run {
        /// Operation name (create, start, stop, delete, establish, ...).
        operation: Operation,

        /// Relationship index for establish/unlink.
        #[arg(short, long, default_value = "0")]
        relationship: usize,

        /// Re-invoke after retry requests until the operation settles.
        #[arg(short, long)]
        follow: bool,

        /// Maximum invocations with --follow.
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,
    },

    /// Validate the node document and run creation validation.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,

        /// Only check the document; make no provider calls.
        #[arg(long)]
        offline: bool,
    },

    /// Inspect or clear stored runtime properties.
    Props {
        /// Props subcommand.
        #[command(subcommand)]
        command: PropsCommands,
    },
}

/// Runtime-property subcommands.
#[derive(Subcommand, Debug)]
pub enum PropsCommands {
    /// Show the node's stored properties.
    Show,

    /// Delete the node's stored properties.
    Clear {
        /// Required to actually delete.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
