//! CLI module for the nimbus trampoline.
//!
//! This module provides the command-line interface for running lifecycle
//! operations on a single node.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, PropsCommands};
pub use output::OutputFormatter;
