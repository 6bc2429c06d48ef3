//! CLI interface for Mull.

pub mod handlers;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mull - deep-thinking workflow orchestrator for MCP hosts
#[derive(Parser)]
#[command(name = "mull", version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML config file (builtin flows/templates when omitted)
    #[arg(long, env = "MULL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Extra tracing directive, e.g. "mull=debug"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start MCP server (stdio transport for host integration)
    Mcp,

    /// Validate the configuration and exit (non-zero on errors)
    Validate,

    /// List loaded thinking flows
    Flows,

    /// List loaded prompt templates
    Templates,

    /// Session management
    #[command(subcommand)]
    Sessions(SessionCommands),
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List persisted sessions, newest first
    List {
        /// Filter by status (active, completed, failed, expired)
        #[arg(long)]
        status: Option<String>,
        /// Maximum rows
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one session's full state
    Show {
        /// Session id
        session_id: String,
    },

    /// Delete one session and its history
    Delete {
        /// Session id
        session_id: String,
    },

    /// Delete sessions not updated for the given number of days
    Cleanup {
        /// Age threshold in days
        #[arg(long, default_value = "30")]
        days: i64,
    },
}
