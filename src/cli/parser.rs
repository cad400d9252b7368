//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-agent research pipeline over local LLM backends.
#[derive(Debug, Parser)]
#[command(name = "paperforge", version, about)]
pub struct Cli {
    /// Session directory holding all persisted state.
    #[arg(long, global = true, env = "PAPERFORGE_SESSION_DIR")]
    pub session_dir: Option<PathBuf>,

    /// Backend base URL (OpenAI-compatible).
    #[arg(long, global = true, env = "PAPERFORGE_BASE_URL")]
    pub base_url: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start (or resume) a research workflow.
    Run {
        /// The research prompt.
        prompt: String,
        /// User files to inject as permanent context.
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
    },
    /// Resume an interrupted workflow without a new prompt.
    Resume,
    /// Show workflow state and session statistics.
    Status,
    /// Probe backend availability and enumerate loaded models.
    Probe,
    /// Clear all session state (requires --yes).
    Clear {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },
}
