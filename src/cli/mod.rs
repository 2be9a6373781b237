use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "review-deck",
    about = "Track commits across repositories and review the risky ones first"
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open the interactive commit deck (default).
    Tui,
    /// Synchronize all projects once and store new commits.
    Sync,
    /// Print stored commits.
    List(ListArgs),
    /// Mark a commit as reviewed.
    Review(ReviewArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show commits of this project.
    #[arg(short, long)]
    pub project: Option<String>,

    /// Include reviewed commits.
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// Project the commit belongs to.
    pub project: String,
    /// Full commit hash.
    pub hash: String,
    /// Free-text note stored with the commit.
    #[arg(short, long)]
    pub comment: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
