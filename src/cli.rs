//! CLI argument definitions using clap with subcommand architecture

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Golden repo lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "golden-repos")]
#[command(about = "Keeps versioned, search-indexed golden repositories in sync with their origins")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true, env = "GOLDEN_REPOS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "text", value_enum, global = true)]
    pub format: OutputFormat,

    /// Show verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile, then run the refresh scheduler until interrupted
    Serve(ServeArgs),

    /// Restore missing or broken master clones from their latest snapshot
    Reconcile,

    /// Refresh one repo now (inline, without the worker pool)
    Refresh(RefreshArgs),

    /// Register a repo as a golden repo
    Register(RegisterArgs),

    /// Remove a repo from the registry
    Unregister(UnregisterArgs),

    /// List registered repos and where their aliases point
    #[command(visible_alias = "ls")]
    List,

    /// Resolve a bare or canonical identifier to its alias and target
    Resolve(ResolveArgs),

    /// Delete superseded snapshots no alias references
    Sweep(SweepArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Skip startup reconciliation
    #[arg(long)]
    pub no_reconcile: bool,

    /// Override the number of worker threads
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Repo name or alias (`repo` or `repo-global`)
    #[arg(value_name = "REPO")]
    pub identifier: String,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Short repo name; the alias becomes `<name>-global`
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Origin URL, or omit for a local repo
    #[arg(long, value_name = "URL")]
    pub origin: Option<String>,

    /// Master clone / live directory (default: `<data_dir>/masters/<name>`)
    #[arg(long, value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Register under an explicit alias instead of `<name>-global`
    #[arg(long, value_name = "ALIAS")]
    pub alias: Option<String>,

    /// Allow reserved aliases (system repos only)
    #[arg(long, hide = true)]
    pub allow_reserved: bool,

    /// Do not clone a remote origin into a missing master path
    #[arg(long)]
    pub no_clone: bool,
}

#[derive(Args, Debug)]
pub struct UnregisterArgs {
    /// Repo name or alias
    #[arg(value_name = "REPO")]
    pub identifier: String,

    /// Keep the alias document
    #[arg(long)]
    pub keep_alias: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Repo name or alias
    #[arg(value_name = "REPO")]
    pub identifier: String,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Delete every unreferenced snapshot regardless of age
    #[arg(long)]
    pub all: bool,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
