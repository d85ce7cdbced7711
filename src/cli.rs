use crate::execution::ConflictPolicy;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Preview, validate, execute and recover file organization plans.
#[derive(Parser)]
#[command(name = "sentinel-engine", version, about, long_about = None)]
pub struct Cli {
    /// Override the WAL directory.
    #[arg(long, global = true)]
    pub wal_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check for an interrupted job.
    Recover,
    /// Validate a plan without touching the disk.
    Validate(PlanArgs),
    /// Show the ghost projection and diff of a plan.
    Preview(PreviewArgs),
    /// Validate and execute a plan as a journaled job.
    Apply(ApplyArgs),
    /// Run the remaining operations of an interrupted job.
    Resume(JobArgs),
    /// Undo the completed operations of an interrupted job.
    Rollback(JobArgs),
    /// Drop the journal of an interrupted job.
    Discard(JobArgs),
}

#[derive(Args)]
pub struct PlanArgs {
    /// Path to plan JSON file.
    pub plan: PathBuf,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Directory to preview (defaults to the plan's target folder).
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Include hidden files in the listing.
    #[arg(long)]
    pub show_hidden: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Override the conflict policy (fail, skip, auto_rename).
    #[arg(long)]
    pub conflict_policy: Option<ConflictPolicy>,

    /// Roll back automatically if an operation fails.
    #[arg(long)]
    pub auto_rollback: bool,
}

#[derive(Args)]
pub struct JobArgs {
    /// Job id.
    pub job_id: String,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,
}
