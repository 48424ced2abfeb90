use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::LlmEngine;
use crate::render::Theme;
use crate::source::SourceType;
use crate::state::Stage;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Configuration file (defaults to `./digestify.yaml` when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for checkpoint files.
    #[arg(long, global = true)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` is set.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Segment, classify and render a document.
    Process(ProcessArgs),
    /// Continue a session from its last good checkpoint.
    Resume(ResumeArgs),
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointsCommand,
    },
}

/// Overrides shared by `process` and `resume`.
#[derive(Debug, Args)]
pub struct RunOptions {
    /// Text completion backend.
    #[arg(long, value_enum)]
    pub engine: Option<LlmEngine>,

    #[arg(long, value_enum)]
    pub theme: Option<Theme>,

    /// Base output directory; the site goes to `<out>/<source stem>`.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// PDF or form-feed paginated text file.
    pub source: PathBuf,

    #[arg(long = "type", value_enum, default_value_t = SourceType::Auto)]
    pub source_type: SourceType,

    /// Session id (generated when omitted).
    #[arg(long)]
    pub session_id: Option<String>,

    /// Keep checkpoints in memory only.
    #[arg(long)]
    pub no_checkpoints: bool,

    #[command(flatten)]
    pub run: RunOptions,
}

#[derive(Debug, Args)]
pub struct ResumeArgs {
    pub session_id: String,

    #[command(flatten)]
    pub run: RunOptions,
}

#[derive(Debug, Subcommand)]
pub enum CheckpointsCommand {
    List(ListArgs),
    /// Print the state summary of a session as JSON.
    Show(ShowArgs),
    Delete(DeleteArgs),
    /// Delete checkpoints older than a number of days.
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only sessions whose id starts with this prefix.
    #[arg(long)]
    pub session: Option<String>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub session_id: String,

    /// Show a stage checkpoint instead of the latest one.
    #[arg(long, value_enum)]
    pub stage: Option<Stage>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    pub session_id: String,

    /// Delete only this stage's checkpoint.
    #[arg(long, value_enum)]
    pub stage: Option<Stage>,
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    #[arg(long)]
    pub older_than_days: u32,

    #[arg(long)]
    pub session: Option<String>,
}
