use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use digestify::cli::{Cli, Command};
use digestify::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("load config")?;
    if let Some(dir) = &cli.checkpoint_dir {
        config.checkpoints.dir = dir.clone();
    }
    let directive = if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    digestify::logging::init(directive).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Process(args) => {
            digestify::commands::process(config, args)
                .await
                .context("process")?;
        }
        Command::Resume(args) => {
            digestify::commands::resume(config, args)
                .await
                .context("resume")?;
        }
        Command::Checkpoints { command } => {
            digestify::commands::checkpoints(config, command)
                .await
                .context("checkpoints")?;
        }
    }

    Ok(())
}
