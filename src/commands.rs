//! Command handlers: turn a [`Config`] plus flags into a [`Pipeline`] run or a
//! checkpoint query.

use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, TimeDelta, Utc};

use crate::checkpoint::CheckpointStore;
use crate::classify::PatternClassifier;
use crate::cli::{
    CheckpointsCommand, CleanupArgs, DeleteArgs, ListArgs, ProcessArgs, ResumeArgs, RunOptions,
    ShowArgs,
};
use crate::config::Config;
use crate::pipeline::{Pipeline, PipelineContext};
use crate::render::HtmlRenderer;

fn apply_run_options(config: &mut Config, run: &RunOptions) {
    if let Some(engine) = run.engine {
        config.llm.engine = engine;
    }
    if let Some(theme) = run.theme {
        config.output.theme = theme;
    }
    if let Some(out) = &run.out {
        config.output.base_dir = out.clone();
    }
}

pub fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let completer = config.completer().context("build completer")?;
    Ok(Pipeline::new(PipelineContext {
        store: config.checkpoint_store(),
        completer,
        classifier: Arc::new(PatternClassifier::default()),
        renderer: Arc::new(HtmlRenderer::new(config.output.theme)),
        resolver: config.resolver_settings(),
        output_base_dir: config.output.base_dir.clone(),
    }))
}

pub async fn process(mut config: Config, args: ProcessArgs) -> anyhow::Result<()> {
    apply_run_options(&mut config, &args.run);
    if args.no_checkpoints {
        config.checkpoints.enabled = false;
    }

    let pipeline = build_pipeline(&config)?;
    let out = pipeline
        .run(&args.source, args.source_type, args.session_id)
        .await
        .with_context(|| format!("process {}", args.source.display()))?;
    println!("{}", out.display());
    Ok(())
}

pub async fn resume(mut config: Config, args: ResumeArgs) -> anyhow::Result<()> {
    apply_run_options(&mut config, &args.run);

    let pipeline = build_pipeline(&config)?;
    let out = pipeline
        .resume(&args.session_id)
        .await
        .with_context(|| format!("resume session {}", args.session_id))?;
    println!("{}", out.display());
    Ok(())
}

pub async fn checkpoints(config: Config, command: CheckpointsCommand) -> anyhow::Result<()> {
    let store = config.checkpoint_store();
    match command {
        CheckpointsCommand::List(args) => list(store.as_ref(), args).await,
        CheckpointsCommand::Show(args) => show(store.as_ref(), args).await,
        CheckpointsCommand::Delete(args) => delete(store.as_ref(), args).await,
        CheckpointsCommand::Cleanup(args) => cleanup(store.as_ref(), args).await,
    }
}

async fn list(store: &dyn CheckpointStore, args: ListArgs) -> anyhow::Result<()> {
    let infos = store
        .list(args.session.as_deref())
        .await
        .context("list checkpoints")?;
    for info in infos {
        let tag = match info.stage {
            Some(stage) if !info.latest => stage.as_str(),
            _ => "latest",
        };
        println!(
            "{}\t{tag}\t{}{}",
            info.session_id,
            info.saved_at.to_rfc3339(),
            if info.failed { "\tfailed" } else { "" },
        );
    }
    Ok(())
}

async fn show(store: &dyn CheckpointStore, args: ShowArgs) -> anyhow::Result<()> {
    let state = store
        .load(&args.session_id, args.stage)
        .await
        .with_context(|| format!("no checkpoint for session {}", args.session_id))?;
    let json = serde_json::to_string_pretty(&state.summary()).context("serialize summary")?;
    println!("{json}");
    Ok(())
}

async fn delete(store: &dyn CheckpointStore, args: DeleteArgs) -> anyhow::Result<()> {
    let removed = match args.stage {
        Some(stage) => usize::from(
            store
                .delete_checkpoint(&args.session_id, Some(stage))
                .await
                .context("delete checkpoint")?,
        ),
        None => store
            .delete_session(&args.session_id)
            .await
            .context("delete session checkpoints")?,
    };
    tracing::info!(session_id = %args.session_id, removed, "deleted checkpoints");
    println!("removed {removed} checkpoint(s)");
    Ok(())
}

async fn cleanup(store: &dyn CheckpointStore, args: CleanupArgs) -> anyhow::Result<()> {
    let cutoff = cutoff_before(Utc::now(), args.older_than_days)?;
    let removed = store
        .cleanup_older_than(args.session.as_deref(), cutoff)
        .await
        .context("clean up checkpoints")?;
    println!("removed {removed} checkpoint(s)");
    Ok(())
}

/// `now` minus `days`, refusing ages the calendar cannot represent.
fn cutoff_before(now: DateTime<Utc>, days: u32) -> anyhow::Result<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| {
            format!("--older-than-days {days} reaches past the earliest representable date")
        })
}
