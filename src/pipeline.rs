//! Segment, classify and render one document, checkpointing after each stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;

use crate::checkpoint::{CheckpointStore, FailureInfo, validate_session_id};
use crate::classify::Classifier;
use crate::completion::Completer;
use crate::error::{Error, SourceError, StageError};
use crate::formats::ClassifiedDocument;
use crate::render::Renderer;
use crate::segment::{BoundaryResolver, ResolverSettings};
use crate::source::{self, SourceType};
use crate::state::{PipelineState, Stage, StageOutput};

/// Everything a run needs. Built once by the caller; the pipeline owns no
/// process-wide state.
pub struct PipelineContext {
    pub store: Arc<dyn CheckpointStore>,
    pub completer: Arc<dyn Completer>,
    pub classifier: Arc<dyn Classifier>,
    pub renderer: Arc<dyn Renderer>,
    pub resolver: ResolverSettings,
    /// Rendered sites land in `output_base_dir/<source file stem>`.
    pub output_base_dir: PathBuf,
}

pub struct Pipeline {
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.ctx.store
    }

    /// Runs every stage for a new session and returns the output directory.
    pub async fn run(
        &self,
        source_path: &Path,
        source_type: SourceType,
        session_id: Option<String>,
    ) -> Result<PathBuf, Error> {
        if !source_path.exists() {
            return Err(SourceError::NotFound {
                path: source_path.to_path_buf(),
            }
            .into());
        }
        let session_id = session_id.unwrap_or_else(new_session_id);
        validate_session_id(&session_id)?;

        // a reused id must not resume into an earlier run's records
        let stale = self.ctx.store.delete_session(&session_id).await?;
        if stale > 0 {
            tracing::warn!(
                session_id = %session_id,
                stale,
                "discarded checkpoints from an earlier run"
            );
        }

        let mut state = PipelineState::new(session_id, source_path, source_type);
        tracing::info!(
            session_id = state.session_id(),
            source = %source_path.display(),
            source_type = ?source_type,
            "starting pipeline"
        );
        self.execute(&mut state).await
    }

    /// Continues a session from its best checkpoint.
    pub async fn resume(&self, session_id: &str) -> Result<PathBuf, Error> {
        let Some(mut state) = self.ctx.store.auto_recover(session_id).await else {
            return Err(Error::NoRecoverableCheckpoint {
                session_id: session_id.to_owned(),
            });
        };

        let Some(next) = state.next_stage() else {
            tracing::info!(session_id, "session already complete");
            return output_location(&state);
        };
        tracing::info!(
            session_id,
            %next,
            completed = ?state.completed_stages(),
            "resuming pipeline"
        );
        self.execute(&mut state).await
    }

    async fn execute(&self, state: &mut PipelineState) -> Result<PathBuf, Error> {
        while let Some(stage) = state.next_stage() {
            state.start_stage(stage);
            tracing::info!(
                session_id = state.session_id(),
                %stage,
                progress = state.progress_percentage(),
                "stage started"
            );

            match self.run_stage(stage, state).await {
                Ok(output) => {
                    state.set_output(output);
                    state.complete_stage(stage);
                    self.ctx.store.save(state, Some(stage), None).await?;
                    tracing::info!(
                        session_id = state.session_id(),
                        %stage,
                        duration_secs = state.stage_result(stage).duration_seconds(),
                        "stage completed"
                    );
                }
                Err(err) => {
                    let message = err.to_string();
                    state.fail_stage(stage, message.clone());
                    let failure = FailureInfo {
                        stage,
                        error: message,
                    };
                    if let Err(save_err) = self.ctx.store.save(state, Some(stage), Some(&failure)).await {
                        tracing::error!(
                            session_id = state.session_id(),
                            %stage,
                            %save_err,
                            "failed to save failure checkpoint"
                        );
                    }
                    tracing::error!(session_id = state.session_id(), %stage, %err, "stage failed");
                    return Err(err);
                }
            }
        }

        tracing::info!(
            session_id = state.session_id(),
            total_secs = state.total_duration_seconds(),
            "pipeline completed"
        );
        output_location(state)
    }

    async fn run_stage(&self, stage: Stage, state: &PipelineState) -> Result<StageOutput, Error> {
        match stage {
            Stage::Segment => {
                let source = source::open(state.source_path(), state.source_type())?;
                let resolver =
                    BoundaryResolver::new(self.ctx.completer.clone(), self.ctx.resolver.clone());
                let chapters = resolver.resolve(source.as_ref()).await?;
                Ok(StageOutput::Segment(chapters))
            }
            Stage::Classify => {
                let chapters = state
                    .chapters()
                    .ok_or_else(|| missing_input(stage, Stage::Segment))?;
                let mut classified = Vec::with_capacity(chapters.len());
                for chapter in chapters.chapters() {
                    let result = self
                        .ctx
                        .classifier
                        .classify(chapter)
                        .await
                        .with_context(|| format!("classify chapter {}", chapter.id()))
                        .map_err(|err| StageError::new(stage, &err))?;
                    classified.push(result);
                }
                Ok(StageOutput::Classify(ClassifiedDocument {
                    source_path: state.source_path().to_path_buf(),
                    chapters: classified,
                }))
            }
            Stage::Render => {
                let document = state
                    .classified()
                    .ok_or_else(|| missing_input(stage, Stage::Classify))?;
                let out_dir = output_dir(&self.ctx.output_base_dir, state.source_path());
                let title = document_title(state.source_path());
                let site = self
                    .ctx
                    .renderer
                    .render(document, &title, &out_dir)
                    .await
                    .map_err(|err| StageError::new(stage, &err))?;
                Ok(StageOutput::Render(site))
            }
        }
    }
}

fn missing_input(stage: Stage, producer: Stage) -> StageError {
    StageError {
        stage,
        detail: format!("no {producer} output recorded"),
    }
}

fn output_location(state: &PipelineState) -> Result<PathBuf, Error> {
    state
        .output_location()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::MissingOutput {
            session_id: state.session_id().to_owned(),
        })
}

/// `YYYYMMDD_HHMMSS_` followed by eight random hex digits.
pub fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

fn source_stem(source_path: &Path) -> String {
    source_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "document".to_owned())
}

pub fn output_dir(base_dir: &Path, source_path: &Path) -> PathBuf {
    base_dir.join(source_stem(source_path))
}

/// `linear_algebra-notes.pdf` becomes `Linear Algebra Notes`.
pub fn document_title(source_path: &Path) -> String {
    source_stem(source_path)
        .split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
