use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::chapter::ChapterSet;
use crate::formats::{ClassifiedDocument, RenderedSite};
use crate::source::SourceType;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Segment,
    Classify,
    Render,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 3] = [Stage::Segment, Stage::Classify, Stage::Render];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Segment => "segment",
            Stage::Classify => "classify",
            Stage::Render => "render",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown stage: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    stage: Stage,
    status: StageStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<f64>,
    error: Option<String>,
}

impl StageResult {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            error: None,
        }
    }

    fn start(&mut self, now: DateTime<Utc>) {
        self.status = StageStatus::Running;
        self.started_at = Some(now);
        self.completed_at = None;
        self.duration_seconds = None;
        self.error = None;
    }

    fn finish(&mut self, status: StageStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.duration_seconds = self
            .started_at
            .map(|started| (now - started).num_milliseconds() as f64 / 1000.0);
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// What a stage hands back to the pipeline state on success.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Segment(ChapterSet),
    Classify(ClassifiedDocument),
    Render(RenderedSite),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Segment(_) => Stage::Segment,
            StageOutput::Classify(_) => Stage::Classify,
            StageOutput::Render(_) => Stage::Render,
        }
    }
}

/// One processing run: identifiers, per-stage progress and stage outputs.
///
/// Stage results change only through [`PipelineState::start_stage`],
/// [`PipelineState::complete_stage`] and [`PipelineState::fail_stage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    session_id: String,
    source_path: PathBuf,
    source_type: SourceType,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    segment_output: Option<ChapterSet>,
    classify_output: Option<ClassifiedDocument>,
    render_output: Option<RenderedSite>,
    #[serde(deserialize_with = "deserialize_stage_results")]
    stage_results: BTreeMap<Stage, StageResult>,
    current_stage: Option<Stage>,
}

fn all_pending() -> BTreeMap<Stage, StageResult> {
    Stage::ALL
        .into_iter()
        .map(|stage| (stage, StageResult::pending(stage)))
        .collect()
}

fn deserialize_stage_results<'de, D>(deserializer: D) -> Result<BTreeMap<Stage, StageResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut results = BTreeMap::<Stage, StageResult>::deserialize(deserializer)?;
    for stage in Stage::ALL {
        results
            .entry(stage)
            .or_insert_with(|| StageResult::pending(stage));
    }
    Ok(results)
}

impl PipelineState {
    pub fn new(
        session_id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        source_type: SourceType,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            source_path: source_path.into(),
            source_type,
            created_at: now,
            updated_at: now,
            segment_output: None,
            classify_output: None,
            render_output: None,
            stage_results: all_pending(),
            current_stage: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.current_stage
    }

    pub fn chapters(&self) -> Option<&ChapterSet> {
        self.segment_output.as_ref()
    }

    pub fn classified(&self) -> Option<&ClassifiedDocument> {
        self.classify_output.as_ref()
    }

    pub fn rendered(&self) -> Option<&RenderedSite> {
        self.render_output.as_ref()
    }

    /// Final output directory, once rendering has produced one.
    pub fn output_location(&self) -> Option<&Path> {
        self.render_output.as_ref().map(|site| site.output_dir.as_path())
    }

    /// Read-only view of every stage result, in execution order.
    pub fn stage_results(&self) -> &BTreeMap<Stage, StageResult> {
        &self.stage_results
    }

    pub fn stage_result(&self, stage: Stage) -> &StageResult {
        &self.stage_results[&stage]
    }

    pub fn start_stage(&mut self, stage: Stage) {
        let now = Utc::now();
        self.result_mut(stage).start(now);
        self.current_stage = Some(stage);
        self.updated_at = now;
    }

    pub fn complete_stage(&mut self, stage: Stage) {
        let now = Utc::now();
        self.result_mut(stage).finish(StageStatus::Completed, now);
        self.current_stage = None;
        self.updated_at = now;
    }

    pub fn fail_stage(&mut self, stage: Stage, error: impl Into<String>) {
        let now = Utc::now();
        let result = self.result_mut(stage);
        result.finish(StageStatus::Failed, now);
        result.error = Some(error.into());
        self.current_stage = None;
        self.updated_at = now;
    }

    pub fn set_output(&mut self, output: StageOutput) {
        match output {
            StageOutput::Segment(chapters) => self.segment_output = Some(chapters),
            StageOutput::Classify(doc) => self.classify_output = Some(doc),
            StageOutput::Render(site) => self.render_output = Some(site),
        }
        self.updated_at = Utc::now();
    }

    pub fn is_stage_completed(&self, stage: Stage) -> bool {
        self.stage_result(stage).status == StageStatus::Completed
    }

    pub fn completed_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|&stage| self.is_stage_completed(stage))
            .collect()
    }

    /// First stage, in execution order, that has not completed.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|&stage| !self.is_stage_completed(stage))
    }

    pub fn progress_percentage(&self) -> f64 {
        self.completed_stages().len() as f64 / Stage::ALL.len() as f64 * 100.0
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.stage_results
            .values()
            .filter(|result| result.status == StageStatus::Completed)
            .filter_map(|result| result.duration_seconds)
            .sum()
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            session_id: self.session_id.clone(),
            source_path: self.source_path.clone(),
            current_stage: self.current_stage,
            next_stage: self.next_stage(),
            progress_percentage: self.progress_percentage(),
            total_duration_seconds: self.total_duration_seconds(),
            chapters: self.segment_output.as_ref().map_or(0, ChapterSet::len),
            output_location: self.output_location().map(Path::to_path_buf),
            stages: self
                .stage_results
                .values()
                .map(|result| StageSummary {
                    stage: result.stage,
                    status: result.status,
                    duration_seconds: result.duration_seconds,
                    error: result.error.clone(),
                })
                .collect(),
        }
    }

    fn result_mut(&mut self, stage: Stage) -> &mut StageResult {
        self.stage_results
            .entry(stage)
            .or_insert_with(|| StageResult::pending(stage))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub session_id: String,
    pub source_path: PathBuf,
    pub current_stage: Option<Stage>,
    pub next_stage: Option<Stage>,
    pub progress_percentage: f64,
    pub total_duration_seconds: f64,
    pub chapters: usize,
    pub output_location: Option<PathBuf>,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
}
