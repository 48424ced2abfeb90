//! Durable pipeline-state snapshots.
//!
//! Every save writes `{session}_{stage}.json` (when a stage is given) and
//! `{session}_latest.json`, each through a temp file and rename so readers only
//! ever see whole records. Loading never fails: missing, unreadable or
//! incompatible records are all "absent".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::CheckpointError;
use crate::state::{PipelineState, Stage};

pub const SCHEMA_VERSION: &str = "1.0";

const LATEST_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    pub saved_at: DateTime<Utc>,
    pub stage: Option<Stage>,
    pub session_id: String,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointRecord {
    checkpoint_metadata: CheckpointMetadata,
    state: PipelineState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataOnly {
    checkpoint_metadata: CheckpointMetadata,
}

/// One listed checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointInfo {
    pub session_id: String,
    pub stage: Option<Stage>,
    pub saved_at: DateTime<Utc>,
    pub failed: bool,
    /// The session's latest record, which repeats the stage it was saved under.
    pub latest: bool,
    pub path: PathBuf,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Saves `state` under `stage` (if any) and as the session's latest record.
    async fn save(
        &self,
        state: &PipelineState,
        stage: Option<Stage>,
        failure: Option<&FailureInfo>,
    ) -> Result<PathBuf, CheckpointError>;

    async fn load(&self, session_id: &str, stage: Option<Stage>) -> Option<PipelineState>;

    /// Checkpoints whose session id starts with `session_filter`, newest first.
    async fn list(&self, session_filter: Option<&str>) -> Result<Vec<CheckpointInfo>, CheckpointError>;

    async fn delete_checkpoint(
        &self,
        session_id: &str,
        stage: Option<Stage>,
    ) -> Result<bool, CheckpointError>;

    async fn delete_session(&self, session_id: &str) -> Result<usize, CheckpointError>;

    /// Deletes records saved before `cutoff`, optionally for one session only.
    async fn cleanup_older_than(
        &self,
        session_id: Option<&str>,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, CheckpointError>;

    async fn load_latest(&self, session_id: &str) -> Option<PipelineState> {
        self.load(session_id, None).await
    }

    /// Newest state whose checkpointed stage actually completed, else latest.
    async fn auto_recover(&self, session_id: &str) -> Option<PipelineState> {
        for stage in Stage::ALL.into_iter().rev() {
            let Some(state) = self.load(session_id, Some(stage)).await else {
                continue;
            };
            if state.is_stage_completed(stage) {
                tracing::info!(session_id, %stage, "recovered from stage checkpoint");
                return Some(state);
            }
            tracing::debug!(session_id, %stage, "stage checkpoint is not completed; skipping");
        }

        let state = self.load_latest(session_id).await;
        if state.is_some() {
            tracing::info!(session_id, "recovered from latest checkpoint");
        }
        state
    }
}

/// Session ids become file names, so they are restricted to a safe alphabet.
pub fn validate_session_id(session_id: &str) -> Result<(), CheckpointError> {
    let valid = !session_id.is_empty()
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidSessionId(session_id.to_owned()))
    }
}

fn stage_tag(stage: Option<Stage>) -> &'static str {
    stage.map_or(LATEST_TAG, Stage::as_str)
}

fn session_matches(session_id: &str, filter: Option<&str>) -> bool {
    filter.is_none_or(|prefix| session_id.starts_with(prefix))
}

fn record_for<'a>(
    state: &'a PipelineState,
    stage: Option<Stage>,
    failure: Option<&FailureInfo>,
) -> CheckpointRecordRef<'a> {
    CheckpointRecordRef {
        checkpoint_metadata: CheckpointMetadata {
            saved_at: Utc::now(),
            stage,
            session_id: state.session_id().to_owned(),
            schema_version: SCHEMA_VERSION.to_owned(),
            failure: failure.cloned(),
        },
        state,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointRecordRef<'a> {
    checkpoint_metadata: CheckpointMetadata,
    state: &'a PipelineState,
}

#[derive(Debug, Clone)]
pub struct LocalFsCheckpointStore {
    base_dir: PathBuf,
}

impl LocalFsCheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn checkpoint_path(&self, session_id: &str, stage: Option<Stage>) -> PathBuf {
        self.base_dir
            .join(format!("{session_id}_{}.json", stage_tag(stage)))
    }

    fn session_paths(&self, session_id: &str) -> Vec<PathBuf> {
        Stage::ALL
            .into_iter()
            .map(Some)
            .chain(std::iter::once(None))
            .map(|stage| self.checkpoint_path(session_id, stage))
            .collect()
    }

    /// Every checkpoint file in the directory with its metadata.
    async fn scan(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.base_dir.clone(),
                    source,
                });
            }
        };

        let mut infos = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|source| CheckpointError::Io {
                    path: self.base_dir.clone(),
                    source,
                })?;
            let Some(entry) = entry else {
                break;
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(record) = read_json::<MetadataOnly>(&path).await else {
                continue;
            };
            let meta = record.checkpoint_metadata;
            infos.push(CheckpointInfo {
                session_id: meta.session_id,
                stage: meta.stage,
                saved_at: meta.saved_at,
                failed: meta.failure.is_some(),
                latest: path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .is_some_and(|stem| stem.ends_with(&format!("_{LATEST_TAG}"))),
                path,
            });
        }
        Ok(infos)
    }
}

#[async_trait]
impl CheckpointStore for LocalFsCheckpointStore {
    async fn save(
        &self,
        state: &PipelineState,
        stage: Option<Stage>,
        failure: Option<&FailureInfo>,
    ) -> Result<PathBuf, CheckpointError> {
        validate_session_id(state.session_id())?;
        let record = record_for(state, stage, failure);
        let data = serde_json::to_vec_pretty(&record)?;

        let path = self.checkpoint_path(state.session_id(), stage);
        write_atomic(&path, &data).await?;
        if stage.is_some() {
            write_atomic(&self.checkpoint_path(state.session_id(), None), &data).await?;
        }

        tracing::debug!(
            session_id = state.session_id(),
            stage = stage_tag(stage),
            path = %path.display(),
            failed = failure.is_some(),
            "saved checkpoint"
        );
        Ok(path)
    }

    async fn load(&self, session_id: &str, stage: Option<Stage>) -> Option<PipelineState> {
        if let Err(err) = validate_session_id(session_id) {
            tracing::warn!(%err, "refusing to load checkpoint");
            return None;
        }
        let path = self.checkpoint_path(session_id, stage);
        let record = read_json::<CheckpointRecord>(&path).await?;

        let meta = &record.checkpoint_metadata;
        if meta.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                path = %path.display(),
                found = %meta.schema_version,
                expected = SCHEMA_VERSION,
                "ignoring checkpoint with different schema version"
            );
            return None;
        }
        if record.state.session_id() != session_id {
            tracing::warn!(
                path = %path.display(),
                found = record.state.session_id(),
                "ignoring checkpoint for a different session"
            );
            return None;
        }
        Some(record.state)
    }

    async fn list(&self, session_filter: Option<&str>) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut infos: Vec<CheckpointInfo> = self
            .scan()
            .await?
            .into_iter()
            .filter(|info| session_matches(&info.session_id, session_filter))
            .collect();
        infos.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(infos)
    }

    async fn delete_checkpoint(
        &self,
        session_id: &str,
        stage: Option<Stage>,
    ) -> Result<bool, CheckpointError> {
        validate_session_id(session_id)?;
        remove_if_exists(&self.checkpoint_path(session_id, stage)).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize, CheckpointError> {
        validate_session_id(session_id)?;
        let mut removed = 0;
        for path in self.session_paths(session_id) {
            if remove_if_exists(&path).await? {
                removed += 1;
            }
        }
        tracing::info!(session_id, removed, "deleted session checkpoints");
        Ok(removed)
    }

    async fn cleanup_older_than(
        &self,
        session_id: Option<&str>,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, CheckpointError> {
        let mut removed = 0;
        for info in self.scan().await? {
            let in_scope = session_id.is_none_or(|id| info.session_id == id);
            if in_scope && info.saved_at < cutoff && remove_if_exists(&info.path).await? {
                removed += 1;
            }
        }
        tracing::info!(removed, %cutoff, "cleaned up old checkpoints");
        Ok(removed)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to read checkpoint");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to parse checkpoint");
            None
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError {
    let path = path.to_path_buf();
    move |source| CheckpointError::Io { path, source }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data).await.map_err(io_error(&tmp_path))?;
    if let Err(source) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool, CheckpointError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Process-local store for runs with checkpointing disabled.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<(String, &'static str), (CheckpointMetadata, PipelineState)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        state: &PipelineState,
        stage: Option<Stage>,
        failure: Option<&FailureInfo>,
    ) -> Result<PathBuf, CheckpointError> {
        validate_session_id(state.session_id())?;
        let meta = record_for(state, stage, failure).checkpoint_metadata;
        let session_id = state.session_id().to_owned();

        let mut records = self.records.lock().await;
        if stage.is_some() {
            records.insert(
                (session_id.clone(), LATEST_TAG),
                (meta.clone(), state.clone()),
            );
        }
        records.insert((session_id.clone(), stage_tag(stage)), (meta, state.clone()));
        Ok(PathBuf::from(format!("memory://{session_id}_{}", stage_tag(stage))))
    }

    async fn load(&self, session_id: &str, stage: Option<Stage>) -> Option<PipelineState> {
        let records = self.records.lock().await;
        records
            .get(&(session_id.to_owned(), stage_tag(stage)))
            .map(|(_, state)| state.clone())
    }

    async fn list(&self, session_filter: Option<&str>) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let records = self.records.lock().await;
        let mut infos: Vec<CheckpointInfo> = records
            .iter()
            .filter(|((session_id, _), _)| session_matches(session_id, session_filter))
            .map(|((session_id, tag), (meta, _))| CheckpointInfo {
                session_id: session_id.clone(),
                stage: meta.stage,
                saved_at: meta.saved_at,
                failed: meta.failure.is_some(),
                latest: *tag == LATEST_TAG,
                path: PathBuf::from(format!("memory://{session_id}_{tag}")),
            })
            .collect();
        infos.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(infos)
    }

    async fn delete_checkpoint(
        &self,
        session_id: &str,
        stage: Option<Stage>,
    ) -> Result<bool, CheckpointError> {
        let mut records = self.records.lock().await;
        Ok(records
            .remove(&(session_id.to_owned(), stage_tag(stage)))
            .is_some())
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize, CheckpointError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|(id, _), _| id != session_id);
        Ok(before - records.len())
    }

    async fn cleanup_older_than(
        &self,
        session_id: Option<&str>,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, CheckpointError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|(id, _), (meta, _)| {
            let in_scope = session_id.is_none_or(|filter| id == filter);
            !(in_scope && meta.saved_at < cutoff)
        });
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::{Chapter, ChapterSet};
    use crate::source::SourceType;
    use crate::state::StageOutput;

    fn segmented_state(session_id: &str) -> anyhow::Result<PipelineState> {
        let mut state = PipelineState::new(session_id, "/books/algebra.pdf", SourceType::Pdf);
        state.start_stage(Stage::Segment);
        let chapters = ChapterSet::new(
            vec![
                Chapter::new("ch01", "Groups", 1..=4, "group text")?,
                Chapter::new("ch02", "Rings", 5..=9, "ring text")?,
            ],
            9,
            "abc123",
        )?;
        state.set_output(StageOutput::Segment(chapters));
        state.complete_stage(Stage::Segment);
        Ok(state)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        let state = segmented_state("s1")?;

        let path = store.save(&state, Some(Stage::Segment), None).await?;
        assert_eq!(path, dir.path().join("s1_segment.json"));
        assert!(dir.path().join("s1_latest.json").exists());

        let loaded = store
            .load("s1", Some(Stage::Segment))
            .await
            .ok_or_else(|| anyhow::anyhow!("checkpoint missing"))?;
        assert_eq!(loaded.session_id(), "s1");
        assert_eq!(loaded.source_path(), state.source_path());
        assert_eq!(loaded.chapters(), state.chapters());
        assert!(loaded.is_stage_completed(Stage::Segment));

        let latest = store.load_latest("s1").await;
        assert_eq!(latest.map(|s| s.session_id().to_owned()).as_deref(), Some("s1"));
        Ok(())
    }

    #[tokio::test]
    async fn record_layout_is_stable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        store.save(&segmented_state("s1")?, Some(Stage::Segment), None).await?;

        let raw = std::fs::read_to_string(dir.path().join("s1_segment.json"))?;
        assert!(raw.contains("\n  \"checkpointMetadata\""));
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(value["checkpointMetadata"]["stage"], "segment");
        assert_eq!(value["checkpointMetadata"]["sessionId"], "s1");
        assert_eq!(value["checkpointMetadata"]["schemaVersion"], SCHEMA_VERSION);
        assert!(value["checkpointMetadata"]["savedAt"].is_string());
        assert_eq!(value["state"]["sessionId"], "s1");
        Ok(())
    }

    #[tokio::test]
    async fn missing_and_corrupt_records_are_absent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        assert!(store.load("nope", Some(Stage::Classify)).await.is_none());

        std::fs::write(dir.path().join("bad_latest.json"), "{ not json")?;
        assert!(store.load_latest("bad").await.is_none());
        assert!(store.load("../escape", None).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn other_schema_versions_are_absent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        store.save(&segmented_state("s1")?, None, None).await?;

        let path = dir.path().join("s1_latest.json");
        let mut value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        value["checkpointMetadata"]["schemaVersion"] = serde_json::json!("2.0");
        std::fs::write(&path, serde_json::to_vec_pretty(&value)?)?;

        assert!(store.load_latest("s1").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn auto_recover_requires_completed_stage() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        let segmented = segmented_state("s1")?;
        store.save(&segmented, Some(Stage::Segment), None).await?;

        let mut running = segmented.clone();
        running.start_stage(Stage::Classify);
        store.save(&running, Some(Stage::Classify), None).await?;

        let recovered = store
            .auto_recover("s1")
            .await
            .ok_or_else(|| anyhow::anyhow!("nothing recovered"))?;
        assert!(recovered.is_stage_completed(Stage::Segment));
        assert_eq!(recovered.current_stage(), None);
        assert_eq!(recovered.next_stage(), Some(Stage::Classify));
        Ok(())
    }

    #[tokio::test]
    async fn auto_recover_falls_back_to_latest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        let fresh = PipelineState::new("s2", "/books/a.txt", SourceType::Text);
        store.save(&fresh, None, None).await?;

        let recovered = store.auto_recover("s2").await;
        assert_eq!(
            recovered.and_then(|s| s.next_stage()),
            Some(Stage::Segment)
        );
        assert!(store.auto_recover("unknown").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_and_sorts_newest_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        store.save(&segmented_state("20240109_a")?, Some(Stage::Segment), None).await?;
        store.save(&segmented_state("20240110_b")?, Some(Stage::Segment), None).await?;
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let all = store.list(None).await?;
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].saved_at >= w[1].saved_at));

        let filtered = store.list(Some("20240109")).await?;
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|info| info.session_id == "20240109_a"));
        assert_eq!(filtered.iter().filter(|info| info.latest).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failure_metadata_is_listed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        let mut state = segmented_state("s1")?;
        state.start_stage(Stage::Classify);
        state.fail_stage(Stage::Classify, "boom");
        let failure = FailureInfo {
            stage: Stage::Classify,
            error: "boom".to_owned(),
        };
        store.save(&state, Some(Stage::Classify), Some(&failure)).await?;

        let listed = store.list(Some("s1")).await?;
        assert!(listed.iter().all(|info| info.failed));
        assert!(store.auto_recover("s1").await.is_some_and(|s| {
            s.next_stage() == Some(Stage::Classify)
        }));
        Ok(())
    }

    #[tokio::test]
    async fn delete_session_counts_removed_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        let state = segmented_state("s1")?;
        store.save(&state, Some(Stage::Segment), None).await?;
        store.save(&segmented_state("s1_other")?, Some(Stage::Segment), None).await?;

        assert!(store.delete_checkpoint("s1", Some(Stage::Segment)).await?);
        assert!(!store.delete_checkpoint("s1", Some(Stage::Segment)).await?);
        store.save(&state, Some(Stage::Segment), None).await?;

        assert_eq!(store.delete_session("s1").await?, 2);
        assert!(store.load_latest("s1_other").await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_records() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        store.save(&segmented_state("s1")?, Some(Stage::Segment), None).await?;

        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.cleanup_older_than(None, past).await?, 0);

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.cleanup_older_than(Some("other"), future).await?, 0);
        assert_eq!(store.cleanup_older_than(Some("s1"), future).await?, 2);
        assert!(store.list(None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_session_ids_are_rejected_on_save() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsCheckpointStore::new(dir.path());
        let state = PipelineState::new("a/b", "/x.txt", SourceType::Text);
        assert!(matches!(
            store.save(&state, None, None).await,
            Err(CheckpointError::InvalidSessionId(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_behaves_like_disk_store() -> anyhow::Result<()> {
        let store = MemoryCheckpointStore::new();
        let segmented = segmented_state("m1")?;
        store.save(&segmented, Some(Stage::Segment), None).await?;
        let mut running = segmented.clone();
        running.start_stage(Stage::Classify);
        store.save(&running, Some(Stage::Classify), None).await?;

        let recovered = store.auto_recover("m1").await;
        assert_eq!(
            recovered.and_then(|s| s.next_stage()),
            Some(Stage::Classify)
        );
        assert_eq!(store.list(Some("m1")).await?.len(), 3);
        assert_eq!(store.delete_session("m1").await?, 3);
        Ok(())
    }
}
