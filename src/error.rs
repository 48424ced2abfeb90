//! Error taxonomy.
//!
//! Only [`Error`] crosses the library boundary. [`CompletionError`] is absorbed
//! by the boundary resolver (a failed completion means "this tier produced
//! nothing") and therefore has no variant in [`Error`].

use std::path::PathBuf;

use thiserror::Error;

use crate::state::Stage;

/// Fatal errors returned by the pipeline and its stages.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Stage(#[from] StageError),

    /// `resume` found neither a stage checkpoint nor a latest checkpoint.
    #[error("no recoverable checkpoint for session '{session_id}'")]
    NoRecoverableCheckpoint { session_id: String },

    /// Every stage is completed but the render output was never recorded.
    #[error("session '{session_id}' is complete but has no recorded output location")]
    MissingOutput { session_id: String },
}

/// The source document is missing, unreadable or empty.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source document not found: '{path}'")]
    NotFound { path: PathBuf },

    #[error("failed to read source document '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source document '{path}' could not be parsed: {detail}")]
    Unparsable { path: PathBuf, detail: String },

    #[error("source document has no pages")]
    Empty,

    #[error("page range {start}-{end} is outside the document (1-{total})")]
    PageOutOfRange { start: u32, end: u32, total: u32 },
}

/// A text completion call failed after the port's own retries.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// No completion backend is configured (the `noop` engine).
    #[error("completion unavailable: {0}")]
    Unavailable(String),

    #[error("completion failed after {attempts} attempt(s): {detail}")]
    Failed { attempts: u32, detail: String },

    /// The backend answered, but not with what the caller asked for.
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

/// A chapter or chapter-set invariant does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("chapter id must not be empty")]
    EmptyChapterId,

    #[error("chapter '{id}' has an empty title")]
    EmptyTitle { id: String },

    #[error("chapter '{id}' has no pages")]
    NoPages { id: String },

    #[error("chapter '{id}' contains page 0; pages are numbered from 1")]
    ZeroPage { id: String },

    #[error("chapter '{id}' has level {level}; expected 0..=5")]
    LevelOutOfRange { id: String, level: u8 },

    #[error("duplicate chapter id '{id}'")]
    DuplicateChapterId { id: String },

    #[error("page {page} is claimed by both '{first}' and '{second}'")]
    OverlappingPages {
        page: u32,
        first: String,
        second: String,
    },
}

/// Checkpoint persistence failed.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("invalid session id '{0}': use letters, digits, '_', '-' or '.'")]
    InvalidSessionId(String),

    #[error("checkpoint I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A classify or render collaborator failed.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed: {detail}")]
pub struct StageError {
    pub stage: Stage,
    pub detail: String,
}

impl StageError {
    pub fn new(stage: Stage, err: &anyhow::Error) -> Self {
        Self {
            stage,
            detail: format!("{err:#}"),
        }
    }
}
