//! Runtime configuration: `digestify.yaml`, then `DIGESTIFY_*` environment
//! overrides, then command-line flags (applied by the command handlers).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointStore, LocalFsCheckpointStore, MemoryCheckpointStore};
use crate::completion::{Completer, NoopCompleter, OpenAiCompleter, RetryPolicy, Retrying};
use crate::render::Theme;
use crate::segment::ResolverSettings;

pub const DEFAULT_CONFIG_FILE: &str = "digestify.yaml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LlmEngine {
    /// No model; boundary resolution uses the outline or equal division.
    #[default]
    Noop,
    Openai,
}

impl LlmEngine {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "noop" => Ok(Self::Noop),
            "openai" => Ok(Self::Openai),
            other => anyhow::bail!("unsupported llm engine: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub engine: LlmEngine,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    /// From `OPENAI_API_KEY` only.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            engine: LlmEngine::Noop,
            base_url: "https://api.openai.com/v1".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            temperature: 0.3,
            max_tokens: 2048,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            request_timeout_secs: 60,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub equal_division_chapters: u32,
    pub heading_candidates: usize,
    pub heading_fallback_cap: usize,
    pub sample_pages: u32,
    pub sample_chars: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            equal_division_chapters: 5,
            heading_candidates: 20,
            heading_fallback_cap: 10,
            sample_pages: 10,
            sample_chars: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    /// When false, checkpoints live in memory for the duration of the run.
    pub enabled: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".digestify/checkpoints"),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
    pub theme: Theme,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("output"),
            theme: Theme::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub segmentation: SegmentationConfig,
    pub checkpoints: CheckpointConfig,
    pub output: OutputConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            segmentation: SegmentationConfig::default(),
            checkpoints: CheckpointConfig::default(),
            output: OutputConfig::default(),
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Reads `path` (which must exist) or `./digestify.yaml` when present,
    /// then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("deserialize config yaml")
    }

    /// Applies `DIGESTIFY_*` overrides and picks up `OPENAI_API_KEY`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DIGESTIFY_LLM_ENGINE") {
            self.llm.engine = LlmEngine::parse(&raw)
                .with_context(|| format!("invalid DIGESTIFY_LLM_ENGINE={raw:?}. expected one of: noop, openai"))?;
        }
        if let Some(raw) = lookup("DIGESTIFY_OPENAI_BASE_URL") {
            self.llm.base_url = raw.trim().to_owned();
        }
        if let Some(raw) = lookup("DIGESTIFY_OPENAI_MODEL") {
            self.llm.model = raw.trim().to_owned();
        }
        if let Some(raw) = lookup("DIGESTIFY_MAX_ATTEMPTS") {
            self.llm.max_attempts = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid DIGESTIFY_MAX_ATTEMPTS={raw:?}"))?;
        }
        if let Some(raw) = lookup("DIGESTIFY_CHECKPOINT_DIR") {
            self.checkpoints.dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DIGESTIFY_OUTPUT_DIR") {
            self.output.base_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DIGESTIFY_LOG_LEVEL") {
            self.log_level = raw.trim().to_owned();
        }
        self.llm.api_key = lookup("OPENAI_API_KEY")
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty());
        Ok(())
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        let seg = &self.segmentation;
        ResolverSettings {
            equal_division_chapters: seg.equal_division_chapters,
            heading_candidates: seg.heading_candidates,
            heading_fallback_cap: seg.heading_fallback_cap,
            sample_pages: seg.sample_pages,
            sample_chars: seg.sample_chars,
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm.max_attempts,
            initial_backoff: Duration::from_millis(self.llm.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.llm.max_backoff_ms),
        }
    }

    pub fn completer(&self) -> anyhow::Result<Arc<dyn Completer>> {
        match self.llm.engine {
            LlmEngine::Noop => Ok(Arc::new(NoopCompleter)),
            LlmEngine::Openai => {
                let api_key = self
                    .llm
                    .api_key
                    .clone()
                    .context("OPENAI_API_KEY is required for the openai engine")?;
                let client = OpenAiCompleter::new(
                    &self.llm.base_url,
                    api_key,
                    &self.llm.model,
                    Duration::from_secs(self.llm.request_timeout_secs),
                )?;
                Ok(Arc::new(Retrying::new(Arc::new(client), self.retry_policy())))
            }
        }
    }

    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        if self.checkpoints.enabled {
            Arc::new(LocalFsCheckpointStore::new(&self.checkpoints.dir))
        } else {
            tracing::debug!("checkpoints disabled; using in-memory store");
            Arc::new(MemoryCheckpointStore::new())
        }
    }
}
