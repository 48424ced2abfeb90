use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Confidence below which a block is flagged for human review.
pub const REVIEW_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Narrative,
    Theorem,
    Definition,
    Formula,
    Proof,
    Example,
    Exercise,
    Remark,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Narrative => "narrative",
            BlockKind::Theorem => "theorem",
            BlockKind::Definition => "definition",
            BlockKind::Formula => "formula",
            BlockKind::Proof => "proof",
            BlockKind::Example => "example",
            BlockKind::Exercise => "exercise",
            BlockKind::Remark => "remark",
        }
    }

    /// Theorems and definitions are reproduced word for word, formulas are
    /// typeset, everything else is condensed.
    pub fn default_action(self) -> BlockAction {
        match self {
            BlockKind::Theorem | BlockKind::Definition => BlockAction::Verbatim,
            BlockKind::Formula => BlockAction::Latex,
            _ => BlockAction::Summarize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockAction {
    Summarize,
    Verbatim,
    Latex,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedBlock {
    pub kind: BlockKind,
    pub content: String,
    pub action: BlockAction,
    /// Label such as `Theorem 2.1` or `Pythagoras`, when one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
    pub confidence: f32,
    pub needs_review: bool,
}

impl ClassifiedBlock {
    pub fn new(kind: BlockKind, content: impl Into<String>, confidence: f32) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            kind,
            content: content.into(),
            action: kind.default_action(),
            name: None,
            latex: None,
            confidence,
            needs_review: confidence < REVIEW_THRESHOLD || kind == BlockKind::Formula,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_latex(mut self, latex: impl Into<String>) -> Self {
        let latex = latex.into();
        if self.kind == BlockKind::Formula && !latex.trim().is_empty() {
            self.needs_review = self.confidence < REVIEW_THRESHOLD;
        }
        self.latex = Some(latex);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedChapter {
    pub chapter_id: String,
    pub title: String,
    pub pages: String,
    pub blocks: Vec<ClassifiedBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ClassifiedChapter {
    pub fn blocks_needing_review(&self) -> usize {
        self.blocks.iter().filter(|block| block.needs_review).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedDocument {
    pub source_path: PathBuf,
    pub chapters: Vec<ClassifiedChapter>,
}

impl ClassifiedDocument {
    pub fn total_blocks(&self) -> usize {
        self.chapters.iter().map(|ch| ch.blocks.len()).sum()
    }

    pub fn blocks_by_kind(&self) -> BTreeMap<BlockKind, usize> {
        let mut counts = BTreeMap::new();
        for block in self.chapters.iter().flat_map(|ch| &ch.blocks) {
            *counts.entry(block.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedSite {
    pub output_dir: PathBuf,
    pub index_page: PathBuf,
    /// Chapter id to rendered page.
    pub pages: BTreeMap<String, PathBuf>,
}
