//! Stage 2: split chapter text into typed blocks.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::chapter::Chapter;
use crate::formats::{BlockKind, ClassifiedBlock, ClassifiedChapter};

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, chapter: &Chapter) -> anyhow::Result<ClassifiedChapter>;
}

const LABELLED_CONFIDENCE: f32 = 0.85;
const FORMULA_CONFIDENCE: f32 = 0.9;
const NARRATIVE_CONFIDENCE: f32 = 0.7;
const UNSTRUCTURED_CONFIDENCE: f32 = 0.6;
const SUMMARY_CHARS: usize = 200;

/// `Theorem 2.1 (Pythagoras).`, `Proof.`, `Definition 3:` at a line start.
static RE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(theorem|lemma|proposition|corollary|definition|proof|example|exercise|remark|note)(?:[ \t]+(\d+(?:\.\d+)*))?(?:[ \t]*\(([^)\n]*)\))?[ \t]*[.:]",
    )
    .expect("valid block label regex")
});

static RE_DISPLAY_MATH: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?s)\$\$(.+?)\$\$",
        r"(?s)\\\[(.+?)\\\]",
        r"(?s)\\begin\{(?:equation|align)\*?\}(.+?)\\end\{(?:equation|align)\*?\}",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid display math regex"))
    .collect()
});

fn label_kind(label: &str) -> BlockKind {
    match label.to_ascii_lowercase().as_str() {
        "definition" => BlockKind::Definition,
        "proof" => BlockKind::Proof,
        "example" => BlockKind::Example,
        "exercise" => BlockKind::Exercise,
        "remark" | "note" => BlockKind::Remark,
        _ => BlockKind::Theorem,
    }
}

/// Lexical classifier for mathematical prose.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    /// Unlabelled text shorter than this between two blocks is dropped.
    pub min_block_chars: usize,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            min_block_chars: 50,
        }
    }
}

struct Located {
    start: usize,
    end: usize,
    block: ClassifiedBlock,
}

impl PatternClassifier {
    pub fn split_blocks(&self, text: &str) -> Vec<ClassifiedBlock> {
        let mut found = labelled_blocks(text);
        found.extend(display_formulas(text));
        found.sort_by_key(|located| located.start);

        let mut blocks = Vec::new();
        let mut cursor = 0;
        let mut structured = false;
        for located in found {
            if located.start < cursor {
                continue;
            }
            self.push_narrative(&mut blocks, &text[cursor..located.start]);
            blocks.push(located.block);
            cursor = located.end;
            structured = true;
        }

        if !structured {
            let body = text.trim();
            if body.is_empty() {
                return Vec::new();
            }
            return vec![ClassifiedBlock::new(
                BlockKind::Narrative,
                body,
                UNSTRUCTURED_CONFIDENCE,
            )];
        }
        self.push_narrative(&mut blocks, &text[cursor..]);
        blocks
    }

    fn push_narrative(&self, blocks: &mut Vec<ClassifiedBlock>, gap: &str) {
        let gap = gap.trim();
        if gap.chars().count() >= self.min_block_chars {
            blocks.push(ClassifiedBlock::new(
                BlockKind::Narrative,
                gap,
                NARRATIVE_CONFIDENCE,
            ));
        }
    }
}

#[async_trait]
impl Classifier for PatternClassifier {
    async fn classify(&self, chapter: &Chapter) -> anyhow::Result<ClassifiedChapter> {
        let blocks = self.split_blocks(chapter.raw_content());
        let summary = blocks
            .iter()
            .find(|block| block.kind == BlockKind::Narrative)
            .map(|block| summarize(&block.content));

        tracing::debug!(
            chapter_id = chapter.id(),
            blocks = blocks.len(),
            "classified chapter"
        );
        Ok(ClassifiedChapter {
            chapter_id: chapter.id().to_owned(),
            title: chapter.title().to_owned(),
            pages: chapter.metadata().page_range.clone(),
            blocks,
            summary,
        })
    }
}

/// A labelled block runs from its label to the next blank line.
fn labelled_blocks(text: &str) -> Vec<Located> {
    RE_LABEL
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1)?.as_str();
            let start = whole.start();
            let end = text[start..]
                .find("\n\n")
                .map_or(text.len(), |offset| start + offset);

            let mut name = capitalize(label);
            if let Some(number) = caps.get(2) {
                name = format!("{name} {}", number.as_str());
            }
            if let Some(title) = caps.get(3) {
                name = format!("{name} ({})", title.as_str().trim());
            }

            let block = ClassifiedBlock::new(
                label_kind(label),
                text[start..end].trim(),
                LABELLED_CONFIDENCE,
            )
            .with_name(name);
            Some(Located { start, end, block })
        })
        .collect()
}

fn display_formulas(text: &str) -> Vec<Located> {
    RE_DISPLAY_MATH
        .iter()
        .flat_map(|pattern| pattern.captures_iter(text))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let latex = caps.get(1)?.as_str().trim();
            let block = ClassifiedBlock::new(BlockKind::Formula, whole.as_str(), FORMULA_CONFIDENCE)
                .with_latex(latex);
            Some(Located {
                start: whole.start(),
                end: whole.end(),
                block,
            })
        })
        .collect()
}

fn capitalize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Leading sentences of `text`, at most [`SUMMARY_CHARS`] characters.
fn summarize(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut summary = String::new();
    for sentence in flat.split_inclusive(". ") {
        if summary.chars().count() + sentence.chars().count() > SUMMARY_CHARS {
            break;
        }
        summary.push_str(sentence);
    }
    if summary.is_empty() {
        summary = flat.chars().take(SUMMARY_CHARS).collect();
        if flat.chars().count() > SUMMARY_CHARS {
            summary.push('…');
        }
    }
    summary.trim_end().to_owned()
}
