use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MAX_LEVEL: u8 = 5;

/// A contiguous (or not) set of pages that forms one logical chapter.
///
/// Pages are normalized to a sorted, de-duplicated sequence on construction,
/// and the derived metadata is computed from the normalized pages and content.
/// Deserialization goes through the same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ChapterRecord")]
pub struct Chapter {
    id: String,
    title: String,
    pages: Vec<u32>,
    raw_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    level: u8,
    metadata: ChapterMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterMetadata {
    pub page_count: usize,
    pub word_count: usize,
    pub char_count: usize,
    /// Human readable page list, e.g. `1-5, 7`.
    pub page_range: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterRecord {
    id: String,
    title: String,
    pages: Vec<u32>,
    #[serde(default)]
    raw_content: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default = "default_level")]
    level: u8,
}

fn default_level() -> u8 {
    1
}

impl TryFrom<ChapterRecord> for Chapter {
    type Error = ValidationError;

    fn try_from(record: ChapterRecord) -> Result<Self, Self::Error> {
        let id = record.id.trim().to_owned();
        if id.is_empty() {
            return Err(ValidationError::EmptyChapterId);
        }
        let title = record.title.trim().to_owned();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle { id });
        }
        if record.level > MAX_LEVEL {
            return Err(ValidationError::LevelOutOfRange {
                id,
                level: record.level,
            });
        }

        let pages: Vec<u32> = record
            .pages
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if pages.is_empty() {
            return Err(ValidationError::NoPages { id });
        }
        if pages[0] == 0 {
            return Err(ValidationError::ZeroPage { id });
        }

        let metadata = ChapterMetadata::derive(&pages, &record.raw_content);
        Ok(Self {
            id,
            title,
            pages,
            raw_content: record.raw_content,
            parent_id: record.parent_id,
            level: record.level,
            metadata,
        })
    }
}

impl Chapter {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        pages: impl IntoIterator<Item = u32>,
        raw_content: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::try_from(ChapterRecord {
            id: id.into(),
            title: title.into(),
            pages: pages.into_iter().collect(),
            raw_content: raw_content.into(),
            parent_id: None,
            level: default_level(),
        })
    }

    pub fn with_level(mut self, level: u8) -> Result<Self, ValidationError> {
        if level > MAX_LEVEL {
            return Err(ValidationError::LevelOutOfRange { id: self.id, level });
        }
        self.level = level;
        Ok(self)
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn first_page(&self) -> u32 {
        self.pages[0]
    }

    pub fn last_page(&self) -> u32 {
        self.pages[self.pages.len() - 1]
    }

    pub fn raw_content(&self) -> &str {
        &self.raw_content
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn metadata(&self) -> &ChapterMetadata {
        &self.metadata
    }

    pub fn contains_page(&self, page: u32) -> bool {
        self.pages.binary_search(&page).is_ok()
    }
}

impl ChapterMetadata {
    fn derive(pages: &[u32], content: &str) -> Self {
        Self {
            page_count: pages.len(),
            word_count: content.split_whitespace().count(),
            char_count: content.chars().count(),
            page_range: format_page_range(pages),
        }
    }
}

/// Collapses sorted pages into runs: `[1, 2, 3, 5]` becomes `1-3, 5`.
pub fn format_page_range(pages: &[u32]) -> String {
    let mut runs: Vec<String> = Vec::new();
    let mut iter = pages.iter().copied();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for page in iter {
        if page == end + 1 {
            end = page;
            continue;
        }
        runs.push(format_run(start, end));
        start = page;
        end = page;
    }
    runs.push(format_run(start, end));
    runs.join(", ")
}

fn format_run(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// The validated output of boundary resolution.
///
/// No page belongs to more than one chapter. Coverage of `total_pages` is only
/// reported, never required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ChapterSetRecord")]
pub struct ChapterSet {
    chapters: Vec<Chapter>,
    total_pages: u32,
    source_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterSetRecord {
    chapters: Vec<Chapter>,
    total_pages: u32,
    #[serde(default)]
    source_id: String,
}

impl TryFrom<ChapterSetRecord> for ChapterSet {
    type Error = ValidationError;

    fn try_from(record: ChapterSetRecord) -> Result<Self, Self::Error> {
        Self::new(record.chapters, record.total_pages, record.source_id)
    }
}

impl ChapterSet {
    pub fn new(
        chapters: Vec<Chapter>,
        total_pages: u32,
        source_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let mut owners: HashMap<u32, &str> = HashMap::new();
        let mut ids: BTreeSet<&str> = BTreeSet::new();
        for chapter in &chapters {
            if !ids.insert(chapter.id()) {
                return Err(ValidationError::DuplicateChapterId {
                    id: chapter.id().to_owned(),
                });
            }
            for &page in chapter.pages() {
                if let Some(first) = owners.insert(page, chapter.id()) {
                    return Err(ValidationError::OverlappingPages {
                        page,
                        first: first.to_owned(),
                        second: chapter.id().to_owned(),
                    });
                }
            }
        }

        Ok(Self {
            chapters,
            total_pages,
            source_id: source_id.into(),
        })
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn chapter_by_id(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|ch| ch.id() == id)
    }

    pub fn chapter_by_page(&self, page: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|ch| ch.contains_page(page))
    }

    /// Percentage of the document's pages that belong to some chapter.
    pub fn coverage_percentage(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        let covered = self
            .chapters
            .iter()
            .flat_map(|ch| ch.pages())
            .filter(|&&page| page <= self.total_pages)
            .count();
        covered as f64 / f64::from(self.total_pages) * 100.0
    }
}
