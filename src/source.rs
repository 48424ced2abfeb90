//! Page sources: paginated text, an optional outline, and heading detection.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Pick by file extension.
    Auto,
    Pdf,
    /// UTF-8 text, pages separated by form feeds.
    Text,
}

impl SourceType {
    pub fn resolve(self, path: &Path) -> SourceType {
        match self {
            SourceType::Auto => {
                let is_pdf = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
                if is_pdf {
                    SourceType::Pdf
                } else {
                    SourceType::Text
                }
            }
            other => other,
        }
    }
}

/// One outline (bookmark) entry. `level` 1 is the outermost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub level: u32,
    pub title: String,
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub title: String,
    pub page: u32,
}

static DEFAULT_HEADING_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^Chapter\s+\d+[:.]?\s+(.+)$",
        r"^Capitolo\s+\d+[:.]?\s+(.+)$",
        r"^\d+\.\s+([A-Z][^\n]{3,})$",
        r"^\d+\.\d+\s+([A-Z][^\n]{3,})$",
        r"^[A-Z][A-Z\s]{10,}$",
        r"^§\s*\d+[:.]?\s+(.+)$",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid heading regex"))
    .collect()
});

const MAX_HEADING_CHARS: usize = 200;

/// Paginated document text. Pages are numbered from 1.
///
/// Sources hold their underlying document open until dropped.
pub trait PageSource {
    /// Stable fingerprint of the document bytes.
    fn source_id(&self) -> &str;

    fn page_count(&self) -> u32;

    /// Text of the inclusive page range, pages separated by a blank line.
    fn page_text(&self, pages: RangeInclusive<u32>) -> Result<String, SourceError>;

    fn outline(&self) -> Option<Vec<OutlineEntry>>;

    /// Heading-like lines, page by page, in document order.
    ///
    /// A pattern's first capture group becomes the title when present,
    /// otherwise the whole line does.
    fn detect_headings(
        &self,
        pages: Option<RangeInclusive<u32>>,
        patterns: Option<&[Regex]>,
    ) -> Vec<Heading> {
        let total = self.page_count();
        let pages = pages.unwrap_or(1..=total);
        let patterns = patterns.unwrap_or(DEFAULT_HEADING_PATTERNS.as_slice());

        let mut headings = Vec::new();
        for page in pages {
            let text = match self.page_text(page..=page) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(page, %err, "skip page during heading detection");
                    continue;
                }
            };
            for line in text.lines() {
                let line = line.trim();
                if line.len() < 3 || line.chars().count() > MAX_HEADING_CHARS {
                    continue;
                }
                if let Some(title) = match_heading(line, patterns) {
                    headings.push(Heading { title, page });
                }
            }
        }
        headings
    }
}

fn match_heading(line: &str, patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        let caps = pattern.captures(line)?;
        let title = caps
            .get(1)
            .map_or_else(|| line.to_owned(), |m| m.as_str().trim().to_owned());
        (!title.is_empty()).then_some(title)
    })
}

fn check_range(pages: &RangeInclusive<u32>, total: u32) -> Result<(), SourceError> {
    let (start, end) = (*pages.start(), *pages.end());
    if start == 0 || start > end || end > total {
        return Err(SourceError::PageOutOfRange { start, end, total });
    }
    Ok(())
}

fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}

fn read_source(path: &Path) -> Result<Vec<u8>, SourceError> {
    std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            SourceError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            SourceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Opens `path` as the given source type.
pub fn open(path: &Path, source_type: SourceType) -> Result<Box<dyn PageSource>, SourceError> {
    let source: Box<dyn PageSource> = match source_type.resolve(path) {
        SourceType::Pdf => Box::new(PdfSource::open(path)?),
        SourceType::Text | SourceType::Auto => Box::new(TextSource::open(path)?),
    };
    tracing::debug!(
        path = %path.display(),
        pages = source.page_count(),
        source_id = source.source_id(),
        "opened source"
    );
    Ok(source)
}

pub struct PdfSource {
    path: PathBuf,
    doc: lopdf::Document,
    pages: Vec<u32>,
    source_id: String,
}

impl PdfSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let bytes = read_source(path)?;
        let doc = lopdf::Document::load_mem(&bytes).map_err(|err| SourceError::Unparsable {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        let mut pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        pages.sort_unstable();

        Ok(Self {
            path: path.to_path_buf(),
            doc,
            pages,
            source_id: fingerprint(&bytes),
        })
    }
}

impl PageSource for PdfSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    fn page_text(&self, pages: RangeInclusive<u32>) -> Result<String, SourceError> {
        check_range(&pages, self.page_count())?;
        let texts: Vec<String> = pages
            .map(|page| {
                let page_num = self.pages[(page - 1) as usize];
                self.doc.extract_text(&[page_num]).unwrap_or_else(|err| {
                    tracing::warn!(page, %err, "failed to extract page text");
                    String::new()
                })
            })
            .collect();
        Ok(texts.join("\n\n"))
    }

    fn outline(&self) -> Option<Vec<OutlineEntry>> {
        let toc = match self.doc.get_toc() {
            Ok(toc) => toc,
            Err(err) => {
                tracing::debug!(%err, "pdf has no usable outline");
                return None;
            }
        };
        let entries: Vec<OutlineEntry> = toc
            .toc
            .into_iter()
            .filter_map(|entry| {
                Some(OutlineEntry {
                    level: u32::try_from(entry.level).ok()?,
                    title: entry.title.trim().to_owned(),
                    page: u32::try_from(entry.page).ok()?,
                })
            })
            .collect();
        (!entries.is_empty()).then_some(entries)
    }
}

impl Drop for PdfSource {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "closed pdf source");
    }
}

/// Plain text split into pages on form feed (`\x0c`), as `pdftotext` emits.
#[derive(Debug, Clone)]
pub struct TextSource {
    pages: Vec<String>,
    source_id: String,
}

impl TextSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let bytes = read_source(path)?;
        let text = String::from_utf8(bytes).map_err(|err| SourceError::Unparsable {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        Ok(Self::from_text(&text))
    }

    pub fn from_text(text: &str) -> Self {
        let mut pages: Vec<String> = text.split('\x0c').map(str::to_owned).collect();
        while pages.last().is_some_and(|page| page.trim().is_empty()) {
            pages.pop();
        }
        Self {
            pages,
            source_id: fingerprint(text.as_bytes()),
        }
    }

    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages: Vec<String> = pages.into_iter().map(Into::into).collect();
        let source_id = fingerprint(pages.join("\x0c").as_bytes());
        Self { pages, source_id }
    }
}

impl PageSource for TextSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    fn page_text(&self, pages: RangeInclusive<u32>) -> Result<String, SourceError> {
        check_range(&pages, self.page_count())?;
        let (start, end) = (*pages.start() as usize, *pages.end() as usize);
        Ok(self.pages[start - 1..end]
            .iter()
            .map(|page| page.trim())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn outline(&self) -> Option<Vec<OutlineEntry>> {
        None
    }
}
