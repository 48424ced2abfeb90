//! Chapter boundary resolution.
//!
//! Tiers are tried in [`Tier::CASCADE`] order and the first one that proposes
//! at least one chapter wins. Equal division never comes back empty, so every
//! document with at least one page gets a chapter set. Completion failures in
//! the heading and sampled-content tiers only mean the tier produced nothing.

use std::sync::Arc;

use serde::Deserialize;

use crate::chapter::{Chapter, ChapterSet};
use crate::completion::{Completer, CompletionRequest, parse_json_array};
use crate::error::{CompletionError, Error, SourceError};
use crate::source::{Heading, PageSource};

const SYSTEM_PROMPT: &str = "You analyze the structure of long documents. \
Answer with a single JSON array and nothing else.";

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Chapter count for the equal-division fallback.
    pub equal_division_chapters: u32,
    /// Headings shown to the model.
    pub heading_candidates: usize,
    /// Headings kept when the model cannot pick chapter-level ones.
    pub heading_fallback_cap: usize,
    pub sample_pages: u32,
    /// Characters taken from the start of each sampled page.
    pub sample_chars: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            equal_division_chapters: 5,
            heading_candidates: 20,
            heading_fallback_cap: 10,
            sample_pages: 10,
            sample_chars: 500,
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Outline,
    Headings,
    SampledContent,
    EqualDivision,
}

impl Tier {
    pub const CASCADE: [Tier; 4] = [
        Tier::Outline,
        Tier::Headings,
        Tier::SampledContent,
        Tier::EqualDivision,
    ];
}

/// A proposed chapter: title and inclusive page range.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    title: String,
    start: u32,
    end: u32,
}

impl Span {
    fn new(title: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            title: title.into(),
            start,
            end,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposedChapter {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "start_page")]
    start_page: Option<u32>,
    #[serde(default, alias = "estimated_pages")]
    estimated_pages: Option<u32>,
}

pub struct BoundaryResolver {
    completer: Arc<dyn Completer>,
    settings: ResolverSettings,
}

impl BoundaryResolver {
    pub fn new(completer: Arc<dyn Completer>, settings: ResolverSettings) -> Self {
        Self {
            completer,
            settings,
        }
    }

    pub async fn resolve(&self, source: &dyn PageSource) -> Result<ChapterSet, Error> {
        let total = source.page_count();
        if total == 0 {
            return Err(SourceError::Empty.into());
        }

        let mut proposal = None;
        for tier in Tier::CASCADE {
            let spans = self.propose(tier, source, total).await?;
            if spans.is_empty() {
                tracing::debug!(?tier, "tier produced no chapters");
                continue;
            }
            proposal = Some((tier, spans));
            break;
        }
        let (tier, spans) = proposal.unwrap_or_else(|| {
            (
                Tier::EqualDivision,
                equal_division(total, self.settings.equal_division_chapters),
            )
        });

        let mut chapters = Vec::with_capacity(spans.len());
        for (i, span) in spans.into_iter().enumerate() {
            let content = source.page_text(span.start..=span.end)?;
            let chapter = Chapter::new(
                format!("ch{:02}", i + 1),
                span.title,
                span.start..=span.end,
                content,
            )?;
            chapters.push(chapter);
        }

        let set = ChapterSet::new(chapters, total, source.source_id())?;
        tracing::info!(
            ?tier,
            chapters = set.len(),
            total_pages = total,
            coverage_pct = set.coverage_percentage(),
            "resolved chapter boundaries"
        );
        Ok(set)
    }

    async fn propose(
        &self,
        tier: Tier,
        source: &dyn PageSource,
        total: u32,
    ) -> Result<Vec<Span>, SourceError> {
        let spans = match tier {
            Tier::Outline => outline_spans(source, total),
            Tier::Headings => self.heading_spans(source, total).await,
            Tier::SampledContent => self.sampled_spans(source, total).await?,
            Tier::EqualDivision => equal_division(total, self.settings.equal_division_chapters),
        };
        Ok(keep_valid(spans, total))
    }

    async fn heading_spans(&self, source: &dyn PageSource, total: u32) -> Vec<Span> {
        let headings = source.detect_headings(None, None);
        if headings.is_empty() {
            return Vec::new();
        }
        let candidates = &headings[..headings.len().min(self.settings.heading_candidates)];

        let listing = candidates
            .iter()
            .map(|h| format!("- Page {}: {}", h.page, h.title))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "The following heading-like lines were detected in a document of {total} pages.\n\
\n\
BEGIN_HEADINGS\n\
{listing}\n\
END_HEADINGS\n\
\n\
Decide which of these are chapter-level headings (not sections or subsections).\n\
\n\
Output:\n\
- ONLY a JSON array, no commentary.\n\
- Schema: [{{\"title\":\"...\",\"startPage\":1}}]\n"
        );

        let mut starts: Vec<(String, u32)> = match self.ask(prompt).await {
            Ok(proposals) => proposals
                .into_iter()
                .filter_map(|p| Some((p.title, p.start_page?)))
                .collect(),
            Err(err) => {
                tracing::warn!(
                    %err,
                    cap = self.settings.heading_fallback_cap,
                    "heading selection failed; treating detected headings as chapters"
                );
                fallback_headings(&headings, self.settings.heading_fallback_cap)
            }
        };

        starts.sort_by_key(|(_, page)| *page);
        starts.dedup_by_key(|(_, page)| *page);
        spans_until_next(starts, total)
    }

    async fn sampled_spans(
        &self,
        source: &dyn PageSource,
        total: u32,
    ) -> Result<Vec<Span>, SourceError> {
        let mut samples = Vec::new();
        for page in sample_pages(total, self.settings.sample_pages) {
            let text = source.page_text(page..=page)?;
            let excerpt: String = text.chars().take(self.settings.sample_chars).collect();
            samples.push(format!("--- Page {page} ---\n{}", excerpt.trim()));
        }

        let prompt = format!(
            "Below are excerpts from evenly spaced pages of a document with {total} pages.\n\
\n\
BEGIN_SAMPLES\n\
{samples}\n\
END_SAMPLES\n\
\n\
Propose the document's chapters.\n\
\n\
Output:\n\
- ONLY a JSON array, no commentary.\n\
- Schema: [{{\"title\":\"...\",\"startPage\":1,\"estimatedPages\":10}}]\n",
            samples = samples.join("\n\n"),
        );

        let proposals = match self.ask(prompt).await {
            Ok(proposals) => proposals,
            Err(err) => {
                tracing::warn!(%err, "chapter proposal from sampled pages failed");
                return Ok(Vec::new());
            }
        };

        let default_length = (total / u32::try_from(proposals.len().max(1)).unwrap_or(1)).max(1);
        let starts: Vec<u32> = proposals
            .iter()
            .map(|p| p.start_page.unwrap_or(1))
            .collect();
        let spans = proposals
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let start = starts[i];
                let length = p.estimated_pages.unwrap_or(default_length).max(1);
                let mut end = start.saturating_add(length - 1).min(total);
                if let Some(next) = starts.get(i + 1) {
                    end = end.min(next.saturating_sub(1));
                }
                Span::new(p.title, start, end)
            })
            .collect();
        Ok(spans)
    }

    async fn ask(&self, prompt: String) -> Result<Vec<ProposedChapter>, CompletionError> {
        let request = CompletionRequest {
            prompt,
            system_prompt: Some(SYSTEM_PROMPT.to_owned()),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let text = self.completer.complete(&request).await?;
        parse_json_array(&text)
    }
}

fn fallback_headings(headings: &[Heading], cap: usize) -> Vec<(String, u32)> {
    headings
        .iter()
        .take(cap)
        .map(|h| (h.title.clone(), h.page))
        .collect()
}

/// Top-level outline entries; each chapter runs until the next one starts.
fn outline_spans(source: &dyn PageSource, total: u32) -> Vec<Span> {
    let Some(entries) = source.outline() else {
        return Vec::new();
    };
    let Some(top) = entries.iter().map(|entry| entry.level).min() else {
        return Vec::new();
    };

    let mut starts: Vec<(String, u32)> = Vec::new();
    for entry in entries.into_iter().filter(|entry| entry.level == top) {
        if entry.page == 0 || entry.page > total {
            tracing::warn!(title = %entry.title, page = entry.page, "outline entry outside document");
            continue;
        }
        if starts.last().is_some_and(|(_, last)| entry.page <= *last) {
            tracing::warn!(title = %entry.title, page = entry.page, "outline entry out of order");
            continue;
        }
        starts.push((entry.title, entry.page));
    }
    spans_until_next(starts, total)
}

fn spans_until_next(starts: Vec<(String, u32)>, total: u32) -> Vec<Span> {
    let next_starts: Vec<u32> = starts.iter().skip(1).map(|(_, page)| *page).collect();
    starts
        .into_iter()
        .enumerate()
        .map(|(i, (title, start))| {
            let end = next_starts
                .get(i)
                .map_or(total, |next| next.saturating_sub(1));
            Span::new(title, start, end)
        })
        .collect()
}

/// Evenly spaced page numbers, at most `max_samples` of them.
fn sample_pages(total: u32, max_samples: u32) -> Vec<u32> {
    let count = max_samples.min(total).max(1);
    let step = (total / count).max(1);
    (1..=total)
        .step_by(step as usize)
        .take(count as usize)
        .collect()
}

/// `min(chapters, total)` contiguous chapters; earlier chapters absorb the
/// remainder one page each.
fn equal_division(total: u32, chapters: u32) -> Vec<Span> {
    let count = chapters.min(total).max(1);
    let base = total / count;
    let remainder = total % count;

    let mut spans = Vec::with_capacity(count as usize);
    let mut start = 1;
    for i in 0..count {
        let size = base + u32::from(i < remainder);
        spans.push(Span::new(format!("Section {}", i + 1), start, start + size - 1));
        start += size;
    }
    spans
}

/// Drops spans that cannot form a chapter and fills in missing titles.
fn keep_valid(spans: Vec<Span>, total: u32) -> Vec<Span> {
    spans
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut span)| {
            if span.start == 0 || span.start > total || span.end < span.start {
                tracing::warn!(
                    title = %span.title,
                    start = span.start,
                    end = span.end,
                    "dropping empty chapter proposal"
                );
                return None;
            }
            span.end = span.end.min(total);
            if span.title.trim().is_empty() {
                span.title = format!("Chapter {}", i + 1);
            }
            Some(span)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::ops::RangeInclusive;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::completion::NoopCompleter;
    use crate::error::ValidationError;
    use crate::source::{OutlineEntry, TextSource};

    struct OutlinedSource {
        text: TextSource,
        outline: Vec<OutlineEntry>,
    }

    impl PageSource for OutlinedSource {
        fn source_id(&self) -> &str {
            self.text.source_id()
        }

        fn page_count(&self) -> u32 {
            self.text.page_count()
        }

        fn page_text(&self, pages: RangeInclusive<u32>) -> Result<String, SourceError> {
            self.text.page_text(pages)
        }

        fn outline(&self) -> Option<Vec<OutlineEntry>> {
            Some(self.outline.clone())
        }
    }

    /// Answers heading prompts and sampled-page prompts with fixed replies.
    #[derive(Default)]
    struct Scripted {
        headings: Option<String>,
        samples: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Completer for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(request.prompt.clone());
            }
            let reply = if request.prompt.contains("BEGIN_HEADINGS") {
                self.headings.clone()
            } else {
                self.samples.clone()
            };
            reply.ok_or_else(|| CompletionError::Failed {
                attempts: 1,
                detail: "scripted failure".to_owned(),
            })
        }
    }

    fn plain_pages(total: u32) -> TextSource {
        TextSource::from_pages((1..=total).map(|p| format!("plain text on page {p}")))
    }

    fn ranges(set: &ChapterSet) -> Vec<(u32, u32)> {
        set.chapters()
            .iter()
            .map(|ch| (ch.first_page(), ch.last_page()))
            .collect()
    }

    fn resolver(completer: Arc<dyn Completer>) -> BoundaryResolver {
        BoundaryResolver::new(completer, ResolverSettings::default())
    }

    #[tokio::test]
    async fn equal_division_spreads_remainder_to_earliest_chapters() -> anyhow::Result<()> {
        let set = resolver(Arc::new(NoopCompleter))
            .resolve(&plain_pages(17))
            .await?;
        let sizes: Vec<usize> = set.chapters().iter().map(|ch| ch.pages().len()).collect();
        assert_eq!(sizes, vec![4, 4, 3, 3, 3]);
        assert_eq!(ranges(&set), vec![(1, 4), (5, 8), (9, 11), (12, 14), (15, 17)]);
        assert_eq!(set.chapters()[0].title(), "Section 1");
        assert_eq!(set.chapters()[4].id(), "ch05");
        Ok(())
    }

    #[tokio::test]
    async fn short_documents_get_one_chapter_per_page() -> anyhow::Result<()> {
        let set = resolver(Arc::new(NoopCompleter))
            .resolve(&plain_pages(3))
            .await?;
        assert_eq!(ranges(&set), vec![(1, 1), (2, 2), (3, 3)]);
        Ok(())
    }

    #[tokio::test]
    async fn every_document_gets_disjoint_complete_chapters() -> anyhow::Result<()> {
        let resolver = resolver(Arc::new(NoopCompleter));
        for total in 1..=40 {
            let set = resolver.resolve(&plain_pages(total)).await?;
            assert!(!set.is_empty());
            let pages: Vec<u32> = set
                .chapters()
                .iter()
                .flat_map(|ch| ch.pages().iter().copied())
                .collect();
            assert_eq!(pages, (1..=total).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[tokio::test]
    async fn zero_pages_is_a_source_error() {
        let err = resolver(Arc::new(NoopCompleter))
            .resolve(&TextSource::from_pages(Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Source(SourceError::Empty)));
    }

    #[tokio::test]
    async fn outline_top_level_entries_define_chapters() -> anyhow::Result<()> {
        let source = OutlinedSource {
            text: plain_pages(20),
            outline: vec![
                OutlineEntry { level: 1, title: "Basics".to_owned(), page: 1 },
                OutlineEntry { level: 2, title: "Sets".to_owned(), page: 3 },
                OutlineEntry { level: 1, title: "Groups".to_owned(), page: 6 },
                OutlineEntry { level: 1, title: "Rings".to_owned(), page: 12 },
            ],
        };
        let completer = Arc::new(Scripted::default());
        let set = resolver(completer.clone()).resolve(&source).await?;

        assert_eq!(ranges(&set), vec![(1, 5), (6, 11), (12, 20)]);
        let titles: Vec<&str> = set.chapters().iter().map(Chapter::title).collect();
        assert_eq!(titles, ["Basics", "Groups", "Rings"]);
        assert!(set.chapters()[1].raw_content().contains("page 6"));
        assert!(completer.prompts.lock().map(|p| p.is_empty()).unwrap_or(false));
        Ok(())
    }

    #[tokio::test]
    async fn unusable_outline_falls_through() -> anyhow::Result<()> {
        let source = OutlinedSource {
            text: plain_pages(10),
            outline: vec![OutlineEntry { level: 1, title: "Ghost".to_owned(), page: 99 }],
        };
        let set = resolver(Arc::new(NoopCompleter)).resolve(&source).await?;
        assert_eq!(set.chapters()[0].title(), "Section 1");
        Ok(())
    }

    fn headed_pages(total: u32, headed: &[u32]) -> TextSource {
        TextSource::from_pages((1..=total).map(|p| {
            if headed.contains(&p) {
                format!("Chapter {p}: Topic {p}\nbody")
            } else {
                format!("plain text on page {p}")
            }
        }))
    }

    #[tokio::test]
    async fn heading_tier_uses_model_selection() -> anyhow::Result<()> {
        let source = headed_pages(12, &[1, 4, 8]);
        let completer = Arc::new(Scripted {
            headings: Some(
                "```json\n[{\"title\":\"Topic 8\",\"startPage\":8},{\"title\":\"Topic 1\",\"start_page\":1}]\n```"
                    .to_owned(),
            ),
            ..Scripted::default()
        });
        let set = resolver(completer.clone()).resolve(&source).await?;

        assert_eq!(ranges(&set), vec![(1, 7), (8, 12)]);
        assert_eq!(set.chapters()[0].title(), "Topic 1");
        let prompts = completer.prompts.lock().map(|p| p.clone()).unwrap_or_default();
        assert!(prompts[0].contains("- Page 4: Topic 4"));
        Ok(())
    }

    #[tokio::test]
    async fn heading_tier_falls_back_to_first_ten_headings() -> anyhow::Result<()> {
        let headed: Vec<u32> = (1..=12).collect();
        let source = headed_pages(15, &headed);
        let set = resolver(Arc::new(NoopCompleter)).resolve(&source).await?;

        assert_eq!(set.len(), 10);
        assert_eq!(set.chapters()[0].title(), "Topic 1");
        assert_eq!(set.chapters()[9].first_page(), 10);
        assert_eq!(set.chapters()[9].last_page(), 15);
        Ok(())
    }

    #[tokio::test]
    async fn sampled_tier_clamps_against_next_start() -> anyhow::Result<()> {
        let completer = Arc::new(Scripted {
            samples: Some(
                r#"[{"title":"Opening","startPage":1,"estimatedPages":4},
                    {"title":"Body","startPage":3,"estimatedPages":20}]"#
                    .to_owned(),
            ),
            ..Scripted::default()
        });
        let set = resolver(completer.clone()).resolve(&plain_pages(10)).await?;
        assert_eq!(ranges(&set), vec![(1, 2), (3, 10)]);

        let prompts = completer.prompts.lock().map(|p| p.clone()).unwrap_or_default();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("--- Page 1 ---"));
        assert!(prompts[0].contains("--- Page 10 ---"));
        Ok(())
    }

    #[tokio::test]
    async fn sampled_tier_drops_empty_proposals() -> anyhow::Result<()> {
        let completer = Arc::new(Scripted {
            samples: Some(
                r#"[{"title":"Late","startPage":40,"estimatedPages":3},
                    {"title":"","startPage":2,"estimatedPages":3}]"#
                    .to_owned(),
            ),
            ..Scripted::default()
        });
        let set = resolver(completer).resolve(&plain_pages(10)).await?;
        assert_eq!(ranges(&set), vec![(2, 4)]);
        assert_eq!(set.chapters()[0].title(), "Chapter 2");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_samples_reply_falls_back_to_equal_division() -> anyhow::Result<()> {
        let completer = Arc::new(Scripted {
            samples: Some("I think there are three chapters.".to_owned()),
            ..Scripted::default()
        });
        let set = resolver(completer).resolve(&plain_pages(10)).await?;
        assert_eq!(set.len(), 5);
        assert_eq!(set.chapters()[0].title(), "Section 1");
        Ok(())
    }

    #[tokio::test]
    async fn sampled_overlap_with_earlier_chapter_is_rejected() {
        let completer = Arc::new(Scripted {
            samples: Some(
                r#"[{"title":"A","startPage":1,"estimatedPages":3},
                    {"title":"B","startPage":5,"estimatedPages":2},
                    {"title":"C","startPage":2,"estimatedPages":1}]"#
                    .to_owned(),
            ),
            ..Scripted::default()
        });
        let err = resolver(completer)
            .resolve(&plain_pages(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::OverlappingPages { page: 2, .. })
        ));
    }

    #[test]
    fn samples_are_evenly_spaced() {
        assert_eq!(sample_pages(100, 10), vec![1, 11, 21, 31, 41, 51, 61, 71, 81, 91]);
        assert_eq!(sample_pages(4, 10), vec![1, 2, 3, 4]);
        assert_eq!(sample_pages(25, 10), vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19]);
    }
}
