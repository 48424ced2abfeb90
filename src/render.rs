//! Stage 3: turn classified chapters into a linked static HTML site.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use pulldown_cmark::{Options, Parser};
use serde::{Deserialize, Serialize};

use crate::formats::{BlockKind, ClassifiedBlock, ClassifiedChapter, ClassifiedDocument, RenderedSite};

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        document: &ClassifiedDocument,
        title: &str,
        out_dir: &Path,
    ) -> anyhow::Result<RenderedSite>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    #[default]
    MathDocument,
    LectureNotes,
    Presentation,
}

impl Theme {
    fn stylesheet(self) -> String {
        let (font, accent, width, base_size) = match self {
            Theme::MathDocument => ("Georgia, 'Times New Roman', serif", "#1f4e79", "46rem", "1.05rem"),
            Theme::LectureNotes => ("'Helvetica Neue', Arial, sans-serif", "#2e7d32", "52rem", "1rem"),
            Theme::Presentation => ("'Trebuchet MS', Verdana, sans-serif", "#b23a48", "64rem", "1.3rem"),
        };
        format!(
            "body {{ font-family: {font}; font-size: {base_size}; max-width: {width}; margin: 2rem auto; padding: 0 1rem; line-height: 1.6; color: #222; }}\n\
h1, h2 {{ color: {accent}; }}\n\
nav {{ display: flex; justify-content: space-between; margin: 1.5rem 0; }}\n\
nav a {{ color: {accent}; text-decoration: none; }}\n\
.block {{ margin: 1.2rem 0; padding: 0.6rem 1rem; border-left: 4px solid #ddd; }}\n\
.block-name {{ font-weight: bold; margin-bottom: 0.3rem; }}\n\
.block-theorem, .block-definition {{ border-color: {accent}; background: #f6f8fb; }}\n\
.block-proof {{ border-color: #999; font-style: italic; }}\n\
.block-example, .block-exercise {{ border-color: #d9a400; }}\n\
.block-remark {{ border-color: #7a7a7a; }}\n\
.block-formula {{ border: none; text-align: center; overflow-x: auto; }}\n\
.block-narrative {{ border: none; padding-left: 0; }}\n\
.needs-review {{ outline: 1px dashed #c00; }}\n\
.chapter-summary {{ color: #555; }}\n"
        )
    }
}

const MATHJAX: &str = r#"<script>
window.MathJax = {
  tex: {
    inlineMath: [['$', '$'], ['\\(', '\\)']],
    displayMath: [['$$', '$$'], ['\\[', '\\]']]
  }
};
</script>
<script id="MathJax-script" async src="https://cdn.jsdelivr.net/npm/mathjax@3/es5/tex-mml-chtml.js"></script>
"#;

const STYLESHEET: &str = "style.css";
const INDEX: &str = "index.html";

#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer {
    theme: Theme,
}

impl HtmlRenderer {
    pub fn new(theme: Theme) -> Self {
        Self { theme }
    }

    fn index_page(&self, document: &ClassifiedDocument, title: &str) -> String {
        let mut body = format!("<h1>{}</h1>\n<ol class=\"toc\">\n", escape_html(title));
        for chapter in &document.chapters {
            body.push_str(&format!(
                "  <li><a href=\"{}\">{}</a> <span class=\"pages\">(pp. {})</span>",
                chapter_file(chapter),
                escape_html(&chapter.title),
                escape_html(&chapter.pages),
            ));
            if let Some(summary) = &chapter.summary {
                body.push_str(&format!(
                    "<p class=\"chapter-summary\">{}</p>",
                    escape_html(summary)
                ));
            }
            body.push_str("</li>\n");
        }
        body.push_str("</ol>\n");
        page(title, &body)
    }

    fn chapter_page(
        &self,
        document: &ClassifiedDocument,
        index: usize,
        title: &str,
    ) -> String {
        let chapter = &document.chapters[index];
        let nav = navigation(document, index);

        let mut body = nav.clone();
        body.push_str(&format!("<h1>{}</h1>\n", escape_html(&chapter.title)));
        for block in &chapter.blocks {
            body.push_str(&render_block(block));
        }
        body.push_str(&nav);
        page(&format!("{} - {title}", chapter.title), &body)
    }
}

#[async_trait]
impl Renderer for HtmlRenderer {
    async fn render(
        &self,
        document: &ClassifiedDocument,
        title: &str,
        out_dir: &Path,
    ) -> anyhow::Result<RenderedSite> {
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        let mut pages = BTreeMap::new();

        files.push((out_dir.join(STYLESHEET), self.theme.stylesheet()));
        for (i, chapter) in document.chapters.iter().enumerate() {
            let path = out_dir.join(chapter_file(chapter));
            pages.insert(chapter.chapter_id.clone(), path.clone());
            files.push((path, self.chapter_page(document, i, title)));
        }
        let index_page = out_dir.join(INDEX);
        files.push((index_page.clone(), self.index_page(document, title)));

        let dir = out_dir.to_path_buf();
        let written = tokio::task::spawn_blocking(move || write_site(&dir, &files))
            .await
            .context("join render task")??;

        tracing::info!(
            out_dir = %out_dir.display(),
            files = written,
            theme = ?self.theme,
            "rendered site"
        );
        Ok(RenderedSite {
            output_dir: out_dir.to_path_buf(),
            index_page,
            pages,
        })
    }
}

fn chapter_file(chapter: &ClassifiedChapter) -> String {
    format!("{}.html", chapter.chapter_id)
}

fn navigation(document: &ClassifiedDocument, index: usize) -> String {
    let prev = index
        .checked_sub(1)
        .and_then(|i| document.chapters.get(i))
        .map(|ch| {
            format!(
                "<a class=\"prev\" href=\"{}\">&larr; {}</a>",
                chapter_file(ch),
                escape_html(&ch.title)
            )
        })
        .unwrap_or_else(|| "<span></span>".to_owned());
    let next = document
        .chapters
        .get(index + 1)
        .map(|ch| {
            format!(
                "<a class=\"next\" href=\"{}\">{} &rarr;</a>",
                chapter_file(ch),
                escape_html(&ch.title)
            )
        })
        .unwrap_or_else(|| "<span></span>".to_owned());
    format!("<nav>{prev}<a class=\"index\" href=\"{INDEX}\">Contents</a>{next}</nav>\n")
}

fn render_block(block: &ClassifiedBlock) -> String {
    let mut classes = format!("block block-{}", block.kind.as_str());
    if block.needs_review {
        classes.push_str(" needs-review");
    }

    let inner = match block.kind {
        BlockKind::Formula => {
            let latex = block.latex.as_deref().unwrap_or(&block.content);
            format!("\\[{}\\]", escape_html(latex))
        }
        _ => {
            let mut html = String::new();
            if let Some(name) = &block.name {
                html.push_str(&format!(
                    "<div class=\"block-name\">{}</div>\n",
                    escape_html(name)
                ));
            }
            html.push_str(&markdown_to_html_fragment(&block.content));
            html
        }
    };
    format!("<div class=\"{classes}\">\n{inner}\n</div>\n")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{}</title>\n<link rel=\"stylesheet\" href=\"{STYLESHEET}\">\n{MATHJAX}</head>\n<body>\n{body}</body>\n</html>\n",
        escape_html(title)
    )
}

fn markdown_to_html_fragment(md: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(md, options);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

fn write_site(out_dir: &Path, files: &[(PathBuf, String)]) -> anyhow::Result<usize> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create output dir: {}", out_dir.display()))?;
    for (path, contents) in files {
        let mut tmp = tempfile::NamedTempFile::new_in(out_dir)
            .with_context(|| format!("create temp file in {}", out_dir.display()))?;
        tmp.write_all(contents.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        tmp.persist(path)
            .with_context(|| format!("persist {}", path.display()))?;
    }
    Ok(files.len())
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
