//! HTML parser glue (§6.3) and the on-disk content writer (§1, out of
//! core scope but needed for a runnable binary): a thin `scraper` wrapper
//! trimmed to links + text, and a filesystem-backed [`ContentWriter`].

use std::path::PathBuf;

use async_trait::async_trait;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;
use waypoint_core::{ContentWriter, HtmlParser, ParsedPage, WaypointError};

pub struct ScraperHtmlParser;

impl ScraperHtmlParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScraperHtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlParser for ScraperHtmlParser {
    fn parse_html(&self, body: &[u8], base_url: &Url) -> ParsedPage {
        let html_str = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html_str);

        let title = selector("title")
            .and_then(|s| document.select(&s).next())
            .map(|el| el.text().collect::<String>().trim().to_string());

        let text = selector("body")
            .and_then(|s| document.select(&s).next())
            .map(|el| {
                el.text()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let discovered_links = extract_links(&document, base_url);

        ParsedPage {
            discovered_links,
            text,
            title,
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let Some(anchors) = selector("a[href]") else {
        return Vec::new();
    };

    document
        .select(&anchors)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("data:")
            {
                return None;
            }
            base_url.join(href).ok().map(|u| u.to_string())
        })
        .collect()
}

/// Writes extracted page text to `<root>/<sha256(url)>.txt`. Best-effort:
/// callers per §4.6 treat `save_visited`/`save_content` as best-effort and
/// do not fail the worker loop on a write error, but the error is still
/// surfaced so the caller can log it.
pub struct FilesystemContentWriter {
    root: PathBuf,
}

impl FilesystemContentWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.root.join(format!("{digest}.txt"))
    }
}

#[async_trait]
impl ContentWriter for FilesystemContentWriter {
    async fn save_content(&self, url: &str, page: &ParsedPage) -> Result<(), WaypointError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| WaypointError::Other(e.into()))?;
        let path = self.path_for(url);
        let contents = match &page.title {
            Some(title) => format!("{title}\n\n{}", page.text),
            None => page.text.clone(),
        };
        if let Err(e) = tokio::fs::write(&path, contents).await {
            warn!(url, path = %path.display(), error = %e, "failed to write content to disk");
            return Err(WaypointError::Other(e.into()));
        }
        Ok(())
    }
}
