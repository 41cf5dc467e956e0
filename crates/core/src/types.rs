use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::WaypointError;

/// A URL discovered at a given link distance from a seed, as carried
/// through the Frontier before it is encoded as `"<url>|<depth>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
}

/// Per-domain politeness/robots bookkeeping. Mirrors the `domain:<domain>`
/// hash fields in the shared store; fields are set lazily.
#[derive(Debug, Clone, Default)]
pub struct DomainRecord {
    pub next_fetch_time: i64,
    pub robots_txt: String,
    pub robots_expires: i64,
    pub is_excluded: bool,
    pub is_seeded: bool,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub follow_redirects: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            follow_redirects: true,
            user_agent: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub final_url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub response_time_ms: u64,
}

/// Result of handing a fetched body to the HTML parser.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub discovered_links: Vec<String>,
    pub text: String,
    pub title: Option<String>,
}

/// Outcome of one fetch attempt, as recorded against the `visited:<urlhash>`
/// audit record (§6.6) regardless of whether the fetch succeeded. `error`
/// is set instead of `status` when the fetch never produced an HTTP
/// response (network failure, timeout, oversized body).
#[derive(Debug, Clone)]
pub struct VisitOutcome {
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub error: Option<String>,
    pub response_time_ms: Option<u64>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

/// External HTTP fetcher collaborator (spec §6.2). The core treats it as
/// a pure effect; retry/backoff policy lives outside the core.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, WaypointError>;
}

/// External HTML parser collaborator (spec §6.3). Failures return an
/// empty link list and empty text; they never propagate into the core.
pub trait HtmlParser: Send + Sync {
    fn parse_html(&self, body: &[u8], base_url: &Url) -> ParsedPage;
}

/// External on-disk content writer collaborator (spec §1, out of core scope).
#[async_trait]
pub trait ContentWriter: Send + Sync {
    async fn save_content(&self, url: &str, page: &ParsedPage) -> Result<(), WaypointError>;
}
