//! Worker (C6): the cooperative task that loops pick-domain → pop-URL →
//! fetch → parse → enqueue-links → record-visit → re-queue-domain,
//! against the external [`HttpFetcher`], [`HtmlParser`], and
//! [`ContentWriter`] collaborators (§6.2–§6.3).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use waypoint_core::{ContentWriter, FetchConfig, HtmlParser, HttpFetcher, VisitOutcome};
use waypoint_frontier::Frontier;
use waypoint_normalize::normalize;

/// §4.6 state machine, surfaced in structured logs via [`Worker::set_state`].
/// The loop's control flow doesn't branch on this; it's bookkeeping only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Polling = 1,
    Fetching = 2,
    Parsing = 3,
    Recording = 4,
    Stopped = 5,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Polling,
            2 => WorkerState::Fetching,
            3 => WorkerState::Parsing,
            4 => WorkerState::Recording,
            _ => WorkerState::Stopped,
        }
    }

    fn label(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Polling => "polling",
            WorkerState::Fetching => "fetching",
            WorkerState::Parsing => "parsing",
            WorkerState::Recording => "recording",
            WorkerState::Stopped => "stopped",
        }
    }
}

const BACKOFF_MIN_MS: u64 = 50;
const BACKOFF_MAX_MS: u64 = 500;

pub struct Worker {
    pub id: usize,
    pub shard_id: usize,
    frontier: Arc<Frontier>,
    fetcher: Arc<dyn HttpFetcher>,
    parser: Arc<dyn HtmlParser>,
    writer: Arc<dyn ContentWriter>,
    fetch_config: FetchConfig,
    max_depth: u32,
    strip_query_params: Vec<String>,
    store_op_timeout: Duration,
    state: AtomicU8,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        shard_id: usize,
        frontier: Arc<Frontier>,
        fetcher: Arc<dyn HttpFetcher>,
        parser: Arc<dyn HtmlParser>,
        writer: Arc<dyn ContentWriter>,
        fetch_config: FetchConfig,
        max_depth: u32,
        strip_query_params: Vec<String>,
        store_op_timeout: Duration,
    ) -> Self {
        Self {
            id,
            shard_id,
            frontier,
            fetcher,
            parser,
            writer,
            fetch_config,
            max_depth,
            strip_query_params,
            store_op_timeout,
            state: AtomicU8::new(WorkerState::Idle as u8),
        }
    }

    /// Current §4.6 state, for callers (e.g. a future `--status` probe)
    /// that want more than the tracing logs.
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Relaxed);
        debug!(worker_id = self.id, state = state.label(), "worker state transition");
    }

    /// Runs until `shutdown` fires. Cooperative: the in-flight fetch (if
    /// any) is allowed to finish, bounded by `fetch_config.timeout`.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(worker_id = self.id, shard_id = self.shard_id, "worker started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(worker_id = self.id, "worker shutting down");
                    break;
                }
                _ = self.tick() => {}
            }
        }
        self.set_state(WorkerState::Stopped);
        debug!(worker_id = self.id, "worker stopped");
    }

    /// §4.6/§5: no single store call may block a worker past
    /// `store_op_timeout`; a timeout is treated the same as any other
    /// store read/write failure (§7).
    async fn store_call<T, F>(&self, op: &str, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = Result<T, waypoint_core::WaypointError>> + Send,
        T: Send,
    {
        match timeout(self.store_op_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(worker_id = self.id, op, error = %e, "store operation failed");
                None
            }
            Err(_) => {
                warn!(worker_id = self.id, op, timeout_secs = self.store_op_timeout.as_secs(), "store operation timed out");
                None
            }
        }
    }

    async fn tick(&self) {
        self.set_state(WorkerState::Polling);
        let Some(item) = self
            .store_call("get_next_url", self.frontier.get_next_url(self.shard_id))
            .await
        else {
            self.set_state(WorkerState::Idle);
            self.backoff().await;
            return;
        };

        let Some((url, domain, depth)) = item else {
            self.set_state(WorkerState::Idle);
            self.backoff().await;
            return;
        };

        let Ok(parsed_url) = Url::parse(&url) else {
            warn!(worker_id = self.id, url, "frontier returned an unparsable url, dropping");
            return;
        };

        self.set_state(WorkerState::Fetching);
        debug!(worker_id = self.id, url, domain, depth, "fetching");
        let fetch_result = self.fetcher.fetch(&parsed_url, &self.fetch_config).await;

        let outcome = match &fetch_result {
            Ok(response) => VisitOutcome {
                status: Some(response.status),
                content_type: response.content_type.clone(),
                error: None,
                response_time_ms: Some(response.response_time_ms),
                fetched_at: response.fetched_at,
            },
            Err(e) => VisitOutcome {
                status: None,
                content_type: None,
                error: Some(e.to_string()),
                response_time_ms: None,
                fetched_at: chrono::Utc::now(),
            },
        };

        let page = match &fetch_result {
            Ok(response) => {
                let is_html = response
                    .content_type
                    .as_deref()
                    .map(|ct| ct.contains("text/html"))
                    .unwrap_or(false);

                if !is_html {
                    None
                } else {
                    self.set_state(WorkerState::Parsing);
                    let parsed = self.parser.parse_html(&response.body, &parsed_url);
                    if depth < self.max_depth {
                        let normalized: Vec<String> = parsed
                            .discovered_links
                            .iter()
                            .filter_map(|l| normalize(l, &self.strip_query_params))
                            .collect();
                        let added = self
                            .store_call(
                                "add_urls_batch",
                                self.frontier.add_urls_batch(&normalized, depth + 1),
                            )
                            .await;
                        if let Some(added) = added {
                            if added > 0 {
                                debug!(worker_id = self.id, url, added, "enqueued discovered links");
                            }
                        }
                    }
                    Some(parsed)
                }
            }
            Err(e) => {
                warn!(worker_id = self.id, url, error = %e, "fetch failed");
                None
            }
        };

        self.set_state(WorkerState::Recording);
        self.store_call("record_visit", self.frontier.record_visit(&url, &domain, &outcome))
            .await;

        if let Some(page) = &page {
            if let Err(e) = self.writer.save_content(&url, page).await {
                warn!(worker_id = self.id, url, error = %e, "failed to write content (best-effort)");
            }
        }
    }

    async fn backoff(&self) {
        let jitter_ms = rand::thread_rng().gen_range(BACKOFF_MIN_MS..=BACKOFF_MAX_MS);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use waypoint_core::{FetchResponse, ParsedPage};
    use waypoint_politeness::PolitenessEngine;
    use waypoint_store::{MemoryStore, Store};

    struct StubFetcher {
        response: StdMutex<Option<Result<FetchResponse, waypoint_core::WaypointError>>>,
    }

    #[async_trait]
    impl HttpFetcher for StubFetcher {
        async fn fetch(&self, _url: &Url, _config: &FetchConfig) -> Result<FetchResponse, waypoint_core::WaypointError> {
            self.response.lock().unwrap().take().expect("fetch called once")
        }
    }

    struct StubParser {
        links: Vec<String>,
    }

    impl HtmlParser for StubParser {
        fn parse_html(&self, _body: &[u8], _base_url: &Url) -> ParsedPage {
            ParsedPage {
                discovered_links: self.links.clone(),
                text: "hello world".to_string(),
                title: Some("Stub".to_string()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ContentWriter for RecordingWriter {
        async fn save_content(&self, url: &str, _page: &ParsedPage) -> Result<(), waypoint_core::WaypointError> {
            self.writes.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct AllowAllFetcher;

    #[async_trait]
    impl HttpFetcher for AllowAllFetcher {
        async fn fetch(&self, url: &Url, _config: &FetchConfig) -> Result<FetchResponse, waypoint_core::WaypointError> {
            Ok(FetchResponse {
                url: url.clone(),
                final_url: url.clone(),
                status: 404,
                headers: Default::default(),
                body: Vec::new(),
                content_type: None,
                fetched_at: chrono::Utc::now(),
                response_time_ms: 1,
            })
        }
    }

    fn test_frontier(store: Arc<dyn Store>) -> Arc<Frontier> {
        let politeness = Arc::new(PolitenessEngine::new(
            Arc::clone(&store),
            Arc::new(AllowAllFetcher),
            "waypoint-bot".to_string(),
            0,
            10,
            86_400,
            3_600,
            vec![],
        ));
        Arc::new(Frontier::new(store, politeness, 1, 2000, 10_000, 0.01))
    }

    fn worker(
        frontier: Arc<Frontier>,
        fetcher: Arc<dyn HttpFetcher>,
        parser: Arc<dyn HtmlParser>,
        writer: Arc<dyn ContentWriter>,
    ) -> Worker {
        Worker::new(
            0,
            0,
            frontier,
            fetcher,
            parser,
            writer,
            FetchConfig::default(),
            10,
            vec![],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn successful_html_fetch_enqueues_links_and_writes_content() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let frontier = test_frontier(Arc::clone(&store));
        frontier
            .add_urls_batch(&["https://example.com/".to_string()], 0)
            .await
            .unwrap();

        let response = FetchResponse {
            url: Url::parse("https://example.com/").unwrap(),
            final_url: Url::parse("https://example.com/").unwrap(),
            status: 200,
            headers: Default::default(),
            body: b"<html></html>".to_vec(),
            content_type: Some("text/html".to_string()),
            fetched_at: chrono::Utc::now(),
            response_time_ms: 5,
        };
        let fetcher = Arc::new(StubFetcher {
            response: StdMutex::new(Some(Ok(response))),
        });
        let parser = Arc::new(StubParser {
            links: vec!["https://example.com/sub".to_string()],
        });
        let writer = Arc::new(RecordingWriter::default());

        let w = worker(
            Arc::clone(&frontier),
            fetcher,
            parser,
            Arc::clone(&writer) as Arc<dyn ContentWriter>,
        );
        w.tick().await;

        assert_eq!(writer.writes.lock().unwrap().len(), 1);
        // the discovered link was enqueued at depth 1, on the same domain,
        // so the shard's frontier list is non-empty again.
        assert!(!frontier.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn fetch_failure_records_visit_without_writing_content() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let frontier = test_frontier(Arc::clone(&store));
        frontier
            .add_urls_batch(&["https://example.com/".to_string()], 0)
            .await
            .unwrap();

        let fetcher = Arc::new(StubFetcher {
            response: StdMutex::new(Some(Err(waypoint_core::WaypointError::Network(
                "connection reset".to_string(),
            )))),
        });
        let parser = Arc::new(StubParser { links: vec![] });
        let writer = Arc::new(RecordingWriter::default());

        let w = worker(
            frontier,
            fetcher,
            parser,
            Arc::clone(&writer) as Arc<dyn ContentWriter>,
        );
        w.tick().await;

        assert!(writer.writes.lock().unwrap().is_empty());
        let visited_keys = store.scan_prefix("visited:").await.unwrap();
        assert_eq!(visited_keys.len(), 1);
        let map = store.hgetall(&visited_keys[0]).await.unwrap();
        assert_eq!(map.get("error").map(String::as_str), Some("connection reset"));
        assert!(map.get("status").is_none());
    }
}
