//! Frontier (C5): per-domain URL lists, sharded domain ready-queues, and
//! the bulk add/pop operations that sit on top of the shared [`Store`]
//! and the [`PolitenessEngine`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use waypoint_core::{VisitOutcome, WaypointError};
use waypoint_normalize::{extract_domain, is_likely_non_text_url, normalize};
use waypoint_politeness::PolitenessEngine;
use waypoint_store::Store;
use xxhash_rust::xxh3::xxh3_64;

const SEEN_FILTER_KEY: &str = "seen:bloom";
const SHARD_COUNT_KEY: &str = "crawler:shard_count";
const ROBOTS_PREWARM_CONCURRENCY: usize = 64;

pub struct Frontier {
    store: Arc<dyn Store>,
    politeness: Arc<PolitenessEngine>,
    shard_count: usize,
    max_url_length: usize,
    seen_filter_capacity: u64,
    seen_filter_fpr: f64,
}

fn encode_entry(url: &str, depth: u32) -> String {
    format!("{}|{depth}", url.replace('|', "%7C"))
}

fn decode_entry(entry: &str) -> Option<(String, u32)> {
    let (url, depth) = entry.rsplit_once('|')?;
    let depth: u32 = depth.parse().ok()?;
    Some((url.to_string(), depth))
}

impl Frontier {
    pub fn new(
        store: Arc<dyn Store>,
        politeness: Arc<PolitenessEngine>,
        shard_count: usize,
        max_url_length: usize,
        seen_filter_capacity: u64,
        seen_filter_fpr: f64,
    ) -> Self {
        Self {
            store,
            politeness,
            shard_count,
            max_url_length,
            seen_filter_capacity,
            seen_filter_fpr,
        }
    }

    /// §4.5.5: stable 64-bit hash of the domain's bytes, reduced mod the
    /// shard count. Must be stable across restarts and platforms — xxh3
    /// is a fixed, portable algorithm, not `std`'s randomized `Hash`.
    pub fn shard_for(&self, domain: &str) -> usize {
        (xxh3_64(domain.as_bytes()) % self.shard_count as u64) as usize
    }

    /// §4.5.2.
    pub async fn add_urls_batch(&self, urls: &[String], depth: u32) -> Result<u64, WaypointError> {
        if urls.is_empty() {
            return Ok(0);
        }

        let mut dedup = HashSet::with_capacity(urls.len());
        let candidates: Vec<String> = urls
            .iter()
            .filter(|u| u.len() <= self.max_url_length)
            .filter(|u| !is_likely_non_text_url(u))
            .filter(|u| dedup.insert((*u).clone()))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        self.store
            .filter_reserve(SEEN_FILTER_KEY, self.seen_filter_capacity, self.seen_filter_fpr)
            .await?;
        // Two-phase pipeline: all `contains` checks first, then all `add`s,
        // so a failure mid-batch never leaves the bloom ahead of the
        // frontier lists it's supposed to gate.
        let presence = self.store.filter_contains_many(SEEN_FILTER_KEY, &candidates).await?;
        let not_seen: Vec<String> = candidates
            .into_iter()
            .zip(presence)
            .filter_map(|(u, seen)| if seen { None } else { Some(u) })
            .collect();
        if not_seen.is_empty() {
            return Ok(0);
        }

        let mut allowed = Vec::with_capacity(not_seen.len());
        for u in not_seen {
            if self.politeness.is_allowed(&u).await {
                allowed.push(u);
            } else {
                debug!(url = %u, "dropped by robots disallow in add_urls_batch");
            }
        }
        if allowed.is_empty() {
            return Ok(0);
        }

        let mut by_domain: HashMap<String, Vec<String>> = HashMap::new();
        for u in allowed {
            match extract_domain(&u) {
                Some(domain) => by_domain.entry(domain).or_default().push(u),
                None => debug!(url = %u, "dropped, no registrable domain"),
            }
        }
        if by_domain.is_empty() {
            return Ok(0);
        }

        let all_urls: Vec<String> = by_domain.values().flatten().cloned().collect();
        self.store.filter_add_many(SEEN_FILTER_KEY, &all_urls).await?;

        let mut written = 0u64;
        for (domain, domain_urls) in &by_domain {
            let frontier_key = format!("frontier:{domain}");
            for u in domain_urls {
                self.store.lpush(&frontier_key, &encode_entry(u, depth)).await?;
                written += 1;
            }
            let shard = self.shard_for(domain);
            self.store
                .rpush(&format!("domains:queue:{shard}"), domain)
                .await?;
            self.store
                .hsetnx(&format!("domain:{domain}"), "is_seeded", "0")
                .await?;
        }
        Ok(written)
    }

    /// §4.5.3.
    pub async fn get_next_url(&self, shard_id: usize) -> Result<Option<(String, String, u32)>, WaypointError> {
        let shard_key = format!("domains:queue:{shard_id}");
        let Some(domain) = self.store.lpop(&shard_key).await? else {
            return Ok(None);
        };

        if !self.politeness.can_fetch_domain_now(&domain).await {
            self.store.rpush(&shard_key, &domain).await?;
            return Ok(None);
        }

        let frontier_key = format!("frontier:{domain}");
        let Some(entry) = self.store.rpop(&frontier_key).await? else {
            // Domain's frontier is empty; per §4.5.3 step 3, do not re-queue.
            return Ok(None);
        };

        let Some((url, entry_depth)) = decode_entry(&entry) else {
            warn!(domain = %domain, entry = %entry, "malformed frontier entry, dropping");
            return Ok(None);
        };

        if is_likely_non_text_url(&url) {
            debug!(url = %url, "dropped non-text url at pop time");
            return Ok(None);
        }

        if !self.politeness.is_allowed(&url).await {
            debug!(url = %url, "dropped by robots re-check at pop time");
            return Ok(None);
        }

        self.politeness.record_attempt(&domain).await?;
        self.store.rpush(&shard_key, &domain).await?;
        Ok(Some((url, domain, entry_depth)))
    }

    /// §6.6 `visited:<urlhash>`: an exact, out-of-hot-path audit record of
    /// one fetch attempt. Best-effort — a write failure here must never
    /// fail the worker loop, so callers only log on error.
    pub async fn record_visit(&self, url: &str, domain: &str, outcome: &VisitOutcome) -> Result<(), WaypointError> {
        let key = format!("visited:{:016x}", xxh3_64(url.as_bytes()));
        self.store.hset(&key, "url", url).await?;
        self.store.hset(&key, "domain", domain).await?;
        self.store
            .hset(&key, "fetched_at", &outcome.fetched_at.timestamp().to_string())
            .await?;
        if let Some(status) = outcome.status {
            self.store.hset(&key, "status", &status.to_string()).await?;
        }
        if let Some(ct) = &outcome.content_type {
            self.store.hset(&key, "content_type", ct).await?;
        }
        if let Some(error) = &outcome.error {
            self.store.hset(&key, "error", error).await?;
        }
        if let Some(ms) = outcome.response_time_ms {
            self.store.hset(&key, "response_time_ms", &ms.to_string()).await?;
        }
        Ok(())
    }

    /// Approximate total pending URL count across all domain frontiers.
    pub async fn count(&self) -> Result<u64, WaypointError> {
        let keys = self.store.scan_prefix("frontier:").await?;
        let mut total = 0u64;
        for key in keys {
            total += self.store.llen(&key).await?;
        }
        Ok(total)
    }

    pub async fn is_empty(&self) -> Result<bool, WaypointError> {
        Ok(self.count().await? == 0)
    }

    /// §4.7's "coarse health ping": pending-domain depth of each shard's
    /// ready-queue, indexed by shard id.
    pub async fn shard_queue_depths(&self) -> Result<Vec<u64>, WaypointError> {
        let mut depths = Vec::with_capacity(self.shard_count);
        for shard in 0..self.shard_count {
            depths.push(self.store.llen(&format!("domains:queue:{shard}")).await?);
        }
        Ok(depths)
    }

    /// Count of distinct domains with a `domain:<domain>` record — every
    /// domain the crawler has ever touched (seeded, linked-to, or robots
    /// checked), not just the ones currently queued.
    pub async fn domains_seen_count(&self) -> Result<u64, WaypointError> {
        Ok(self.store.scan_prefix("domain:").await?.len() as u64)
    }

    /// §4.5.4. `seeds` is the raw seed-stream content; normalization,
    /// domain marking, and the initial `add_urls_batch` all happen here.
    pub async fn initialize(
        &self,
        resume: bool,
        seeds: &[String],
        strip_query_params: &[String],
    ) -> Result<(), WaypointError> {
        self.reshard_if_needed(resume).await?;

        self.store
            .filter_reserve(SEEN_FILTER_KEY, self.seen_filter_capacity, self.seen_filter_fpr)
            .await?;

        if !resume {
            self.purge().await?;
            self.load_seeds(seeds, strip_query_params).await?;
        }

        Ok(())
    }

    async fn reshard_if_needed(&self, resume: bool) -> Result<(), WaypointError> {
        let stored: Option<usize> = self
            .store
            .get(SHARD_COUNT_KEY)
            .await?
            .and_then(|v| v.parse().ok());

        if let Some(old_shard_count) = stored {
            if resume && old_shard_count != self.shard_count {
                info!(
                    old_shard_count,
                    new_shard_count = self.shard_count,
                    "resharding frontier before serving workers"
                );
                for shard in 0..old_shard_count {
                    let key = format!("domains:queue:{shard}");
                    while self.store.lpop(&key).await?.is_some() {}
                }
                let mut domains_rehomed = 0u64;
                for key in self.store.scan_prefix("frontier:").await? {
                    let Some(domain) = key.strip_prefix("frontier:") else {
                        continue;
                    };
                    if self.store.llen(&key).await? == 0 {
                        continue;
                    }
                    let shard = self.shard_for(domain);
                    self.store.rpush(&format!("domains:queue:{shard}"), domain).await?;
                    domains_rehomed += 1;
                }
                info!(
                    domains_rehomed,
                    old_shard_count,
                    new_shard_count = self.shard_count,
                    "resharding complete"
                );
            }
        }
        self.store.set(SHARD_COUNT_KEY, &self.shard_count.to_string()).await?;
        Ok(())
    }

    async fn purge(&self) -> Result<(), WaypointError> {
        for key in self.store.scan_prefix("frontier:").await? {
            self.store.delete(&key).await?;
        }
        for shard in 0..self.shard_count {
            self.store.delete(&format!("domains:queue:{shard}")).await?;
        }
        for key in self.store.scan_prefix("domain:").await? {
            self.store.hdel(&key, &["robots_txt", "robots_expires"]).await?;
        }
        Ok(())
    }

    async fn load_seeds(&self, seeds: &[String], strip_query_params: &[String]) -> Result<(), WaypointError> {
        let normalized: Vec<String> = seeds
            .iter()
            .filter_map(|s| normalize(s, strip_query_params))
            .collect();

        let mut domains = HashSet::new();
        for u in &normalized {
            if let Some(d) = extract_domain(u) {
                domains.insert(d);
            }
        }
        for d in &domains {
            self.politeness.mark_seeded(d).await?;
        }
        info!(domains = domains.len(), seeds = normalized.len(), "seed domains collected");

        self.prewarm_robots(&domains).await;

        let added = self.add_urls_batch(&normalized, 0).await?;
        info!(added, "seed URLs loaded into frontier");
        Ok(())
    }

    /// Bounded-concurrency robots.txt prefetch so seeding a large domain
    /// set doesn't serialize on one robots fetch at a time.
    async fn prewarm_robots(&self, domains: &HashSet<String>) {
        let semaphore = Arc::new(Semaphore::new(ROBOTS_PREWARM_CONCURRENCY));
        let mut tasks = tokio::task::JoinSet::new();
        for domain in domains.clone() {
            let politeness = Arc::clone(&self.politeness);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let probe = format!("https://{domain}/");
                let _ = politeness.is_allowed(&probe).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use url::Url;
    use waypoint_core::{FetchConfig, FetchResponse, HttpFetcher};
    use waypoint_store::MemoryStore;

    struct AllowAllFetcher;

    #[async_trait]
    impl HttpFetcher for AllowAllFetcher {
        async fn fetch(&self, url: &Url, _config: &FetchConfig) -> Result<FetchResponse, WaypointError> {
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

    fn frontier(shard_count: usize) -> Frontier {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
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
        Frontier::new(store, politeness, shard_count, 2000, 10_000, 0.01)
    }

    #[tokio::test]
    async fn add_then_pop_round_trip() {
        let f = frontier(1);
        let added = f
            .add_urls_batch(&["https://example.com/a".to_string()], 0)
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert!(!f.is_empty().await.unwrap());

        let shard = f.shard_for("example.com");
        let (url, domain, depth) = f.get_next_url(shard).await.unwrap().unwrap();
        assert_eq!(url, "https://example.com/a");
        assert_eq!(domain, "example.com");
        assert_eq!(depth, 0);
        assert!(f.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_urls_in_one_batch_collapse() {
        let f = frontier(1);
        let urls = vec![
            "https://example.com/a".to_string(),
            "https://example.com/a".to_string(),
        ];
        let added = f.add_urls_batch(&urls, 0).await.unwrap();
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let f = frontier(1);
        assert_eq!(f.add_urls_batch(&[], 0).await.unwrap(), 0);
        assert!(f.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn oversized_url_is_rejected() {
        let f = frontier(1);
        let huge = format!("https://example.com/{}", "a".repeat(3000));
        assert_eq!(f.add_urls_batch(&[huge], 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_text_extension_is_rejected() {
        let f = frontier(1);
        let added = f
            .add_urls_batch(&["https://example.com/report.pdf".to_string()], 0)
            .await
            .unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn get_next_url_on_empty_shard_is_none() {
        let f = frontier(1);
        assert!(f.get_next_url(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn already_seen_url_is_not_readded() {
        let f = frontier(1);
        let url = vec!["https://example.com/a".to_string()];
        assert_eq!(f.add_urls_batch(&url, 0).await.unwrap(), 1);
        assert_eq!(f.add_urls_batch(&url, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shard_queue_depths_reflects_pending_domains() {
        let f = frontier(2);
        f.add_urls_batch(&["https://example.com/a".to_string()], 0)
            .await
            .unwrap();
        let depths = f.shard_queue_depths().await.unwrap();
        assert_eq!(depths.len(), 2);
        assert_eq!(depths.iter().sum::<u64>(), 1);
    }

    #[tokio::test]
    async fn record_visit_persists_outcome_fields() {
        let f = frontier(1);
        let outcome = waypoint_core::VisitOutcome {
            status: Some(200),
            content_type: Some("text/html".to_string()),
            error: None,
            response_time_ms: Some(42),
            fetched_at: chrono::Utc::now(),
        };
        f.record_visit("https://example.com/a", "example.com", &outcome)
            .await
            .unwrap();
        let keys = f.store.scan_prefix("visited:").await.unwrap();
        assert_eq!(keys.len(), 1);
        let map = f.store.hgetall(&keys[0]).await.unwrap();
        assert_eq!(map.get("status").map(String::as_str), Some("200"));
        assert_eq!(map.get("domain").map(String::as_str), Some("example.com"));
    }

    #[tokio::test]
    async fn nonempty_domain_is_requeued_after_pop() {
        let f = frontier(1);
        let urls = vec![
            "https://example.com/a".to_string(),
            "https://example.com/b".to_string(),
        ];
        f.add_urls_batch(&urls, 0).await.unwrap();
        let shard = f.shard_for("example.com");
        let _ = f.get_next_url(shard).await.unwrap().unwrap();
        // domain re-appended to its shard queue because its frontier list
        // still has one entry left.
        let second = f.get_next_url(shard).await.unwrap();
        assert!(second.is_some());
    }
}
