//! Robots Cache (C3) and Politeness Gate (C4): robots.txt acquisition,
//! caching, and per-domain crawl-delay bookkeeping, built on top of the
//! [`Store`] contract and the [`HttpFetcher`] collaborator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use texting_robots::Robot;
use tracing::{debug, warn};
use url::Url;
use waypoint_core::{FetchConfig, HttpFetcher, WaypointError};
use waypoint_normalize::extract_domain;
use waypoint_store::Store;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Robots.txt fetch is capped well below typical HTTP body limits; the
/// vast majority of robots.txt files are a few KiB.
const ROBOTS_MAX_BODY_BYTES: usize = 512 * 1024;

pub struct PolitenessEngine {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn HttpFetcher>,
    user_agent: String,
    min_crawl_delay_seconds: u64,
    robots_fetch_timeout_seconds: u64,
    robots_default_ttl_seconds: i64,
    robots_error_ttl_seconds: i64,
    exclude_domains: HashSet<String>,
}

impl PolitenessEngine {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn HttpFetcher>,
        user_agent: String,
        min_crawl_delay_seconds: u64,
        robots_fetch_timeout_seconds: u64,
        robots_default_ttl_seconds: i64,
        robots_error_ttl_seconds: i64,
        exclude_domains: Vec<String>,
    ) -> Self {
        Self {
            store,
            fetcher,
            user_agent,
            min_crawl_delay_seconds,
            robots_fetch_timeout_seconds,
            robots_default_ttl_seconds,
            robots_error_ttl_seconds,
            exclude_domains: exclude_domains.into_iter().collect(),
        }
    }

    /// §4.4: `now >= next_fetch_time[d]` and `d` is not excluded. Fails
    /// closed (returns `false`) if the domain record cannot be read.
    pub async fn can_fetch_domain_now(&self, domain: &str) -> bool {
        if self.exclude_domains.contains(domain) {
            return false;
        }
        let key = format!("domain:{domain}");
        let map = match self.store.hgetall(&key).await {
            Ok(m) => m,
            Err(e) => {
                warn!(domain, error = %e, "domain record read failed, treating as not-ready");
                return false;
            }
        };
        if map.get("is_excluded").map(|v| v == "1").unwrap_or(false) {
            return false;
        }
        let next_fetch_time: i64 = map
            .get("next_fetch_time")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        now() >= next_fetch_time
    }

    /// §4.4: advance `next_fetch_time[d]` by `crawl_delay(d)`. Must be
    /// called at most once per popped URL, before the HTTP fetch begins.
    pub async fn record_attempt(&self, domain: &str) -> Result<(), WaypointError> {
        let key = format!("domain:{domain}");
        let robots_txt = self.store.hget(&key, "robots_txt").await?.unwrap_or_default();
        let robots_delay = parse_crawl_delay(&robots_txt, &self.user_agent);
        let delay = robots_delay.unwrap_or(0).max(self.min_crawl_delay_seconds);
        let next_fetch_time = now() + delay as i64;
        self.store
            .hset(&key, "next_fetch_time", &next_fetch_time.to_string())
            .await?;
        debug!(domain, delay, next_fetch_time, "recorded fetch attempt");
        Ok(())
    }

    /// §4.3: evaluate `url` against the domain's cached (or freshly
    /// fetched) robots.txt. Never raises; unknown domains and read
    /// failures fall back to a conservative decision per §7.
    pub async fn is_allowed(&self, url: &str) -> bool {
        let Some(domain) = extract_domain(url) else {
            return true;
        };
        if self.exclude_domains.contains(&domain) {
            return false;
        }

        let key = format!("domain:{domain}");
        let map = match self.store.hgetall(&key).await {
            Ok(m) => m,
            Err(e) => {
                warn!(domain, error = %e, "domain record read failed, disallowing conservatively");
                return false;
            }
        };
        if map.get("is_excluded").map(|v| v == "1").unwrap_or(false) {
            return false;
        }

        let robots_expires: i64 = map
            .get("robots_expires")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if robots_expires > now() {
            if let Some(body) = map.get("robots_txt") {
                return evaluate(body, &self.user_agent, url);
            }
        }

        self.refresh_and_evaluate(&domain, url).await
    }

    /// Create the domain's record (if absent) and mark its `is_seeded` flag.
    pub async fn mark_seeded(&self, domain: &str) -> Result<(), WaypointError> {
        self.store
            .hsetnx(&format!("domain:{domain}"), "is_seeded", "1")
            .await?;
        Ok(())
    }

    /// Mark a domain permanently excluded from fetching.
    pub async fn mark_excluded(&self, domain: &str) -> Result<(), WaypointError> {
        self.store
            .hset(&format!("domain:{domain}"), "is_excluded", "1")
            .await
    }

    async fn refresh_and_evaluate(&self, domain: &str, url: &str) -> bool {
        let config = FetchConfig {
            timeout: Duration::from_secs(self.robots_fetch_timeout_seconds),
            max_body_size: ROBOTS_MAX_BODY_BYTES,
            follow_redirects: true,
            user_agent: self.user_agent.clone(),
        };

        let fetched = self.fetch_robots(domain, &config).await;
        let key = format!("domain:{domain}");
        let now_ts = now();

        match fetched {
            Some(body) => {
                let expires = now_ts + self.robots_default_ttl_seconds;
                if let Err(e) = self.store.hset(&key, "robots_txt", &body).await {
                    warn!(domain, error = %e, "failed to cache robots.txt body");
                }
                if let Err(e) = self
                    .store
                    .hset(&key, "robots_expires", &expires.to_string())
                    .await
                {
                    warn!(domain, error = %e, "failed to cache robots expiry");
                }
                evaluate(&body, &self.user_agent, url)
            }
            None => {
                // §3.4: fetch/parse failure caches an empty-allow body with a
                // shorter TTL rather than poisoning the cache indefinitely.
                let expires = now_ts + self.robots_error_ttl_seconds;
                let _ = self.store.hset(&key, "robots_txt", "").await;
                let _ = self
                    .store
                    .hset(&key, "robots_expires", &expires.to_string())
                    .await;
                true
            }
        }
    }

    async fn fetch_robots(&self, domain: &str, config: &FetchConfig) -> Option<String> {
        for scheme in ["https", "http"] {
            let robots_url = format!("{scheme}://{domain}/robots.txt");
            let Ok(url) = Url::parse(&robots_url) else {
                continue;
            };
            match self.fetcher.fetch(&url, config).await {
                Ok(resp) if resp.status < 400 => {
                    return Some(String::from_utf8_lossy(&resp.body).into_owned());
                }
                Ok(resp) if resp.status < 500 => {
                    // 4xx: treat as "no robots restrictions", matching §4.3 step 5.
                    return Some(String::new());
                }
                Ok(_) | Err(_) => continue,
            }
        }
        None
    }
}

fn parse_crawl_delay(body: &str, user_agent: &str) -> Option<u64> {
    if body.is_empty() {
        return None;
    }
    let robot = Robot::new(user_agent, body.as_bytes()).ok()?;
    robot.delay.map(|d| d as u64)
}

fn evaluate(body: &str, user_agent: &str, url: &str) -> bool {
    if body.is_empty() {
        return true;
    }
    let Ok(robot) = Robot::new(user_agent, body.as_bytes()) else {
        return true;
    };
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let path = match parsed.query() {
        Some(q) => format!("{}?{q}", parsed.path()),
        None => parsed.path().to_string(),
    };
    robot.allowed(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use waypoint_core::FetchResponse;
    use waypoint_store::MemoryStore;

    struct FixedFetcher {
        body: &'static str,
        status: u16,
    }

    #[async_trait]
    impl HttpFetcher for FixedFetcher {
        async fn fetch(&self, url: &Url, _config: &FetchConfig) -> Result<FetchResponse, WaypointError> {
            Ok(FetchResponse {
                url: url.clone(),
                final_url: url.clone(),
                status: self.status,
                headers: Default::default(),
                body: self.body.as_bytes().to_vec(),
                content_type: Some("text/plain".to_string()),
                fetched_at: chrono::Utc::now(),
                response_time_ms: 1,
            })
        }
    }

    fn engine(fetcher: Arc<dyn HttpFetcher>) -> PolitenessEngine {
        PolitenessEngine::new(
            Arc::new(MemoryStore::new()),
            fetcher,
            "waypoint-bot".to_string(),
            70,
            10,
            86_400,
            3_600,
            vec![],
        )
    }

    #[tokio::test]
    async fn disallowed_path_is_rejected() {
        let fetcher = Arc::new(FixedFetcher {
            body: "User-agent: *\nDisallow: /private\n",
            status: 200,
        });
        let engine = engine(fetcher);
        assert!(!engine.is_allowed("https://example.com/private/x").await);
        assert!(engine.is_allowed("https://example.com/public").await);
    }

    #[tokio::test]
    async fn fetch_failure_caches_allow_all() {
        let fetcher = Arc::new(FixedFetcher {
            body: "",
            status: 500,
        });
        let engine = engine(fetcher);
        assert!(engine.is_allowed("https://example.com/anything").await);
    }

    #[tokio::test]
    async fn record_attempt_floors_at_min_delay() {
        let fetcher = Arc::new(FixedFetcher {
            body: "User-agent: *\nAllow: /\n",
            status: 200,
        });
        let engine = engine(fetcher);
        let before = now();
        engine.record_attempt("example.com").await.unwrap();
        let map = engine.store.hgetall("domain:example.com").await.unwrap();
        let next: i64 = map.get("next_fetch_time").unwrap().parse().unwrap();
        assert!(next >= before + 70);
    }

    #[tokio::test]
    async fn excluded_domain_is_never_ready() {
        let fetcher = Arc::new(FixedFetcher {
            body: "",
            status: 200,
        });
        let engine = engine(fetcher);
        engine.mark_excluded("blocked.test").await.unwrap();
        assert!(!engine.can_fetch_domain_now("blocked.test").await);
        assert!(!engine.is_allowed("https://blocked.test/").await);
    }
}
