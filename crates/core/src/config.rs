use serde::Deserialize;

/// Recognized configuration, matching the option bag the core consumes.
/// Unknown top-level keys are rejected at startup.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub store: StoreConfig,
    pub politeness: PolitenessConfig,
    pub frontier: FrontierConfig,
    pub normalize: NormalizeConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Number of Workers = number of shards.
    pub worker_count: usize,
    pub user_agent: String,
    pub http_timeout_seconds: u64,
    pub max_depth: u32,
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,
    #[serde(default)]
    pub resume: bool,
    /// Selection between persistence strategies. The core only implements
    /// "pure_store"; any other value is rejected at startup.
    #[serde(default = "default_frontier_type")]
    pub frontier_type: String,
    #[serde(default = "default_store_op_timeout")]
    pub store_op_timeout_seconds: u64,
}

fn default_max_url_length() -> usize {
    2000
}
fn default_frontier_type() -> String {
    "pure_store".to_string()
}
fn default_store_op_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Connection string for the Redis-compatible backing store.
    pub redis_url: String,
    #[serde(default = "default_seen_filter_capacity")]
    pub seen_filter_capacity: u64,
    #[serde(default = "default_seen_filter_fpr")]
    pub seen_filter_fpr: f64,
}

fn default_seen_filter_capacity() -> u64 {
    160_000_000
}
fn default_seen_filter_fpr() -> f64 {
    0.001
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PolitenessConfig {
    #[serde(default = "default_min_crawl_delay")]
    pub min_crawl_delay_seconds: u64,
    #[serde(default = "default_robots_fetch_timeout")]
    pub robots_fetch_timeout_seconds: u64,
    #[serde(default = "default_robots_default_ttl")]
    pub robots_default_ttl_seconds: i64,
    #[serde(default = "default_robots_error_ttl")]
    pub robots_error_ttl_seconds: i64,
    #[serde(default)]
    pub exclude_domains: Vec<String>,
}

fn default_min_crawl_delay() -> u64 {
    70
}
fn default_robots_fetch_timeout() -> u64 {
    10
}
fn default_robots_default_ttl() -> i64 {
    86_400
}
fn default_robots_error_ttl() -> i64 {
    3_600
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FrontierConfig {
    #[serde(default = "default_shard_count_source")]
    pub shard_count_source: String,
}

fn default_shard_count_source() -> String {
    "worker_count".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct NormalizeConfig {
    #[serde(default = "default_tracking_params")]
    pub strip_query_params: Vec<String>,
}

fn default_tracking_params() -> Vec<String> {
    [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
        "gclid",
        "fbclid",
        "ref",
        "mc_cid",
        "mc_eid",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
