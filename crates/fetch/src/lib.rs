//! Clearnet HTTP fetcher glue: a thin [`HttpFetcher`] implementation over
//! `reqwest`, bounding body size and surfacing network failures as
//! [`WaypointError::Network`]/[`WaypointError::Timeout`] rather than
//! panicking.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;
use waypoint_core::{FetchConfig, FetchResponse, HttpFetcher, WaypointError};

pub struct ReqwestFetcher {
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, WaypointError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| WaypointError::Network(e.to_string()))?;
        let no_redirect_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WaypointError::Network(e.to_string()))?;
        Ok(Self { client, no_redirect_client })
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new().expect("default reqwest client configuration is always valid")
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, WaypointError> {
        let start = Instant::now();
        debug!(url = %url, "fetching");

        let client = if config.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };
        let request = client
            .get(url.as_str())
            .header("User-Agent", &config.user_agent)
            .timeout(config.timeout);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(url = %url, "fetch timed out");
                WaypointError::Timeout(config.timeout.as_secs())
            } else {
                warn!(url = %url, error = %e, "fetch failed");
                WaypointError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let final_url = Url::parse(response.url().as_str()).unwrap_or_else(|_| url.clone());

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }
        let content_type = headers.get("content-type").cloned();

        if let Some(len) = response.content_length() {
            if len as usize > config.max_body_size {
                return Err(WaypointError::BodyTooLarge {
                    size: len as usize,
                    max: config.max_body_size,
                });
            }
        }

        let max_body_size = config.max_body_size;
        let mut body = Vec::new();
        let mut stream = response;
        while let Some(chunk) = stream
            .chunk()
            .await
            .map_err(|e| WaypointError::Network(e.to_string()))?
        {
            if body.len() + chunk.len() > max_body_size {
                return Err(WaypointError::BodyTooLarge {
                    size: body.len() + chunk.len(),
                    max: max_body_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            url: url.clone(),
            final_url,
            status,
            headers,
            body,
            content_type,
            fetched_at: chrono::Utc::now(),
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_builds() {
        let _ = ReqwestFetcher::new().expect("client builds");
    }
}
