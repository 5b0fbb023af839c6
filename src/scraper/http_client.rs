use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::PageFetcher;

/// Plain HTTP page loader. Cloning shares the connection pool and cookie jar.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner })
    }

    /// Single GET, body as text. Non-2xx is an error; nothing is retried here.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let resp = self.inner.get(url).send().await.map_err(|e| FetchError::from_reqwest(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }
        resp.text().await.map_err(|e| FetchError::from_reqwest(url, e))
    }

    pub async fn get_json(&self, url: &str, headers: HeaderMap) -> Result<Value, FetchError> {
        debug!("GET {} (json)", url);
        let resp = self
            .inner
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }
        resp.json().await.map_err(|e| FetchError::from_reqwest(url, e))
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        self.get_text(url).await
    }
}

/// Sleep for the configured delay + random jitter.
pub async fn polite_delay(base: Duration, jitter_ms: u64) {
    let jitter = if jitter_ms > 0 { rand::rng().random_range(0..=jitter_ms) } else { 0 };
    let total = base + Duration::from_millis(jitter);
    if !total.is_zero() {
        sleep(total).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_default_config() {
        assert!(HttpClient::new(&ScraperConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn zero_delay_returns_immediately() {
        let started = std::time::Instant::now();
        polite_delay(Duration::ZERO, 0).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
