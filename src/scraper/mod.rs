pub mod api;
pub mod browser;
pub mod cleaner;
pub mod http_client;
pub mod links;
pub mod parsers;
pub mod sites;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FetchError;

// ── Fetch seam ────────────────────────────────────────────────────────────────

/// What a detail page load produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Ready(String),
    /// The site served a bot-verification page instead of content.
    Blocked,
}

/// Swappable page loader: plain HTTP or a rendered browser tab.
///
/// Each worker owns one, so implementations may keep per-session state.
#[async_trait]
pub trait PageFetcher: Send {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError>;

    /// Release any process or connection held by the fetcher.
    async fn close(&mut self) {}
}

pub fn is_challenge(html: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| html.contains(m))
}

/// Load one detail page and classify it.
pub async fn fetch_detail<F>(fetcher: &mut F, url: &str, markers: &[&str]) -> Result<PageOutcome, FetchError>
where
    F: PageFetcher + ?Sized,
{
    let html = fetcher.fetch(url).await?;
    if is_challenge(&html, markers) {
        warn!("Challenge page served for {}", url);
        return Ok(PageOutcome::Blocked);
    }
    debug!("{}: {} bytes", url, html.len());
    Ok(PageOutcome::Ready(html))
}


#[cfg(test)]
mod tests {
    use super::testing::FixtureFetcher;
    use super::*;

    #[tokio::test]
    async fn challenge_marker_yields_blocked() {
        let mut f = FixtureFetcher::default()
            .with("https://a.test/1", "<div class=\"h-captcha\"></div>")
            .with("https://a.test/2", "<h1>ok</h1>");
        let markers = ["h-captcha"];

        assert_eq!(fetch_detail(&mut f, "https://a.test/1", &markers).await.unwrap(), PageOutcome::Blocked);
        assert_eq!(
            fetch_detail(&mut f, "https://a.test/2", &markers).await.unwrap(),
            PageOutcome::Ready("<h1>ok</h1>".into())
        );
    }

    #[tokio::test]
    async fn fetch_errors_pass_through() {
        let mut f = FixtureFetcher::default();
        let err = fetch_detail(&mut f, "https://a.test/missing", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }
}
