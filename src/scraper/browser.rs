//! Headless Chromium via the DevTools protocol.
//!
//! One `BrowserSession` is one browser process with a single tab. The
//! listing collector drives one session; every detail worker launches its
//! own so tabs never share navigation state.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::PageFetcher;
use super::links::{ListingSession, NextControl};
use crate::config::ScraperConfig;
use crate::error::FetchError;

/// Upper bound on waiting for a navigation event after `goto`.
const NAVIGATION_WAIT: Duration = Duration::from_secs(10);

pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    timeout: Duration,
    /// Extra pause after each navigation for client-side rendering.
    render_wait: Duration,
}

impl BrowserSession {
    pub async fn launch(config: &ScraperConfig) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--window-size=1280,720")
            .arg(format!("--user-agent={}", config.user_agent))
            .request_timeout(config.timeout());
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_cfg = builder.build().map_err(|e| FetchError::browser("about:blank", e))?;

        let (browser, mut handler) =
            Browser::launch(browser_cfg).await.map_err(|e| FetchError::browser("about:blank", e))?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser.new_page("about:blank").await.map_err(|e| FetchError::browser("about:blank", e))?;

        debug!("Browser launched (headless: {})", config.headless);
        Ok(Self {
            browser,
            handler,
            page,
            timeout: config.timeout(),
            render_wait: config.render_wait(),
        })
    }

    async fn navigate(&self, url: &str) -> Result<(), FetchError> {
        timeout(self.timeout, self.page.goto(url))
            .await
            .map_err(|_| FetchError::Timeout { url: url.to_string() })?
            .map_err(|e| FetchError::browser(url, e))?;

        // Best effort; SPA routes often never fire a second navigation event.
        let _ = timeout(NAVIGATION_WAIT, self.page.wait_for_navigation()).await;
        Ok(())
    }

    async fn content(&self, url: &str) -> Result<String, FetchError> {
        timeout(self.timeout, self.page.content())
            .await
            .map_err(|_| FetchError::Timeout { url: url.to_string() })?
            .map_err(|e| FetchError::browser(url, e))
    }

    async fn evaluate_bool(&self, script: String) -> Result<bool, FetchError> {
        let url = self.page.url().await.ok().flatten().unwrap_or_default();
        let result = timeout(self.timeout, self.page.evaluate(script))
            .await
            .map_err(|_| FetchError::Timeout { url: url.clone() })?
            .map_err(|e| FetchError::browser(&url, e))?;
        // Scripts returning nothing count as "not clicked".
        Ok(result.into_value::<bool>().unwrap_or(false))
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("Page close error: {}", e);
        }
        if let Err(e) = self.browser.close().await {
            warn!("Browser close error: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Script that clicks the first element matching `control` and reports
/// whether one was found.
pub fn click_script(control: &NextControl) -> String {
    let (selector, mode, needle) = match control {
        NextControl::ButtonText(t) => ("button", "text-contains", t),
        NextControl::LinkText(t) => ("a", "text-equals", t),
        NextControl::HrefContains(t) => ("a[href]", "href-contains", t),
    };
    let needle = serde_json::to_string(needle).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
  const needle = {needle};
  for (const el of document.querySelectorAll('{selector}')) {{
    const text = (el.innerText || el.textContent || '').trim();
    const href = el.getAttribute('href') || '';
    const hit = '{mode}' === 'text-contains' ? text.includes(needle)
      : '{mode}' === 'text-equals' ? text === needle
      : href.includes(needle);
    if (hit && !el.disabled) {{
      el.scrollIntoView({{block: 'center'}});
      el.click();
      return true;
    }}
  }}
  return false;
}})()"#
    )
}

#[async_trait]
impl PageFetcher for BrowserSession {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        self.navigate(url).await?;
        if !self.render_wait.is_zero() {
            sleep(self.render_wait).await;
        }
        self.content(url).await
    }
}

#[async_trait]
impl ListingSession for BrowserSession {
    async fn open(&mut self, url: &str) -> Result<(), FetchError> {
        self.navigate(url).await
    }

    async fn html(&mut self) -> Result<String, FetchError> {
        let url = self.current_url().await?;
        self.content(&url).await
    }

    async fn current_url(&mut self) -> Result<String, FetchError> {
        self.page
            .url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| FetchError::browser("current page", e))
    }

    async fn click(&mut self, control: &NextControl) -> Result<bool, FetchError> {
        self.evaluate_bool(click_script(control)).await
    }

    async fn run_script(&mut self, script: &str) -> Result<(), FetchError> {
        self.evaluate_bool(script.to_string()).await.map(|applied| {
            if !applied {
                debug!("Setup script reported no change");
            }
        })
    }
}

/// Owns a lazily launched browser so a worker only pays for Chromium once
/// it has work.
pub struct BrowserFetcher {
    config: ScraperConfig,
    session: Option<BrowserSession>,
}

impl BrowserFetcher {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config, session: None }
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        if self.session.is_none() {
            self.session = Some(BrowserSession::launch(&self.config).await?);
        }
        match self.session.as_mut() {
            Some(session) => session.fetch(url).await,
            None => Err(FetchError::browser(url, "browser not running")),
        }
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_script_escapes_needle() {
        let js = click_script(&NextControl::LinkText("下一页 \"x\"".into()));
        assert!(js.contains(r#"const needle = "下一页 \"x\"";"#));
        assert!(js.contains("querySelectorAll('a')"));
        assert!(js.contains("'text-equals' === 'text-contains'"));
    }

    #[test]
    fn button_controls_match_on_contained_text() {
        let js = click_script(&NextControl::ButtonText("Show more results".into()));
        assert!(js.contains("querySelectorAll('button')"));
        assert!(js.contains("'text-contains' === 'text-contains'"));
    }
}
