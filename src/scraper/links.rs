//! Listing traversal: one session walks the paginated index and gathers
//! detail-page links.
//!
//! Continuation is attempted in a fixed order. First the site's
//! "next"/"show more" controls are clicked and the link set is checked for
//! growth. Failing that, candidate page URLs are opened directly. When
//! neither yields a new link the collector stops and reports how far it got.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use tokio::time::sleep;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};

use super::http_client::HttpClient;
use super::is_challenge;
use super::parsers::{absolute_url, select_all, text_of};
use super::sites::Site;
use crate::error::{CollectError, FetchError};
use crate::models::ListingLink;
use crate::utils::prompt_enter;

/// How many times the link set is re-read after a click before giving up on it.
const GROWTH_POLLS: usize = 3;

/// A way to advance the listing without knowing the next URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextControl {
    /// `<button>` whose visible text contains the needle.
    ButtonText(String),
    /// `<a>` whose trimmed text equals the needle (page numbers, "下一页").
    LinkText(String),
    /// `<a>` whose href contains the needle.
    HrefContains(String),
}

/// The stateful side of listing traversal.
#[async_trait]
pub trait ListingSession: Send {
    async fn open(&mut self, url: &str) -> Result<(), FetchError>;

    async fn html(&mut self) -> Result<String, FetchError>;

    async fn current_url(&mut self) -> Result<String, FetchError>;

    /// `Ok(false)` when no matching control exists on the current page.
    async fn click(&mut self, control: &NextControl) -> Result<bool, FetchError>;

    async fn run_script(&mut self, script: &str) -> Result<(), FetchError>;
}

// ── HTTP session ──────────────────────────────────────────────────────────────

/// Listing traversal over plain GETs. Links are "clicked" by following their
/// href; buttons and scripts need a browser and are reported as absent.
pub struct HttpSession {
    client: HttpClient,
    url: String,
    html: String,
}

impl HttpSession {
    pub fn new(client: HttpClient) -> Self {
        Self { client, url: String::new(), html: String::new() }
    }
}

/// Href of the first anchor on the page matching `control`.
pub fn matching_href(html: &str, page_url: &str, control: &NextControl) -> Option<String> {
    let doc = Html::parse_document(html);
    select_all(doc.root_element(), "a[href]").into_iter().find_map(|a| {
        let href = a.value().attr("href")?;
        let hit = match control {
            NextControl::ButtonText(_) => false,
            NextControl::LinkText(needle) => text_of(a) == *needle,
            NextControl::HrefContains(needle) => href.contains(needle.as_str()),
        };
        if hit { absolute_url(page_url, href) } else { None }
    })
}

#[async_trait]
impl ListingSession for HttpSession {
    async fn open(&mut self, url: &str) -> Result<(), FetchError> {
        self.html = self.client.get_text(url).await?;
        self.url = url.to_string();
        Ok(())
    }

    async fn html(&mut self) -> Result<String, FetchError> {
        Ok(self.html.clone())
    }

    async fn current_url(&mut self) -> Result<String, FetchError> {
        Ok(self.url.clone())
    }

    async fn click(&mut self, control: &NextControl) -> Result<bool, FetchError> {
        let Some(href) = matching_href(&self.html, &self.url, control) else {
            return Ok(false);
        };
        self.open(&href).await?;
        Ok(true)
    }

    async fn run_script(&mut self, _script: &str) -> Result<(), FetchError> {
        debug!("HTTP session ignores setup scripts");
        Ok(())
    }
}

// ── Collector ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub max_pages: usize,
    pub max_records: Option<usize>,
    /// Pause after every navigation so client-side rendering settles.
    pub settle: Duration,
    /// Extra attempts for the first listing load.
    pub retries: usize,
    pub interactive: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    pub links: Vec<ListingLink>,
    pub pages: usize,
}

/// Insertion-ordered link set keyed on the canonical URL.
#[derive(Default)]
struct LinkSet {
    seen: HashSet<String>,
    links: Vec<ListingLink>,
}

impl LinkSet {
    fn absorb(&mut self, found: Vec<ListingLink>) -> usize {
        let before = self.links.len();
        for link in found {
            if self.seen.insert(link.url.clone()) {
                self.links.push(link);
            }
        }
        self.links.len() - before
    }

    fn len(&self) -> usize {
        self.links.len()
    }
}

pub struct LinkCollector<'a, S: Site + ?Sized> {
    site: &'a S,
    opts: CollectorOptions,
}

impl<'a, S: Site + ?Sized> LinkCollector<'a, S> {
    pub fn new(site: &'a S, opts: CollectorOptions) -> Self {
        Self { site, opts }
    }

    fn full(&self, set: &LinkSet) -> bool {
        self.opts.max_records.is_some_and(|max| set.len() >= max)
    }

    async fn settle(&self) {
        if !self.opts.settle.is_zero() {
            sleep(self.opts.settle).await;
        }
    }

    pub async fn collect<L>(&self, session: &mut L, start_url: &str) -> Result<Collected, CollectError>
    where
        L: ListingSession + ?Sized,
    {
        info!("[{}] Opening listing {}", self.site.id(), start_url);
        self.open_first(session, start_url).await?;
        self.settle().await;

        if let Some(script) = self.site.setup_script() {
            debug!("[{}] Running setup script", self.site.id());
            if let Err(e) = session.run_script(script).await {
                warn!("[{}] Setup script failed: {}", self.site.id(), e);
            }
            self.settle().await;
        }

        let html = self.unblocked_html(session, start_url).await?;
        let mut set = LinkSet::default();
        let url = session.current_url().await.unwrap_or_else(|_| start_url.to_string());
        let added = set.absorb(self.site.links(&html, &url));
        info!("[{}] Page 1: {} links", self.site.id(), added);

        let mut pages = 1;
        let mut visited: HashSet<String> = HashSet::from([url]);

        while pages < self.opts.max_pages && !self.full(&set) {
            let next = pages + 1;
            let before = set.len();

            let mut advanced = self.try_controls(session, &mut set, next).await;
            if !advanced {
                advanced = self.try_urls(session, &mut set, next, &mut visited).await;
            }
            if !advanced {
                info!("[{}] No new links after page {}, stopping", self.site.id(), pages);
                break;
            }

            pages = next;
            info!("[{}] Page {}: +{} links ({} total)", self.site.id(), pages, set.len() - before, set.len());
        }

        let mut links = set.links;
        if let Some(max) = self.opts.max_records {
            links.truncate(max);
        }
        info!("[{}] Collected {} links over {} page(s)", self.site.id(), links.len(), pages);
        Ok(Collected { links, pages })
    }

    async fn open_first<L>(&self, session: &mut L, url: &str) -> Result<(), CollectError>
    where
        L: ListingSession + ?Sized,
    {
        let mut delays = FixedInterval::new(self.opts.settle).take(self.opts.retries);
        loop {
            match session.open(url).await {
                Ok(()) => return Ok(()),
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!("[{}] Listing load failed ({}), retrying in {:?}", self.site.id(), e, delay);
                        sleep(delay).await;
                    }
                    None => return Err(CollectError::Listing(e)),
                },
            }
        }
    }

    async fn unblocked_html<L>(&self, session: &mut L, url: &str) -> Result<String, CollectError>
    where
        L: ListingSession + ?Sized,
    {
        let markers = self.site.challenge_markers();
        let html = session.html().await?;
        if !is_challenge(&html, markers) {
            return Ok(html);
        }
        if !self.opts.interactive {
            return Err(CollectError::Blocked { url: url.to_string() });
        }

        prompt_enter(&format!("[{}] The listing shows a verification challenge. Solve it in the browser window.", self.site.id()))
            .await;
        let html = session.html().await?;
        if is_challenge(&html, markers) {
            return Err(CollectError::Blocked { url: url.to_string() });
        }
        Ok(html)
    }

    async fn reread<L>(&self, session: &mut L, set: &mut LinkSet) -> Option<usize>
    where
        L: ListingSession + ?Sized,
    {
        let html = match session.html().await {
            Ok(html) => html,
            Err(e) => {
                warn!("[{}] Could not read listing: {}", self.site.id(), e);
                return None;
            }
        };
        if is_challenge(&html, self.site.challenge_markers()) {
            warn!("[{}] Challenge appeared while paginating", self.site.id());
            return None;
        }
        let url = session.current_url().await.unwrap_or_default();
        Some(set.absorb(self.site.links(&html, &url)))
    }

    async fn try_controls<L>(&self, session: &mut L, set: &mut LinkSet, next: usize) -> bool
    where
        L: ListingSession + ?Sized,
    {
        for control in self.site.next_controls(next) {
            match session.click(&control).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!("[{}] Click {:?} failed: {}", self.site.id(), control, e);
                    continue;
                }
            }
            debug!("[{}] Clicked {:?}", self.site.id(), control);

            for _ in 0..GROWTH_POLLS {
                self.settle().await;
                match self.reread(session, set).await {
                    Some(added) if added > 0 => return true,
                    Some(_) => {}
                    None => break,
                }
            }
        }
        false
    }

    async fn try_urls<L>(&self, session: &mut L, set: &mut LinkSet, next: usize, visited: &mut HashSet<String>) -> bool
    where
        L: ListingSession + ?Sized,
    {
        let current = session.current_url().await.unwrap_or_default();
        for candidate in self.site.next_page_urls(next, &current) {
            if !visited.insert(candidate.clone()) {
                continue;
            }
            if let Err(e) = session.open(&candidate).await {
                debug!("[{}] Candidate {} failed: {}", self.site.id(), candidate, e);
                continue;
            }
            self.settle().await;
            if let Some(added) = self.reread(session, set).await
                && added > 0
            {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;

    /// In-memory listing: pages keyed by URL, links followed by href.
    #[derive(Default, Clone)]
    pub struct FixtureSession {
        pub pages: HashMap<String, String>,
        pub url: String,
        pub opens: usize,
    }

    impl FixtureSession {
        pub fn with(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    #[async_trait]
    impl ListingSession for FixtureSession {
        async fn open(&mut self, url: &str) -> Result<(), FetchError> {
            self.opens += 1;
            if !self.pages.contains_key(url) {
                return Err(FetchError::Status { url: url.to_string(), status: 404 });
            }
            self.url = url.to_string();
            Ok(())
        }

        async fn html(&mut self) -> Result<String, FetchError> {
            Ok(self.pages.get(&self.url).cloned().unwrap_or_default())
        }

        async fn current_url(&mut self) -> Result<String, FetchError> {
            Ok(self.url.clone())
        }

        async fn click(&mut self, control: &NextControl) -> Result<bool, FetchError> {
            let html = self.html().await?;
            match matching_href(&html, &self.url, control) {
                Some(href) => self.open(&href).await.map(|_| true),
                None => Ok(false),
            }
        }

        async fn run_script(&mut self, _script: &str) -> Result<(), FetchError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixtureSession;
    use super::*;
    use crate::scraper::sites::CompassSite;

    const BASE: &str = "https://www.compassedu.hk";

    fn listing(items: &[u32], next: Option<u32>) -> String {
        let mut html = String::from("<html><body><ul>");
        for i in items {
            html.push_str(&format!(r#"<li><a href="/newst_{i}">case {i}</a></li>"#));
        }
        // duplicates and noise
        html.push_str(r#"<li><a href="/newst_1#top">dup</a></li><li><a href="/about">about</a></li></ul>"#);
        if let Some(n) = next {
            html.push_str(&format!(r#"<div class="pagination"><a href="/offer_p{n}">{n}</a></div>"#));
        }
        html.push_str("</body></html>");
        html
    }

    fn fixture() -> FixtureSession {
        FixtureSession::default()
            .with(&format!("{BASE}/offer"), &listing(&[1, 2, 3], Some(2)))
            .with(&format!("{BASE}/offer_p2"), &listing(&[4, 5, 1], Some(3)))
            .with(&format!("{BASE}/offer_p3"), &listing(&[4, 5], None))
    }

    fn opts(max_pages: usize, max_records: Option<usize>) -> CollectorOptions {
        CollectorOptions { max_pages, max_records, settle: Duration::ZERO, retries: 0, interactive: false }
    }

    #[tokio::test]
    async fn collects_and_deduplicates_across_pages() {
        let site = CompassSite;
        let collector = LinkCollector::new(&site, opts(10, None));
        let got = collector.collect(&mut fixture(), &format!("{BASE}/offer")).await.unwrap();

        let urls: Vec<&str> = got.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.compassedu.hk/newst_1",
                "https://www.compassedu.hk/newst_2",
                "https://www.compassedu.hk/newst_3",
                "https://www.compassedu.hk/newst_4",
                "https://www.compassedu.hk/newst_5",
            ]
        );
        // page 3 adds nothing, so the collector stops at 2
        assert_eq!(got.pages, 2);
    }

    #[tokio::test]
    async fn collection_is_idempotent() {
        let site = CompassSite;
        let collector = LinkCollector::new(&site, opts(10, None));
        let first = collector.collect(&mut fixture(), &format!("{BASE}/offer")).await.unwrap();
        let second = collector.collect(&mut fixture(), &format!("{BASE}/offer")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn limits_are_respected() {
        let site = CompassSite;
        let one_page = LinkCollector::new(&site, opts(1, None));
        let got = one_page.collect(&mut fixture(), &format!("{BASE}/offer")).await.unwrap();
        assert_eq!((got.links.len(), got.pages), (3, 1));

        let capped = LinkCollector::new(&site, opts(10, Some(4)));
        let got = capped.collect(&mut fixture(), &format!("{BASE}/offer")).await.unwrap();
        assert_eq!(got.links.len(), 4);
    }

    #[tokio::test]
    async fn failed_listing_is_retried_then_reported() {
        let site = CompassSite;
        let mut session = FixtureSession::default();
        let collector = LinkCollector::new(&site, CollectorOptions { retries: 2, ..opts(1, None) });
        let err = collector.collect(&mut session, &format!("{BASE}/offer")).await.unwrap_err();
        assert!(matches!(err, CollectError::Listing(FetchError::Status { status: 404, .. })));
        assert_eq!(session.opens, 3);
    }

    #[tokio::test]
    async fn blocked_listing_aborts_unattended() {
        let site = CompassSite;
        let mut session = FixtureSession::default().with(&format!("{BASE}/offer"), "<div class=\"h-captcha\"></div>");
        let err = LinkCollector::new(&site, opts(1, None))
            .collect(&mut session, &format!("{BASE}/offer"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Blocked { .. }));
    }

    #[test]
    fn http_click_follows_matching_anchor() {
        let html = r#"<a href="/offer_p2">2</a><a href="/x">下一页</a>"#;
        let page = "https://www.compassedu.hk/offer";
        assert_eq!(
            matching_href(html, page, &NextControl::LinkText("下一页".into())).as_deref(),
            Some("https://www.compassedu.hk/x")
        );
        assert_eq!(
            matching_href(html, page, &NextControl::HrefContains("offer_p2".into())).as_deref(),
            Some("https://www.compassedu.hk/offer_p2")
        );
        assert_eq!(matching_href(html, page, &NextControl::ButtonText("Show more".into())), None);
    }
}
