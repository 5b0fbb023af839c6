//! The four scraped sites and the knobs the shared pipeline needs from each.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use scraper::Html;
use url::Url;

use super::links::NextControl;
use super::parsers::{Extracted, absolute_url, ece_staff, faculty, jobposting, offer, select_all, text_of};
use crate::error::ExtractError;
use crate::models::{DetailRecord, FacultyProfile, JobRecord, ListingLink, OfferRecord, StaffProfile};

static PAGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_p\d+").expect("static regex"));

/// How pages of a site are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    Http,
    Browser,
}

/// A scraped site: listing traversal hints plus a pure detail extractor.
pub trait Site: Send + Sync + 'static {
    type Record: DetailRecord;

    fn id(&self) -> &'static str;

    fn default_listing_url(&self) -> &'static str;

    fn listing_strategy(&self) -> FetchStrategy {
        FetchStrategy::Browser
    }

    fn detail_strategy(&self) -> FetchStrategy {
        FetchStrategy::Browser
    }

    /// Substrings that only appear on bot-verification pages.
    fn challenge_markers(&self) -> &'static [&'static str] {
        &[]
    }

    /// Canonical detail links found on one rendered listing page.
    fn links(&self, html: &str, page_url: &str) -> Vec<ListingLink>;

    /// Controls to try, in order, to reach listing page `next_page`.
    fn next_controls(&self, _next_page: usize) -> Vec<NextControl> {
        Vec::new()
    }

    /// Direct URLs to try, in order, when no control advanced the listing.
    fn next_page_urls(&self, _next_page: usize, _current_url: &str) -> Vec<String> {
        Vec::new()
    }

    /// Script run once after the first listing load.
    fn setup_script(&self) -> Option<&'static str> {
        None
    }

    fn extract(&self, link: &ListingLink, html: &str) -> Result<Extracted<Self::Record>, ExtractError>;
}

/// Every `<a href>` on the page, resolved, fragment-free and passed through
/// `canonical`. The anchor text becomes the link name.
pub fn anchor_links(html: &str, page_url: &str, canonical: impl Fn(&str) -> Option<String>) -> Vec<ListingLink> {
    let doc = Html::parse_document(html);
    select_all(doc.root_element(), "a[href]")
        .into_iter()
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = absolute_url(page_url, href)?;
            let url = url.split('#').next().unwrap_or_default().to_string();
            let url = canonical(&url)?;
            let name = text_of(a);
            Some(if name.is_empty() { ListingLink::new(url) } else { ListingLink::named(url, name) })
        })
        .collect()
}

// ── AcademicTransfer ──────────────────────────────────────────────────────────

pub struct AcademicTransferSite;

impl Site for AcademicTransferSite {
    type Record = JobRecord;

    fn id(&self) -> &'static str {
        "phd-jobs"
    }

    fn default_listing_url(&self) -> &'static str {
        "https://www.academictransfer.com/en/jobs?function_types=1"
    }

    // Detail pages embed JSON-LD, so rendering is only needed to page the listing.
    fn detail_strategy(&self) -> FetchStrategy {
        FetchStrategy::Http
    }

    fn links(&self, html: &str, page_url: &str) -> Vec<ListingLink> {
        anchor_links(html, page_url, jobposting::normalize_job_url)
    }

    fn next_controls(&self, _next_page: usize) -> Vec<NextControl> {
        vec![NextControl::ButtonText("Show more results".into())]
    }

    fn extract(&self, link: &ListingLink, html: &str) -> Result<Extracted<JobRecord>, ExtractError> {
        jobposting::extract_job(&link.url, html, Utc::now()).map(Extracted::Record)
    }
}

// ── Compass offers ────────────────────────────────────────────────────────────

pub struct CompassSite;

impl CompassSite {
    pub const BASE_URL: &'static str = "https://www.compassedu.hk";
    const LISTING_URL: &'static str = "https://www.compassedu.hk/offer";
}

impl Site for CompassSite {
    type Record = OfferRecord;

    fn id(&self) -> &'static str {
        "offers"
    }

    fn default_listing_url(&self) -> &'static str {
        Self::LISTING_URL
    }

    fn challenge_markers(&self) -> &'static [&'static str] {
        &["h-captcha", "验证码"]
    }

    fn links(&self, html: &str, page_url: &str) -> Vec<ListingLink> {
        anchor_links(html, page_url, |url| {
            (url.contains("/newst_") || url.contains("/offer/")).then(|| url.to_string())
        })
    }

    fn next_controls(&self, next_page: usize) -> Vec<NextControl> {
        vec![
            NextControl::LinkText(next_page.to_string()),
            NextControl::HrefContains(format!("offer_p{next_page}")),
            NextControl::LinkText("下一页".into()),
            NextControl::LinkText("Next".into()),
        ]
    }

    fn next_page_urls(&self, next_page: usize, current_url: &str) -> Vec<String> {
        let mut urls = vec![format!("{}/offer_p{}", Self::BASE_URL, next_page)];
        if PAGE_SUFFIX.is_match(current_url) {
            urls.push(PAGE_SUFFIX.replace(current_url, format!("_p{next_page}")).into_owned());
        }
        urls.push(format!("{}?page={}", Self::LISTING_URL, next_page));
        urls.push(format!("{}?p={}", Self::LISTING_URL, next_page));
        if let Some(url) = with_query_param(current_url.trim_end_matches('/'), "page", &next_page.to_string()) {
            urls.push(url);
        }
        let mut seen = HashSet::new();
        urls.retain(|u| seen.insert(u.clone()));
        urls
    }

    fn extract(&self, link: &ListingLink, html: &str) -> Result<Extracted<OfferRecord>, ExtractError> {
        Ok(Extracted::Record(offer::extract_offer(&link.url, html)))
    }
}

/// `url` with `key` set to `value`, replacing any existing pairs for `key`.
fn with_query_param(url: &str, key: &str, value: &str) -> Option<String> {
    let mut url = Url::parse(url).ok()?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k.as_ref() != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut().clear().extend_pairs(kept).append_pair(key, value);
    Some(url.to_string())
}

// ── NUS ECE staff ─────────────────────────────────────────────────────────────

pub struct EceSite;

impl EceSite {
    const LISTING_URL: &'static str = "https://cde.nus.edu.sg/ece/about-us/people/academic-staff/";
}

impl Site for EceSite {
    type Record = StaffProfile;

    fn id(&self) -> &'static str {
        "ece-staff"
    }

    fn default_listing_url(&self) -> &'static str {
        Self::LISTING_URL
    }

    fn challenge_markers(&self) -> &'static [&'static str] {
        &["h-captcha", "Additional security check"]
    }

    fn links(&self, html: &str, _page_url: &str) -> Vec<ListingLink> {
        anchor_links(html, ece_staff::BASE_URL, |url| {
            if !url.contains("/ece/staff/") || url.starts_with(Self::LISTING_URL.trim_end_matches('/')) {
                return None;
            }
            Some(url.trim_end_matches('/').to_string())
        })
    }

    fn extract(&self, link: &ListingLink, html: &str) -> Result<Extracted<StaffProfile>, ExtractError> {
        Ok(Extracted::Record(ece_staff::extract_staff(&link.url, html)))
    }
}

// ── NUS Computing faculty ─────────────────────────────────────────────────────

pub struct FacultySite;

const SELECT_DEPARTMENT: &str = r#"(() => {
  for (const select of document.querySelectorAll('select')) {
    for (let i = 0; i < select.options.length; i++) {
      if (select.options[i].text.includes('Information Systems')) {
        select.selectedIndex = i;
        select.dispatchEvent(new Event('change'));
        return true;
      }
    }
  }
  return false;
})()"#;

impl Site for FacultySite {
    type Record = FacultyProfile;

    fn id(&self) -> &'static str {
        "faculty"
    }

    fn default_listing_url(&self) -> &'static str {
        "https://www.comp.nus.edu.sg/about/faculty/"
    }

    fn links(&self, html: &str, page_url: &str) -> Vec<ListingLink> {
        faculty::faculty_links(html, page_url)
    }

    fn setup_script(&self) -> Option<&'static str> {
        Some(SELECT_DEPARTMENT)
    }

    fn extract(&self, link: &ListingLink, html: &str) -> Result<Extracted<FacultyProfile>, ExtractError> {
        Ok(faculty::extract_faculty(link, html))
    }
}
