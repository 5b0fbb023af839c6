//! AcademicTransfer public data API.
//!
//! The listing page embeds a public bearer token in its Nuxt payload; with
//! it, `/vacancies/` pages through every vacancy and `/vacancies/{id}/`
//! returns the full record.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::http_client::{HttpClient, polite_delay};
use super::parsers::jobposting::SOURCE;
use super::parsers::nuxt::{extract_public_token, parse_nuxt_payload};
use crate::error::FetchError;
use crate::models::DetailRecord;
use crate::scraper::cleaner::supports_international;

pub const API_BASE: &str = "https://api.academictransfer.com";
const API_VERSION_ACCEPT: &str = "application/json; version=2";

/// Filters for the vacancy listing endpoint.
#[derive(Debug, Clone)]
pub struct ApiQuery {
    pub page_size: u32,
    /// `None` disables the filter; 3 is PhD.
    pub education_level: Option<u32>,
    pub function_types: Vec<u32>,
    pub include_inactive: bool,
    /// Extra `key=value` pairs passed through verbatim.
    pub extra: Vec<(String, String)>,
}

impl Default for ApiQuery {
    fn default() -> Self {
        Self { page_size: 100, education_level: Some(3), function_types: Vec::new(), include_inactive: false, extra: Vec::new() }
    }
}

impl ApiQuery {
    pub fn first_page_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{API_BASE}/vacancies/")).context("Invalid API base URL")?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("page_size", &self.page_size.to_string());
            if let Some(level) = self.education_level.filter(|l| *l > 0) {
                q.append_pair("education_level", &level.to_string());
            }
            for ft in &self.function_types {
                q.append_pair("function_types", &ft.to_string());
            }
            if !self.include_inactive {
                q.append_pair("is_active", "true");
            }
            for (k, v) in &self.extra {
                q.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// Parse a `key=value` CLI pair.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got: {raw}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("param key cannot be empty".to_string());
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingMeta {
    pub count: Option<u64>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

/// One vacancy from the detail endpoint, reduced to the columns we use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiVacancy {
    pub source: String,
    pub source_id: Option<String>,
    pub official_link: Option<String>,
    pub apply_link: Option<String>,
    pub title_en: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub organisation: Option<String>,
    pub department: Option<String>,
    pub deadline: Option<String>,
    pub full_time_salary_min: Option<Value>,
    pub full_time_salary_max: Option<Value>,
    pub weekly_hours_min: Option<Value>,
    pub weekly_hours_max: Option<Value>,
    pub employment_type: Option<String>,
    pub description_html: String,
    pub requirements_html: String,
    pub application_html: String,
    pub supports_international: bool,
    pub tags: Vec<String>,
    pub raw: Value,
}

fn text(detail: &Value, key: &str) -> Option<String> {
    match detail.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(detail: &Value, key: &str) -> Option<Value> {
    detail.get(key).filter(|v| !v.is_null()).cloned()
}

fn tags(detail: &Value) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for key in ["function_types", "scientific_fields", "research_fields", "keywords"] {
        let Some(items) = detail.get(key).and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            match item {
                Value::Null | Value::Bool(false) => {}
                Value::String(s) if s.is_empty() => {}
                Value::String(s) => {
                    tags.insert(s.clone());
                }
                other => {
                    tags.insert(other.to_string());
                }
            }
        }
    }
    tags.into_iter().collect()
}

pub fn transform_detail(detail: Value) -> ApiVacancy {
    let description = text(&detail, "description").unwrap_or_default();
    let requirements = text(&detail, "requirements").unwrap_or_default();
    let application = ["contract_terms", "additional_info", "extra_info"]
        .iter()
        .find_map(|k| text(&detail, k))
        .unwrap_or_default();

    ApiVacancy {
        source: SOURCE.to_string(),
        source_id: text(&detail, "external_id").or_else(|| text(&detail, "id")),
        official_link: text(&detail, "absolute_url"),
        apply_link: text(&detail, "application_url").or_else(|| text(&detail, "apply_url")),
        title_en: text(&detail, "title"),
        country: text(&detail, "country_code"),
        city: text(&detail, "city"),
        organisation: text(&detail, "organisation_name"),
        department: text(&detail, "department_name"),
        deadline: text(&detail, "end_date"),
        full_time_salary_min: number(&detail, "min_salary"),
        full_time_salary_max: number(&detail, "max_salary"),
        weekly_hours_min: number(&detail, "min_weekly_hours"),
        weekly_hours_max: number(&detail, "max_weekly_hours"),
        employment_type: text(&detail, "contract_type"),
        supports_international: supports_international(&[description.as_str(), requirements.as_str(), application.as_str()]),
        tags: tags(&detail),
        description_html: description,
        requirements_html: requirements,
        application_html: application,
        raw: detail,
    }
}

impl DetailRecord for ApiVacancy {
    fn source_url(&self) -> &str {
        self.official_link.as_deref().unwrap_or_default()
    }

    fn label(&self) -> String {
        format!(
            "{} ({})",
            self.title_en.as_deref().unwrap_or("untitled"),
            self.source_id.as_deref().unwrap_or("?")
        )
    }

    fn csv_header() -> &'static [&'static str] {
        &["source_id", "official_link", "title_en", "organisation", "city", "country", "deadline", "tags"]
    }

    fn csv_row(&self) -> Vec<String> {
        let o = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            o(&self.source_id),
            o(&self.official_link),
            o(&self.title_en),
            o(&self.organisation),
            o(&self.city),
            o(&self.country),
            o(&self.deadline),
            self.tags.join("; "),
        ]
    }
}

pub struct VacancyApi {
    client: HttpClient,
    headers: HeaderMap,
}

/// The unvisited `next` link of a listing page. A repeated link ends the walk.
fn next_page(payload: &Value, seen: &mut HashSet<String>) -> Option<String> {
    let next = payload.get("next").and_then(Value::as_str).filter(|s| !s.is_empty())?;
    if !seen.insert(next.to_string()) {
        warn!("API returned an already visited page {}; stopping", next);
        return None;
    }
    Some(next.to_string())
}

impl VacancyApi {
    pub fn listing_page_url(locale: &str) -> String {
        format!("https://www.academictransfer.com/{locale}/jobs?function_types=1")
    }

    /// Resolve the public token from the listing page and build auth headers.
    pub async fn connect(client: HttpClient, locale: &str) -> Result<Self> {
        let listing = Self::listing_page_url(locale);
        let html = client.get_text(&listing).await.context("Failed to load listing page for API token")?;
        let payload = parse_nuxt_payload(&html)?;
        let token = extract_public_token(&payload)?;
        debug!("Resolved public API token ({} chars)", token.len());
        Ok(Self { client, headers: api_headers(&token)? })
    }

    /// Follow `next` links until exhausted or one repeats.
    pub async fn list(&self, query: &ApiQuery) -> Result<(Vec<Value>, ListingMeta)> {
        let first = query.first_page_url()?.to_string();
        let mut seen = HashSet::from([first.clone()]);
        let mut url = Some(first);
        let mut items = Vec::new();
        let mut meta: Option<ListingMeta> = None;

        while let Some(page_url) = url.take() {
            let payload = self.client.get_json(&page_url, self.headers.clone()).await?;
            if let Some(results) = payload.get("results").and_then(Value::as_array) {
                items.extend(results.iter().cloned());
            }
            if meta.is_none() {
                meta = Some(serde_json::from_value(payload.clone()).unwrap_or_default());
            }
            url = next_page(&payload, &mut seen);
            debug!("Listed {} vacancies so far", items.len());
        }

        let meta = meta.unwrap_or_default();
        info!("API listing: {} vacancies (reported count {:?})", items.len(), meta.count);
        Ok((items, meta))
    }

    pub async fn detail(&self, id: &Value) -> Result<Value, FetchError> {
        let id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let url = format!("{API_BASE}/vacancies/{id}/");
        self.client.get_json(&url, self.headers.clone()).await
    }

    /// Fetch and transform every listed vacancy; failures are isolated.
    pub async fn details(&self, listing: &[Value], delay: Duration) -> (Vec<ApiVacancy>, Vec<String>) {
        let mut records = Vec::new();
        let mut failed = Vec::new();
        for (i, item) in listing.iter().enumerate() {
            let Some(id) = item.get("id") else {
                warn!("Listing item {} has no id", i);
                continue;
            };
            match self.detail(id).await {
                Ok(detail) => records.push(transform_detail(detail)),
                Err(e) => {
                    warn!("Vacancy {}: {}", id, e);
                    failed.push(format!("{API_BASE}/vacancies/{id}/"));
                }
            }
            if (i + 1) % 25 == 0 {
                info!("Fetched {}/{} vacancy details", i + 1, listing.len());
            }
            polite_delay(delay, 0).await;
        }
        (records, failed)
    }
}

fn api_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(API_VERSION_ACCEPT));
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).context("Token is not a valid header value")?,
    );
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_page_url_carries_filters() {
        let query = ApiQuery {
            function_types: vec![1, 4],
            extra: vec![("ordering".into(), "-created".into())],
            ..Default::default()
        };
        let url = query.first_page_url().unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.academictransfer.com/vacancies/?page_size=100&education_level=3\
             &function_types=1&function_types=4&is_active=true&ordering=-created"
        );
    }

    #[test]
    fn disabled_filters_are_omitted() {
        let query = ApiQuery { education_level: Some(0), include_inactive: true, ..Default::default() };
        assert_eq!(query.first_page_url().unwrap().query(), Some("page_size=100"));
    }

    #[test]
    fn param_parsing() {
        assert_eq!(parse_param(" a = b=c "), Ok(("a".into(), "b=c".into())));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn transforms_detail_payload() {
        let detail = json!({
            "id": 991,
            "external_id": null,
            "absolute_url": "https://www.academictransfer.com/en/jobs/991/phd/",
            "title": "PhD in Catalysis",
            "country_code": "NL",
            "city": "Delft",
            "organisation_name": "TU Delft",
            "min_salary": 2770,
            "max_salary": null,
            "contract_type": "Temporary",
            "description": "<p>Visa support available.</p>",
            "requirements": "",
            "additional_info": "<p>Apply online.</p>",
            "function_types": ["PhD", null],
            "research_fields": ["Chemistry", "PhD"],
            "keywords": [7]
        });
        let v = transform_detail(detail);
        assert_eq!(v.source, "academictransfer");
        assert_eq!(v.source_id.as_deref(), Some("991"));
        assert_eq!(v.application_html, "<p>Apply online.</p>");
        assert_eq!(v.full_time_salary_min, Some(json!(2770)));
        assert_eq!(v.full_time_salary_max, None);
        assert!(v.supports_international);
        assert_eq!(v.tags, vec!["7", "Chemistry", "PhD"]);
        assert_eq!(ApiVacancy::csv_header().len(), v.csv_row().len());
    }

    #[test]
    fn next_links_stop_on_repeat() {
        let mut seen = HashSet::from(["p1".to_string()]);
        assert_eq!(next_page(&json!({"next": "p2"}), &mut seen).as_deref(), Some("p2"));
        assert_eq!(next_page(&json!({"next": "p1"}), &mut seen), None);
        assert_eq!(next_page(&json!({"next": "p2"}), &mut seen), None);
        assert_eq!(next_page(&json!({"next": null}), &mut seen), None);
        assert_eq!(next_page(&json!({}), &mut seen), None);
    }

    #[test]
    fn headers_use_versioned_accept() {
        let h = api_headers("abcdefghijkl").unwrap();
        assert_eq!(h[ACCEPT], "application/json; version=2");
        assert_eq!(h[AUTHORIZATION], "Bearer abcdefghijkl");
    }
}
