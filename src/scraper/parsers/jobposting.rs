//! AcademicTransfer vacancy pages.
//!
//! Detail pages embed a schema.org `JobPosting` in `application/ld+json`;
//! its fields are mapped as-is. The body text is split into description,
//! requirements and application steps from the JSON-LD description first and
//! from the rendered sections when that yields nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::Html;
use serde_json::Value;
use tracing::{debug, warn};

use super::sections::{SectionTexts, sections_from_dom, split_inline_headings};
use super::{next_element_sibling, select_all, select_one, text_of, text_tight};
use crate::error::ExtractError;
use crate::models::JobRecord;
use crate::scraper::cleaner::{
    derive_status, detect_intake, infer_funding_level, non_empty, parse_deadline, supports_international,
};

pub const SOURCE: &str = "academictransfer";
pub const JOBS_BASE: &str = "https://www.academictransfer.com/en/jobs/";
const DEFAULT_TITLE: &str = "PhD Position";
const DEFAULT_MATCH_SCORE: i32 = 50;

static JOB_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.academictransfer\.com/en/jobs/(\d+)(?:/([^?#]*))?").expect("static regex")
});
static META_LABEL_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"text-sm.*uppercase.*text-gray-500").expect("static regex"));

/// Vacancy id and slug from a detail URL.
pub fn parse_job_url(url: &str) -> Option<(String, String)> {
    let caps = JOB_URL.captures(url.trim())?;
    let slug = caps.get(2).map(|m| m.as_str().trim_matches('/')).unwrap_or_default();
    Some((caps[1].to_string(), slug.to_string()))
}

/// Canonical `/en/jobs/{id}/{slug}/` form, query and fragment dropped.
pub fn normalize_job_url(href: &str) -> Option<String> {
    let (id, slug) = parse_job_url(href)?;
    if slug.is_empty() {
        Some(format!("{}{}/", JOBS_BASE, id))
    } else {
        Some(format!("{}{}/{}/", JOBS_BASE, id, slug))
    }
}

pub fn extract_job(url: &str, html: &str, now: DateTime<Utc>) -> Result<JobRecord, ExtractError> {
    let (source_id, _) = parse_job_url(url).ok_or_else(|| ExtractError::MissingKey(url.to_string()))?;

    let doc = Html::parse_document(html);
    let posting = find_job_posting(&doc);
    if posting.is_none() {
        debug!("No JobPosting JSON-LD on {}", url);
    }
    let empty = Value::Null;
    let json = posting.as_ref().unwrap_or(&empty);

    let meta = extract_meta(&doc);
    let sections = extract_sections(&doc, json);

    let title = str_field(json, "title")
        .or_else(|| select_one(doc.root_element(), "h1").map(text_of).and_then(non_empty))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let (country, city) = location(json.get("jobLocation"));
    let (university, department) = organisation(json);

    let intake_term = detect_intake(&format!("{} {}", sections.description, sections.requirements));
    let (deadline, deadline_status) = parse_deadline(json.get("validThrough").and_then(Value::as_str));
    let texts = [sections.description.as_str(), sections.requirements.as_str()];

    let employment_type = employment_types(json)
        .map(|types| types.join(", "))
        .or_else(|| meta.get("Job types").cloned());

    Ok(JobRecord {
        source: SOURCE.to_string(),
        source_id,
        official_link: url.to_string(),
        title_en: title.trim().to_string(),
        title_zh: None,
        university,
        department,
        country,
        city,
        intake_term,
        deadline,
        deadline_status,
        employment_type,
        weekly_hours: meta.get("Weekly hours").cloned(),
        education_level: meta.get("Education level").cloned(),
        funding_level: infer_funding_level(&texts),
        supports_international: supports_international(&texts),
        tags: collect_tags(&meta, json, &sections),
        description_en: sections.description,
        description_zh: None,
        requirements_en: sections.requirements,
        requirements_zh: None,
        application_steps_en: sections.application_steps,
        application_steps_zh: None,
        match_score: DEFAULT_MATCH_SCORE,
        status: derive_status(deadline, now),
        last_scraped_at: now,
        raw_payload: posting,
    })
}

// ── Structured data ───────────────────────────────────────────────────────────

fn is_job_posting(v: &Value) -> bool {
    match v.get("@type") {
        Some(Value::String(t)) => t == "JobPosting",
        Some(Value::Array(ts)) => ts.iter().any(|t| t == "JobPosting"),
        _ => false,
    }
}

fn find_job_posting(doc: &Html) -> Option<Value> {
    for script in select_all(doc.root_element(), r#"script[type="application/ld+json"]"#) {
        let raw: String = script.text().collect();
        let parsed: Value = match serde_json::from_str(raw.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!("{}", ExtractError::StructuredData(e.to_string()));
                continue;
            }
        };

        let candidates: Vec<Value> = match parsed {
            Value::Array(items) => items,
            Value::Object(ref obj) if obj.contains_key("@graph") => {
                obj["@graph"].as_array().cloned().unwrap_or_default()
            }
            other => vec![other],
        };
        if let Some(posting) = candidates.into_iter().find(is_job_posting) {
            return Some(posting);
        }
    }
    None
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).and_then(non_empty)
}

fn employment_types(json: &Value) -> Option<Vec<String>> {
    let types: Vec<String> = match json.get("employmentType")? {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => return None,
    };
    let types: Vec<String> = types.into_iter().filter_map(non_empty).collect();
    if types.is_empty() { None } else { Some(types) }
}

fn location(v: Option<&Value>) -> (Option<String>, Option<String>) {
    match v {
        Some(Value::Array(items)) => location(items.first()),
        Some(loc) if loc.is_object() => {
            let address = loc.get("address").unwrap_or(&Value::Null);
            (str_field(address, "addressCountry"), str_field(address, "addressLocality"))
        }
        _ => (None, None),
    }
}

fn organisation(json: &Value) -> (Option<String>, Option<String>) {
    let Some(org) = json.get("hiringOrganization").filter(|o| o.is_object()) else {
        return (None, None);
    };
    let department = match org.get("department").or_else(|| org.get("subOrganization")) {
        Some(Value::String(s)) => non_empty(s.as_str()),
        Some(dept) if dept.is_object() => str_field(dept, "name"),
        _ => None,
    };
    (str_field(org, "name"), department)
}

// ── Page body ─────────────────────────────────────────────────────────────────

/// Label/value pairs from the vacancy's fact sheet ("Weekly hours", ...).
fn extract_meta(doc: &Html) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    for label in select_all(doc.root_element(), "p[class]") {
        let class = label.value().attr("class").unwrap_or_default();
        if !META_LABEL_CLASS.is_match(class) {
            continue;
        }
        let Some(value) = next_element_sibling(label).filter(|v| v.value().name() == "p") else {
            continue;
        };
        let key = text_tight(label);
        let val = text_of(value);
        if !key.is_empty() && !val.is_empty() {
            meta.entry(key).or_insert(val);
        }
    }
    meta
}

fn extract_sections(doc: &Html, json: &Value) -> SectionTexts {
    if let Some(description) = json.get("description").and_then(Value::as_str) {
        let from_json = split_inline_headings(description);
        if !from_json.is_empty() {
            return from_json;
        }
    }
    sections_from_dom(doc)
}

fn collect_tags(meta: &HashMap<String, String>, json: &Value, sections: &SectionTexts) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for key in ["Academic fields", "Job types", "Education level"] {
        if let Some(value) = meta.get(key) {
            tags.extend(value.split(',').map(|t| t.trim().to_string()));
        }
    }
    if let Some(types) = employment_types(json) {
        tags.extend(types);
    }

    let description = sections.description.to_lowercase();
    if description.contains("phd") {
        tags.insert("PhD".to_string());
    }
    if description.contains("engineering") {
        tags.insert("Engineering".to_string());
    }

    tags.into_iter().filter(|t| !t.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeadlineStatus, FundingLevel, PositionStatus};
    use chrono::TimeZone;

    const URL: &str = "https://www.academictransfer.com/en/jobs/356789/phd-position-quantum-sensing/";

    fn page() -> String {
        let posting = serde_json::json!({
            "@context": "https://schema.org",
            "@type": "JobPosting",
            "title": "PhD Position in Quantum Sensing",
            "employmentType": "FULL_TIME",
            "validThrough": "2025-03-10T23:59:00+01:00",
            "jobLocation": [{"address": {"addressCountry": "NL", "addressLocality": "Delft"}}],
            "hiringOrganization": {"name": "Delft University of Technology", "department": {"name": "Applied Physics"}},
            "description": "<p>A fully funded PhD project in engineering physics, starting 2025 Fall.</p>\
                <p><strong>Requirements</strong></p><ul><li>MSc in Physics</li></ul>\
                <p><strong>Application procedure:</strong> Apply via the portal, visa support provided.</p>"
        });
        format!(
            r#"<html><head><script type="application/ld+json">{}</script></head><body>
            <div><p class="text-sm font-bold uppercase text-gray-500">Weekly hours</p><p>36 - 40</p></div>
            <div><p class="text-sm uppercase tracking-wide text-gray-500">Academic fields</p><p>Physics, Engineering</p></div>
            <div><p class="text-sm uppercase text-gray-500">Education level</p><p>Doctorate</p></div>
            </body></html>"#,
            posting
        )
    }

    #[test]
    fn normalizes_listing_hrefs() {
        assert_eq!(
            normalize_job_url("https://www.academictransfer.com/en/jobs/123/some-slug?utm=x").as_deref(),
            Some("https://www.academictransfer.com/en/jobs/123/some-slug/")
        );
        assert_eq!(
            normalize_job_url("https://www.academictransfer.com/en/jobs/123").as_deref(),
            Some("https://www.academictransfer.com/en/jobs/123/")
        );
        assert_eq!(normalize_job_url("https://www.academictransfer.com/en/jobs/?page=2"), None);
    }

    #[test]
    fn reproduces_structured_data() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let job = extract_job(URL, &page(), now).unwrap();

        assert_eq!(job.source_id, "356789");
        assert_eq!(job.title_en, "PhD Position in Quantum Sensing");
        assert_eq!(job.country.as_deref(), Some("NL"));
        assert_eq!(job.city.as_deref(), Some("Delft"));
        assert_eq!(job.university.as_deref(), Some("Delft University of Technology"));
        assert_eq!(job.department.as_deref(), Some("Applied Physics"));
        assert_eq!(job.employment_type.as_deref(), Some("FULL_TIME"));
        assert_eq!(job.deadline.unwrap().to_rfc3339(), "2025-03-10T22:59:00+00:00");
        assert_eq!(job.deadline_status, DeadlineStatus::Confirmed);
        assert_eq!(job.status, PositionStatus::ClosingSoon);
        assert_eq!(job.weekly_hours.as_deref(), Some("36 - 40"));
        assert_eq!(job.education_level.as_deref(), Some("Doctorate"));
        assert_eq!(job.intake_term.as_deref(), Some("2025 Fall"));
        assert_eq!(job.funding_level, FundingLevel::Full);
        assert!(!job.supports_international);
        assert_eq!(job.requirements_en, "- MSc in Physics");
        assert_eq!(job.application_steps_en, "Apply via the portal, visa support provided.");
        assert_eq!(
            job.tags,
            vec!["Doctorate", "Engineering", "FULL_TIME", "PhD", "Physics"]
        );
        assert!(job.raw_payload.is_some());
    }

    #[test]
    fn missing_vacancy_id_is_an_error() {
        let err = extract_job("https://www.academictransfer.com/en/about/", "<html></html>", Utc::now());
        assert!(matches!(err, Err(ExtractError::MissingKey(_))));
    }

    #[test]
    fn falls_back_to_rendered_sections() {
        let html = r#"<html><body><h1>PhD in Soil Science</h1>
            <section><h2>Job description</h2><p>Field work in the Netherlands.</p></section>
            <section><h2>Requirements</h2><ul><li>MSc</li></ul></section>
            </body></html>"#;
        let job = extract_job(URL, html, Utc::now()).unwrap();
        assert_eq!(job.title_en, "PhD in Soil Science");
        assert_eq!(job.description_en, "Field work in the Netherlands.");
        assert_eq!(job.requirements_en, "- MSc");
        assert_eq!(job.deadline_status, DeadlineStatus::Unknown);
        assert_eq!(job.status, PositionStatus::Open);
        assert!(job.raw_payload.is_none());
    }
}
