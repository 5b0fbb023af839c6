use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Listing link ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingLink {
    pub url: String,
    pub name: Option<String>,
}

impl ListingLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), name: None }
    }

    pub fn named(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self { url: url.into(), name: Some(name.into()) }
    }
}

// ── Record trait ──────────────────────────────────────────────────────────────

/// One extracted detail page, ready for a sink.
pub trait DetailRecord: Serialize + Send + Sync + 'static {
    fn source_url(&self) -> &str;

    /// Short human label for progress logs.
    fn label(&self) -> String;

    fn csv_header() -> &'static [&'static str];

    fn csv_row(&self) -> Vec<String>;

    /// Write a UTF-8 BOM before the CSV header (spreadsheet friendliness).
    fn csv_bom() -> bool {
        false
    }
}

fn opt(s: &Option<String>) -> String {
    s.clone().unwrap_or_default()
}

// ── PhD vacancy ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingLevel {
    Full,
    Partial,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineStatus {
    Confirmed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    ClosingSoon,
    Expired,
}

impl FundingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingLevel::Full => "full",
            FundingLevel::Partial => "partial",
            FundingLevel::Unspecified => "unspecified",
        }
    }
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::ClosingSoon => "closing_soon",
            PositionStatus::Expired => "expired",
        }
    }
}

/// Row shape of the `phd_positions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub source: String,
    pub source_id: String,
    pub official_link: String,
    pub title_en: String,
    pub title_zh: Option<String>,
    pub university: Option<String>,
    pub department: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub intake_term: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub deadline_status: DeadlineStatus,
    pub employment_type: Option<String>,
    #[serde(rename = "workload_hours_per_week")]
    pub weekly_hours: Option<String>,
    pub education_level: Option<String>,
    pub funding_level: FundingLevel,
    pub supports_international: bool,
    pub description_en: String,
    pub description_zh: Option<String>,
    pub requirements_en: String,
    pub requirements_zh: Option<String>,
    pub application_steps_en: String,
    pub application_steps_zh: Option<String>,
    pub tags: Vec<String>,
    pub match_score: i32,
    pub status: PositionStatus,
    pub last_scraped_at: DateTime<Utc>,
    pub raw_payload: Option<serde_json::Value>,
}

impl DetailRecord for JobRecord {
    fn source_url(&self) -> &str {
        &self.official_link
    }

    fn label(&self) -> String {
        format!("{} ({})", self.title_en, self.source_id)
    }

    fn csv_header() -> &'static [&'static str] {
        &[
            "source_id",
            "official_link",
            "title_en",
            "university",
            "department",
            "country",
            "city",
            "deadline",
            "status",
            "funding_level",
            "supports_international",
            "tags",
        ]
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.source_id.clone(),
            self.official_link.clone(),
            self.title_en.clone(),
            opt(&self.university),
            opt(&self.department),
            opt(&self.country),
            opt(&self.city),
            self.deadline.map(|d| d.to_rfc3339()).unwrap_or_default(),
            self.status.as_str().to_string(),
            self.funding_level.as_str().to_string(),
            self.supports_international.to_string(),
            self.tags.join("; "),
        ]
    }
}

// ── Offer case ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferRecord {
    pub url: String,
    pub student_name: Option<String>,
    pub admission_school: Option<String>,
    pub admission_major: Option<String>,
    pub graduation_school: Option<String>,
    pub undergraduate_major: Option<String>,
    pub basic_background: Option<String>,
    pub main_experiences: Option<String>,
}

impl DetailRecord for OfferRecord {
    fn source_url(&self) -> &str {
        &self.url
    }

    fn label(&self) -> String {
        format!(
            "{} - {}",
            self.student_name.as_deref().unwrap_or("unknown"),
            self.admission_school.as_deref().unwrap_or("unknown"),
        )
    }

    fn csv_header() -> &'static [&'static str] {
        &[
            "url",
            "student_name",
            "admission_school",
            "admission_major",
            "graduation_school",
            "undergraduate_major",
            "basic_background",
            "main_experiences",
        ]
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            opt(&self.student_name),
            opt(&self.admission_school),
            opt(&self.admission_major),
            opt(&self.graduation_school),
            opt(&self.undergraduate_major),
            opt(&self.basic_background),
            opt(&self.main_experiences),
        ]
    }

    fn csv_bom() -> bool {
        true
    }
}

// ── ECE staff profile ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaffProfile {
    pub url: String,
    pub name: String,
    pub titles: Vec<String>,
    pub avatar_url: Option<String>,
    pub biography: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub location: Option<String>,
    pub website_url: Option<String>,
    pub google_scholar_url: Option<String>,
}

impl DetailRecord for StaffProfile {
    fn source_url(&self) -> &str {
        &self.url
    }

    fn label(&self) -> String {
        if self.name.is_empty() { self.url.clone() } else { self.name.clone() }
    }

    fn csv_header() -> &'static [&'static str] {
        &[
            "url",
            "name",
            "titles",
            "avatar_url",
            "biography",
            "contact_number",
            "email",
            "location",
            "website_url",
            "google_scholar_url",
        ]
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            self.name.clone(),
            self.titles.join("; "),
            opt(&self.avatar_url),
            opt(&self.biography),
            opt(&self.contact_number),
            opt(&self.email),
            opt(&self.location),
            opt(&self.website_url),
            opt(&self.google_scholar_url),
        ]
    }
}

// ── Computing faculty profile ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchProject {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub title: String,
    pub year: Option<i32>,
    pub full_citation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlumniPlacement {
    pub name: String,
    pub first_placement: Option<String>,
    pub current_position: Option<String>,
    pub institution: Option<String>,
    pub graduation_year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacultyProfile {
    pub name: String,
    pub profile_url: String,
    pub appointment: Option<String>,
    pub additional_titles: Vec<String>,
    pub avatar_url: Option<String>,
    pub office: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub personal_page: Option<String>,
    pub profile: Option<String>,
    pub education: Vec<String>,
    pub research_areas: Vec<String>,
    pub research_interests: Vec<String>,
    pub research_projects: Vec<ResearchProject>,
    pub phd_alumni: Vec<AlumniPlacement>,
    pub publications: Vec<Publication>,
    pub awards: Vec<String>,
    pub courses: Vec<String>,
}

impl DetailRecord for FacultyProfile {
    fn source_url(&self) -> &str {
        &self.profile_url
    }

    fn label(&self) -> String {
        format!(
            "{} (publications: {}, awards: {})",
            self.name,
            self.publications.len(),
            self.awards.len()
        )
    }

    fn csv_header() -> &'static [&'static str] {
        &["name", "appointment", "email", "phone", "office", "research_areas"]
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            opt(&self.appointment),
            opt(&self.email),
            opt(&self.phone),
            opt(&self.office),
            self.research_areas.join(", "),
        ]
    }

    fn csv_bom() -> bool {
        true
    }
}

// ── Programme CSV row ─────────────────────────────────────────────────────────

/// One programme row from the planning spreadsheet export.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawProgramRow {
    /// Remote `schools.id` when the export already carries it.
    pub school_id: String,
    pub school: String,
    pub en_name: String,
    pub cn_name: String,
    pub duration: String,
    pub tuition: String,
    pub apply_requirements: String,
    pub language_requirements: String,
    pub curriculum: String,
    pub tags: String,
    pub objectives: String,
    pub faculty: String,
    pub category: String,
    pub entry_month: String,
    pub interview: String,
    pub analysis: String,
    pub url: String,
}
