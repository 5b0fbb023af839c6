use crate::models::{DeadlineStatus, FundingLevel, PositionStatus};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

/// Values longer than this are almost certainly a whole page section.
pub const MAX_LABEL_VALUE_CHARS: usize = 500;

/// Upper bound for multi-paragraph blocks such as experience lists.
pub const MAX_BLOCK_CHARS: usize = 5000;

/// Days before the deadline at which a position counts as closing soon.
pub const CLOSING_SOON_DAYS: i64 = 14;

static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").expect("static regex"));
static EXCESS_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));
static SPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("static regex"));
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static MD_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[.*?\]\(.*?\)").expect("static regex"));
static MD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("static regex"));
static INTAKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(20\d{2})\s*(Fall|Spring|Summer|Winter)").expect("static regex")
});
static INTAKE_REVERSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(Fall|Spring|Summer|Winter)\s*(20\d{2})").expect("static regex")
});

// ── Normalisation ─────────────────────────────────────────────────────────────

/// Tidy a multi-line block: one newline between lines, single spaces, no NBSP.
pub fn clean_block(text: &str) -> String {
    let text = text.replace('\u{a0}', " ");
    let text = BLANK_LINES.replace_all(&text, "\n");
    let text = SPACE_RUNS.replace_all(&text, " ");
    text.trim().to_string()
}

/// Collapse every whitespace run to one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_tags(text: &str) -> String {
    TAGS.replace_all(text, "").into_owned()
}

/// Drop `![alt](src)` images and unwrap `[text](href)` links.
pub fn strip_markdown(text: &str) -> String {
    let text = MD_IMAGE.replace_all(text, "");
    MD_LINK.replace_all(&text, "$1").into_owned()
}

/// Keep paragraph breaks but never more than one empty line.
pub fn squeeze_blank_lines(text: &str) -> String {
    EXCESS_BLANK_LINES.replace_all(text, "\n\n").into_owned()
}

/// Single-line value cleanup; overlong matches are treated as mis-extraction.
pub fn clean_value(text: &str, max_chars: usize) -> Option<String> {
    let text = collapse_whitespace(&strip_tags(text));
    if text.is_empty() || text.chars().count() > max_chars {
        return None;
    }
    Some(text)
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub fn non_empty(text: impl Into<String>) -> Option<String> {
    let text = text.into();
    let trimmed = text.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

// ── Derived fields ────────────────────────────────────────────────────────────

const FULL_FUNDING: &[&str] = &["fully funded", "full scholarship", "full funding", "full-time employment"];
const PARTIAL_FUNDING: &[&str] = &["partial scholarship", "partial funding", "stipend", "allowance"];
const INTERNATIONAL: &[&str] = &["international", "global", "worldwide", "non-eu", "visa", "relocation"];

fn haystack(texts: &[&str]) -> String {
    texts
        .iter()
        .filter(|t| !t.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn infer_funding_level(texts: &[&str]) -> FundingLevel {
    let combined = haystack(texts);
    if FULL_FUNDING.iter().any(|k| combined.contains(k)) {
        FundingLevel::Full
    } else if PARTIAL_FUNDING.iter().any(|k| combined.contains(k)) {
        FundingLevel::Partial
    } else {
        FundingLevel::Unspecified
    }
}

pub fn supports_international(texts: &[&str]) -> bool {
    let combined = haystack(texts);
    INTERNATIONAL.iter().any(|k| combined.contains(k))
}

/// Parse an ISO-8601 deadline. Naive values are taken as UTC.
pub fn parse_deadline(raw: Option<&str>) -> (Option<DateTime<Utc>>, DeadlineStatus) {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return (None, DeadlineStatus::Unknown);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return (Some(dt.with_timezone(&Utc)), DeadlineStatus::Confirmed);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return (Some(dt.and_utc()), DeadlineStatus::Confirmed);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return (Some(dt.and_utc()), DeadlineStatus::Confirmed);
        }
    }

    warn!("Unparseable deadline: {}", raw);
    (None, DeadlineStatus::Unknown)
}

pub fn derive_status(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> PositionStatus {
    let Some(deadline) = deadline else {
        return PositionStatus::Open;
    };
    if deadline < now {
        return PositionStatus::Expired;
    }
    if (deadline - now).num_days() <= CLOSING_SOON_DAYS {
        PositionStatus::ClosingSoon
    } else {
        PositionStatus::Open
    }
}

/// "2025 fall" / "Fall 2025" → "2025 Fall"
pub fn detect_intake(text: &str) -> Option<String> {
    if let Some(c) = INTAKE.captures(text) {
        return Some(format!("{} {}", &c[1], capitalize(&c[2])));
    }
    INTAKE_REVERSED
        .captures(text)
        .map(|c| format!("{} {}", &c[2], capitalize(&c[1])))
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
