use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::ImportSummary;
use crate::models::FacultyProfile;
use crate::storage::TableClient;
use crate::storage::matching::normalize_key;

pub const TABLE: &str = "professors";

#[derive(Debug, Clone)]
pub struct ProfessorImportOptions {
    /// `schools.en_name` of the owning university.
    pub university: String,
    pub college: String,
    pub country: String,
    pub city: String,
    pub dry_run: bool,
}

impl Default for ProfessorImportOptions {
    fn default() -> Self {
        Self {
            university: "National University of Singapore".into(),
            college: "School of Computing - Department of Information Systems and Analytics".into(),
            country: "新加坡".into(),
            city: "新加坡".into(),
            dry_run: false,
        }
    }
}

/// Existing professor ids by contact email and by name.
#[derive(Debug, Default)]
struct Existing {
    by_email: HashMap<String, Value>,
    by_name: HashMap<String, Value>,
}

impl Existing {
    fn from_rows(rows: &[Value]) -> Self {
        let mut index = Self::default();
        for row in rows {
            let Some(id) = row.get("id").filter(|v| !v.is_null()) else {
                continue;
            };
            let email = row.get("contact_email").and_then(Value::as_str).unwrap_or_default();
            let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
            index.remember(email, name, id.clone());
        }
        index
    }

    fn remember(&mut self, email: &str, name: &str, id: Value) {
        let email = email.trim().to_lowercase();
        if !email.is_empty() {
            self.by_email.entry(email).or_insert_with(|| id.clone());
        }
        let name = normalize_key(name);
        if !name.is_empty() {
            self.by_name.entry(name).or_insert(id);
        }
    }

    /// Email wins over name.
    fn find(&self, email: Option<&str>, name: &str) -> Option<&Value> {
        email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .and_then(|e| self.by_email.get(&e))
            .or_else(|| self.by_name.get(&normalize_key(name)))
    }
}

pub fn professor_row(p: &FacultyProfile, school_id: &Value, opts: &ProfessorImportOptions) -> Value {
    let research_tags = if p.research_areas.is_empty() { &p.research_interests } else { &p.research_areas };

    let signature_projects: Vec<String> = p
        .research_projects
        .iter()
        .filter(|rp| !rp.title.is_empty())
        .map(|rp| if rp.tags.is_empty() { rp.title.clone() } else { format!("{} ({})", rp.title, rp.tags.join(", ")) })
        .collect();

    let publications: Vec<Value> = p
        .publications
        .iter()
        .filter(|pb| !pb.title.is_empty())
        .map(|pb| json!({"title": pb.title, "year": pb.year, "citation": pb.full_citation}))
        .collect();

    let recent_placements: Vec<Value> = p
        .phd_alumni
        .iter()
        .filter_map(|a| {
            let destination = a.first_placement.as_ref().or(a.current_position.as_ref()).or(a.institution.as_ref())?;
            if a.name.is_empty() {
                return None;
            }
            Some(json!({
                "year": a.graduation_year.unwrap_or(0),
                "student": a.name,
                "destination": destination,
                "highlight": a.institution,
            }))
        })
        .collect();

    json!({
        "name": p.name,
        "primary_title": p.appointment,
        "additional_titles": p.additional_titles,
        "biography": p.profile,
        "education": p.education,
        "research_interests": p.research_interests,
        "research_projects": p.research_projects.iter().filter(|rp| !rp.title.is_empty()).collect::<Vec<_>>(),
        "awards": p.awards,
        "courses": p.courses,
        "university": opts.university,
        "school_id": school_id,
        "college": opts.college,
        "country": opts.country,
        "city": opts.city,
        "contact_email": p.email,
        "contact_phone": p.phone,
        "personal_page": p.personal_page,
        "avatar_url": p.avatar_url,
        "profile_url": p.profile_url,
        "research_tags": research_tags,
        "signature_projects": signature_projects,
        "publications": publications,
        "recent_placements": recent_placements,
        "funding_options": [],
        "funding_types": [],
        "phd_supervision_status": "待确认",
        "accepts_international_students": true,
        "is_active": true,
        "match_score": 0,
        "internal_notes": format!("从官网导入，职位: {}", p.appointment.as_deref().unwrap_or("未知")),
    })
}

async fn school_id<C: TableClient + ?Sized>(client: &C, university: &str) -> Result<Value> {
    let rows = client
        .select("schools", "id", &[("en_name", university)])
        .await
        .context("Failed to look up the school")?;
    match rows.into_iter().find_map(|r| r.get("id").filter(|id| !id.is_null()).cloned()) {
        Some(id) => {
            info!("School '{}' is {}", university, id);
            Ok(id)
        }
        None => bail!("No schools row with en_name '{}'; add it first", university),
    }
}

/// Update professors matched by email or name, insert the rest, one row at a
/// time. Profiles without a name are skipped.
pub async fn import_professors<C: TableClient + ?Sized>(
    client: &C,
    profiles: &[FacultyProfile],
    opts: &ProfessorImportOptions,
) -> Result<ImportSummary> {
    let school = school_id(client, &opts.university).await?;
    let rows = client
        .select(TABLE, "id,name,contact_email", &[])
        .await
        .context("Failed to fetch existing professors")?;
    let mut existing = Existing::from_rows(&rows);
    debug!("{} existing professor row(s)", rows.len());

    let total = profiles.len();
    let mut summary = ImportSummary { total, ..Default::default() };

    for (i, p) in profiles.iter().enumerate() {
        if p.name.trim().is_empty() {
            warn!("[{}/{}] no name, skipped ({})", i + 1, total, p.profile_url);
            summary.skipped += 1;
            continue;
        }
        let row = professor_row(p, &school, opts);

        match existing.find(p.email.as_deref(), &p.name).cloned() {
            Some(id) if opts.dry_run => {
                info!("[{}/{}] would update {} ({})", i + 1, total, p.name, id);
                summary.updated += 1;
            }
            Some(id) => match client.update(TABLE, &id, &row).await {
                Ok(()) => {
                    info!("[{}/{}] updated {}", i + 1, total, p.name);
                    summary.updated += 1;
                }
                Err(e) => {
                    warn!("[{}/{}] update of {} failed: {}", i + 1, total, p.name, e);
                    summary.failed += 1;
                }
            },
            None if opts.dry_run => {
                info!("[{}/{}] would insert {}", i + 1, total, p.name);
                summary.inserted += 1;
            }
            None => match client.insert(TABLE, std::slice::from_ref(&row), None).await {
                Ok(()) => {
                    info!("[{}/{}] inserted {}", i + 1, total, p.name);
                    summary.inserted += 1;
                    // Later duplicates in the same file update instead of inserting twice.
                    if let Ok(back) = client.select(TABLE, "id", &[("name", p.name.as_str())]).await
                        && let Some(id) = back.iter().find_map(|r| r.get("id").filter(|id| !id.is_null()))
                    {
                        existing.remember(p.email.as_deref().unwrap_or_default(), &p.name, id.clone());
                    }
                }
                Err(e) => {
                    warn!("[{}/{}] insert of {} failed: {}", i + 1, total, p.name, e);
                    summary.failed += 1;
                }
            },
        }
    }
    Ok(summary)
}
