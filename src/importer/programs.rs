use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{ImportSummary, text_or_null};
use crate::error::SinkError;
use crate::models::RawProgramRow;
use crate::storage::{BatchUploader, NaturalKeyIndex, TableClient};

pub const TABLE: &str = "programs";

static FEE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("static regex"));

#[derive(Debug, Clone)]
pub struct ProgramImportOptions {
    pub batch_size: usize,
    pub pause: Duration,
    pub dry_run: bool,
}

impl Default for ProgramImportOptions {
    fn default() -> Self {
        Self { batch_size: 10, pause: Duration::from_secs(1), dry_run: false }
    }
}

/// First number in a tuition string, thousands separators dropped.
pub fn extract_fee(raw: &str) -> Option<f64> {
    let m = FEE.find(raw)?;
    m.as_str().replace(',', "").parse().ok()
}

pub fn program_row(row: &RawProgramRow, school_id: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("school_id".into(), school_id);
    for (key, value) in [
        ("en_name", &row.en_name),
        ("cn_name", &row.cn_name),
        ("duration", &row.duration),
        ("apply_requirements", &row.apply_requirements),
        ("language_requirements", &row.language_requirements),
        ("curriculum", &row.curriculum),
        ("tags", &row.tags),
        ("objectives", &row.objectives),
        ("faculty", &row.faculty),
        ("category", &row.category),
        ("entry_month", &row.entry_month),
        ("interview", &row.interview),
        ("analysis", &row.analysis),
        ("url", &row.url),
    ] {
        obj.insert(key.into(), text_or_null(value));
    }
    obj.insert("tuition_fee".into(), extract_fee(&row.tuition).map_or(Value::Null, |f| json!(f)));
    Value::Object(obj)
}

async fn school_index<C: TableClient + ?Sized>(client: &C) -> Result<NaturalKeyIndex, SinkError> {
    let schools = client.select("schools", "id,en_name,cn_name", &[]).await?;
    let index = NaturalKeyIndex::from_rows(&schools, &["en_name", "cn_name"]);
    info!("Indexed {} school name(s) from {} row(s)", index.len(), schools.len());
    Ok(index)
}

/// Resolve each row's school, then batch-insert. Rows whose school cannot be
/// resolved are skipped; the schools table is only fetched when needed.
pub async fn import_programs<C: TableClient + ?Sized>(
    client: &C,
    rows: &[RawProgramRow],
    opts: &ProgramImportOptions,
) -> Result<ImportSummary, SinkError> {
    let mut summary = ImportSummary { total: rows.len(), ..Default::default() };

    let index = if rows.iter().any(|r| r.school_id.trim().is_empty()) {
        school_index(client).await?
    } else {
        NaturalKeyIndex::default()
    };

    let mut payload = Vec::with_capacity(rows.len());
    for row in rows {
        let school_id = match row.school_id.trim() {
            "" => index.lookup(&row.school).cloned(),
            id => Some(Value::String(id.to_string())),
        };
        let Some(school_id) = school_id else {
            warn!("No school matches '{}' for '{}', skipped", row.school, row.en_name);
            summary.skipped += 1;
            continue;
        };
        debug!("{} → school {}", row.en_name, school_id);
        payload.push(program_row(row, school_id));
    }

    if opts.dry_run {
        info!("Dry run: {} programme row(s) ready, nothing uploaded", payload.len());
        return Ok(summary);
    }

    let report = BatchUploader::new(client, TABLE, opts.batch_size).pause(opts.pause).upload(&payload).await;
    summary.inserted = report.inserted;
    summary.failed = report.failed;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::rest::testing::MemoryTables;

    fn row(school: &str, en: &str) -> RawProgramRow {
        RawProgramRow { school: school.into(), en_name: en.into(), tuition: "S$65,400".into(), ..Default::default() }
    }

    fn tables() -> MemoryTables {
        MemoryTables::default().seed(
            "schools",
            vec![
                json!({"id": "nus", "en_name": "National University of Singapore", "cn_name": "新加坡国立大学"}),
                json!({"id": "hku", "en_name": "The University of Hong Kong", "cn_name": "香港大学"}),
            ],
        )
    }

    fn quick() -> ProgramImportOptions {
        ProgramImportOptions { pause: Duration::ZERO, ..Default::default() }
    }

    #[test]
    fn fees() {
        assert_eq!(extract_fee("S$65,400"), Some(65400.0));
        assert_eq!(extract_fee("HK$ 1,234.50 per year"), Some(1234.5));
        assert_eq!(extract_fee("nan"), None);
        assert_eq!(extract_fee(""), None);
    }

    #[test]
    fn row_shape() {
        let mut r = row("香港大学", " Master of Finance ");
        r.duration = "nan".into();
        let v = program_row(&r, json!("hku"));
        assert_eq!(v["school_id"], "hku");
        assert_eq!(v["en_name"], "Master of Finance");
        assert_eq!(v["duration"], Value::Null);
        assert_eq!(v["tuition_fee"], json!(65400.0));
        assert!(v.get("school").is_none());
    }

    #[tokio::test]
    async fn schools_resolved_by_id_or_name() {
        let tables = tables();
        let mut given = row("whatever", "MSc Statistics");
        given.school_id = "nus".into();
        let rows = vec![
            row("新加坡国立大学（NUS）", "MSc Business Analytics"),
            given,
            row("Imperial College London", "MSc Finance"),
        ];

        let summary = import_programs(&tables, &rows, &quick()).await.unwrap();

        assert_eq!(summary, ImportSummary { inserted: 2, skipped: 1, total: 3, ..Default::default() });
        let stored = tables.rows(TABLE);
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r["school_id"] == "nus"));
    }

    #[tokio::test]
    async fn dry_run_uploads_nothing() {
        let tables = tables();
        let opts = ProgramImportOptions { dry_run: true, ..quick() };

        let summary = import_programs(&tables, &[row("香港大学", "MFin")], &opts).await.unwrap();

        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.skipped, 0);
        assert!(tables.rows(TABLE).is_empty());
        assert_eq!(*tables.insert_calls.lock().unwrap(), 0);
    }
}
