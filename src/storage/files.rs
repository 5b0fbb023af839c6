//! JSON and CSV output, written to a sibling temp file and renamed into place
//! so a crash never leaves a truncated file behind.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::SinkError;
use crate::models::DetailRecord;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Serialize)]
struct Envelope<'a, R> {
    generated_at: String,
    total: usize,
    failed: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    listing_meta: Option<&'a Value>,
    items: &'a [R],
}

fn write_atomic<F>(path: &Path, body: F) -> Result<(), SinkError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), SinkError>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        body(&mut out)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| SinkError::Persist { path: path.display().to_string(), source: e.error })?;
    Ok(())
}

/// `{generated_at, total, failed, items}` with pretty printing and raw UTF-8.
pub fn write_json<R: Serialize>(
    path: &Path,
    items: &[R],
    failed: &[String],
    listing_meta: Option<&Value>,
) -> Result<(), SinkError> {
    let envelope = Envelope {
        generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        total: items.len(),
        failed,
        listing_meta,
        items,
    };
    write_atomic(path, |out| {
        serde_json::to_writer_pretty(&mut *out, &envelope)?;
        out.write_all(b"\n")?;
        Ok(())
    })?;
    info!("Wrote {} item(s) to {}", items.len(), path.display());
    Ok(())
}

/// Rewrite an already-shaped document, e.g. a translated copy of an envelope.
pub fn write_document(path: &Path, doc: &Value) -> Result<(), SinkError> {
    write_atomic(path, |out| {
        serde_json::to_writer_pretty(&mut *out, doc)?;
        out.write_all(b"\n")?;
        Ok(())
    })?;
    info!("Wrote {}", path.display());
    Ok(())
}

pub fn write_csv<R: DetailRecord>(path: &Path, items: &[R]) -> Result<(), SinkError> {
    write_atomic(path, |out| {
        if R::csv_bom() {
            out.write_all(UTF8_BOM)?;
        }
        let mut w = csv::Writer::from_writer(out);
        w.write_record(R::csv_header())?;
        for item in items {
            w.write_record(item.csv_row())?;
        }
        w.flush()?;
        Ok(())
    })?;
    info!("Wrote {} row(s) to {}", items.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OfferRecord, StaffProfile};

    fn offer() -> OfferRecord {
        OfferRecord {
            url: "https://www.compassedu.hk/newst_1".into(),
            student_name: Some("L同学".into()),
            main_experiences: Some("实习, 科研".into()),
            ..Default::default()
        }
    }

    #[test]
    fn json_envelope_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/offers.json");
        write_json(&path, &[offer()], &["https://x/2".to_string()], None).unwrap();

        let v: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["total"], 1);
        assert_eq!(v["failed"][0], "https://x/2");
        assert_eq!(v["items"][0]["student_name"], "L同学");
        assert!(v.get("listing_meta").is_none());
        assert!(v["generated_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staff.json");
        fs::write(&path, "old").unwrap();

        write_json(&path, &[StaffProfile::default()], &[], None).unwrap();

        let names: Vec<String> =
            fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["staff.json"]);
        assert!(fs::read_to_string(&path).unwrap().contains("\"total\": 1"));
    }

    #[test]
    fn csv_has_bom_header_and_quoted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offers.csv");
        write_csv(&path, &[offer()]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("url,student_name,admission_school,admission_major,graduation_school,undergraduate_major,basic_background,main_experiences")
        );
        assert_eq!(lines.next(), Some("https://www.compassedu.hk/newst_1,L同学,,,,,,\"实习, 科研\""));
    }

    #[test]
    fn csv_without_bom_for_staff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staff.csv");
        write_csv(&path, &[StaffProfile::default()]).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("url,name,titles"));
    }
}
