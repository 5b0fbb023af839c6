//! Bulk loads into the hosted backend: programme spreadsheets and scraped
//! faculty profiles.

pub mod professors;
pub mod programs;

use serde_json::Value;
use tracing::info;

pub use professors::{ProfessorImportOptions, import_professors};
pub use programs::{ProgramImportOptions, import_programs};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
}

impl ImportSummary {
    pub fn log(&self, what: &str) {
        info!(
            "{}: {} inserted, {} updated, {} skipped, {} failed, {} total",
            what, self.inserted, self.updated, self.skipped, self.failed, self.total
        );
    }

    /// Failed records are isolated; the run only fails when nothing landed.
    pub fn is_success(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

/// Trimmed text, with spreadsheet blanks (`""`, `nan`) as null.
pub(crate) fn text_or_null(raw: &str) -> Value {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("nan") { Value::Null } else { Value::String(t.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blanks_become_null() {
        assert_eq!(text_or_null("  "), Value::Null);
        assert_eq!(text_or_null("NaN"), Value::Null);
        assert_eq!(text_or_null(" 1 year "), Value::String("1 year".into()));
    }

    #[test]
    fn partial_failure_is_still_success() {
        let summary = ImportSummary { inserted: 9, failed: 1, total: 10, ..Default::default() };
        assert!(summary.is_success());
        assert!(ImportSummary { updated: 1, failed: 4, total: 5, ..Default::default() }.is_success());
        assert!(!ImportSummary { failed: 3, total: 3, ..Default::default() }.is_success());
        assert!(!ImportSummary { skipped: 2, total: 2, ..Default::default() }.is_success());
    }
}
