//! Resolving free-text names (school names, mostly) to remote row ids.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::scraper::cleaner::collapse_whitespace;

pub fn normalize_key(raw: &str) -> String {
    collapse_whitespace(raw).to_lowercase()
}

/// Normalised natural key → row id, built from pre-fetched rows.
///
/// Lookup tries an exact key first. Failing that, the longest stored key
/// contained in the query wins; failing that, the query must be contained in
/// the keys of exactly one row. Anything else is no match.
#[derive(Debug, Default, Clone)]
pub struct NaturalKeyIndex {
    ids: HashMap<String, Value>,
}

impl NaturalKeyIndex {
    /// Index every non-empty value of `key_columns` in each row against its `id`.
    pub fn from_rows(rows: &[Value], key_columns: &[&str]) -> Self {
        let mut index = Self::default();
        for row in rows {
            let Some(id) = row.get("id").filter(|id| !id.is_null()) else {
                continue;
            };
            for col in key_columns {
                if let Some(key) = row.get(*col).and_then(Value::as_str) {
                    index.insert(key, id.clone());
                }
            }
        }
        index
    }

    pub fn insert(&mut self, key: &str, id: Value) {
        let key = normalize_key(key);
        if !key.is_empty() {
            self.ids.entry(key).or_insert(id);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn lookup(&self, query: &str) -> Option<&Value> {
        let q = normalize_key(query);
        if q.is_empty() {
            return None;
        }
        if let Some(id) = self.ids.get(&q) {
            return Some(id);
        }

        let contained = self
            .ids
            .iter()
            .filter(|(key, _)| q.contains(key.as_str()))
            .max_by(|(a, _), (b, _)| a.chars().count().cmp(&b.chars().count()).then_with(|| b.cmp(a)));
        if let Some((key, id)) = contained {
            debug!("'{}' matched stored key '{}'", query, key);
            return Some(id);
        }

        let mut containing = self.ids.iter().filter(|(key, _)| key.contains(q.as_str()));
        let (key, id) = containing.next()?;
        if containing.any(|(_, other)| other != id) {
            debug!("'{}' is ambiguous", query);
            return None;
        }
        debug!("'{}' matched inside stored key '{}'", query, key);
        Some(id)
    }
}
