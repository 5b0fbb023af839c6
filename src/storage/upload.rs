use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use super::rest::TableClient;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub inserted: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Batched inserts with a record-by-record fallback for failed batches.
pub struct BatchUploader<'a, C: TableClient + ?Sized> {
    client: &'a C,
    table: String,
    batch_size: usize,
    on_conflict: Option<String>,
    /// Pause between batches to stay under the backend's rate limit.
    pause: Duration,
}

impl<'a, C: TableClient + ?Sized> BatchUploader<'a, C> {
    pub fn new(client: &'a C, table: impl Into<String>, batch_size: usize) -> Self {
        Self { client, table: table.into(), batch_size: batch_size.max(1), on_conflict: None, pause: Duration::ZERO }
    }

    pub fn upsert_on(mut self, columns: impl Into<String>) -> Self {
        self.on_conflict = Some(columns.into());
        self
    }

    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub async fn upload(&self, rows: &[Value]) -> UploadReport {
        let mut report = UploadReport::default();
        let batches = rows.len().div_ceil(self.batch_size);
        let conflict = self.on_conflict.as_deref();

        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            match self.client.insert(&self.table, chunk, conflict).await {
                Ok(()) => {
                    report.inserted += chunk.len();
                    info!("{}: batch {}/{} ok ({} rows)", self.table, i + 1, batches, chunk.len());
                }
                Err(e) => {
                    warn!("{}: batch {}/{} failed ({}), retrying row by row", self.table, i + 1, batches, e);
                    for (j, row) in chunk.iter().enumerate() {
                        match self.client.insert(&self.table, std::slice::from_ref(row), conflict).await {
                            Ok(()) => report.inserted += 1,
                            Err(e) => {
                                warn!("{}: row {} of batch {} failed: {}", self.table, j + 1, i + 1, e);
                                report.failed += 1;
                            }
                        }
                    }
                }
            }
            if !self.pause.is_zero() && i + 1 < batches {
                sleep(self.pause).await;
            }
        }

        info!("{}: {} inserted, {} failed, {} total", self.table, report.inserted, report.failed, rows.len());
        report
    }
}
