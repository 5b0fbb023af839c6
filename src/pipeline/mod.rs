//! Pipeline orchestrator: ties scraper → pool → sinks together.
//!
//! ## Run shape
//!
//! `scrape()` collects detail links on one listing session, fans the detail
//! phase out over `workers` fetchers, and returns what came back. Writing
//! files (`write_outputs()`) and the job-only steps (`translate_jobs()`,
//! `upload_jobs()`) are separate so the caller decides the order.
//!
//! `jobs_api()` is the API variant of the PhD jobs run: no HTML at all.

pub mod pool;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{AppConfig, ScraperConfig};
use crate::models::{DetailRecord, JobRecord};
use crate::scraper::api::{ApiQuery, VacancyApi};
use crate::scraper::browser::{BrowserFetcher, BrowserSession};
use crate::scraper::http_client::HttpClient;
use crate::scraper::links::{Collected, CollectorOptions, HttpSession, LinkCollector};
use crate::scraper::sites::{FetchStrategy, Site};
use crate::storage::{BatchUploader, RestClient, UploadReport, write_csv, write_json};
use crate::translate::{GtxTranslator, TranslateOptions, translate_records};
use crate::utils::pct;
use pool::{PoolOptions, run_pool};

pub const JOBS_TABLE: &str = "phd_positions";
pub const JOBS_CONFLICT: &str = "source,source_id";

/// Per-run overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    pub max_pages: usize,
    pub max_records: Option<usize>,
    pub workers: Option<usize>,
    pub no_headless: bool,
    /// An operator is present to solve challenges.
    pub interactive: bool,
    pub list_url: Option<String>,
    pub output_json: Option<PathBuf>,
    pub output_csv: Option<PathBuf>,
    /// Scrape and log, but write nothing.
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct SiteRun<R> {
    pub site: &'static str,
    pub records: Vec<R>,
    pub failed: Vec<String>,
    pub skipped: usize,
    pub total: usize,
    pub pages: usize,
    pub interrupted: bool,
}

impl<R> SiteRun<R> {
    fn empty(site: &'static str, pages: usize, interrupted: bool) -> Self {
        Self { site, records: Vec::new(), failed: Vec::new(), skipped: 0, total: 0, pages, interrupted }
    }

    pub fn log_summary(&self) {
        info!(
            "=== [{}] Done: {} succeeded ({:.0}%) | {} failed | {} skipped | {} total | {} listing page(s) ===",
            self.site,
            self.records.len(),
            pct(self.records.len(), self.total),
            self.failed.len(),
            self.skipped,
            self.total,
            self.pages
        );
        for url in &self.failed {
            warn!("  failed: {}", url);
        }
    }
}

/// Resolves once the watched flag turns true. A dropped sender never fires.
pub async fn interrupted(mut rx: watch::Receiver<bool>) {
    let fired = rx.wait_for(|stop| *stop).await.is_ok();
    if !fired {
        std::future::pending::<()>().await;
    }
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn scraper_config(&self, opts: &ScrapeOptions) -> ScraperConfig {
        let mut cfg = self.config.scraper.clone();
        if opts.no_headless {
            cfg.headless = false;
        }
        if let Some(workers) = opts.workers {
            cfg.workers = workers;
        }
        cfg.workers = cfg.workers.max(1);
        cfg
    }

    fn collector_options(&self, cfg: &ScraperConfig, opts: &ScrapeOptions) -> CollectorOptions {
        CollectorOptions {
            max_pages: opts.max_pages.max(1),
            max_records: opts.max_records,
            settle: cfg.listing_delay(),
            retries: cfg.listing_retries,
            interactive: opts.interactive,
        }
    }

    async fn collect<S: Site>(&self, site: &S, cfg: &ScraperConfig, opts: &ScrapeOptions) -> Result<Collected> {
        let start = opts.list_url.as_deref().unwrap_or(site.default_listing_url());
        let collector = LinkCollector::new(site, self.collector_options(cfg, opts));

        let collected = match site.listing_strategy() {
            FetchStrategy::Http => {
                let mut session = HttpSession::new(HttpClient::new(cfg)?);
                collector.collect(&mut session, start).await
            }
            FetchStrategy::Browser => {
                let mut session = BrowserSession::launch(cfg).await.context("Failed to launch browser")?;
                let result = collector.collect(&mut session, start).await;
                session.shutdown().await;
                result
            }
        };
        collected.with_context(|| format!("[{}] Link collection failed", site.id()))
    }

    /// Listing + detail phases for one site. Records come back in completion
    /// order; nothing is written yet.
    pub async fn scrape<S: Site>(
        &self,
        site: S,
        opts: &ScrapeOptions,
        interrupt: watch::Receiver<bool>,
    ) -> Result<SiteRun<S::Record>> {
        let cfg = self.scraper_config(opts);
        let id = site.id();

        info!("=== [{}] Step 1: Collecting detail links ===", id);
        let collected = tokio::select! {
            biased;
            _ = interrupted(interrupt.clone()) => {
                warn!("[{}] Interrupted during link collection", id);
                return Ok(SiteRun::empty(id, 0, true));
            }
            collected = self.collect(&site, &cfg, opts) => collected?,
        };
        info!("[{}] {} unique link(s) over {} page(s)", id, collected.links.len(), collected.pages);
        if collected.links.is_empty() {
            error!("[{}] No detail links found", id);
            return Ok(SiteRun::empty(id, collected.pages, false));
        }

        info!("=== [{}] Step 2: Fetching details ===", id);
        let pool_opts = PoolOptions {
            request_delay: cfg.request_delay(),
            jitter_ms: cfg.jitter_ms,
            policy: cfg.challenge_policy,
            interactive: opts.interactive,
        };
        let site = Arc::new(site);
        let links = collected.links;
        let stop = interrupted(interrupt);
        let report = match site.detail_strategy() {
            FetchStrategy::Http => {
                let client = HttpClient::new(&cfg)?;
                run_pool(site, links, vec![client; cfg.workers], pool_opts, stop).await
            }
            FetchStrategy::Browser => {
                let fetchers = (0..cfg.workers).map(|_| BrowserFetcher::new(cfg.clone())).collect();
                run_pool(site, links, fetchers, pool_opts, stop).await
            }
        };

        Ok(SiteRun {
            site: id,
            records: report.records,
            failed: report.failed,
            skipped: report.skipped,
            total: report.total,
            pages: collected.pages,
            interrupted: report.interrupted,
        })
    }

    pub fn output_paths(&self, site: &str, opts: &ScrapeOptions) -> (PathBuf, PathBuf) {
        let dir = &self.config.output.dir;
        (
            opts.output_json.clone().unwrap_or_else(|| dir.join(format!("{site}.json"))),
            opts.output_csv.clone().unwrap_or_else(|| dir.join(format!("{site}.csv"))),
        )
    }

    /// JSON envelope and CSV for a finished (or interrupted) run.
    pub fn write_outputs<R: DetailRecord>(&self, run: &SiteRun<R>, opts: &ScrapeOptions) -> Result<()> {
        if opts.dry_run {
            info!("[{}] Dry run: {} record(s) not written", run.site, run.records.len());
            return Ok(());
        }
        let (json_path, csv_path) = self.output_paths(run.site, opts);
        write_json(&json_path, &run.records, &run.failed, None)
            .with_context(|| format!("Failed to write {}", json_path.display()))?;
        write_csv(&csv_path, &run.records).with_context(|| format!("Failed to write {}", csv_path.display()))?;
        Ok(())
    }

    /// Fill the `*_zh` fields of scraped jobs, titles included.
    pub async fn translate_jobs(&self, records: Vec<JobRecord>) -> Result<Vec<JobRecord>> {
        let translator = GtxTranslator::new(HttpClient::new(&self.config.scraper)?);
        let mut opts = TranslateOptions::default();
        opts.fields.insert(0, ("title_en".into(), "title_zh".into()));
        info!("Translating {} job(s)", records.len());
        translate_records(&translator, records, &opts).await
    }

    /// Upsert jobs on `(source, source_id)`.
    pub async fn upload_jobs(&self, records: &[JobRecord]) -> Result<UploadReport> {
        let client = RestClient::new(&self.config.backend).context("Upload requested but backend not configured")?;
        let rows = records.iter().map(serde_json::to_value).collect::<Result<Vec<Value>, _>>()?;
        info!("=== Uploading {} job(s) to {} ===", rows.len(), JOBS_TABLE);
        let report = BatchUploader::new(&client, JOBS_TABLE, self.config.backend.batch_size)
            .upsert_on(JOBS_CONFLICT)
            .upload(&rows)
            .await;
        Ok(report)
    }

    /// List vacancies through the public data API and fetch each detail.
    pub async fn jobs_api(&self, locale: &str, query: &ApiQuery, limit: Option<usize>, opts: &ScrapeOptions) -> Result<usize> {
        let client = HttpClient::new(&self.config.scraper)?;
        let api = VacancyApi::connect(client, locale).await?;

        let (mut listing, meta) = api.list(query).await.context("Vacancy listing failed")?;
        if let Some(limit) = limit {
            listing.truncate(limit);
        }
        let (records, failed) = api.details(&listing, self.config.scraper.request_delay()).await;
        info!("API run: {} detail(s), {} failed, {} listed", records.len(), failed.len(), listing.len());

        if opts.dry_run {
            info!("Dry run: nothing written");
            return Ok(records.len());
        }
        let (json_path, csv_path) = self.output_paths("jobs-api", opts);
        let meta = serde_json::to_value(&meta)?;
        write_json(&json_path, &records, &failed, Some(&meta))
            .with_context(|| format!("Failed to write {}", json_path.display()))?;
        write_csv(&csv_path, &records).with_context(|| format!("Failed to write {}", csv_path.display()))?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OfferRecord;
    use std::time::Duration;

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        let mut config = AppConfig::default();
        config.output.dir = dir.to_path_buf();
        Pipeline::new(config)
    }

    #[test]
    fn cli_overrides_apply_to_scraper_config() {
        let p = pipeline(std::path::Path::new("data"));
        let cfg = p.scraper_config(&ScrapeOptions { workers: Some(0), no_headless: true, ..Default::default() });
        assert_eq!(cfg.workers, 1);
        assert!(!cfg.headless);
        assert_eq!(p.scraper_config(&ScrapeOptions::default()).workers, 3);
    }

    #[test]
    fn default_output_paths_follow_site_id() {
        let p = pipeline(std::path::Path::new("out"));
        let (json, csv) = p.output_paths("offers", &ScrapeOptions::default());
        assert_eq!(json, PathBuf::from("out/offers.json"));
        assert_eq!(csv, PathBuf::from("out/offers.csv"));

        let custom = ScrapeOptions { output_csv: Some("x.csv".into()), ..Default::default() };
        assert_eq!(p.output_paths("offers", &custom).1, PathBuf::from("x.csv"));
    }

    #[test]
    fn outputs_written_unless_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let run = SiteRun {
            site: "offers",
            records: vec![OfferRecord { url: "https://www.compassedu.hk/newst_9".into(), ..Default::default() }],
            failed: vec!["https://www.compassedu.hk/newst_10".into()],
            skipped: 0,
            total: 2,
            pages: 1,
            interrupted: true,
        };

        p.write_outputs(&run, &ScrapeOptions { dry_run: true, ..Default::default() }).unwrap();
        assert!(!dir.path().join("offers.json").exists());

        p.write_outputs(&run, &ScrapeOptions::default()).unwrap();
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join("offers.json")).unwrap()).unwrap();
        assert_eq!(doc["total"], 1);
        assert_eq!(doc["failed"][0], "https://www.compassedu.hk/newst_10");
        assert!(dir.path().join("offers.csv").exists());
    }

    #[test]
    fn interrupt_future_fires_on_flag_only() {
        tokio_test::block_on(async {
            let (tx, rx) = watch::channel(false);
            let fired = tokio::time::timeout(Duration::from_millis(20), interrupted(rx.clone())).await;
            assert!(fired.is_err());

            tx.send(true).unwrap();
            assert!(tokio::time::timeout(Duration::from_millis(20), interrupted(rx)).await.is_ok());
        });
    }

    #[tokio::test]
    async fn dropped_sender_never_fires() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        assert!(tokio::time::timeout(Duration::from_millis(20), interrupted(rx)).await.is_err());
    }
}
