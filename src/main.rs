mod config;
mod error;
mod importer;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod translate;
mod utils;

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::importer::{ProfessorImportOptions, ProgramImportOptions};
use crate::models::{DetailRecord, FacultyProfile};
use crate::pipeline::{Pipeline, ScrapeOptions, SiteRun};
use crate::scraper::api::{ApiQuery, parse_param};
use crate::scraper::http_client::HttpClient;
use crate::scraper::sites::{AcademicTransferSite, CompassSite, EceSite, FacultySite, Site};
use crate::storage::RestClient;
use crate::translate::{GtxTranslator, TranslateOptions, default_fields, parse_field_mapping, translate_items};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "harvester", about = "Admissions data scrapers and import tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs (without colours) to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Extra configuration file layered over config/default.toml
    #[arg(long, global = true, env = "HARVESTER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct ScrapeArgs {
    /// Listing pages to walk
    #[arg(long, default_value_t = 10)]
    max_pages: usize,

    /// Stop collecting once this many detail links are known
    #[arg(long)]
    max_records: Option<usize>,

    /// Detail workers (overrides scraper.workers)
    #[arg(long)]
    workers: Option<usize>,

    /// Show the browser window
    #[arg(long)]
    no_headless: bool,

    /// Never wait for an operator; challenges abort the run
    #[arg(long)]
    unattended: bool,

    #[arg(long)]
    output_json: Option<PathBuf>,

    #[arg(long)]
    output_csv: Option<PathBuf>,

    /// Scrape but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Start from this listing URL instead of the site default
    #[arg(long)]
    list_url: Option<String>,
}

impl ScrapeArgs {
    fn options(&self) -> ScrapeOptions {
        ScrapeOptions {
            max_pages: self.max_pages,
            max_records: self.max_records,
            workers: self.workers,
            no_headless: self.no_headless,
            interactive: !self.unattended && std::io::stdin().is_terminal(),
            list_url: self.list_url.clone(),
            output_json: self.output_json.clone(),
            output_csv: self.output_csv.clone(),
            dry_run: self.dry_run,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// AcademicTransfer PhD vacancies
    PhdJobs {
        #[command(flatten)]
        args: ScrapeArgs,

        /// Add Chinese translations before writing
        #[arg(long)]
        translate: bool,

        /// Upsert into the phd_positions table
        #[arg(long)]
        upload: bool,
    },

    /// Compass offer (success case) library
    Offers {
        #[command(flatten)]
        args: ScrapeArgs,
    },

    /// NUS ECE academic staff directory
    EceStaff {
        #[command(flatten)]
        args: ScrapeArgs,
    },

    /// NUS Computing (DISA) faculty directory
    Faculty {
        #[command(flatten)]
        args: ScrapeArgs,
    },

    /// AcademicTransfer vacancies through the public data API
    JobsApi {
        #[arg(long, default_value = "en")]
        locale: String,

        #[arg(long, default_value_t = 100)]
        page_size: u32,

        /// 0 disables the filter
        #[arg(long, default_value_t = 3)]
        education_level: u32,

        #[arg(long = "function-type")]
        function_types: Vec<u32>,

        #[arg(long)]
        include_inactive: bool,

        /// Extra listing filter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Fetch details for at most this many listed vacancies
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        output_json: Option<PathBuf>,

        #[arg(long)]
        output_csv: Option<PathBuf>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Load programme CSV(s) into the programs table
    ImportPrograms {
        /// A CSV file or a directory of them
        input: PathBuf,

        #[arg(long, default_value_t = 10)]
        batch_size: usize,

        #[arg(long)]
        dry_run: bool,
    },

    /// Load a faculty scrape into the professors table
    ImportProfessors {
        /// JSON written by `harvester faculty`
        input: PathBuf,

        /// schools.en_name of the owning university
        #[arg(long, default_value = "National University of Singapore")]
        university: String,

        #[arg(long)]
        college: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Add *_zh translations to a scraped job file
    Translate {
        #[arg(long)]
        input: PathBuf,

        /// Defaults to rewriting the input file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Field mapping src:dst (repeatable)
        #[arg(long = "field", value_parser = parse_field_mapping)]
        fields: Vec<(String, String)>,

        /// Re-translate fields that already have text
        #[arg(long)]
        force: bool,

        #[arg(long, default_value_t = translate::MAX_CHUNK_CHARS)]
        max_chars: usize,
    },
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let filter = match verbose {
        0 => "harvester=info,warn",
        1 => "harvester=debug,info",
        _ => "trace",
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {:?}", path))?;
            Some(fmt::layer().with_ansi(false).with_target(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(fmt::layer().compact().with_target(false))
        .with(file_layer)
        .init();
    Ok(())
}

/// First Ctrl-C asks the run to wrap up; a second one exits immediately.
fn interrupt_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received; keeping what has been collected (Ctrl-C again to quit now)");
        let _ = tx.send(true);
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(EXIT_INTERRUPTED.into());
        }
    });
    rx
}

fn run_exit_code<R>(run: &SiteRun<R>) -> ExitCode {
    if run.interrupted {
        ExitCode::from(EXIT_INTERRUPTED)
    } else if run.records.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn scrape_site<S: Site>(pipeline: &Pipeline, site: S, args: &ScrapeArgs) -> Result<ExitCode> {
    let opts = args.options();
    let _t = utils::Timer::start(format!("{} scrape", site.id()));
    let run = pipeline.scrape(site, &opts, interrupt_channel()).await?;
    pipeline.write_outputs(&run, &opts)?;
    run.log_summary();
    Ok(run_exit_code(&run))
}

async fn phd_jobs(pipeline: &Pipeline, args: &ScrapeArgs, translate: bool, upload: bool) -> Result<ExitCode> {
    let opts = args.options();
    let _t = utils::Timer::start("phd-jobs scrape");
    let mut run = pipeline.scrape(AcademicTransferSite, &opts, interrupt_channel()).await?;

    if translate && !run.records.is_empty() && !run.interrupted {
        run.records = pipeline.translate_jobs(std::mem::take(&mut run.records)).await?;
    }
    pipeline.write_outputs(&run, &opts)?;
    run.log_summary();

    if upload && !run.records.is_empty() {
        if opts.dry_run {
            info!("Dry run: skipping upload of {} job(s)", run.records.len());
        } else {
            let report = pipeline.upload_jobs(&run.records).await?;
            if report.inserted == 0 {
                error!("Upload failed for every job");
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(run_exit_code(&run))
}

fn describe<R: DetailRecord>(records: &[R]) {
    for r in records.iter().take(3) {
        info!("  e.g. {} ({})", r.label(), r.source_url());
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let pipeline = Pipeline::new(config);

    match cli.command {
        Command::PhdJobs { args, translate, upload } => phd_jobs(&pipeline, &args, translate, upload).await,
        Command::Offers { args } => scrape_site(&pipeline, CompassSite, &args).await,
        Command::EceStaff { args } => scrape_site(&pipeline, EceSite, &args).await,
        Command::Faculty { args } => scrape_site(&pipeline, FacultySite, &args).await,

        Command::JobsApi {
            locale,
            page_size,
            education_level,
            function_types,
            include_inactive,
            params,
            limit,
            output_json,
            output_csv,
            dry_run,
        } => {
            let _t = utils::Timer::start("AcademicTransfer API run");
            let query = ApiQuery {
                page_size,
                education_level: Some(education_level),
                function_types,
                include_inactive,
                extra: params,
            };
            let opts = ScrapeOptions { output_json, output_csv, dry_run, ..Default::default() };
            let fetched = pipeline.jobs_api(&locale, &query, limit, &opts).await?;
            Ok(if fetched == 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }

        Command::ImportPrograms { input, batch_size, dry_run } => {
            let _t = utils::Timer::start("Programme import");
            let files = loader::discover_csv_files(&input)?;
            info!("Found {} CSV file(s) in {:?}", files.len(), input);

            let mut rows = Vec::new();
            for path in &files {
                match loader::load_programs(path) {
                    Ok(mut r) => rows.append(&mut r),
                    Err(e) => warn!("Error loading {:?}: {:#}", path, e),
                }
            }
            if rows.is_empty() {
                error!("No programme rows to import");
                return Ok(ExitCode::FAILURE);
            }

            let client = RestClient::new(&pipeline.config().backend)?;
            let opts = ProgramImportOptions { batch_size, dry_run, ..Default::default() };
            let summary = importer::import_programs(&client, &rows, &opts).await?;
            summary.log("programs");
            Ok(if dry_run || summary.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }

        Command::ImportProfessors { input, university, college, dry_run } => {
            let _t = utils::Timer::start("Professor import");
            let profiles: Vec<FacultyProfile> = loader::load_records(&input)?;
            if profiles.is_empty() {
                error!("No profiles in {:?}", input);
                return Ok(ExitCode::FAILURE);
            }
            describe(&profiles);

            let client = RestClient::new(&pipeline.config().backend)?;
            let defaults = ProfessorImportOptions::default();
            let opts = ProfessorImportOptions {
                university,
                college: college.unwrap_or(defaults.college),
                dry_run,
                ..defaults
            };
            let summary = importer::import_professors(&client, &profiles, &opts).await?;
            summary.log("professors");
            Ok(if dry_run || summary.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }

        Command::Translate { input, output, fields, force, max_chars } => {
            let _t = utils::Timer::start("Translation");
            let mut doc = loader::read_document(&input)?;
            let items = loader::record_list_mut(&mut doc).with_context(|| format!("{:?} holds no item list", input))?;
            info!("Found {} item(s)", items.len());

            let translator = GtxTranslator::new(HttpClient::new(&pipeline.config().scraper)?);
            let opts = TranslateOptions {
                fields: if fields.is_empty() { default_fields() } else { fields },
                force,
                max_chars: max_chars.max(1),
            };
            let written = translate_items(&translator, items, &opts).await;
            info!("{} field(s) translated", written);

            let out = output.unwrap_or(input);
            storage::write_document(&out, &doc)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
