//! `tailsync` — command surface for the shelter listing pipeline.
//!
//! Exit codes: 0 every facility succeeded; 1 one or more facilities
//! failed but the pipeline completed; 2 fatal (store unreachable, bad
//! configuration, nothing processed).

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use ingestion::{
    dedupe_facility, loader, report, ExtractorSet, FacilityId, FacilitySpec, FsCaptureStore,
    HistoryLog, HistoryStore, Pipeline, PipelineConfig, RunHistoryEntry, RunStatus, SqliteStore,
};

const EXIT_PARTIAL: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "tailsync", about = "Shelter listing ingestion pipeline")]
struct Cli {
    /// Facilities configuration file.
    #[arg(long, default_value = "facilities.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline (or a single facility).
    Run {
        /// Restrict to one facility id.
        #[arg(long)]
        facility: Option<Uuid>,
    },
    /// Deduplicate raw captures without extracting anything.
    Dedupe {
        #[arg(long)]
        facility: Option<Uuid>,
    },
    /// Load an already-normalized record set for one facility.
    Load {
        #[arg(long)]
        facility: Uuid,
        /// JSON file holding an array of canonical records.
        #[arg(long)]
        input: PathBuf,
    },
    /// Summary report over a trailing window.
    Report {
        /// Window size in days.
        #[arg(long, default_value_t = 7)]
        days: i64,
        /// Consecutive failed / zero-found runs that flag a facility.
        #[arg(long, default_value_t = 3)]
        threshold: usize,
        /// Emit JSON instead of the table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let env = config::Env::load();

    let store = Arc::new(
        SqliteStore::new(&env.database_url)
            .await
            .context("connecting to store")?,
    );
    let captures = Arc::new(FsCaptureStore::new(&env.capture_dir));

    match cli.command {
        Command::Run { facility } => {
            let specs = select_facilities(&cli.config, facility)?;
            let extractors = Arc::new(ExtractorSet::without_ocr());
            let pipeline = Arc::new(Pipeline::new(
                store.clone(),
                store.clone(),
                captures,
                extractors,
                PipelineConfig::default(),
            ));
            let outcome = pipeline.run(specs).await.context("pipeline run")?;
            for result in &outcome.results {
                println!(
                    "{:<40} {:<8} found={} added={} updated={} removed={} skipped={}",
                    result.facility.label(),
                    result.status.as_str(),
                    result.counts.found,
                    result.counts.added,
                    result.counts.updated,
                    result.counts.removed,
                    result.counts.skipped,
                );
            }
            Ok(if outcome.exit_code() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL)
            })
        }

        Command::Dedupe { facility } => {
            let specs = select_facilities(&cli.config, facility)?;
            let mut removed = 0usize;
            for spec in &specs {
                let outcome = dedupe_facility(captures.as_ref(), spec.facility.id)
                    .await
                    .with_context(|| format!("dedupe {}", spec.facility.label()))?;
                removed += outcome.removed;
            }
            println!("{removed} duplicate capture(s) removed");
            Ok(ExitCode::SUCCESS)
        }

        Command::Load { facility, input } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let records: Vec<ingestion::CanonicalRecord> =
                serde_json::from_str(&raw).context("parsing input records")?;
            let facility_id = FacilityId(facility);
            let started_at = chrono::Utc::now();

            let (status, counts, error) =
                match loader::load(store.as_ref(), facility_id, &records, 0).await {
                    Ok(counts) => (RunStatus::Success, counts, None),
                    Err((e, counts)) => (RunStatus::Failed, counts, Some(e.to_string())),
                };

            let mut entry = RunHistoryEntry::new(facility_id, started_at, status)
                .with_counts(counts);
            if let Some(err) = &error {
                entry = entry.with_error(err.clone());
            }
            store.append(&entry).await.context("recording run")?;

            println!(
                "load {}: added={} updated={} removed={}",
                status.as_str(),
                counts.added,
                counts.updated,
                counts.removed,
            );
            Ok(match status {
                RunStatus::Success => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_PARTIAL),
            })
        }

        Command::Report { days, threshold, json } => {
            let history = HistoryLog::new(store.clone());
            let to = chrono::Utc::now();
            let from = to - chrono::Duration::days(days);
            let summary = report::report_window(&history, from, to, threshold)
                .await
                .context("building report")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_report(&summary);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn select_facilities(path: &std::path::Path, only: Option<Uuid>) -> Result<Vec<FacilitySpec>> {
    let mut specs = config::load_facilities(path)?;
    if let Some(id) = only {
        specs.retain(|s| s.facility.id.0 == id);
        anyhow::ensure!(!specs.is_empty(), "no facility with id {id} in config");
    }
    Ok(specs)
}

fn print_report(summary: &report::SummaryReport) {
    println!(
        "window: {} .. {}",
        summary.window_start.format("%Y-%m-%d %H:%M"),
        summary.window_end.format("%Y-%m-%d %H:%M"),
    );
    println!(
        "runs: {} total, {} successful ({:.0}%)",
        summary.total_runs,
        summary.total_successes,
        summary.overall_success_rate() * 100.0,
    );
    println!(
        "records: found={} added={} updated={} removed={} skipped={}",
        summary.totals.found,
        summary.totals.added,
        summary.totals.updated,
        summary.totals.removed,
        summary.totals.skipped,
    );
    println!();
    println!("{:<38} {:>5} {:>7} {:>6}", "facility", "runs", "rate", "found");
    for (facility, stats) in &summary.per_facility {
        println!(
            "{:<38} {:>5} {:>6.0}% {:>6}",
            facility,
            stats.runs,
            stats.success_rate() * 100.0,
            stats.found,
        );
    }
    if !summary.flagged.is_empty() {
        println!();
        println!("flagged facilities:");
        for flag in &summary.flagged {
            let reason = match flag.reason {
                report::FlagReason::ConsecutiveFailures => "consecutive failures",
                report::FlagReason::ConsecutiveZeroFound => "consecutive zero-found runs",
            };
            println!("  {}  {} ({})", flag.facility_id, reason, flag.streak);
        }
    }
}
