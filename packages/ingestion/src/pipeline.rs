//! Pipeline orchestration: extract → capture → normalize → load →
//! history, per facility, with bounded concurrency.
//!
//! Facility runs are independent: any failure is absorbed at the
//! facility boundary and recorded in history. Only an unreachable store
//! aborts the whole run (nothing could be processed anyway).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::dedupe::dedupe_facility;
use crate::error::{ExtractError, PipelineError, Result};
use crate::loader;
use crate::normalize::{normalize_batch, NormalizeRules};
use crate::traits::extractor::SourceExtractor;
use crate::traits::store::{CaptureStore, HistoryStore, RecordStore};
use crate::types::capture::RawCapture;
use crate::types::facility::{Facility, SourceFormat};
use crate::types::history::{RunCounts, RunHistoryEntry, RunStatus};
use crate::types::record::CanonicalRecord;

/// Extractor lookup by format. Implemented by
/// [`crate::extractors::ExtractorSet`] in production and by scripted
/// mocks in tests.
pub trait ExtractorDispatch: Send + Sync {
    fn for_format(&self, format: SourceFormat) -> &dyn SourceExtractor;
}

impl ExtractorDispatch for crate::extractors::ExtractorSet {
    fn for_format(&self, format: SourceFormat) -> &dyn SourceExtractor {
        crate::extractors::ExtractorSet::for_format(self, format)
    }
}

/// One facility plus its normalization rules — the unit of scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitySpec {
    pub facility: Facility,
    #[serde(default)]
    pub rules: NormalizeRules,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Global cap on concurrently running facilities.
    pub max_concurrency: usize,

    /// Per-extraction-call timeout. A timeout becomes a `FetchError`
    /// for that facility only.
    pub extract_timeout: Duration,

    /// Dedupe each facility's captures once its run has finished using
    /// them. The ordering matters: dedupe is destructive.
    pub dedupe_after_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            extract_timeout: Duration::from_secs(60),
            dedupe_after_run: true,
        }
    }
}

/// Outcome of one facility's run, mirrored into the history ledger.
#[derive(Debug, Clone)]
pub struct FacilityRunResult {
    pub facility: Facility,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub error: Option<String>,
    /// The store became unreachable during this run. No further
    /// facilities are scheduled once this is set.
    pub fatal: bool,
}

/// Outcome of a whole pipeline run.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub results: Vec<FacilityRunResult>,
}

impl PipelineOutcome {
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == RunStatus::Failed)
            .count()
    }

    /// Exit signaling: 0 all succeeded, 1 some facilities failed but
    /// the pipeline completed. (2, fatal, is the error path of
    /// [`Pipeline::run`] itself.)
    pub fn exit_code(&self) -> i32 {
        if self.failed_count() == 0 {
            0
        } else {
            1
        }
    }
}

/// Shared dependencies for pipeline runs.
pub struct Pipeline<R, H, C, D> {
    records: Arc<R>,
    history: Arc<H>,
    captures: Arc<C>,
    extractors: Arc<D>,
    config: PipelineConfig,
    /// One in-flight request per source host (politeness).
    domain_locks: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl<R, H, C, D> Pipeline<R, H, C, D>
where
    R: RecordStore + 'static,
    H: HistoryStore + 'static,
    C: CaptureStore + 'static,
    D: ExtractorDispatch + 'static,
{
    pub fn new(
        records: Arc<R>,
        history: Arc<H>,
        captures: Arc<C>,
        extractors: Arc<D>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            records,
            history,
            captures,
            extractors,
            config,
            domain_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the pipeline for every active facility.
    ///
    /// Returns `Err` only for fatal conditions (store unreachable);
    /// per-facility failures land in the outcome and in history.
    pub async fn run(self: &Arc<Self>, specs: Vec<FacilitySpec>) -> Result<PipelineOutcome> {
        self.records.ping().await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for spec in specs {
            if !spec.facility.active {
                info!(facility = %spec.facility.label(), "skipping inactive facility");
                continue;
            }
            let pipeline = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Closing the semaphore is how a fatal abort stops
                // scheduling; in-flight runs complete naturally.
                let _permit = match semaphore.acquire().await {
                    Ok(p) => p,
                    Err(_) => return None,
                };
                let result = pipeline.run_facility(spec).await;
                if result.fatal {
                    error!(
                        facility = %result.facility.label(),
                        "store unreachable, stopping scheduling"
                    );
                    semaphore.close();
                }
                Some(result)
            });
        }

        let mut outcome = PipelineOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(result)) => outcome.results.push(result),
                Ok(None) => {}
                Err(e) => error!("facility task panicked: {e}"),
            }
        }

        info!(
            facilities = outcome.results.len(),
            failed = outcome.failed_count(),
            "pipeline run complete"
        );
        Ok(outcome)
    }

    /// Run one facility end to end and append its history entry.
    pub async fn run_facility(&self, spec: FacilitySpec) -> FacilityRunResult {
        let facility = spec.facility;
        let started_at = chrono::Utc::now();
        info!(facility = %facility.label(), "facility run started");

        let mut records: Vec<CanonicalRecord> = Vec::new();
        let mut skipped = 0usize;
        let mut source_errors: Vec<String> = Vec::new();
        let mut sources_ok = 0usize;

        for source in &facility.sources {
            match self.extract_source(&facility, &spec.rules, source).await {
                Ok((mut batch, batch_skipped)) => {
                    sources_ok += 1;
                    skipped += batch_skipped;
                    records.append(&mut batch);
                }
                Err(e) => {
                    warn!(
                        facility = %facility.label(),
                        source = %source.location,
                        "source failed: {e}"
                    );
                    source_errors.push(format!("{}: {e}", source.location));
                }
            }
        }

        let result = if sources_ok == 0 {
            // Nothing extracted; the store stays untouched.
            FacilityRunResult {
                facility: facility.clone(),
                status: RunStatus::Failed,
                counts: RunCounts {
                    skipped,
                    ..Default::default()
                },
                error: Some(source_errors.join("; ")),
                fatal: false,
            }
        } else {
            dedup_within_run(&mut records);
            match loader::load(self.records.as_ref(), facility.id, &records, skipped).await {
                Ok(counts) => FacilityRunResult {
                    facility: facility.clone(),
                    status: if source_errors.is_empty() {
                        RunStatus::Success
                    } else {
                        RunStatus::Partial
                    },
                    counts,
                    error: (!source_errors.is_empty()).then(|| source_errors.join("; ")),
                    fatal: false,
                },
                Err((e, counts)) => {
                    // Rolled back: counts report what would have applied.
                    error!(facility = %facility.label(), "load failed: {e}");
                    let fatal = matches!(e, crate::error::LoadError::Unavailable(_));
                    FacilityRunResult {
                        facility: facility.clone(),
                        status: RunStatus::Failed,
                        counts,
                        error: Some(e.to_string()),
                        fatal,
                    }
                }
            }
        };

        // Captures for this facility are no longer needed by this run;
        // safe to discard the duplicates now.
        if self.config.dedupe_after_run {
            if let Err(e) = dedupe_facility(self.captures.as_ref(), facility.id).await {
                warn!(facility = %facility.label(), "capture dedupe failed: {e}");
            }
        }

        let mut entry = RunHistoryEntry::new(facility.id, started_at, result.status)
            .with_counts(result.counts);
        if let Some(err) = &result.error {
            entry = entry.with_error(err.clone());
        }
        if let Err(e) = self.history.append(&entry).await {
            error!(facility = %facility.label(), "history append failed: {e}");
        }

        info!(
            facility = %facility.label(),
            status = result.status.as_str(),
            found = result.counts.found,
            added = result.counts.added,
            updated = result.counts.updated,
            removed = result.counts.removed,
            skipped = result.counts.skipped,
            "facility run finished"
        );
        result
    }

    /// Extract one source: politeness lock, timeout, capture write,
    /// then normalization.
    async fn extract_source(
        &self,
        facility: &Facility,
        rules: &NormalizeRules,
        source: &crate::types::facility::SourceDescriptor,
    ) -> std::result::Result<(Vec<CanonicalRecord>, usize), PipelineError> {
        let _domain_permit = match source.host() {
            Some(host) => {
                let sem = {
                    let mut locks = self.domain_locks.lock().await;
                    Arc::clone(
                        locks
                            .entry(host)
                            .or_insert_with(|| Arc::new(Semaphore::new(1))),
                    )
                };
                Some(sem.acquire_owned().await.expect("domain semaphore never closed"))
            }
            None => None,
        };

        let extractor = self.extractors.for_format(source.format);
        let extraction = match tokio::time::timeout(
            self.config.extract_timeout,
            extractor.extract(facility, source),
        )
        .await
        {
            Err(_) => {
                return Err(ExtractError::fetch(
                    &source.location,
                    format!("timed out after {:?}", self.config.extract_timeout),
                )
                .into())
            }
            Ok(Err(e)) => {
                // A parse failure that got as far as fetching still
                // leaves an auditable artifact.
                if let ExtractError::Parse { content, .. } = &e {
                    if !content.is_empty() {
                        let capture = RawCapture::new(
                            facility.id,
                            source.format,
                            &source.location,
                            content.clone(),
                            0,
                        );
                        if let Err(store_err) = self.captures.put(&capture).await {
                            warn!(
                                facility = %facility.label(),
                                "failed-parse capture not stored: {store_err}"
                            );
                        }
                    }
                }
                return Err(e.into());
            }
            Ok(Ok(extraction)) => extraction,
        };

        // Persist the raw artifact before fragments are consumed so even
        // a fully-rejected batch leaves an auditable capture.
        let capture = RawCapture::new(
            facility.id,
            source.format,
            &source.location,
            extraction.raw_content.clone(),
            extraction.fragments.len(),
        );
        let capture_id = self.captures.put(&capture).await?;

        let (records, skipped) =
            normalize_batch(facility, rules, &extraction.fragments, Some(capture_id));
        Ok((records, skipped))
    }
}

/// A single run must not hand the loader two records with the same
/// natural key (multi-source facilities can overlap); first wins.
fn dedup_within_run(records: &mut Vec<CanonicalRecord>) {
    let mut seen = std::collections::HashSet::new();
    records.retain(|r| seen.insert(r.natural_key.clone()));
}
