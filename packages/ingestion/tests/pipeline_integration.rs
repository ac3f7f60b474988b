//! End-to-end pipeline tests over the in-memory store and scripted
//! extractors: partial-failure isolation, load atomicity, skip
//! accounting, and capture deduplication.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ingestion::error::ExtractResult;
use ingestion::testing::{listing_fragment, MockExtractor};
use ingestion::{
    report, CaptureStore, Extraction, ExtractionMethod, ExtractorDispatch, FacilitySpec, Facility,
    HistoryStore, MemoryStore, Pipeline, PipelineConfig, RawCapture, RawFragment, RecordStatus,
    RecordStore, RunStatus, SourceDescriptor, SourceExtractor, SourceFormat,
};

fn facility(name: &str, location: &str) -> Facility {
    Facility::new("ishikawa", name, "cats")
        .with_source(SourceDescriptor::new(location, SourceFormat::Html))
}

fn spec(facility: Facility) -> FacilitySpec {
    FacilitySpec {
        facility,
        rules: Default::default(),
    }
}

fn pipeline(
    store: &Arc<MemoryStore>,
    extractor: Arc<MockExtractor>,
) -> Arc<Pipeline<MemoryStore, MemoryStore, MemoryStore, Arc<MockExtractor>>> {
    Arc::new(Pipeline::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(extractor),
        PipelineConfig::default(),
    ))
}

fn three_cats(location_tag: &str) -> Vec<RawFragment> {
    vec![
        listing_fragment(0, &format!("{location_tag}-1"), "cat", "Mike", "2025-07-01"),
        listing_fragment(1, &format!("{location_tag}-2"), "cat", "Kuro", "2025-07-02"),
        listing_fragment(2, &format!("{location_tag}-3"), "cat", "Shiro", "2025-07-03"),
    ]
}

#[tokio::test]
async fn failed_facility_does_not_affect_others() {
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .with_fetch_error("mock://x", "connection refused")
        .with_fragments("mock://y", three_cats("y"))
        .with_fragments("mock://z", three_cats("z"));

    let fx = facility("x-city", "mock://x");
    let fy = facility("y-city", "mock://y");
    let fz = facility("z-city", "mock://z");
    let (fy_id, fz_id) = (fy.id, fz.id);

    let outcome = pipeline(&store, Arc::new(extractor))
        .run(vec![spec(fx), spec(fy), spec(fz)])
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.failed_count(), 1);
    assert_eq!(outcome.exit_code(), 1);

    // Y and Z are loaded and have successful history rows.
    assert_eq!(store.current_records(fy_id).await.unwrap().len(), 3);
    assert_eq!(store.current_records(fz_id).await.unwrap().len(), 3);
    let latest = store.latest_per_facility().await.unwrap();
    for id in [fy_id, fz_id] {
        let entry = latest.iter().find(|e| e.facility_id == id).unwrap();
        assert_eq!(entry.status, RunStatus::Success);
        assert_eq!(entry.counts.found, 3);
        assert_eq!(entry.counts.added, 3);
    }
}

#[tokio::test]
async fn rerun_with_identical_listings_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(MockExtractor::new().with_fragments("mock://a", three_cats("a")));
    let f = facility("a-city", "mock://a");
    let fid = f.id;

    let p = pipeline(&store, extractor);
    p.run(vec![spec(f.clone())]).await.unwrap();
    let second = p.run(vec![spec(f)]).await.unwrap();

    let counts = second.results[0].counts;
    assert_eq!(counts.found, 3);
    assert_eq!((counts.added, counts.updated, counts.removed), (0, 0, 0));
    assert_eq!(store.current_records(fid).await.unwrap().len(), 3);
}

#[tokio::test]
async fn reconciliation_scenario_add_update_remove() {
    let store = Arc::new(MemoryStore::new());
    let f = facility("b-city", "mock://b");
    let fid = f.id;

    // First run stores {A, D}.
    let first = MockExtractor::new().with_fragments(
        "mock://b",
        vec![
            listing_fragment(0, "A", "cat", "Mike", "2025-07-01"),
            listing_fragment(1, "D", "cat", "Tama", "2025-07-01"),
        ],
    );
    pipeline(&store, Arc::new(first))
        .run(vec![spec(f.clone())])
        .await
        .unwrap();

    // Second run sees {A', B, C}: A changed color, D vanished.
    let second = MockExtractor::new().with_fragments(
        "mock://b",
        vec![
            listing_fragment(0, "A", "cat", "Mike", "2025-07-01").with_field("color", "calico"),
            listing_fragment(1, "B", "cat", "Kuro", "2025-07-02"),
            listing_fragment(2, "C", "cat", "Shiro", "2025-07-03"),
        ],
    );
    let outcome = pipeline(&store, Arc::new(second))
        .run(vec![spec(f.clone())])
        .await
        .unwrap();

    let counts = outcome.results[0].counts;
    assert_eq!(counts.added, 2);
    assert_eq!(counts.updated, 1);
    assert_eq!(counts.removed, 1);

    let records = store.current_records(fid).await.unwrap();
    assert_eq!(records.len(), 4); // D retained, soft-removed
    let d = records.iter().find(|r| r.natural_key == "D").unwrap();
    assert_eq!(d.status, RecordStatus::Removed);
    let a = records.iter().find(|r| r.natural_key == "A").unwrap();
    assert_eq!(a.color.as_deref(), Some("calico"));

    // Third run with the same {A', B, C} is a full no-op.
    let third = MockExtractor::new().with_fragments(
        "mock://b",
        vec![
            listing_fragment(0, "A", "cat", "Mike", "2025-07-01").with_field("color", "calico"),
            listing_fragment(1, "B", "cat", "Kuro", "2025-07-02"),
            listing_fragment(2, "C", "cat", "Shiro", "2025-07-03"),
        ],
    );
    let outcome = pipeline(&store, Arc::new(third))
        .run(vec![spec(f)])
        .await
        .unwrap();
    let counts = outcome.results[0].counts;
    assert_eq!((counts.added, counts.updated, counts.removed), (0, 0, 0));
}

#[tokio::test]
async fn one_malformed_listing_of_twenty_is_skipped_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let f = facility("c-city", "mock://c");
    let fid = f.id;

    let mut fragments: Vec<RawFragment> = (0..19)
        .map(|i| listing_fragment(i, &format!("c-{i}"), "cat", "Neko", "2025-07-01"))
        .collect();
    // Listing 20 has no deadline_date.
    fragments.push(
        RawFragment::new(19, ingestion::ExtractionMethod::Dom, "mock://c")
            .with_field("external_id", "c-19")
            .with_field("species", "cat")
            .with_field("name", "Mouto"),
    );

    let extractor = MockExtractor::new().with_fragments("mock://c", fragments);
    let outcome = pipeline(&store, Arc::new(extractor))
        .run(vec![spec(f)])
        .await
        .unwrap();

    let result = &outcome.results[0];
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.counts.found, 19);
    assert_eq!(result.counts.added, 19);
    assert_eq!(result.counts.skipped, 1);
    assert_eq!(store.current_records(fid).await.unwrap().len(), 19);
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn interrupted_apply_leaves_prior_state_intact() {
    let store = Arc::new(MemoryStore::new());
    let f = facility("d-city", "mock://d");
    let fid = f.id;

    let first = MockExtractor::new().with_fragments("mock://d", three_cats("d"));
    pipeline(&store, Arc::new(first))
        .run(vec![spec(f.clone())])
        .await
        .unwrap();
    let before = store.current_records(fid).await.unwrap();

    // Simulated mid-transaction failure on the next apply.
    store.fail_next_apply();
    let second = MockExtractor::new().with_fragments(
        "mock://d",
        vec![listing_fragment(0, "fresh", "cat", "New", "2025-08-01")],
    );
    let outcome = pipeline(&store, Arc::new(second))
        .run(vec![spec(f)])
        .await
        .unwrap();

    let result = &outcome.results[0];
    assert_eq!(result.status, RunStatus::Failed);
    // Computed diff counts survive for diagnostics even though nothing
    // was persisted.
    assert_eq!(result.counts.added, 1);
    assert_eq!(result.counts.removed, 3);

    let after = store.current_records(fid).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn store_unavailable_aborts_the_whole_run() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let extractor = Arc::new(MockExtractor::new());

    let err = pipeline(&store, extractor)
        .run(vec![spec(facility("e-city", "mock://e"))])
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(store.history_len(), 0, "no facility was scheduled");
}

#[tokio::test]
async fn duplicate_captures_are_cleaned_after_the_run() {
    let store = Arc::new(MemoryStore::new());
    let f = facility("f-city", "mock://f");
    let fid = f.id;

    // A stale capture from an earlier retry in the same window, shorter
    // than what the run will produce.
    let stale = RawCapture::new(fid, SourceFormat::Html, "mock://f", b"short".to_vec(), 1);
    store.put(&stale).await.unwrap();

    let extractor = Arc::new(MockExtractor::new().with_fragments("mock://f", three_cats("f")));
    pipeline(&store, extractor).run(vec![spec(f)]).await.unwrap();

    let captures = store.list(fid).await.unwrap();
    assert_eq!(captures.len(), 1, "one authoritative capture per window");
    assert_eq!(captures[0].record_count, 3);
}

#[tokio::test]
async fn failed_parse_still_leaves_an_auditable_capture() {
    let store = Arc::new(MemoryStore::new());
    let f = facility("i-city", "mock://i");
    let fid = f.id;

    // The page fetched fine but held a renewal notice instead of the
    // listing table.
    let extractor = Arc::new(MockExtractor::new().with_parse_artifact(
        "mock://i",
        "row_pattern matched nothing",
        b"<html>renewal notice</html>".to_vec(),
    ));
    let outcome = pipeline(&store, extractor).run(vec![spec(f)]).await.unwrap();
    assert_eq!(outcome.results[0].status, RunStatus::Failed);

    let captures = store.list(fid).await.unwrap();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].record_count, 0);
}

#[tokio::test]
async fn slow_source_times_out_as_a_fetch_failure() {
    let store = Arc::new(MemoryStore::new());
    let extractor =
        Arc::new(MockExtractor::new().with_stall("mock://slow", Duration::from_secs(30)));
    let config = PipelineConfig {
        extract_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let p = Arc::new(Pipeline::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(extractor),
        config,
    ));

    let outcome = p
        .run(vec![spec(facility("slow-city", "mock://slow"))])
        .await
        .unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
}

/// Counts overlapping extract calls; sleeps long enough that two
/// unserialized calls would be observed concurrently.
#[derive(Default)]
struct InFlightCountingExtractor {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl SourceExtractor for InFlightCountingExtractor {
    async fn extract(
        &self,
        _facility: &Facility,
        source: &SourceDescriptor,
    ) -> ExtractResult<Extraction> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let tag = source.location.rsplit('/').next().unwrap_or("x");
        Ok(Extraction {
            fragments: vec![listing_fragment(0, tag, "cat", "Neko", "2025-07-01")],
            raw_content: b"page".to_vec(),
            method: ExtractionMethod::Dom,
        })
    }
}

impl ExtractorDispatch for InFlightCountingExtractor {
    fn for_format(&self, _format: SourceFormat) -> &dyn SourceExtractor {
        self
    }
}

#[tokio::test]
async fn same_host_sources_never_overlap() {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(InFlightCountingExtractor::default());
    let p = Arc::new(Pipeline::new(
        store.clone(),
        store.clone(),
        store.clone(),
        extractor.clone(),
        PipelineConfig::default(),
    ));

    // Two facilities publishing on the same host: runs are concurrent,
    // requests to the host are not.
    let outcome = p
        .run(vec![
            spec(facility("s-city", "mock://city.example.jp/cats")),
            spec(facility("t-city", "mock://city.example.jp/dogs")),
        ])
        .await
        .unwrap();

    assert_eq!(outcome.failed_count(), 0);
    assert_eq!(
        extractor.peak.load(Ordering::SeqCst),
        1,
        "at most one in-flight request per host"
    );
}

/// Extracts fine, but the store goes down before the load.
struct StoreDowningExtractor {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl SourceExtractor for StoreDowningExtractor {
    async fn extract(
        &self,
        _facility: &Facility,
        source: &SourceDescriptor,
    ) -> ExtractResult<Extraction> {
        self.store.set_unavailable(true);
        let tag = source.location.rsplit('/').next().unwrap_or("x");
        Ok(Extraction {
            fragments: vec![listing_fragment(0, tag, "cat", "Mike", "2025-07-01")],
            raw_content: b"page".to_vec(),
            method: ExtractionMethod::Dom,
        })
    }
}

impl ExtractorDispatch for StoreDowningExtractor {
    fn for_format(&self, _format: SourceFormat) -> &dyn SourceExtractor {
        self
    }
}

#[tokio::test]
async fn store_loss_mid_run_stops_scheduling_new_facilities() {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(StoreDowningExtractor {
        store: store.clone(),
    });
    let config = PipelineConfig {
        max_concurrency: 1,
        ..Default::default()
    };
    let p = Arc::new(Pipeline::new(
        store.clone(),
        store.clone(),
        store.clone(),
        extractor,
        config,
    ));

    let outcome = p
        .run(vec![
            spec(facility("p-city", "mock://p")),
            spec(facility("q-city", "mock://q")),
            spec(facility("r-city", "mock://r")),
        ])
        .await
        .unwrap();

    // Whichever facility ran first hit the outage and is recorded
    // failed; the rest were never scheduled.
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].status, RunStatus::Failed);
    assert!(outcome.results[0].fatal);
}

#[tokio::test]
async fn history_feeds_the_summary_report() {
    let store = Arc::new(MemoryStore::new());
    let good = facility("g-city", "mock://g");
    let broken = facility("h-city", "mock://h");
    let broken_id = broken.id;

    for _ in 0..3 {
        let extractor = Arc::new(
            MockExtractor::new()
                .with_fragments("mock://g", three_cats("g"))
                .with_fetch_error("mock://h", "DNS failure"),
        );
        pipeline(&store, extractor)
            .run(vec![spec(good.clone()), spec(broken.clone())])
            .await
            .unwrap();
    }

    let now = chrono::Utc::now();
    let from = now - chrono::Duration::days(1);
    let entries = store.entries_in_window(from, now + chrono::Duration::seconds(5)).await.unwrap();
    let summary = report::summarize(&entries, from, now, 3);

    assert_eq!(summary.total_runs, 6);
    assert_eq!(summary.total_successes, 3);
    assert!((summary.overall_success_rate() - 0.5).abs() < 1e-9);
    assert_eq!(summary.flagged.len(), 1);
    assert_eq!(summary.flagged[0].facility_id, broken_id);
    assert_eq!(summary.flagged[0].reason, report::FlagReason::ConsecutiveFailures);
}
