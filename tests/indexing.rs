//! End-to-end indexing behaviour: resume, idempotence, and validation
//! fail-stop at the model level.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::{FailKind, Fixture, FlakyStore, registry, table_csv};
use partix::config::IndexConfig;
use partix::error::ErrorClass;
use partix::index::{CollectionStrategy, PartitionIndexer, PartitionJob, ResumeStore};
use partix::store::{GetRequest, VectorStore};
use partix::text::HeuristicTokenizer;

fn indexer(
    store: &Arc<FlakyStore>,
    fixture: &Fixture,
    resume: bool,
    batch_docs: usize,
) -> PartitionIndexer {
    PartitionIndexer::new(
        Arc::new(registry()),
        Arc::clone(store) as Arc<dyn VectorStore>,
        Arc::new(HeuristicTokenizer),
        CollectionStrategy::Single {
            name: "docs".into(),
        },
        IndexConfig::builder()
            .batch_size_docs(batch_docs)
            .resume(resume)
            .build(),
        &fixture.out_root,
    )
}

fn job_for(fixture: &Fixture, partition: &str) -> PartitionJob {
    let manifest = fixture.manifest.read().expect("manifest");
    let entry = manifest.partition(partition).expect("partition entry");
    PartitionJob::from_manifest(entry, &registry(), &fixture.data_root)
}

async fn all_ids(store: &FlakyStore, collection: &str) -> Vec<String> {
    let mut ids = store
        .inner
        .get(collection, &GetRequest::default())
        .await
        .expect("get")
        .ids;
    ids.sort();
    ids
}

#[tokio::test]
async fn test_resume_after_crash_matches_uninterrupted_run() {
    let fixture = Fixture::new();
    let csv = table_csv(50);
    let partition = fixture.add_partition(&[("Table", &csv, 1)], vec![]);
    let source_size = csv.len() as u64;

    // Run 1: the third flush dies, taking the partition down mid-stream.
    let store = Arc::new(FlakyStore::new());
    store.fail_upsert_call(3, FailKind::Transient);
    let outcome = indexer(&store, &fixture, false, 10)
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("run 1");
    assert!(outcome.failed());
    assert_eq!(outcome.failures[0].class, ErrorClass::Transient);
    assert_eq!(outcome.documents_indexed, 20);

    let resume = ResumeStore::new(&fixture.out_root, &partition, "docs");
    let state = resume.load().expect("resume state");
    let progress = state.model("Table").expect("progress");
    assert!(progress.started);
    assert!(!progress.complete);
    assert_eq!(progress.row_index, 20);
    assert_eq!(progress.collection_count, 20);
    assert!(progress.file_offset > 0);
    assert!(progress.file_offset < source_size);
    assert_eq!(store.inner.count("docs", None).await.unwrap(), 20);

    // An error report landed before the failure propagated.
    let reports: Vec<_> = std::fs::read_dir(fixture.errors_dir(&partition))
        .expect("errors dir")
        .collect();
    assert_eq!(reports.len(), 1);

    // Run 2 with resume: picks up at the recorded offset and finishes.
    let calls_before = store.upsert_calls();
    let outcome = indexer(&store, &fixture, true, 10)
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("run 2");
    assert!(!outcome.failed());
    assert_eq!(outcome.documents_indexed, 30);
    assert_eq!(store.upsert_calls() - calls_before, 3);

    let state = resume.load().expect("resume state");
    let progress = state.model("Table").expect("progress");
    assert!(progress.complete);
    assert_eq!(progress.row_index, 50);
    assert_eq!(progress.file_offset, source_size);
    assert_eq!(progress.collection_count, 50);
    assert_eq!(store.inner.count("docs", None).await.unwrap(), 50);

    // Same final document set as a run that never crashed.
    let clean = Arc::new(FlakyStore::new());
    let clean_fixture = Fixture::new();
    let clean_partition = clean_fixture.add_partition(&[("Table", &csv, 1)], vec![]);
    indexer(&clean, &clean_fixture, false, 10)
        .index_partition(&job_for(&clean_fixture, &clean_partition))
        .await
        .expect("clean run");
    assert_eq!(
        all_ids(&store, "docs").await,
        all_ids(&clean, "docs").await
    );
}

#[tokio::test]
async fn test_rerun_with_resume_is_a_noop() {
    let fixture = Fixture::new();
    let csv = table_csv(25);
    let partition = fixture.add_partition(&[("Table", &csv, 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    indexer(&store, &fixture, true, 10)
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("first run");
    let calls = store.upsert_calls();
    assert!(calls > 0);

    let outcome = indexer(&store, &fixture, true, 10)
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("second run");
    assert_eq!(outcome.models_skipped, 1);
    assert_eq!(outcome.documents_indexed, 0);
    assert_eq!(store.upsert_calls(), calls);
}

#[tokio::test]
async fn test_changed_source_restarts_from_zero() {
    let fixture = Fixture::new();
    let partition = fixture.add_partition(&[("Table", &table_csv(20), 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    indexer(&store, &fixture, true, 10)
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("first run");

    // Regenerate the prepared file with more rows: the signature changes.
    let source = fixture.data_root.join(&partition).join("Table.csv");
    std::fs::write(&source, table_csv(30)).expect("rewrite source");

    let outcome = indexer(&store, &fixture, true, 10)
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("second run");
    assert_eq!(outcome.models_skipped, 0);
    assert_eq!(outcome.documents_indexed, 30);

    let resume = ResumeStore::new(&fixture.out_root, &partition, "docs");
    let progress = resume.load().unwrap().model("Table").cloned().unwrap();
    assert!(progress.complete);
    assert_eq!(progress.row_index, 30);
    // Counters were reset with the restart, not stacked onto the old run.
    assert_eq!(progress.collection_count, 30);
    assert_eq!(store.inner.count("docs", None).await.unwrap(), 30);
}

#[tokio::test]
async fn test_validation_failure_stops_model_but_not_partition() {
    let fixture = Fixture::new();
    let mut bad_csv = String::from("table_name,schema_name,description\n");
    bad_csv.push_str("t0001,sales,ok row\n");
    bad_csv.push_str("t0002,sales,ok row\n");
    bad_csv.push_str(",sales,row with empty required key\n");
    bad_csv.push_str("t0004,sales,never reached\n");
    let field_csv = common::field_csv(5);
    let partition =
        fixture.add_partition(&[("Table", &bad_csv, 1), ("Field", &field_csv, 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    let outcome = indexer(&store, &fixture, false, 10)
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("run");

    assert!(outcome.failed());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].model, "Table");
    assert_eq!(outcome.failures[0].class, ErrorClass::Validation);
    // The sibling model still completed.
    assert_eq!(outcome.models_completed, 1);
    assert_eq!(
        store
            .inner
            .count("docs", Some(&partix::store::Filter::eq("model_name", "Field")))
            .await
            .unwrap(),
        5
    );
    // Nothing from the failed model stream was flushed.
    assert_eq!(
        store
            .inner
            .count("docs", Some(&partix::store::Filter::eq("model_name", "Table")))
            .await
            .unwrap(),
        0
    );
    // The report names the offending row.
    let report_dir = fixture.errors_dir(&partition);
    let reports: Vec<_> = std::fs::read_dir(&report_dir).expect("errors dir").collect();
    assert_eq!(reports.len(), 1);
    let rows = partix::index::scan_error_rows(&report_dir);
    assert_eq!(rows.get("Table"), Some(&3));
}

#[tokio::test]
async fn test_sampling_indexes_every_nth_row() {
    let fixture = Fixture::new();
    let partition = fixture.add_partition(&[("Table", &table_csv(50), 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    let sampled = PartitionIndexer::new(
        Arc::new(registry()),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Arc::new(HeuristicTokenizer),
        CollectionStrategy::Single {
            name: "docs".into(),
        },
        IndexConfig::builder().sample_every(10).build(),
        &fixture.out_root,
    );
    let outcome = sampled
        .index_partition(&job_for(&fixture, &partition))
        .await
        .expect("sampled run");
    assert!(!outcome.failed());
    assert_eq!(outcome.documents_indexed, 5);
    assert_eq!(store.inner.count("docs", None).await.unwrap(), 5);
}
