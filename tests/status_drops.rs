//! Status classification from on-disk state, and drop-plan application.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use common::{Fixture, FlakyStore, registry};
use partix::config::IndexConfig;
use partix::index::{
    CollectionStrategy, DropPlan, DropSelection, ErrorReport, ModelProgress, ModelStatus,
    PartitionIndexer, PartitionJob, ResumeState, ResumeStore, apply_drop, partition_status,
};
use partix::store::{Filter, VectorStore};
use partix::text::HeuristicTokenizer;

fn prefixed_table_csv(prefix: &str, n: usize) -> String {
    let mut out = String::from("table_name,schema_name,description\n");
    for i in 1..=n {
        out.push_str(&format!(
            "{prefix}_{i:04},sales,Rows about {prefix} number {i}\n"
        ));
    }
    out
}

fn write_resume(fixture: &Fixture, partition: &str, row_index: u64, complete: bool) {
    let store = ResumeStore::new(&fixture.out_root, partition, "docs");
    let mut state = ResumeState::default();
    let progress = state.model_mut("Table");
    progress.started = true;
    progress.complete = complete;
    progress.row_index = row_index;
    progress.collection_count = row_index;
    store.save(&state).expect("save resume");
}

fn write_error_report(fixture: &Fixture, partition: &str, row: u64) {
    let report = ErrorReport {
        model_name: "Table".into(),
        collection_name: "docs".into(),
        reason: "transient".into(),
        source_csv: format!("{partition}/Table.csv"),
        batch_size: 1,
        document_ids: vec!["Table:0000000000000000".into()],
        documents: vec!["text".into()],
        metadatas: vec![BTreeMap::new()],
        row_numbers: vec![row],
        token_counts: vec![3],
        token_total: 3,
        resume_state: ModelProgress::default(),
        error_kind: "store.transient".into(),
        error_message: "injected".into(),
        error_chain: vec!["injected".into()],
        timestamp: Utc::now(),
    };
    report
        .write(&fixture.errors_dir(partition))
        .expect("write report");
}

fn status_of(fixture: &Fixture, partition: &str) -> ModelStatus {
    let manifest = fixture.manifest.read().expect("manifest");
    let entry = manifest.partition(partition).expect("entry");
    let report = partition_status(
        &fixture.out_root,
        entry,
        &CollectionStrategy::Single {
            name: "docs".into(),
        },
    )
    .expect("status");
    report.models["Table"].status
}

#[test]
fn test_status_reverts_once_resume_passes_error_row() {
    let fixture = Fixture::new();
    let p = fixture.add_partition(&[("Table", "table_name,schema_name,description\n", 1)], vec![]);

    // Error recorded at row 500, resume still behind it.
    write_error_report(&fixture, &p, 500);
    write_resume(&fixture, &p, 400, false);
    assert_eq!(status_of(&fixture, &p), ModelStatus::Errored);

    // Indexing moved past the failure: STARTED again, report untouched.
    write_resume(&fixture, &p, 700, false);
    assert_eq!(status_of(&fixture, &p), ModelStatus::Started);
    assert_eq!(
        std::fs::read_dir(fixture.errors_dir(&p)).unwrap().count(),
        1
    );

    // Completion wins outright.
    write_resume(&fixture, &p, 1000, true);
    assert_eq!(status_of(&fixture, &p), ModelStatus::Complete);
}

#[test]
fn test_status_not_started_without_state() {
    let fixture = Fixture::new();
    let p = fixture.add_partition(&[("Table", "table_name,schema_name,description\n", 1)], vec![]);
    assert_eq!(status_of(&fixture, &p), ModelStatus::NotStarted);
}

#[test]
fn test_status_errored_at_exact_row() {
    let fixture = Fixture::new();
    let p = fixture.add_partition(&[("Table", "table_name,schema_name,description\n", 1)], vec![]);
    write_error_report(&fixture, &p, 500);
    write_resume(&fixture, &p, 500, false);
    // Not yet past the failure row.
    assert_eq!(status_of(&fixture, &p), ModelStatus::Errored);
}

#[tokio::test]
async fn test_drop_plan_deletes_slice_and_audits() {
    let fixture = Fixture::new();
    let p1 = fixture.add_partition(&[("Table", &prefixed_table_csv("alpha", 3), 2)], vec![]);
    let p2 = fixture.add_partition(&[("Table", &prefixed_table_csv("beta", 4), 3)], vec![]);
    let p3 = fixture.add_partition(&[("Table", &prefixed_table_csv("gamma", 5), 4)], vec![]);

    // Populate the shared collection with real metadata.
    let store = Arc::new(FlakyStore::new());
    let indexer = PartitionIndexer::new(
        Arc::new(registry()),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Arc::new(HeuristicTokenizer),
        CollectionStrategy::Single {
            name: "docs".into(),
        },
        IndexConfig::builder().build(),
        &fixture.out_root,
    );
    let manifest = fixture.manifest.read().unwrap();
    for name in [&p1, &p2, &p3] {
        let job = PartitionJob::from_manifest(
            manifest.partition(name).unwrap(),
            &registry(),
            &fixture.data_root,
        );
        let outcome = indexer.index_partition(&job).await.unwrap();
        assert!(!outcome.failed());
    }
    assert_eq!(store.inner.count("docs", None).await.unwrap(), 12);

    // Drop Table data from p1/p2 at schema versions 2 and 3.
    let mut models = BTreeMap::new();
    models.insert(
        "Table".to_string(),
        DropSelection {
            partitions: vec![p1.clone(), p2.clone()],
            schema_versions: vec![2, 3],
            reason: "superseded".into(),
        },
    );
    let plan = DropPlan {
        generated_at: Utc::now(),
        source_manifest: fixture.manifest.path().display().to_string(),
        before: None,
        models,
    };

    let outcome = apply_drop(
        store.as_ref(),
        &CollectionStrategy::Single {
            name: "docs".into(),
        },
        &fixture.manifest,
        &plan,
        "ops",
    )
    .await
    .unwrap();
    assert_eq!(outcome.deleted["Table"], 7);

    // Only the untouched partition's documents remain.
    assert_eq!(store.inner.count("docs", None).await.unwrap(), 5);
    assert_eq!(
        store
            .inner
            .count("docs", Some(&Filter::eq("partition_name", p3.clone())))
            .await
            .unwrap(),
        5
    );

    // Manifest flags flipped and one audit entry appended.
    let manifest = fixture.manifest.read().unwrap();
    for name in [&p1, &p2] {
        let entry = &manifest.partition(name).unwrap().models["Table"];
        assert!(entry.deleted);
        assert_eq!(entry.drop_reason.as_deref(), Some("superseded"));
    }
    assert!(!manifest.partition(&p3).unwrap().models["Table"].deleted);
    assert_eq!(manifest.drops.len(), 1);
    assert_eq!(manifest.drops[0].performed_by, "ops");
    assert_eq!(manifest.drops[0].affected["Table"], vec![p1, p2]);
}
