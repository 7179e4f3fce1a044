//! Fail-stop scope and orchestrator behaviour across partitions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::{FailKind, Fixture, FlakyStore, field_csv, registry, table_csv};
use partix::config::IndexConfig;
use partix::error::ErrorClass;
use partix::index::{CollectionStrategy, IndexOrchestrator, ResumeStore};
use partix::store::{Filter, VectorStore};
use partix::text::HeuristicTokenizer;

fn orchestrator(
    store: &Arc<FlakyStore>,
    fixture: &Fixture,
    config: IndexConfig,
) -> IndexOrchestrator {
    IndexOrchestrator::new(
        Arc::new(registry()),
        Arc::clone(store) as Arc<dyn VectorStore>,
        Arc::new(HeuristicTokenizer),
        CollectionStrategy::Single {
            name: "docs".into(),
        },
        config,
        &fixture.out_root,
    )
}

fn jobs_for(fixture: &Fixture, partitions: &[&str]) -> Vec<partix::index::PartitionJob> {
    let manifest = fixture.manifest.read().expect("manifest");
    partitions
        .iter()
        .map(|name| {
            partix::index::PartitionJob::from_manifest(
                manifest.partition(name).expect("partition"),
                &registry(),
                &fixture.data_root,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_one_partition_failure_does_not_stop_siblings() {
    let fixture = Fixture::new();
    let p = fixture.add_partition(
        &[("Table", &table_csv(10), 1), ("Field", &field_csv(30), 1)],
        vec![],
    );
    let q = fixture.add_partition(&[("Table", &table_csv(10), 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    // P/Table flushes once (10 rows, batch 10), then P/Field fails on its
    // second flush and on the deferred retry as well.
    store.fail_upsert_call(2, FailKind::Transient);
    store.fail_upsert_call(5, FailKind::Transient);
    store.fail_upsert_call(6, FailKind::Transient);
    store.fail_upsert_call(7, FailKind::Transient);

    let config = IndexConfig::builder()
        .batch_size_docs(10)
        .parallel_partitions(1)
        .resume(true)
        .build();
    let summary = orchestrator(&store, &fixture, config)
        .run(jobs_for(&fixture, &[&p, &q]), &[])
        .await
        .expect("run");

    assert!(!summary.succeeded());
    assert_eq!(summary.failed_partitions(), vec![p.as_str()]);
    assert_eq!(summary.retried, vec![p.clone()]);

    // Q completed untouched by P's failure.
    let q_outcome = summary
        .outcomes
        .iter()
        .find(|o| o.partition == q)
        .expect("q outcome");
    assert!(!q_outcome.failed());
    assert_eq!(
        store
            .inner
            .count(
                "docs",
                Some(&Filter::and(vec![
                    Filter::eq("model_name", "Table"),
                    Filter::eq("partition_name", q.clone()),
                ]))
            )
            .await
            .unwrap(),
        10
    );

    // P's failed model kept its checkpoint at the end of the last good
    // flush, and an error report exists.
    let state = ResumeStore::new(&fixture.out_root, &p, "docs")
        .load()
        .expect("state");
    let field_progress = state.model("Field").expect("field progress");
    assert!(!field_progress.complete);
    assert!(std::fs::read_dir(fixture.errors_dir(&p))
        .map(|entries| entries.count() > 0)
        .unwrap_or(false));

    let p_outcome = summary
        .outcomes
        .iter()
        .find(|o| o.partition == p)
        .expect("p outcome");
    assert!(p_outcome.failures.iter().all(|f| f.model == "Field"));
    assert_eq!(p_outcome.failures[0].class, ErrorClass::Transient);
}

#[tokio::test]
async fn test_transient_failure_retried_once_and_recovers() {
    let fixture = Fixture::new();
    let p = fixture.add_partition(&[("Table", &table_csv(10), 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    // First attempt fails; the deferred retry succeeds.
    store.fail_upsert_call(1, FailKind::Transient);

    let config = IndexConfig::builder().batch_size_docs(10).build();
    let summary = orchestrator(&store, &fixture, config)
        .run(jobs_for(&fixture, &[&p]), &[])
        .await
        .expect("run");

    assert!(summary.succeeded());
    assert_eq!(summary.retried, vec![p]);
    assert_eq!(store.inner.count("docs", None).await.unwrap(), 10);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let fixture = Fixture::new();
    let p = fixture.add_partition(&[("Table", &table_csv(10), 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    store.fail_upsert_call(1, FailKind::Auth);

    let config = IndexConfig::builder().batch_size_docs(10).build();
    let summary = orchestrator(&store, &fixture, config)
        .run(jobs_for(&fixture, &[&p]), &[])
        .await
        .expect("run");

    assert!(!summary.succeeded());
    assert!(summary.retried.is_empty());
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.failures[0].class, ErrorClass::Auth);
}

#[tokio::test]
async fn test_delete_stale_drops_per_partition_collections() {
    let fixture = Fixture::new();
    let old = fixture.add_partition(&[("Table", &table_csv(5), 1)], vec![]);

    let store = Arc::new(FlakyStore::new());
    let strategy = CollectionStrategy::PerPartition {
        base: Some("docs".into()),
    };

    // Index the old partition into its own collection.
    let per_partition = IndexOrchestrator::new(
        Arc::new(registry()),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Arc::new(HeuristicTokenizer),
        strategy.clone(),
        IndexConfig::builder().build(),
        &fixture.out_root,
    );
    per_partition
        .run(jobs_for(&fixture, &[&old]), &[])
        .await
        .expect("seed run");
    let old_collection = format!("docs_{old}");
    assert_eq!(store.inner.count(&old_collection, None).await.unwrap(), 5);

    // A replacement arrives; the old partition is now stale.
    let new = fixture.add_partition(&[("Table", &table_csv(6), 2)], vec![old.clone()]);
    let stale = fixture.manifest.read().unwrap().stale_partitions();
    assert_eq!(stale, vec![old.clone()]);

    let cleanup = IndexOrchestrator::new(
        Arc::new(registry()),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Arc::new(HeuristicTokenizer),
        strategy,
        IndexConfig::builder().delete_stale(true).build(),
        &fixture.out_root,
    );
    let summary = cleanup
        .run(jobs_for(&fixture, &[&new]), &stale)
        .await
        .expect("cleanup run");
    assert!(summary.succeeded());

    // Old collection dropped whole; the new one holds the replacement.
    assert!(
        !store
            .inner
            .list_collections()
            .await
            .unwrap()
            .contains(&old_collection)
    );
    assert_eq!(
        store
            .inner
            .count(&format!("docs_{new}"), None)
            .await
            .unwrap(),
        6
    );
}
