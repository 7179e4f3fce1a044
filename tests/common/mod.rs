//! Shared fixtures for integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use partix::document::Metadata;
use partix::error::StoreError;
use partix::manifest::{ManifestStore, NewModel};
use partix::model::{FieldDef, FieldKind, ModelDecl, ModelRegistry};
use partix::store::{Filter, GetRequest, GetResponse, MemoryStore, QueryResponse, VectorStore};

/// Registry with a `Table` and a `Field` model, in that declaration
/// order.
pub fn registry() -> ModelRegistry {
    ModelRegistry::from_decls(vec![
        ModelDecl {
            name: "Table".into(),
            fields: vec![
                field("table_name", FieldKind::String, true),
                field("schema_name", FieldKind::String, false),
                field("description", FieldKind::String, false),
            ],
            semantic: vec!["description".into()],
            keywords: vec!["schema_name".into()],
            keys: vec!["table_name".into()],
            truncation: None,
            text_shape: None,
        },
        ModelDecl {
            name: "Field".into(),
            fields: vec![
                field("table_name", FieldKind::String, true),
                field("field_name", FieldKind::String, true),
                field("comment", FieldKind::String, false),
            ],
            semantic: vec!["comment".into()],
            keywords: vec![],
            keys: vec!["table_name".into(), "field_name".into()],
            truncation: None,
            text_shape: None,
        },
    ])
    .expect("test registry")
}

fn field(name: &str, kind: FieldKind, required: bool) -> FieldDef {
    FieldDef {
        name: name.into(),
        kind,
        required,
    }
}

/// CSV content for `n` Table rows (`t0001`, `t0002`, ...).
pub fn table_csv(n: usize) -> String {
    let mut out = String::from("table_name,schema_name,description\n");
    for i in 1..=n {
        out.push_str(&format!(
            "t{i:04},sales,Table number {i} holding rows about topic {i}\n"
        ));
    }
    out
}

/// CSV content for `n` Field rows.
pub fn field_csv(n: usize) -> String {
    let mut out = String::from("table_name,field_name,comment\n");
    for i in 1..=n {
        out.push_str(&format!("t0001,f{i:04},Column {i} of the first table\n"));
    }
    out
}

/// An on-disk test corpus: data root (manifest + partitions) and output
/// root.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub data_root: PathBuf,
    pub out_root: PathBuf,
    pub manifest: ManifestStore,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_root = dir.path().join("data");
        let out_root = dir.path().join("out");
        std::fs::create_dir_all(&data_root).expect("data root");
        std::fs::create_dir_all(&out_root).expect("out root");
        let manifest = ManifestStore::new(&data_root);
        Self {
            dir,
            data_root,
            out_root,
            manifest,
        }
    }

    /// Registers a partition with the given `(model, csv, schema_version)`
    /// sources and writes the prepared files.
    pub fn add_partition(&self, sources: &[(&str, &str, u32)], replaces: Vec<String>) -> String {
        let name = self.manifest.read().expect("manifest").next_partition_name();
        let partition_dir = self.data_root.join(&name);
        std::fs::create_dir_all(&partition_dir).expect("partition dir");

        let mut models = BTreeMap::new();
        for (model, csv, version) in sources {
            let relative = PathBuf::from(&name).join(format!("{model}.csv"));
            std::fs::write(self.data_root.join(&relative), csv).expect("write source");
            models.insert(
                (*model).to_string(),
                NewModel {
                    schema_version: *version,
                    source_path: relative,
                    digest_path: None,
                },
            );
        }
        let allocated = self
            .manifest
            .append_partition(models, replaces)
            .expect("append partition");
        assert_eq!(allocated, name, "partition name drifted");
        name
    }

    pub fn errors_dir(&self, partition: &str) -> PathBuf {
        self.out_root.join(partition).join("errors")
    }
}

/// Which error a scripted failure raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Transient,
    Auth,
}

impl FailKind {
    fn to_error(self) -> StoreError {
        match self {
            Self::Transient => StoreError::Transient {
                message: "injected transient failure".into(),
            },
            Self::Auth => StoreError::AuthFailed {
                message: "injected auth failure".into(),
            },
        }
    }
}

/// A [`MemoryStore`] wrapper with scripted upsert failures and per-call
/// accounting, used to simulate crashes and flaky backends.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    upsert_calls: AtomicUsize,
    query_calls: Mutex<BTreeMap<String, usize>>,
    // Call number (1-based) -> failure.
    fail_upserts: Mutex<BTreeMap<usize, FailKind>>,
    // Collections whose upserts always fail.
    fail_collections: Mutex<BTreeMap<String, FailKind>>,
    // Collections whose queries always fail.
    fail_queries: Mutex<BTreeMap<String, FailKind>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `n`th upsert call (1-based).
    pub fn fail_upsert_call(&self, n: usize, kind: FailKind) {
        self.fail_upserts.lock().unwrap().insert(n, kind);
    }

    /// Fails every upsert into `collection`.
    pub fn fail_collection(&self, collection: &str, kind: FailKind) {
        self.fail_collections
            .lock()
            .unwrap()
            .insert(collection.to_string(), kind);
    }

    /// Fails every query against `collection`.
    pub fn fail_query(&self, collection: &str, kind: FailKind) {
        self.fail_queries
            .lock()
            .unwrap()
            .insert(collection.to_string(), kind);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// How many queries each collection has served.
    pub fn query_calls(&self) -> BTreeMap<String, usize> {
        self.query_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        self.inner.ensure_collection(name).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete_collection(name).await
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_collections().await
    }

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(kind) = self.fail_upserts.lock().unwrap().remove(&call) {
            return Err(kind.to_error());
        }
        if let Some(kind) = self.fail_collections.lock().unwrap().get(collection) {
            return Err(kind.to_error());
        }
        self.inner.upsert(collection, ids, documents, metadatas).await
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        self.inner.delete(collection, filter).await
    }

    async fn query(
        &self,
        collection: &str,
        texts: &[String],
        n_results: usize,
        filter: Option<&Filter>,
    ) -> Result<QueryResponse, StoreError> {
        *self
            .query_calls
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_insert(0) += 1;
        if let Some(kind) = self.fail_queries.lock().unwrap().get(collection) {
            return Err(kind.to_error());
        }
        self.inner.query(collection, texts, n_results, filter).await
    }

    async fn get(&self, collection: &str, request: &GetRequest) -> Result<GetResponse, StoreError> {
        self.inner.get(collection, request).await
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize, StoreError> {
        self.inner.count(collection, filter).await
    }
}
