//! Turning validated rows into indexable documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::model::{ModelSpec, ValidRow, canonical_json};
use crate::text::{Tokenizer, TruncationStrategy, Truncator};

/// Separator between key field values before hashing. Values cannot
/// contain it accidentally colliding with a delimiter-free join.
const KEY_SEPARATOR: char = '\u{1f}';

/// Metadata attached to every document.
pub type Metadata = BTreeMap<String, Value>;

/// One unit of ingestion, ready for `upsert`.
#[derive(Debug, Clone)]
pub struct Document {
    /// Deterministic id: `{model}:{hex16(hash(key values))}`.
    pub id: String,
    /// Embeddable text, truncated if it exceeded the hard limit.
    pub text: String,
    /// Fixed keys plus the model's keyword fields.
    pub metadata: Metadata,
    /// Token count of `text`.
    pub token_count: usize,
    /// 1-based data row this document came from.
    pub source_row: u64,
    /// Byte offset of the first unread byte after this document's row.
    pub source_offset: u64,
}

/// Provenance shared by every document of one partition-model stream.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    /// Partition being indexed.
    pub partition: String,
    /// Schema version recorded in the manifest for this model.
    pub schema_version: u32,
    /// Path of the prepared source file.
    pub source_path: String,
}

/// Computes a document id from the model name and joined key values.
///
/// A pure function of its inputs: stable across runs and machines.
#[must_use]
pub fn document_id(model: &str, key_concat: &str) -> String {
    format!("{model}:{:016x}", xxh3_64(key_concat.as_bytes()))
}

/// Builds [`Document`]s from validated rows.
pub struct DocumentBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    truncator: Truncator,
    api_token_limit: usize,
    default_strategy: TruncationStrategy,
}

impl std::fmt::Debug for DocumentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBuilder")
            .field("api_token_limit", &self.api_token_limit)
            .field("default_strategy", &self.default_strategy)
            .finish_non_exhaustive()
    }
}

impl DocumentBuilder {
    /// Creates a builder enforcing `api_token_limit` per document.
    #[must_use]
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        api_token_limit: usize,
        default_strategy: TruncationStrategy,
    ) -> Self {
        let truncator = Truncator::new(Arc::clone(&tokenizer));
        Self {
            tokenizer,
            truncator,
            api_token_limit,
            default_strategy,
        }
    }

    /// The hard per-document token ceiling.
    #[must_use]
    pub const fn api_token_limit(&self) -> usize {
        self.api_token_limit
    }

    /// Builds one document.
    ///
    /// Returns `None` when the document still exceeds the hard limit
    /// after truncation; the skip is logged with the id and original
    /// count. `source_row`/`source_offset` are stamped for resume and
    /// error reporting.
    #[must_use]
    pub fn build(
        &self,
        spec: &ModelSpec,
        row: &ValidRow,
        ctx: &DocumentContext,
        source_row: u64,
        source_offset: u64,
    ) -> Option<Document> {
        let id = self.compose_id(spec, row);
        let (text, has_sem) = compose_text(spec, row);

        let mut metadata = Metadata::new();
        metadata.insert("model_name".into(), Value::String(spec.name().into()));
        metadata.insert(
            "partition_name".into(),
            Value::String(ctx.partition.clone()),
        );
        metadata.insert("schema_version".into(), Value::from(ctx.schema_version));
        metadata.insert("source_path".into(), Value::String(ctx.source_path.clone()));
        metadata.insert("has_sem".into(), Value::Bool(has_sem));
        metadata.insert("truncated".into(), Value::Bool(false));
        for field in spec.keyword_fields() {
            match row.get(field) {
                Some(Value::Null) | None => {}
                Some(value) => {
                    metadata.insert(field.clone(), value.clone());
                }
            }
        }

        let mut token_count = self.tokenizer.count(&text);
        let mut text = text;
        if token_count > self.api_token_limit {
            let original_tokens = token_count;
            // 5% safety margin below the hard ceiling.
            let max = self.api_token_limit * 95 / 100;
            let strategy = spec
                .truncation_override()
                .unwrap_or(self.default_strategy);
            let cut = self.truncator.fit(&text, max, strategy, spec.text_shape());
            text = cut.text;
            token_count = cut.tokens;
            metadata.insert("truncated".into(), Value::Bool(true));
            metadata.insert("original_tokens".into(), Value::from(original_tokens));
            metadata.insert(
                "truncation_strategy".into(),
                Value::String(cut.strategy.as_str().into()),
            );

            if token_count > self.api_token_limit {
                warn!(
                    id = %id,
                    original_tokens,
                    token_count,
                    "document still over the hard token limit after truncation; skipping"
                );
                return None;
            }
        }

        Some(Document {
            id,
            text,
            metadata,
            token_count,
            source_row,
            source_offset,
        })
    }

    fn compose_id(&self, spec: &ModelSpec, row: &ValidRow) -> String {
        let mut joined = String::new();
        for (i, key) in spec.key_fields().iter().enumerate() {
            if i > 0 {
                joined.push(KEY_SEPARATOR);
            }
            match row.get(key) {
                Some(Value::String(s)) => joined.push_str(s),
                Some(other) => joined.push_str(&other.to_string()),
                None => {}
            }
        }
        document_id(spec.name(), &joined)
    }
}

/// Joins non-empty semantic field values with newlines; falls back to the
/// canonical JSON of the whole row when none qualify.
///
/// Returns `(text, has_sem)`.
fn compose_text(spec: &ModelSpec, row: &ValidRow) -> (String, bool) {
    let mut pieces: Vec<String> = Vec::new();
    for field in spec.semantic_fields() {
        match row.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => pieces.push(s.clone()),
            Some(Value::Array(a)) if !a.is_empty() => {
                pieces.push(Value::Array(a.clone()).to_string());
            }
            Some(Value::Object(o)) if !o.is_empty() => {
                pieces.push(Value::Object(o.clone()).to_string());
            }
            Some(Value::Number(n)) => pieces.push(n.to_string()),
            Some(Value::Bool(b)) => pieces.push(b.to_string()),
            _ => {}
        }
    }
    if pieces.is_empty() {
        return (canonical_json(row), false);
    }
    (pieces.join("\n"), true)
}
