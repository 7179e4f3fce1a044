//! Error types for the indexing pipeline.
//!
//! Library errors are split by layer: [`StoreError`] for the vector-store
//! boundary, [`SchemaError`] for registry loading and row validation, and
//! [`IndexError`] as the umbrella the pipeline propagates. Every error maps
//! to a closed [`ErrorClass`] that drives the orchestrator's retry policy.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Closed classification of failures.
///
/// The orchestrator consults this to decide whether a failed partition is
/// eligible for its single deferred retry: only [`ErrorClass::Transient`]
/// qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Network timeouts, rate limiting, momentary store unavailability.
    Transient,
    /// Missing credentials or an invalid endpoint. Never retried.
    Auth,
    /// A row failed its model's schema. Stops the model stream.
    Validation,
    /// A document still exceeded the hard token limit after truncation.
    OverLimit,
    /// The store rejected duplicate ids within one upsert.
    #[serde(rename = "duplicate-id")]
    Duplicate,
    /// The source file itself is unreadable.
    DataFormat,
    /// Everything else: I/O, serialization, programmer errors.
    Internal,
}

impl ErrorClass {
    /// Stable lower-case label used in reports and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::OverLimit => "over-limit",
            Self::Duplicate => "duplicate-id",
            Self::DataFormat => "data-format",
            Self::Internal => "internal",
        }
    }

    /// Whether the orchestrator may retry a partition that failed with
    /// this class.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by a [`VectorStore`](crate::store::VectorStore)
/// implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The batch contained ids the store refused as duplicates.
    #[error("collection '{collection}' rejected {} duplicate id(s)", ids.len())]
    DuplicateIds {
        /// Collection that rejected the batch.
        collection: String,
        /// The offending ids, exactly as reported by the store.
        ids: Vec<String>,
    },

    /// The store asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider-supplied detail.
        message: String,
    },

    /// A failure expected to clear on its own (timeout, 5xx, connection
    /// reset).
    #[error("transient store failure: {message}")]
    Transient {
        /// Provider-supplied detail.
        message: String,
    },

    /// Credentials were missing or rejected.
    #[error("store authentication failed: {message}")]
    AuthFailed {
        /// Provider-supplied detail.
        message: String,
    },

    /// The request was malformed and will never succeed as-is.
    #[error("invalid store request: {message}")]
    InvalidRequest {
        /// Provider-supplied detail.
        message: String,
    },

    /// The named collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Local I/O failure inside a file-backed store.
    #[error("store I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Maps the store failure onto the retry taxonomy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateIds { .. } => ErrorClass::Duplicate,
            Self::RateLimited { .. } | Self::Transient { .. } => ErrorClass::Transient,
            Self::AuthFailed { .. } => ErrorClass::Auth,
            Self::InvalidRequest { .. } | Self::CollectionNotFound(_) => ErrorClass::Internal,
            Self::Io(_) => ErrorClass::Internal,
        }
    }
}

/// Errors from registry loading and row validation.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A partition references a model the registry does not declare.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A semantic/keyword/key declaration names a field outside the
    /// model's field list.
    #[error("model '{model}' declares unknown field '{field}' as {role}")]
    UnknownField {
        /// Model being declared.
        model: String,
        /// The undeclared field name.
        field: String,
        /// Which declaration referenced it (`semantic`, `keyword`, `key`).
        role: &'static str,
    },

    /// Every model must derive its document ids from at least one field.
    #[error("model '{model}' declares no key fields")]
    NoKeyFields {
        /// Model being declared.
        model: String,
    },

    /// Two registry entries share a name.
    #[error("duplicate model declaration: {model}")]
    DuplicateModel {
        /// The repeated name.
        model: String,
    },

    /// A required column was absent from the source header row.
    #[error("source is missing required column '{field}'")]
    MissingColumn {
        /// The absent column.
        field: String,
    },

    /// A required field was empty in a data row.
    #[error("row {row}: required field '{field}' is empty")]
    MissingRequired {
        /// 1-based data row index.
        row: u64,
        /// The empty field.
        field: String,
    },

    /// A value could not be coerced to its declared kind.
    #[error("row {row}: field '{field}' is not a valid {kind}: '{value}'")]
    Coerce {
        /// 1-based data row index.
        row: u64,
        /// The field that failed coercion.
        field: String,
        /// The declared kind name.
        kind: &'static str,
        /// The raw source value.
        value: String,
    },

    /// The registry file could not be read.
    #[error("failed to read model registry {path}: {source}")]
    RegistryIo {
        /// Registry file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The registry file could not be parsed.
    #[error("failed to parse model registry {path}: {source}")]
    RegistryParse {
        /// Registry file path.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },
}

/// Umbrella error propagated by the indexing pipeline and query client.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector-store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A row failed validation against its model.
    #[error("validation failed for model '{model}': {source}")]
    Validation {
        /// The model whose stream stopped.
        model: String,
        /// The underlying schema failure.
        #[source]
        source: SchemaError,
    },

    /// The registry itself is unusable.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The source file cannot be decoded as CSV.
    #[error("unreadable source {path}: {message}")]
    DataFormat {
        /// Path of the offending source.
        path: PathBuf,
        /// Parser detail.
        message: String,
    },

    /// The manifest is structurally invalid or an operation would break
    /// its invariants.
    #[error("manifest error: {message}")]
    Manifest {
        /// What went wrong.
        message: String,
    },

    /// Filesystem failure with the path that caused it.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path of the failing file or directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failure.
    #[error("serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A spawned worker disappeared without an outcome.
    #[error("worker task failed: {message}")]
    Join {
        /// Join failure detail.
        message: String,
    },

    /// The query client was used after `close`.
    #[error("query client is closed")]
    ClientClosed,

    /// The operation was cancelled at a flush boundary.
    #[error("operation cancelled")]
    Cancelled,
}

impl IndexError {
    /// Maps the failure onto the retry taxonomy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Store(e) => e.class(),
            Self::Validation { .. } | Self::Schema(_) => ErrorClass::Validation,
            Self::DataFormat { .. } => ErrorClass::DataFormat,
            Self::Manifest { .. }
            | Self::Io { .. }
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Join { .. }
            | Self::ClientClosed
            | Self::Cancelled => ErrorClass::Internal,
        }
    }

    /// Helper for wrapping I/O errors with their path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Walks the source chain into a list of messages, outermost first.
    ///
    /// Used by error reports so the full causal chain survives on disk.
    #[must_use]
    pub fn chain(&self) -> Vec<String> {
        let mut out = vec![self.to_string()];
        let mut cur: Option<&dyn std::error::Error> = std::error::Error::source(self);
        while let Some(err) = cur {
            out.push(err.to_string());
            cur = err.source();
        }
        out
    }

    /// Short machine-readable kind label for reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Store(StoreError::DuplicateIds { .. }) => "store.duplicate_ids",
            Self::Store(StoreError::RateLimited { .. }) => "store.rate_limited",
            Self::Store(StoreError::Transient { .. }) => "store.transient",
            Self::Store(StoreError::AuthFailed { .. }) => "store.auth_failed",
            Self::Store(StoreError::InvalidRequest { .. }) => "store.invalid_request",
            Self::Store(StoreError::CollectionNotFound(_)) => "store.collection_not_found",
            Self::Store(StoreError::Io(_)) => "store.io",
            Self::Validation { .. } => "validation",
            Self::Schema(_) => "schema",
            Self::DataFormat { .. } => "data_format",
            Self::Manifest { .. } => "manifest",
            Self::Io { .. } => "io",
            Self::Json(_) | Self::Yaml(_) => "serialization",
            Self::Join { .. } => "join",
            Self::ClientClosed => "client_closed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classes() {
        assert_eq!(
            StoreError::Transient {
                message: "503".into()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            StoreError::RateLimited {
                message: "slow down".into()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            StoreError::AuthFailed {
                message: "bad key".into()
            }
            .class(),
            ErrorClass::Auth
        );
        assert_eq!(
            StoreError::DuplicateIds {
                collection: "c".into(),
                ids: vec!["a".into()],
            }
            .class(),
            ErrorClass::Duplicate
        );
    }

    #[test]
    fn test_retryable_is_transient_only() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(!ErrorClass::Auth.is_retryable());
        assert!(!ErrorClass::Validation.is_retryable());
        assert!(!ErrorClass::Duplicate.is_retryable());
        assert!(!ErrorClass::Internal.is_retryable());
    }

    #[test]
    fn test_error_chain_includes_source() {
        let err = IndexError::Validation {
            model: "Table".into(),
            source: SchemaError::MissingRequired {
                row: 7,
                field: "table_name".into(),
            },
        };
        let chain = err.chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].contains("Table"));
        assert!(chain[1].contains("table_name"));
    }
}
