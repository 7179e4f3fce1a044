//! Registry of model declarations, loaded from a YAML description file.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::schema::{FieldDef, ModelSpec};
use crate::error::SchemaError;
use crate::text::{TextShape, TruncationStrategy};

/// One model entry as written in the registry file.
///
/// ```yaml
/// models:
///   - name: Table
///     fields:
///       - { name: table_name, kind: string, required: true }
///       - { name: description }
///     semantic: [description]
///     keywords: [schema_name]
///     keys: [table_name]
///     truncation: sentences
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDecl {
    /// Unique model name.
    pub name: String,
    /// Ordered field declarations.
    pub fields: Vec<FieldDef>,
    /// Fields whose concatenation becomes embeddable text.
    #[serde(default)]
    pub semantic: Vec<String>,
    /// Fields elevated to metadata.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Fields forming the document id input.
    pub keys: Vec<String>,
    /// Optional truncation strategy override.
    #[serde(default)]
    pub truncation: Option<TruncationStrategy>,
    /// Optional shape hint; inferred from semantic names when absent.
    #[serde(default)]
    pub text_shape: Option<TextShape>,
}

#[derive(Debug, Deserialize)]
struct RegistryDoc {
    models: Vec<ModelDecl>,
}

/// Read-only mapping of model name → spec, built once at start-up and
/// passed explicitly through indexer calls.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    ordered: Vec<Arc<ModelSpec>>,
    by_name: BTreeMap<String, usize>,
}

impl ModelRegistry {
    /// Loads and validates a registry from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::RegistryIo {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: RegistryDoc =
            serde_yaml::from_str(&raw).map_err(|source| SchemaError::RegistryParse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_decls(doc.models)
    }

    /// Builds a registry from in-memory declarations.
    pub fn from_decls(decls: Vec<ModelDecl>) -> Result<Self, SchemaError> {
        let mut ordered = Vec::with_capacity(decls.len());
        let mut by_name = BTreeMap::new();
        for decl in decls {
            let spec = ModelSpec::new(
                decl.name,
                decl.fields,
                decl.semantic,
                decl.keywords,
                decl.keys,
                decl.truncation,
                decl.text_shape,
            )?;
            if by_name.contains_key(spec.name()) {
                return Err(SchemaError::DuplicateModel {
                    model: spec.name().to_string(),
                });
            }
            by_name.insert(spec.name().to_string(), ordered.len());
            ordered.push(Arc::new(spec));
        }
        Ok(Self { ordered, by_name })
    }

    /// Looks a model up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ModelSpec>> {
        self.by_name.get(name).map(|&i| &self.ordered[i])
    }

    /// Looks a model up, failing with [`SchemaError::UnknownModel`].
    pub fn require(&self, name: &str) -> Result<&Arc<ModelSpec>, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownModel(name.to_string()))
    }

    /// Specs in declaration order — the stable iteration order used by
    /// the indexer.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelSpec>> {
        self.ordered.iter()
    }

    /// Number of declared models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
