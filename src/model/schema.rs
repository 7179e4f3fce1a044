//! Field declarations, row validation, and schema signatures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::SchemaError;
use crate::text::{TextShape, TruncationStrategy};

/// A validated row: canonical field → value map.
///
/// `BTreeMap` keeps keys sorted, so serialising one with `serde_json` is
/// already the canonical JSON form used for ids and fallback text.
pub type ValidRow = BTreeMap<String, Value>;

/// Serialises a validated row as canonical JSON (sorted keys, compact
/// separators).
#[must_use]
pub fn canonical_json(row: &ValidRow) -> String {
    // BTreeMap iteration order is the canonical key order; serde_json's
    // compact form is stable.
    serde_json::to_string(row).unwrap_or_else(|_| String::from("{}"))
}

/// Scalar kind a source column is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Pass the raw value through.
    #[default]
    String,
    /// `i64`.
    Integer,
    /// `f64` (must be finite).
    Float,
    /// `true/false`, `yes/no`, `1/0`.
    Boolean,
    /// An embedded JSON value.
    Json,
}

impl FieldKind {
    /// Kind name used in error messages and signatures.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Json => "json",
        }
    }
}

/// One declared field of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name in the prepared source.
    pub name: String,
    /// Kind the raw value is coerced to.
    #[serde(default)]
    pub kind: FieldKind,
    /// Whether an empty value fails validation.
    #[serde(default)]
    pub required: bool,
}

/// Named schema descriptor: the shape of one indexable record type.
///
/// Read-only after registry load.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    name: String,
    fields: Vec<FieldDef>,
    semantic_fields: Vec<String>,
    keyword_fields: Vec<String>,
    key_fields: Vec<String>,
    truncation_override: Option<TruncationStrategy>,
    text_shape: TextShape,
    schema_signature: String,
}

impl ModelSpec {
    /// Builds and validates a spec.
    ///
    /// Checks that the semantic/keyword/key declarations are subsets of
    /// the field list, that at least one key field exists, and computes
    /// the schema signature. When `text_shape` is `None` it is inferred
    /// from the semantic field names.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldDef>,
        semantic_fields: Vec<String>,
        keyword_fields: Vec<String>,
        key_fields: Vec<String>,
        truncation_override: Option<TruncationStrategy>,
        text_shape: Option<TextShape>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        for (role, list) in [
            ("semantic", &semantic_fields),
            ("keyword", &keyword_fields),
            ("key", &key_fields),
        ] {
            for field in list {
                if !fields.iter().any(|f| &f.name == field) {
                    return Err(SchemaError::UnknownField {
                        model: name.clone(),
                        field: field.clone(),
                        role,
                    });
                }
            }
        }
        if key_fields.is_empty() {
            return Err(SchemaError::NoKeyFields { model: name });
        }

        let schema_signature = signature(&name, &fields, &semantic_fields, &keyword_fields, &key_fields);
        let text_shape = text_shape.unwrap_or_else(|| TextShape::infer(&semantic_fields));

        Ok(Self {
            name,
            fields,
            semantic_fields,
            keyword_fields,
            key_fields,
            truncation_override,
            text_shape,
            schema_signature,
        })
    }

    /// The model's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in source column order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Field names in declaration order.
    pub fn field_order(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Fields whose concatenation becomes embeddable text.
    #[must_use]
    pub fn semantic_fields(&self) -> &[String] {
        &self.semantic_fields
    }

    /// Fields elevated to metadata.
    #[must_use]
    pub fn keyword_fields(&self) -> &[String] {
        &self.keyword_fields
    }

    /// Fields whose values form the document id input.
    #[must_use]
    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// Per-model truncation strategy override, if declared.
    #[must_use]
    pub const fn truncation_override(&self) -> Option<TruncationStrategy> {
        self.truncation_override
    }

    /// Shape hint for auto truncation.
    #[must_use]
    pub const fn text_shape(&self) -> TextShape {
        self.text_shape
    }

    /// Stable hex signature of the structural declaration.
    ///
    /// Identical across processes and machines for identical
    /// declarations; any change to field names, kinds, or the
    /// semantic/keyword/key sets changes it.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.schema_signature
    }

    /// Binds the spec to a concrete header row, resolving column indices
    /// and checking that every required column is present.
    pub fn bind(&self, headers: &[String]) -> Result<BoundSchema<'_>, SchemaError> {
        let mut indices = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let idx = headers.iter().position(|h| h == &field.name);
            if idx.is_none() && field.required {
                return Err(SchemaError::MissingColumn {
                    field: field.name.clone(),
                });
            }
            indices.push(idx);
        }
        Ok(BoundSchema {
            spec: self,
            indices,
        })
    }
}

/// A [`ModelSpec`] resolved against one source file's header row.
#[derive(Debug)]
pub struct BoundSchema<'s> {
    spec: &'s ModelSpec,
    indices: Vec<Option<usize>>,
}

impl BoundSchema<'_> {
    /// Validates one data row.
    ///
    /// `values` are the raw column values in header order; `row` is the
    /// 1-based data row index used in error messages. Columns outside the
    /// model's field list are ignored. Empty values (after trimming) are
    /// `null` for optional fields and an error for required ones.
    pub fn validate(&self, values: &[&str], row: u64) -> Result<ValidRow, SchemaError> {
        let mut out = ValidRow::new();
        for (field, idx) in self.spec.fields.iter().zip(&self.indices) {
            let raw = idx.and_then(|i| values.get(i).copied()).unwrap_or("");
            if raw.trim().is_empty() {
                if field.required {
                    return Err(SchemaError::MissingRequired {
                        row,
                        field: field.name.clone(),
                    });
                }
                out.insert(field.name.clone(), Value::Null);
                continue;
            }
            out.insert(field.name.clone(), coerce(field, raw, row)?);
        }
        Ok(out)
    }
}

fn coerce(field: &FieldDef, raw: &str, row: u64) -> Result<Value, SchemaError> {
    let fail = || SchemaError::Coerce {
        row,
        field: field.name.clone(),
        kind: field.kind.as_str(),
        value: raw.to_string(),
    };
    match field.kind {
        FieldKind::String => Ok(Value::String(raw.to_string())),
        FieldKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| fail()),
        FieldKind::Float => {
            let parsed: f64 = raw.trim().parse().map_err(|_| fail())?;
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(fail)
        }
        FieldKind::Boolean => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },
        FieldKind::Json => serde_json::from_str(raw).map_err(|_| fail()),
    }
}

fn signature(
    name: &str,
    fields: &[FieldDef],
    semantic: &[String],
    keywords: &[String],
    keys: &[String],
) -> String {
    let mut desc = String::from(name);
    for f in fields {
        desc.push('|');
        desc.push_str(&f.name);
        desc.push(':');
        desc.push_str(f.kind.as_str());
        desc.push(':');
        desc.push_str(if f.required { "req" } else { "opt" });
    }
    for (tag, list) in [("sem", semantic), ("kw", keywords), ("key", keys)] {
        desc.push('|');
        desc.push_str(tag);
        desc.push('=');
        desc.push_str(&list.join(","));
    }
    format!("{:016x}", xxh3_64(desc.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn spec() -> ModelSpec {
        ModelSpec::new(
            "Table",
            vec![
                FieldDef {
                    name: "table_name".into(),
                    kind: FieldKind::String,
                    required: true,
                },
                FieldDef {
                    name: "schema_name".into(),
                    kind: FieldKind::String,
                    required: false,
                },
                FieldDef {
                    name: "row_count".into(),
                    kind: FieldKind::Integer,
                    required: false,
                },
                FieldDef {
                    name: "description".into(),
                    kind: FieldKind::String,
                    required: false,
                },
            ],
            vec!["description".into()],
            vec!["schema_name".into()],
            vec!["table_name".into()],
            None,
            None,
        )
        .unwrap_or_else(|e| panic!("spec: {e}"))
    }

    fn headers() -> Vec<String> {
        ["table_name", "schema_name", "row_count", "description"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_validate_coerces_kinds() {
        let spec = spec();
        let bound = spec.bind(&headers()).unwrap_or_else(|e| panic!("{e}"));
        let row = bound
            .validate(&["orders", "sales", "42", "Order headers"], 1)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(row["table_name"], Value::String("orders".into()));
        assert_eq!(row["row_count"], Value::from(42));
    }

    #[test]
    fn test_validate_missing_required() {
        let spec = spec();
        let bound = spec.bind(&headers()).unwrap_or_else(|e| panic!("{e}"));
        let err = bound.validate(&["  ", "sales", "1", "x"], 3);
        assert!(matches!(
            err,
            Err(SchemaError::MissingRequired { row: 3, .. })
        ));
    }

    #[test]
    fn test_validate_bad_integer() {
        let spec = spec();
        let bound = spec.bind(&headers()).unwrap_or_else(|e| panic!("{e}"));
        let err = bound.validate(&["orders", "", "not-a-number", ""], 2);
        assert!(matches!(err, Err(SchemaError::Coerce { row: 2, .. })));
    }

    #[test]
    fn test_optional_empty_is_null() {
        let spec = spec();
        let bound = spec.bind(&headers()).unwrap_or_else(|e| panic!("{e}"));
        let row = bound
            .validate(&["orders", "", "", ""], 1)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(row["schema_name"], Value::Null);
        assert_eq!(row["description"], Value::Null);
    }

    #[test]
    fn test_bind_missing_required_column() {
        let spec = spec();
        let short: Vec<String> = vec!["schema_name".into()];
        assert!(matches!(
            spec.bind(&short),
            Err(SchemaError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_unknown_declared_field_rejected() {
        let err = ModelSpec::new(
            "Bad",
            vec![FieldDef {
                name: "a".into(),
                kind: FieldKind::String,
                required: true,
            }],
            vec!["missing".into()],
            vec![],
            vec!["a".into()],
            None,
            None,
        );
        assert!(matches!(err, Err(SchemaError::UnknownField { .. })));
    }

    #[test]
    fn test_signature_stable_and_sensitive() {
        let a = spec();
        let b = spec();
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.signature().len(), 16);

        let changed = ModelSpec::new(
            "Table",
            a.fields().to_vec(),
            vec!["description".into()],
            vec![],
            vec!["table_name".into()],
            None,
            None,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_ne!(a.signature(), changed.signature());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let mut row = ValidRow::new();
        row.insert("zeta".into(), Value::from(1));
        row.insert("alpha".into(), Value::from(2));
        assert_eq!(canonical_json(&row), r#"{"alpha":2,"zeta":1}"#);
    }
}
