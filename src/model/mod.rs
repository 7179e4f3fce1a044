//! Model schemas and the process-wide registry.
//!
//! A [`ModelSpec`] describes one indexable record shape: its ordered
//! fields, which of them carry embeddable text, which become metadata, and
//! which form the document id. The [`ModelRegistry`] loads the full set
//! from a YAML description file and is passed explicitly through the
//! pipeline — never held in global state.

mod registry;
mod schema;

pub use registry::{ModelDecl, ModelRegistry};
pub use schema::{BoundSchema, FieldDef, FieldKind, ModelSpec, ValidRow, canonical_json};
