//! Typed metadata filters.
//!
//! Filters serialise to the wire shape the external store expects
//! (`{"field": {"$gte": 2}}`, `{"$and": [...]}`); the in-process stores
//! evaluate them directly with [`Filter::matches`].

use serde_json::{Map, Value, json};

use crate::document::Metadata;

/// Comparison operator of a single-field condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
}

impl CmpOp {
    const fn wire(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

/// A metadata filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare one field against a scalar.
    Cmp {
        /// Metadata key.
        field: String,
        /// Operator.
        op: CmpOp,
        /// Comparison value.
        value: Value,
    },
    /// `$in` / `$nin` membership test.
    In {
        /// Metadata key.
        field: String,
        /// Accepted (or rejected) values.
        values: Vec<Value>,
        /// `true` flips this into `$nin`.
        negate: bool,
    },
    /// Every branch must match.
    And(Vec<Filter>),
    /// Any branch may match.
    Or(Vec<Filter>),
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Eq, value)
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Ne, value)
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Gt, value)
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Gte, value)
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Lt, value)
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Lte, value)
    }

    fn cmp(field: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self::Cmp {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field ∈ values`
    pub fn in_values<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negate: false,
        }
    }

    /// `field ∉ values`
    pub fn not_in<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negate: true,
        }
    }

    /// Conjunction of branches.
    #[must_use]
    pub fn and(branches: Vec<Self>) -> Self {
        Self::And(branches)
    }

    /// Disjunction of branches.
    #[must_use]
    pub fn or(branches: Vec<Self>) -> Self {
        Self::Or(branches)
    }

    /// Serialises to the store's wire JSON shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Cmp { field, op, value } => {
                let mut inner = Map::new();
                inner.insert(op.wire().to_string(), value.clone());
                let mut outer = Map::new();
                outer.insert(field.clone(), Value::Object(inner));
                Value::Object(outer)
            }
            Self::In {
                field,
                values,
                negate,
            } => {
                let op = if *negate { "$nin" } else { "$in" };
                let mut inner = Map::new();
                inner.insert(op.to_string(), Value::Array(values.clone()));
                let mut outer = Map::new();
                outer.insert(field.clone(), Value::Object(inner));
                Value::Object(outer)
            }
            Self::And(branches) => {
                json!({ "$and": branches.iter().map(Self::to_value).collect::<Vec<_>>() })
            }
            Self::Or(branches) => {
                json!({ "$or": branches.iter().map(Self::to_value).collect::<Vec<_>>() })
            }
        }
    }

    /// Evaluates the filter against one document's metadata.
    ///
    /// Absent fields fail every positive test and satisfy the negated
    /// ones (`$ne`, `$nin`).
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Cmp { field, op, value } => match metadata.get(field) {
                Some(actual) => cmp_values(actual, *op, value),
                None => matches!(op, CmpOp::Ne),
            },
            Self::In {
                field,
                values,
                negate,
            } => {
                let contained = metadata
                    .get(field)
                    .is_some_and(|actual| values.iter().any(|v| v == actual));
                contained != *negate
            }
            Self::And(branches) => branches.iter().all(|b| b.matches(metadata)),
            Self::Or(branches) => branches.iter().any(|b| b.matches(metadata)),
        }
    }
}

fn cmp_values(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            match (a, b) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            }
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match (ordering, op) {
        (Some(Ordering::Equal), CmpOp::Eq | CmpOp::Gte | CmpOp::Lte) => true,
        (Some(Ordering::Less), CmpOp::Lt | CmpOp::Lte | CmpOp::Ne) => true,
        (Some(Ordering::Greater), CmpOp::Gt | CmpOp::Gte | CmpOp::Ne) => true,
        (None, CmpOp::Ne) => true,
        _ => false,
    }
}
