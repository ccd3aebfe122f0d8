//! Data model for documents and queries.
//!
//! [`Document`] is what the gateway hands back: a by-value snapshot whose
//! payload has already been normalized to portable JSON. [`Filter`] and
//! [`OrderBy`] describe the primitive query form the backend understands.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::app_error::AppError;

/// Field stamped with the backend clock on the first write of a document.
pub const CREATED_AT: &str = "createdAt";

/// Field stamped with the backend clock on every write.
pub const UPDATED_AT: &str = "updatedAt";

/// A document snapshot.
///
/// Serializes flat, with the identifier next to the payload fields:
///
/// ```rust
/// use cloud_storage_core::document_model::Document;
/// use serde_json::json;
///
/// let doc = Document::new("a", json!({"name": "X"}).as_object().cloned().unwrap_or_default());
/// assert_eq!(doc.to_json(), json!({"id": "a", "name": "X"}));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier within the collection. Immutable until deletion.
    pub id: String,

    /// Normalized payload, including the `createdAt`/`updatedAt` stamps
    /// when the backend set them.
    #[serde(flatten)]
    pub data: JsonMap<String, JsonValue>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: JsonMap<String, JsonValue>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.data.get(field)
    }

    /// The mapping form handed to callers: payload fields plus `id`.
    /// A payload field named `id` is shadowed by the document id.
    pub fn to_json(&self) -> JsonValue {
        let mut object = self.data.clone();
        object.insert("id".to_string(), JsonValue::String(self.id.clone()));
        JsonValue::Object(object)
    }
}

/// Comparison operators understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Equal => "==",
            FilterOp::NotEqual => "!=",
            FilterOp::LessThan => "<",
            FilterOp::LessThanOrEqual => "<=",
            FilterOp::GreaterThan => ">",
            FilterOp::GreaterThanOrEqual => ">=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not-in",
            FilterOp::ArrayContains => "array-contains",
            FilterOp::ArrayContainsAny => "array-contains-any",
        }
    }

    /// Operators whose operand must be a list.
    pub fn takes_list(self) -> bool {
        matches!(
            self,
            FilterOp::In | FilterOp::NotIn | FilterOp::ArrayContainsAny
        )
    }
}

impl Display for FilterOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "==" => FilterOp::Equal,
            "!=" => FilterOp::NotEqual,
            "<" => FilterOp::LessThan,
            "<=" => FilterOp::LessThanOrEqual,
            ">" => FilterOp::GreaterThan,
            ">=" => FilterOp::GreaterThanOrEqual,
            "in" => FilterOp::In,
            "not-in" => FilterOp::NotIn,
            "array-contains" => FilterOp::ArrayContains,
            "array-contains-any" => FilterOp::ArrayContainsAny,
            other => {
                return Err(AppError::InvalidArgument(format!(
                    "Unknown filter operator '{}'",
                    other
                )))
            }
        };
        Ok(op)
    }
}

/// One conjunct of a query: `field op value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Single-field ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// One entry of a batch write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub data: JsonMap<String, JsonValue>,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, data: JsonMap<String, JsonValue>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}
