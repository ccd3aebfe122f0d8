//! Backend-side values and their projection onto portable JSON.
//!
//! The remote store may hand back scalars that are not plain JSON, most
//! notably server-assigned timestamps. Those travel as [`StoredValue::Scalar`]
//! and are recognised by capability ([`VendorScalar::to_date`]) rather than
//! by concrete type, so nothing here knows which backend produced them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

/// A backend scalar with no direct JSON equivalent.
pub trait VendorScalar: fmt::Debug + Send + Sync {
    /// `None` when the scalar has no date capability at all, otherwise the
    /// conversion result.
    fn to_date(&self) -> Option<Result<DateTime<Utc>, String>>;

    /// Portable representation used when no date can be produced.
    fn raw(&self) -> JsonValue;
}

/// A value as held by the document store.
#[derive(Debug, Clone)]
pub enum StoredValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<StoredValue>),
    Map(BTreeMap<String, StoredValue>),
    Scalar(Arc<dyn VendorScalar>),
}

impl StoredValue {
    pub fn scalar<S: VendorScalar + 'static>(scalar: S) -> Self {
        StoredValue::Scalar(Arc::new(scalar))
    }
}

impl From<JsonValue> for StoredValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => StoredValue::Null,
            JsonValue::Bool(b) => StoredValue::Bool(b),
            JsonValue::Number(n) => StoredValue::Number(n),
            JsonValue::String(s) => StoredValue::String(s),
            JsonValue::Array(items) => {
                StoredValue::Array(items.into_iter().map(StoredValue::from).collect())
            }
            JsonValue::Object(fields) => StoredValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, StoredValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// A value inside a write request.
///
/// `ServerTimestamp` is resolved by the backend against its own clock at
/// commit time; the client never supplies the instant.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Json(JsonValue),
    ServerTimestamp,
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        FieldValue::Json(value)
    }
}

/// Renders an instant the way JavaScript's `toISOString` does.
pub fn to_iso_string(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Projects a stored value onto portable JSON.
///
/// Date-capable scalars become ISO-8601 strings. A scalar whose conversion
/// fails is kept as its raw representation.
pub fn normalize(value: &StoredValue) -> JsonValue {
    match value {
        StoredValue::Null => JsonValue::Null,
        StoredValue::Bool(b) => JsonValue::Bool(*b),
        StoredValue::Number(n) => JsonValue::Number(n.clone()),
        StoredValue::String(s) => JsonValue::String(s.clone()),
        StoredValue::Array(items) => JsonValue::Array(items.iter().map(normalize).collect()),
        StoredValue::Map(fields) => JsonValue::Object(normalize_fields(fields)),
        StoredValue::Scalar(scalar) => match scalar.to_date() {
            Some(Ok(instant)) => JsonValue::String(to_iso_string(instant)),
            Some(Err(reason)) => {
                debug!("Keeping raw scalar {:?}: {}", scalar, reason);
                scalar.raw()
            }
            None => scalar.raw(),
        },
    }
}

pub fn normalize_fields(fields: &BTreeMap<String, StoredValue>) -> JsonMap<String, JsonValue> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), normalize(value)))
        .collect()
}
