//! In-process emulation of the remote document service.
//!
//! Behaves like the hosted store as far as the gateway can observe: server
//! ids, a server clock for timestamp sentinels, all-or-nothing commits and
//! the backend's filter vocabulary. It also lets tests take the backend
//! offline or deny access to a collection.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value as JsonValue};

use crate::app_error::{AppError, AppResult};
use crate::document_model::{Direction, Filter, FilterOp};
use crate::document_store::{DocumentStore, Query, RawDocument, WriteFields, WriteKind, WriteOp};
use crate::stored_value::{normalize, FieldValue, StoredValue, VendorScalar};

const AUTO_ID_LEN: usize = 20;

type Fields = BTreeMap<String, StoredValue>;

/// Instant assigned by the backend clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl ServerTimestamp {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_millis(millis: i64) -> Self {
        let seconds = millis.div_euclid(1_000);
        let nanos = (millis.rem_euclid(1_000) * 1_000_000) as u32;
        Self { seconds, nanos }
    }
}

impl VendorScalar for ServerTimestamp {
    fn to_date(&self) -> Option<Result<DateTime<Utc>, String>> {
        Some(
            DateTime::<Utc>::from_timestamp(self.seconds, self.nanos).ok_or_else(|| {
                format!(
                    "timestamp {}s {}ns is out of range",
                    self.seconds, self.nanos
                )
            }),
        )
    }

    fn raw(&self) -> JsonValue {
        json!({ "seconds": self.seconds, "nanoseconds": self.nanos })
    }
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Fields>>>,
    last_millis: AtomicI64,
    offline: AtomicBool,
    denied: RwLock<HashSet<String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Rejects every subsequent call touching `collection` with
    /// `PermissionDenied`.
    pub fn deny_collection(&self, collection: &str) {
        if let Ok(mut denied) = self.denied.write() {
            denied.insert(collection.to_string());
        }
    }

    pub fn allow_collection(&self, collection: &str) {
        if let Ok(mut denied) = self.denied.write() {
            denied.remove(collection);
        }
    }

    /// Number of documents currently stored in `collection`.
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|collections| collections.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Stores a document exactly as given, bypassing stamping and validation.
    pub fn insert_raw(&self, collection: &str, id: &str, fields: BTreeMap<String, StoredValue>) {
        if let Ok(mut collections) = self.collections.write() {
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), fields);
        }
    }

    /// Next instant of the server clock. Ticks in whole milliseconds and is
    /// strictly increasing across commits.
    fn next_timestamp(&self) -> ServerTimestamp {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_millis
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        ServerTimestamp::from_millis(now.max(previous.saturating_add(1)))
    }

    fn check_access(&self, collection: &str) -> AppResult<()> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(AppError::TransportError(
                "document service unreachable".to_string(),
            ));
        }
        let denied = self.denied.read().map_err(|_| poisoned())?;
        if denied.contains(collection) {
            return Err(AppError::PermissionDenied(format!(
                "access to collection '{}' denied",
                collection
            )));
        }
        Ok(())
    }
}

fn poisoned() -> AppError {
    AppError::TransportError("document store lock poisoned".to_string())
}

fn validate_segment(kind: &str, segment: &str) -> AppResult<()> {
    let invalid = segment.is_empty()
        || segment.contains('/')
        || segment == "."
        || segment == ".."
        || (segment.len() >= 4 && segment.starts_with("__") && segment.ends_with("__"));
    if invalid {
        return Err(AppError::InvalidArgument(format!(
            "invalid {} '{}'",
            kind, segment
        )));
    }
    Ok(())
}

fn validate_write(op: &WriteOp) -> AppResult<()> {
    validate_segment("collection id", &op.collection)?;
    validate_segment("document id", &op.id)?;
    let fields = match &op.kind {
        WriteKind::Set(fields) | WriteKind::Merge(fields) | WriteKind::Update(fields) => fields,
        WriteKind::Delete => return Ok(()),
    };
    if fields.keys().any(|name| name.is_empty()) {
        return Err(AppError::InvalidArgument(format!(
            "empty field name in {}/{}",
            op.collection, op.id
        )));
    }
    Ok(())
}

fn resolve(fields: WriteFields, stamp: ServerTimestamp) -> Fields {
    fields
        .into_iter()
        .map(|(name, value)| {
            let stored = match value {
                FieldValue::Json(json) => StoredValue::from(json),
                FieldValue::ServerTimestamp => StoredValue::scalar(stamp),
            };
            (name, stored)
        })
        .collect()
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        (JsonValue::Array(xs), JsonValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (JsonValue::Object(xs), JsonValue::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering between two values of the same type class; `None` across classes.
fn compare_same_class(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

fn compare_for_order(a: &JsonValue, b: &JsonValue) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare_same_class(a, b).unwrap_or(Ordering::Equal))
}

fn contains(list: &JsonValue, needle: &JsonValue) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(item, needle)))
}

fn matches_filter(fields: &Fields, filter: &Filter) -> bool {
    let Some(stored) = fields.get(&filter.field) else {
        return false;
    };
    let actual = normalize(stored);
    let expected = &filter.value;
    let range = |wanted: &[Ordering]| {
        compare_same_class(&actual, expected).is_some_and(|ord| wanted.contains(&ord))
    };
    match filter.op {
        FilterOp::Equal => values_equal(&actual, expected),
        FilterOp::NotEqual => !actual.is_null() && !values_equal(&actual, expected),
        FilterOp::LessThan => range(&[Ordering::Less]),
        FilterOp::LessThanOrEqual => range(&[Ordering::Less, Ordering::Equal]),
        FilterOp::GreaterThan => range(&[Ordering::Greater]),
        FilterOp::GreaterThanOrEqual => range(&[Ordering::Greater, Ordering::Equal]),
        FilterOp::In => contains(expected, &actual),
        FilterOp::NotIn => !actual.is_null() && !contains(expected, &actual),
        FilterOp::ArrayContains => contains(&actual, expected),
        FilterOp::ArrayContainsAny => expected
            .as_array()
            .is_some_and(|wanted| wanted.iter().any(|w| contains(&actual, w))),
    }
}

fn validate_query(query: &Query) -> AppResult<()> {
    for filter in &query.filters {
        if filter.field.is_empty() {
            return Err(AppError::InvalidArgument(
                "filter on an empty field name".to_string(),
            ));
        }
        if filter.op.takes_list() && !filter.value.is_array() {
            return Err(AppError::InvalidArgument(format!(
                "operator '{}' on '{}' requires a list operand",
                filter.op, filter.field
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn new_document_id(&self, _collection: &str) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(AUTO_ID_LEN)
            .map(char::from)
            .collect()
    }

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<RawDocument>> {
        self.check_access(collection)?;
        validate_segment("collection id", collection)?;
        validate_segment("document id", id)?;
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .map(|fields| RawDocument {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<RawDocument>> {
        self.check_access(collection)?;
        validate_segment("collection id", collection)?;
        validate_query(query)?;
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<RawDocument> = documents
            .iter()
            .filter(|(_, fields)| query.filters.iter().all(|f| matches_filter(fields, f)))
            .map(|(id, fields)| RawDocument {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();

        if let Some(order) = &query.order_by {
            matched.retain(|doc| doc.fields.contains_key(&order.field));
            matched.sort_by_cached_key(|doc| {
                doc.fields
                    .get(&order.field)
                    .map(normalize)
                    .map(OrderKey)
                    .unwrap_or(OrderKey(JsonValue::Null))
            });
            if order.direction == Direction::Desc {
                matched.reverse();
            }
        }
        Ok(matched)
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> AppResult<()> {
        for op in &writes {
            self.check_access(&op.collection)?;
            validate_write(op)?;
        }
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        // Stamped under the write lock so commit order and stamp order agree.
        let stamp = self.next_timestamp();

        // Stage every op on top of the current state so a failing op leaves
        // the store untouched.
        let mut staged: BTreeMap<(String, String), Option<Fields>> = BTreeMap::new();
        for op in writes {
            let key = (op.collection, op.id);
            let current = match staged.get(&key) {
                Some(pending) => pending.clone(),
                None => collections
                    .get(&key.0)
                    .and_then(|documents| documents.get(&key.1))
                    .cloned(),
            };
            let next = match op.kind {
                WriteKind::Set(fields) => Some(resolve(fields, stamp)),
                WriteKind::Merge(fields) => {
                    let mut document = current.unwrap_or_default();
                    document.extend(resolve(fields, stamp));
                    Some(document)
                }
                WriteKind::Update(fields) => {
                    let mut document = current.ok_or_else(|| {
                        AppError::NotFound(format!("no document at {}/{}", key.0, key.1))
                    })?;
                    document.extend(resolve(fields, stamp));
                    Some(document)
                }
                WriteKind::Delete => None,
            };
            staged.insert(key, next);
        }

        debug!("Committing {} staged document(s)", staged.len());
        for ((collection, id), next) in staged {
            match next {
                Some(fields) => {
                    collections.entry(collection).or_default().insert(id, fields);
                }
                None => {
                    if let Some(documents) = collections.get_mut(&collection) {
                        documents.remove(&id);
                        if documents.is_empty() {
                            collections.remove(&collection);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Sort key giving normalized values the backend's cross-type ordering.
struct OrderKey(JsonValue);

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_for_order(&self.0, &other.0)
    }
}
