//! Key/value storage over the document store.
//!
//! A logical key names a collection. What lands there depends on the value:
//!
//! - a list is written as one document per element, keyed by the element's
//!   `id` (or a generated `item_<millis>_<base36>` id);
//! - anything else is written as the singleton document `data` carrying
//!   `{ value }`.
//!
//! A write replaces whatever the key held before: list elements that are
//! not in the new list, and a singleton left over from a different shape,
//! are deleted in the same commit. Removing a key still never touches the
//! remote store.
//!
//! Reads infer the shape back from what the collection holds. List
//! elements come back with the `id` they were stored under; a numeric
//! `id` is returned as the number it was given as.
//!
//! The mode is fixed at construction: [`StorageMode::Strict`] refuses to
//! write without a backend and answers misses with `[]`,
//! [`StorageMode::Lenient`] routes to a local store whenever the backend is
//! missing or failing, checks it again on a remote miss (so values written
//! during an outage stay readable), and answers misses with `null`.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use rand::Rng;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::app_error::{AppError, AppResult};
use crate::backend_handle::BackendHandle;
use crate::document_gateway::DocumentGateway;
use crate::document_model::{BatchItem, Document};
use crate::local_store::LocalStore;

/// Document id reserved for singleton values.
pub const SINGLETON_ID: &str = "data";

/// Payload field holding a singleton value.
pub const SINGLETON_FIELD: &str = "value";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone)]
pub enum StorageMode {
    Strict,
    Lenient(Arc<dyn LocalStore>),
}

/// Shape of a value on its way in.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemShape {
    Sequence(Vec<Document>),
    Singleton(JsonValue),
}

impl ItemShape {
    /// Infers the shape of `value`. List elements must be objects.
    pub fn from_value(value: &JsonValue) -> AppResult<Self> {
        let JsonValue::Array(elements) = value else {
            return Ok(ItemShape::Singleton(value.clone()));
        };
        elements
            .iter()
            .enumerate()
            .map(|(index, element)| match element {
                JsonValue::Object(fields) => Ok(Document::new(element_id(fields), fields.clone())),
                other => Err(AppError::InvalidArgument(format!(
                    "list element {} is not an object: {}",
                    index, other
                ))),
            })
            .collect::<AppResult<Vec<_>>>()
            .map(ItemShape::Sequence)
    }
}

fn element_id(fields: &JsonMap<String, JsonValue>) -> String {
    match fields.get("id") {
        Some(JsonValue::String(id)) if !id.is_empty() => id.clone(),
        Some(JsonValue::Number(id)) => id.to_string(),
        _ => generate_item_id(),
    }
}

/// `item_<unix millis>_<9 base36 chars>`.
pub fn generate_item_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RANDOM_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("item_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// A stored list element as handed back to callers. A numeric `id` the
/// caller supplied is kept as given.
fn element_json(doc: &Document) -> JsonValue {
    match doc.get("id") {
        Some(JsonValue::Number(id)) if id.to_string() == doc.id => {
            JsonValue::Object(doc.data.clone())
        }
        _ => doc.to_json(),
    }
}

/// The singleton value, when the collection holds exactly the `data`
/// document and it carries `value`.
fn singleton_value(documents: &[Document]) -> Option<JsonValue> {
    match documents {
        [only] if only.id == SINGLETON_ID => only.get(SINGLETON_FIELD).cloned(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct KeyValueStorage<'a> {
    gateway: DocumentGateway<'a>,
    mode: StorageMode,
}

impl<'a> KeyValueStorage<'a> {
    pub fn new(gateway: DocumentGateway<'a>, mode: StorageMode) -> Self {
        Self { gateway, mode }
    }

    pub fn strict(handle: &'a BackendHandle) -> Self {
        Self::new(DocumentGateway::new(handle), StorageMode::Strict)
    }

    pub fn lenient(handle: &'a BackendHandle, local: Arc<dyn LocalStore>) -> Self {
        Self::new(DocumentGateway::new(handle), StorageMode::Lenient(local))
    }

    pub fn mode(&self) -> &StorageMode {
        &self.mode
    }

    fn miss(&self) -> JsonValue {
        match self.mode {
            StorageMode::Strict => JsonValue::Array(Vec::new()),
            StorageMode::Lenient(_) => JsonValue::Null,
        }
    }

    pub async fn set_item(&self, key: &str, value: &JsonValue) -> AppResult<()> {
        match &self.mode {
            StorageMode::Strict => self.set_remote(key, value).await,
            StorageMode::Lenient(local) => {
                if !self.gateway.is_available() {
                    return write_local(local.as_ref(), key, value);
                }
                let shape = ItemShape::from_value(value)?;
                match self.write_shape(key, shape).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        warn!("setItem '{}' falling back to local store: {}", key, e);
                        write_local(local.as_ref(), key, value)
                    }
                }
            }
        }
    }

    async fn set_remote(&self, key: &str, value: &JsonValue) -> AppResult<()> {
        if !self.gateway.is_available() {
            return Err(AppError::BackendUnavailable(format!(
                "cannot store '{}' without a backend",
                key
            )));
        }
        let shape = ItemShape::from_value(value)?;
        self.write_shape(key, shape).await
    }

    async fn write_shape(&self, key: &str, shape: ItemShape) -> AppResult<()> {
        match shape {
            ItemShape::Sequence(documents) => {
                let items = documents
                    .into_iter()
                    .map(|doc| BatchItem::new(doc.id, doc.data))
                    .collect();
                self.gateway.replace_documents(key, items).await
            }
            ItemShape::Singleton(value) => {
                let mut payload = JsonMap::new();
                payload.insert(SINGLETON_FIELD.to_string(), value);
                self.gateway
                    .replace_with_document(key, SINGLETON_ID, payload)
                    .await
            }
        }
    }

    /// Reads `key` back: the singleton value, the list of documents, or the
    /// miss value of the current mode.
    pub async fn get_item(&self, key: &str) -> AppResult<JsonValue> {
        if !self.gateway.is_available() {
            return match &self.mode {
                StorageMode::Lenient(local) => read_local(local.as_ref(), key),
                StorageMode::Strict => {
                    debug!("getItem '{}' without a backend", key);
                    Ok(self.miss())
                }
            };
        }

        let documents = self.gateway.get_documents(key, &[], None).await;
        if let Some(value) = singleton_value(&documents) {
            return Ok(value);
        }
        if !documents.is_empty() {
            return Ok(JsonValue::Array(documents.iter().map(element_json).collect()));
        }

        let found = match self.gateway.get_document(key, SINGLETON_ID).await {
            Ok(doc) => doc.and_then(|doc| doc.get(SINGLETON_FIELD).cloned()),
            Err(e) => {
                debug!("getItem '{}' singleton probe failed: {}", key, e);
                None
            }
        };
        match (found, &self.mode) {
            (Some(value), _) => Ok(value),
            (None, StorageMode::Lenient(local)) => read_local(local.as_ref(), key),
            (None, StorageMode::Strict) => Ok(self.miss()),
        }
    }

    /// Collections are never deleted remotely; in lenient mode the local
    /// binding is dropped.
    pub async fn remove_item(&self, key: &str) -> AppResult<()> {
        match &self.mode {
            StorageMode::Strict => {
                warn!("removeItem '{}' is a no-op against the remote store", key);
                Ok(())
            }
            StorageMode::Lenient(local) => {
                if self.gateway.is_available() {
                    warn!("removeItem '{}' is a no-op against the remote store", key);
                }
                local.remove(key)
            }
        }
    }

    /// No-op remotely; in lenient mode the whole local store is cleared.
    pub async fn clear(&self) -> AppResult<()> {
        match &self.mode {
            StorageMode::Strict => {
                warn!("clear is a no-op against the remote store");
                Ok(())
            }
            StorageMode::Lenient(local) => {
                if self.gateway.is_available() {
                    warn!("clear is a no-op against the remote store");
                }
                local.clear()
            }
        }
    }
}

fn write_local(local: &dyn LocalStore, key: &str, value: &JsonValue) -> AppResult<()> {
    let encoded = serde_json::to_string(value)?;
    local.set(key, &encoded)
}

fn read_local(local: &dyn LocalStore, key: &str) -> AppResult<JsonValue> {
    match local.get(key)? {
        Some(encoded) => Ok(serde_json::from_str(&encoded)?),
        None => Ok(JsonValue::Null),
    }
}
