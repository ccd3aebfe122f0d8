//! Typed operations over the remote document store.
//!
//! The gateway stamps `createdAt`/`updatedAt` with the backend clock,
//! normalizes everything it reads, and applies the propagation policy:
//! write failures reach the caller, query failures degrade to an empty
//! result.
//!
//! ```no_run
//! use cloud_storage_core::backend_config::BackendConfig;
//! use cloud_storage_core::backend_handle::{BackendHandle, MemoryConnector};
//! use cloud_storage_core::document_gateway::DocumentGateway;
//! use serde_json::json;
//!
//! # async fn demo(config: BackendConfig) -> cloud_storage_core::app_error::AppResult<()> {
//! let handle = BackendHandle::init(&config, &MemoryConnector::new());
//! let gateway = DocumentGateway::new(&handle);
//! let payload = json!({"name": "Widget"}).as_object().cloned().unwrap_or_default();
//! let id = gateway.set_document("products", None, payload, false).await?;
//! let stored = gateway.get_document("products", &id).await?;
//! assert!(stored.is_some());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::app_error::{AppError, AppResult};
use crate::backend_handle::BackendHandle;
use crate::document_model::{BatchItem, Document, Filter, OrderBy, CREATED_AT, UPDATED_AT};
use crate::document_store::{DocumentStore, Query, RawDocument, WriteFields, WriteKind, WriteOp};
use crate::stored_value::{normalize_fields, FieldValue};

#[derive(Debug, Clone, Copy)]
pub struct DocumentGateway<'a> {
    handle: &'a BackendHandle,
    timeout: Option<Duration>,
}

fn snapshot(raw: RawDocument) -> Document {
    Document::new(raw.id, normalize_fields(&raw.fields))
}

fn to_write_fields(payload: JsonMap<String, JsonValue>) -> WriteFields {
    payload
        .into_iter()
        .map(|(name, value)| (name, FieldValue::Json(value)))
        .collect()
}

/// Set writes for a batch. `createdAt` is stamped only for items that do
/// not already carry one.
fn batch_writes(collection: &str, items: Vec<BatchItem>) -> Vec<WriteOp> {
    items
        .into_iter()
        .map(|item| {
            let keeps_created = item.data.contains_key(CREATED_AT);
            let mut fields = to_write_fields(item.data);
            fields.insert(UPDATED_AT.to_string(), FieldValue::ServerTimestamp);
            if !keeps_created {
                fields.insert(CREATED_AT.to_string(), FieldValue::ServerTimestamp);
            }
            WriteOp::new(collection, item.id, WriteKind::Set(fields))
        })
        .collect()
}

/// Deletes for every document of `existing` whose id is not in `keep`.
fn stale_deletes(
    collection: &str,
    existing: Vec<RawDocument>,
    keep: &HashSet<String>,
) -> Vec<WriteOp> {
    existing
        .into_iter()
        .filter(|doc| !keep.contains(&doc.id))
        .map(|doc| WriteOp::new(collection, doc.id, WriteKind::Delete))
        .collect()
}

fn log_failure(operation: &str, collection: &str, id: Option<&str>, err: &AppError) {
    match id {
        Some(id) => error!("{} failed for {}/{}: {}", operation, collection, id, err),
        None => error!("{} failed for {}: {}", operation, collection, err),
    }
}

impl<'a> DocumentGateway<'a> {
    pub fn new(handle: &'a BackendHandle) -> Self {
        Self {
            handle,
            timeout: None,
        }
    }

    /// Bounds every remote call by `timeout`. An expired write has unknown
    /// persistence; read the document back to learn its state.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_available()
    }

    fn store(&self) -> AppResult<&'a Arc<dyn DocumentStore>> {
        self.handle.store().ok_or_else(|| {
            AppError::BackendUnavailable("backend handle is not initialized".to_string())
        })
    }

    async fn remote<T, F>(&self, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                AppError::TransportError(format!("no response within {:?}", limit))
            })?,
            None => call.await,
        }
    }

    /// Fetches `(collection, id)`; `None` when absent.
    pub async fn get_document(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        let result = match self.store() {
            Ok(store) => self.remote(store.get(collection, id)).await,
            Err(e) => Err(e),
        };
        result
            .map(|raw| raw.map(snapshot))
            .inspect_err(|e| log_failure("getDocument", collection, Some(id), e))
    }

    /// Runs a conjunctive query. Any failure, including a missing backend,
    /// is logged and reported as an empty result.
    pub async fn get_documents(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Vec<Document> {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => {
                warn!("getDocuments on {} skipped: {}", collection, e);
                return Vec::new();
            }
        };
        let query = Query {
            filters: filters.to_vec(),
            order_by: order_by.cloned(),
        };
        match self.remote(store.query(collection, &query)).await {
            Ok(documents) => documents.into_iter().map(snapshot).collect(),
            Err(e) => {
                log_failure("getDocuments", collection, None, &e);
                Vec::new()
            }
        }
    }

    /// Writes `payload` and returns the document id.
    ///
    /// Without an id a server id is allocated and the write counts as a
    /// creation, so `createdAt` is stamped too. `merge` keeps fields the
    /// payload does not mention; otherwise the document is replaced.
    pub async fn set_document(
        &self,
        collection: &str,
        id: Option<&str>,
        payload: JsonMap<String, JsonValue>,
        merge: bool,
    ) -> AppResult<String> {
        let store = self
            .store()
            .inspect_err(|e| log_failure("setDocument", collection, id, e))?;
        let fresh = id.is_none();
        let id = match id {
            Some(id) => id.to_string(),
            None => store.new_document_id(collection),
        };

        let mut fields = to_write_fields(payload);
        fields.insert(UPDATED_AT.to_string(), FieldValue::ServerTimestamp);
        if fresh {
            fields.insert(CREATED_AT.to_string(), FieldValue::ServerTimestamp);
        }
        let kind = if merge {
            WriteKind::Merge(fields)
        } else {
            WriteKind::Set(fields)
        };

        self.remote(store.commit(vec![WriteOp::new(collection, id.as_str(), kind)]))
            .await
            .inspect_err(|e| log_failure("setDocument", collection, Some(&id), e))?;
        Ok(id)
    }

    /// Merge-writes `payload` at `(collection, id)`, stamping `createdAt`
    /// as well when the document does not exist yet.
    pub async fn upsert_document(
        &self,
        collection: &str,
        id: &str,
        payload: JsonMap<String, JsonValue>,
    ) -> AppResult<()> {
        let store = self
            .store()
            .inspect_err(|e| log_failure("upsertDocument", collection, Some(id), e))?;
        let existing = self
            .remote(store.get(collection, id))
            .await
            .inspect_err(|e| log_failure("upsertDocument", collection, Some(id), e))?;

        let mut fields = to_write_fields(payload);
        fields.insert(UPDATED_AT.to_string(), FieldValue::ServerTimestamp);
        let has_created = existing.is_some_and(|doc| doc.fields.contains_key(CREATED_AT));
        if !has_created {
            fields.insert(CREATED_AT.to_string(), FieldValue::ServerTimestamp);
        }

        self.remote(store.commit(vec![WriteOp::new(
            collection,
            id,
            WriteKind::Merge(fields),
        )]))
        .await
        .inspect_err(|e| log_failure("upsertDocument", collection, Some(id), e))
    }

    /// Merges `patch` into an existing document. Fails with `NotFound` when
    /// there is nothing to update.
    pub async fn update_document(
        &self,
        collection: &str,
        id: &str,
        patch: JsonMap<String, JsonValue>,
    ) -> AppResult<()> {
        let store = self
            .store()
            .inspect_err(|e| log_failure("updateDocument", collection, Some(id), e))?;
        let mut fields = to_write_fields(patch);
        fields.insert(UPDATED_AT.to_string(), FieldValue::ServerTimestamp);

        self.remote(store.commit(vec![WriteOp::new(
            collection,
            id,
            WriteKind::Update(fields),
        )]))
        .await
        .inspect_err(|e| log_failure("updateDocument", collection, Some(id), e))
    }

    /// Removes a document. Removing a missing document succeeds.
    pub async fn delete_document(&self, collection: &str, id: &str) -> AppResult<()> {
        let store = self
            .store()
            .inspect_err(|e| log_failure("deleteDocument", collection, Some(id), e))?;
        self.remote(store.commit(vec![WriteOp::new(collection, id, WriteKind::Delete)]))
            .await
            .inspect_err(|e| log_failure("deleteDocument", collection, Some(id), e))
    }

    /// Replaces every item in one atomic commit.
    ///
    /// `updatedAt` is always stamped. `createdAt` is stamped only for items
    /// that do not carry one, so re-syncing stored items keeps their
    /// original creation instant.
    pub async fn batch_set_documents(
        &self,
        collection: &str,
        items: Vec<BatchItem>,
    ) -> AppResult<()> {
        let store = self
            .store()
            .inspect_err(|e| log_failure("batchSetDocuments", collection, None, e))?;
        if items.is_empty() {
            return Ok(());
        }

        let writes = batch_writes(collection, items);
        let count = writes.len();
        self.remote(store.commit(writes))
            .await
            .inspect_err(|e| log_failure("batchSetDocuments", collection, None, e))?;
        debug!("Committed batch of {} document(s) to {}", count, collection);
        Ok(())
    }

    /// Makes `items` the whole content of `collection`: they are written as
    /// by [`batch_set_documents`](Self::batch_set_documents) and every other
    /// document is deleted, in one commit.
    pub async fn replace_documents(
        &self,
        collection: &str,
        items: Vec<BatchItem>,
    ) -> AppResult<()> {
        let store = self
            .store()
            .inspect_err(|e| log_failure("replaceDocuments", collection, None, e))?;
        let existing = self
            .remote(store.query(collection, &Query::default()))
            .await
            .inspect_err(|e| log_failure("replaceDocuments", collection, None, e))?;

        let keep: HashSet<String> = items.iter().map(|item| item.id.clone()).collect();
        let mut writes = batch_writes(collection, items);
        writes.extend(stale_deletes(collection, existing, &keep));
        if writes.is_empty() {
            return Ok(());
        }

        let count = writes.len();
        self.remote(store.commit(writes))
            .await
            .inspect_err(|e| log_failure("replaceDocuments", collection, None, e))?;
        debug!("Replaced {} with {} write(s)", collection, count);
        Ok(())
    }

    /// Like [`upsert_document`](Self::upsert_document), but the document
    /// becomes the only one left in `collection`.
    pub async fn replace_with_document(
        &self,
        collection: &str,
        id: &str,
        payload: JsonMap<String, JsonValue>,
    ) -> AppResult<()> {
        let store = self
            .store()
            .inspect_err(|e| log_failure("replaceWithDocument", collection, Some(id), e))?;
        let existing = self
            .remote(store.query(collection, &Query::default()))
            .await
            .inspect_err(|e| log_failure("replaceWithDocument", collection, Some(id), e))?;

        let mut fields = to_write_fields(payload);
        fields.insert(UPDATED_AT.to_string(), FieldValue::ServerTimestamp);
        let has_created = existing
            .iter()
            .any(|doc| doc.id == id && doc.fields.contains_key(CREATED_AT));
        if !has_created {
            fields.insert(CREATED_AT.to_string(), FieldValue::ServerTimestamp);
        }

        let keep = HashSet::from([id.to_string()]);
        let mut writes = vec![WriteOp::new(collection, id, WriteKind::Merge(fields))];
        writes.extend(stale_deletes(collection, existing, &keep));

        self.remote(store.commit(writes))
            .await
            .inspect_err(|e| log_failure("replaceWithDocument", collection, Some(id), e))
    }
}
