//! The remote document service, seen from the gateway.
//!
//! Implementations talk to an actual backend (or emulate one, see
//! [`crate::memory_store`]). Every method that reaches the network is async;
//! those are the only suspension points of the facade.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::app_error::AppResult;
use crate::document_model::{Filter, OrderBy};
use crate::stored_value::{FieldValue, StoredValue};

/// Fields of a write request.
pub type WriteFields = BTreeMap<String, FieldValue>;

/// A document as the backend returns it, before normalization.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub id: String,
    pub fields: BTreeMap<String, StoredValue>,
}

/// Conjunctive filters plus an optional single-field ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    /// Replace the whole document.
    Set(WriteFields),
    /// Overwrite the given top-level fields, keep the rest.
    Merge(WriteFields),
    /// Like `Merge`, but the document must already exist.
    Update(WriteFields),
    /// Remove the document; missing documents are not an error.
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub collection: String,
    pub id: String,
    pub kind: WriteKind,
}

impl WriteOp {
    pub fn new(collection: impl Into<String>, id: impl Into<String>, kind: WriteKind) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            kind,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Allocates a fresh document id in `collection` without writing anything.
    fn new_document_id(&self, collection: &str) -> String;

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<RawDocument>>;

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<RawDocument>>;

    /// Applies every write or none of them.
    async fn commit(&self, writes: Vec<WriteOp>) -> AppResult<()>;
}
