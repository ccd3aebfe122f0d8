//! # Cloud Storage Core
//!
//! A small facade over a hosted backend offering email/password identity
//! and a document-oriented store. The application sees a stable key/value
//! API and a thin auth API; the vendor services stay behind two traits,
//! [`document_store::DocumentStore`] and [`identity::IdentityProvider`].
//!
//! ## Features
//!
//! - **Polymorphic keys**: one logical key stores either a list (one
//!   document per element) or a single record (the `data` singleton)
//! - **Portable values**: backend timestamps come back as ISO-8601 strings
//! - **Server-side stamping**: `createdAt`/`updatedAt` always come from the
//!   backend clock, and batch re-syncs keep original creation instants
//! - **Graceful startup**: incomplete configuration yields a null backend
//!   handle instead of an error
//! - **Local fallback**: lenient storage mirrors the same contract on an
//!   embedded LMDB (or in-memory) store when the backend is missing or
//!   failing
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cloud_storage_core::backend_config::BackendConfig;
//! use cloud_storage_core::backend_handle::{BackendHandle, MemoryConnector};
//! use cloud_storage_core::local_store::LmdbLocalStore;
//! use cloud_storage_core::storage::KeyValueStorage;
//! use serde_json::json;
//!
//! # async fn demo() -> cloud_storage_core::app_error::AppResult<()> {
//! let handle = BackendHandle::init(&BackendConfig::from_env(), &MemoryConnector::new());
//! let local = Arc::new(LmdbLocalStore::open("app_cache.lmdb")?);
//! let storage = KeyValueStorage::lenient(&handle, local);
//!
//! storage.set_item("settings", &json!({"theme": "dark"})).await?;
//! let settings = storage.get_item("settings").await?;
//! assert_eq!(settings, json!({"theme": "dark"}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backend_config`] - The six named configuration strings
//! - [`backend_handle`] - Process-wide handle and connectors
//! - [`document_gateway`] - Typed document operations with stamping and normalization
//! - [`storage`] - Key/value storage in strict or lenient mode
//! - [`auth_facade`] - Sign in, sign up, sign out and identity subscriptions
//! - [`local_store`] - LMDB and in-memory local stores
//! - [`memory_store`] / [`identity`] - In-process backend emulators

pub mod app_error;
pub mod auth_facade;
pub mod backend_config;
pub mod backend_handle;
pub mod document_gateway;
pub mod document_model;
pub mod document_store;
pub mod identity;
pub mod local_store;
pub mod memory_store;
pub mod storage;
pub mod stored_value;

pub use app_error::{AppError, AppResult};
pub use auth_facade::{AuthFacade, AuthSession, AuthUser, Subscription};
pub use backend_config::BackendConfig;
pub use backend_handle::{BackendConnector, BackendHandle, MemoryConnector};
pub use document_gateway::DocumentGateway;
pub use document_model::{BatchItem, Direction, Document, Filter, FilterOp, OrderBy};
pub use storage::{KeyValueStorage, StorageMode};
