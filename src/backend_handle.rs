//! The process-wide backend handle.
//!
//! A [`BackendHandle`] bundles the application token, the identity provider
//! and the document store. The three parts exist together or not at all:
//! when configuration is incomplete the handle is the null handle and every
//! consumer decides for itself how to degrade.
//!
//! ```rust
//! use cloud_storage_core::backend_config::BackendConfig;
//! use cloud_storage_core::backend_handle::{BackendHandle, MemoryConnector};
//!
//! let handle = BackendHandle::init(&BackendConfig::default(), &MemoryConnector::new());
//! assert!(!handle.is_available());
//! ```

use std::sync::Arc;

use log::{error, info, warn};

use crate::app_error::{AppError, AppResult};
use crate::backend_config::BackendConfig;
use crate::document_store::DocumentStore;
use crate::identity::{IdentityProvider, MemoryIdentityProvider};
use crate::memory_store::MemoryDocumentStore;

/// Identifies the application to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppToken {
    pub project_id: String,
    pub app_id: String,
    pub api_key: String,
    pub auth_domain: String,
}

impl AppToken {
    fn from_config(config: &BackendConfig) -> Self {
        Self {
            project_id: config.project_id.trim().to_string(),
            app_id: config.app_id.trim().to_string(),
            api_key: config.api_key.trim().to_string(),
            auth_domain: config.auth_domain.trim().to_string(),
        }
    }
}

/// Services produced by a connector for a complete configuration.
#[derive(Debug, Clone)]
pub struct BackendParts {
    pub store: Arc<dyn DocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Builds the backend services from a validated configuration.
pub trait BackendConnector {
    fn connect(&self, config: &BackendConfig) -> AppResult<BackendParts>;
}

#[derive(Debug, Clone)]
struct Connected {
    app: AppToken,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
}

#[derive(Debug, Clone, Default)]
pub struct BackendHandle {
    inner: Option<Connected>,
}

impl BackendHandle {
    /// Assembles the handle. Never fails: missing configuration or a failing
    /// connector are logged and yield the null handle.
    pub fn init(config: &BackendConfig, connector: &dyn BackendConnector) -> Self {
        if let Err(AppError::ConfigMissing(missing)) = config.validate() {
            warn!(
                "Backend configuration incomplete, running without backend. Missing: {}",
                missing.join(", ")
            );
            return Self::null();
        }

        match connector.connect(config) {
            Ok(parts) => {
                let app = AppToken::from_config(config);
                info!("Backend initialized for project '{}'", app.project_id);
                Self::from_parts(app, parts)
            }
            Err(e) => {
                error!("Backend connection failed, running without backend: {}", e);
                Self::null()
            }
        }
    }

    pub fn null() -> Self {
        Self { inner: None }
    }

    pub fn from_parts(app: AppToken, parts: BackendParts) -> Self {
        Self {
            inner: Some(Connected {
                app,
                identity: parts.identity,
                store: parts.store,
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    pub fn app(&self) -> Option<&AppToken> {
        self.inner.as_ref().map(|c| &c.app)
    }

    pub fn store(&self) -> Option<&Arc<dyn DocumentStore>> {
        self.inner.as_ref().map(|c| &c.store)
    }

    pub fn identity(&self) -> Option<&Arc<dyn IdentityProvider>> {
        self.inner.as_ref().map(|c| &c.identity)
    }
}

/// Connector backed by the in-process emulators.
///
/// Keeps its own references so callers can still reach the emulators (for
/// fault injection or seeding) after handing the connector to init.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: Arc<MemoryDocumentStore>,
    identity: Arc<MemoryIdentityProvider>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &Arc<MemoryDocumentStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<MemoryIdentityProvider> {
        &self.identity
    }
}

impl BackendConnector for MemoryConnector {
    fn connect(&self, _config: &BackendConfig) -> AppResult<BackendParts> {
        Ok(BackendParts {
            store: self.store.clone(),
            identity: self.identity.clone(),
        })
    }
}
