//! Backend configuration.
//!
//! The facade needs exactly six named strings to reach the hosted backend.
//! They are captured once, never mutated, and checked for emptiness after
//! trimming. A missing field never aborts the process: init reports the
//! names and hands out the null backend handle instead.

use serde::{Deserialize, Serialize};

use crate::app_error::{AppError, AppResult};

/// The six configuration strings, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    ApiKey,
    AuthDomain,
    ProjectId,
    StorageBucket,
    MessagingSenderId,
    AppId,
}

impl ConfigField {
    pub const ALL: [ConfigField; 6] = [
        ConfigField::ApiKey,
        ConfigField::AuthDomain,
        ConfigField::ProjectId,
        ConfigField::StorageBucket,
        ConfigField::MessagingSenderId,
        ConfigField::AppId,
    ];

    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ConfigField::ApiKey => "api_key",
            ConfigField::AuthDomain => "auth_domain",
            ConfigField::ProjectId => "project_id",
            ConfigField::StorageBucket => "storage_bucket",
            ConfigField::MessagingSenderId => "messaging_sender_id",
            ConfigField::AppId => "app_id",
        }
    }

    /// Environment variable read by [`BackendConfig::from_env`].
    pub fn env_var(self) -> &'static str {
        match self {
            ConfigField::ApiKey => "FIREBASE_API_KEY",
            ConfigField::AuthDomain => "FIREBASE_AUTH_DOMAIN",
            ConfigField::ProjectId => "FIREBASE_PROJECT_ID",
            ConfigField::StorageBucket => "FIREBASE_STORAGE_BUCKET",
            ConfigField::MessagingSenderId => "FIREBASE_MESSAGING_SENDER_ID",
            ConfigField::AppId => "FIREBASE_APP_ID",
        }
    }
}

/// Connection settings for the hosted backend.
///
/// Deserializes from either snake case keys or the vendor's camelCase keys,
/// so a web-style config object can be fed in verbatim:
///
/// ```rust
/// use cloud_storage_core::backend_config::BackendConfig;
///
/// let config = BackendConfig::from_json_str(r#"{
///     "apiKey": "key",
///     "authDomain": "demo.example.com",
///     "projectId": "demo",
///     "storageBucket": "demo.appspot.com",
///     "messagingSenderId": "1234",
///     "appId": "1:1234:web:abcd"
/// }"#)?;
/// assert!(config.missing_fields().is_empty());
/// # Ok::<(), cloud_storage_core::app_error::AppError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, alias = "apiKey")]
    pub api_key: String,
    #[serde(default, alias = "authDomain")]
    pub auth_domain: String,
    #[serde(default, alias = "projectId")]
    pub project_id: String,
    #[serde(default, alias = "storageBucket")]
    pub storage_bucket: String,
    #[serde(default, alias = "messagingSenderId")]
    pub messaging_sender_id: String,
    #[serde(default, alias = "appId")]
    pub app_id: String,
}

impl BackendConfig {
    /// Reads the configuration from the process environment.
    /// Unset variables become empty strings.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup keyed by
    /// [`ConfigField::env_var`].
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |field: ConfigField| lookup(field.env_var()).unwrap_or_default();
        Self {
            api_key: read(ConfigField::ApiKey),
            auth_domain: read(ConfigField::AuthDomain),
            project_id: read(ConfigField::ProjectId),
            storage_bucket: read(ConfigField::StorageBucket),
            messaging_sender_id: read(ConfigField::MessagingSenderId),
            app_id: read(ConfigField::AppId),
        }
    }

    pub fn from_json_str(json: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, field: ConfigField) -> &str {
        match field {
            ConfigField::ApiKey => &self.api_key,
            ConfigField::AuthDomain => &self.auth_domain,
            ConfigField::ProjectId => &self.project_id,
            ConfigField::StorageBucket => &self.storage_bucket,
            ConfigField::MessagingSenderId => &self.messaging_sender_id,
            ConfigField::AppId => &self.app_id,
        }
    }

    /// Names of every field that is empty after trimming, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        ConfigField::ALL
            .iter()
            .filter(|field| self.get(**field).trim().is_empty())
            .map(|field| field.name())
            .collect()
    }

    pub fn validate(&self) -> AppResult<()> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::ConfigMissing(
                missing.into_iter().map(str::to_string).collect(),
            ))
        }
    }
}
