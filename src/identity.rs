//! The authentication service, seen from the auth facade.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::app_error::{AppError, AppResult};

const UID_LEN: usize = 28;
const MIN_PASSWORD_LEN: usize = 6;

/// Identity record as the provider publishes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    /// Custom claims attached by the provider (for example `role`).
    #[serde(default)]
    pub claims: JsonMap<String, JsonValue>,
}

/// Callback invoked with the identity after each transition.
pub type IdentityListener = Arc<dyn Fn(Option<&ProviderUser>) + Send + Sync>;

pub type ListenerId = u64;

#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<ProviderUser>;

    /// Creates the account and signs it in.
    async fn create_user(&self, email: &str, password: &str) -> AppResult<ProviderUser>;

    async fn update_display_name(&self, display_name: &str) -> AppResult<ProviderUser>;

    async fn sign_out(&self) -> AppResult<()>;

    /// Bearer token for the signed-in user.
    async fn id_token(&self, force_refresh: bool) -> AppResult<String>;

    fn current_user(&self) -> Option<ProviderUser>;

    /// Registers `listener`. It is called once right away with the current
    /// identity, then after every sign-in and sign-out.
    fn add_listener(&self, listener: IdentityListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    password: String,
    display_name: Option<String>,
    claims: JsonMap<String, JsonValue>,
}

impl Account {
    fn to_user(&self, email: &str) -> ProviderUser {
        ProviderUser {
            uid: self.uid.clone(),
            email: email.to_string(),
            display_name: self.display_name.clone(),
            claims: self.claims.clone(),
        }
    }
}

/// In-process identity provider with email/password accounts.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<ProviderUser>>,
    listeners: RwLock<BTreeMap<ListenerId, IdentityListener>>,
    next_listener: AtomicU64,
    issued_tokens: AtomicU64,
}

impl fmt::Debug for MemoryIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryIdentityProvider")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

fn poisoned() -> AppError {
    AppError::AuthError("identity state lock poisoned".to_string())
}

fn canonical_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::AuthError(format!("invalid email '{}'", email))),
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Attaches a custom claim to the account with `uid`.
    pub fn set_custom_claim(&self, uid: &str, key: &str, value: JsonValue) -> AppResult<()> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        let account = accounts
            .values_mut()
            .find(|account| account.uid == uid)
            .ok_or_else(|| AppError::AuthError(format!("no account with uid '{}'", uid)))?;
        account.claims.insert(key.to_string(), value.clone());

        let mut current = self.current.write().map_err(|_| poisoned())?;
        if let Some(user) = current.as_mut().filter(|user| user.uid == uid) {
            user.claims.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Replaces the identity and reports exactly this transition, even when
    /// another one lands before the listeners run.
    fn set_current(&self, user: Option<ProviderUser>) -> AppResult<()> {
        let snapshot = {
            let mut current = self.current.write().map_err(|_| poisoned())?;
            *current = user;
            current.clone()
        };
        self.notify(snapshot)
    }

    /// Calls every listener with `snapshot`. Listeners run outside the lock
    /// so they may unsubscribe themselves.
    fn notify(&self, snapshot: Option<ProviderUser>) -> AppResult<()> {
        let listeners: Vec<IdentityListener> = self
            .listeners
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect();
        debug!("Notifying {} identity listener(s)", listeners.len());
        for listener in listeners {
            listener(snapshot.as_ref());
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<ProviderUser> {
        let email = canonical_email(email)?;
        let user = {
            let accounts = self.accounts.read().map_err(|_| poisoned())?;
            let account = accounts
                .get(&email)
                .ok_or_else(|| AppError::AuthError(format!("user not found: {}", email)))?;
            if account.password != password {
                return Err(AppError::AuthError("wrong password".to_string()));
            }
            account.to_user(&email)
        };
        info!("Signed in {}", user.uid);
        self.set_current(Some(user.clone()))?;
        Ok(user)
    }

    async fn create_user(&self, email: &str, password: &str) -> AppResult<ProviderUser> {
        let email = canonical_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::AuthError(format!(
                "weak password: at least {} characters required",
                MIN_PASSWORD_LEN
            )));
        }
        let user = {
            let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
            if accounts.contains_key(&email) {
                return Err(AppError::AuthError(format!(
                    "email already in use: {}",
                    email
                )));
            }
            let account = Account {
                uid: rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(UID_LEN)
                    .map(char::from)
                    .collect(),
                password: password.to_string(),
                display_name: None,
                claims: JsonMap::new(),
            };
            let user = account.to_user(&email);
            accounts.insert(email, account);
            user
        };
        info!("Created account {}", user.uid);
        self.set_current(Some(user.clone()))?;
        Ok(user)
    }

    async fn update_display_name(&self, display_name: &str) -> AppResult<ProviderUser> {
        let signed_out = || AppError::AuthError("no user signed in".to_string());
        let email = self.current_user().map(|user| user.email).ok_or_else(signed_out)?;

        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        if let Some(account) = accounts.get_mut(&email) {
            account.display_name = Some(display_name.to_string());
        }
        let mut current = self.current.write().map_err(|_| poisoned())?;
        let user = current
            .as_mut()
            .filter(|user| user.email == email)
            .ok_or_else(signed_out)?;
        user.display_name = Some(display_name.to_string());
        Ok(user.clone())
    }

    async fn sign_out(&self) -> AppResult<()> {
        info!("Signing out");
        self.set_current(None)
    }

    async fn id_token(&self, force_refresh: bool) -> AppResult<String> {
        let user = self
            .current_user()
            .ok_or_else(|| AppError::AuthError("no user signed in".to_string()))?;
        let serial = self.issued_tokens.fetch_add(1, Ordering::SeqCst);
        if force_refresh {
            debug!("Refreshing token for {}", user.uid);
        }
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Ok(format!("{}.{}.{}", user.uid, serial, nonce))
    }

    fn current_user(&self) -> Option<ProviderUser> {
        self.current.read().ok().and_then(|current| current.clone())
    }

    fn add_listener(&self, listener: IdentityListener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.insert(id, listener.clone());
        }
        listener(self.current_user().as_ref());
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.remove(&id);
        }
    }
}
