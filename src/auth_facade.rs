//! Email/password authentication over the backend's identity service.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::app_error::{AppError, AppResult};
use crate::backend_handle::BackendHandle;
use crate::identity::{IdentityListener, IdentityProvider, ListenerId, ProviderUser};

/// Role assumed when the provider carries no `role` claim.
pub const DEFAULT_ROLE: &str = "staff";

/// Read-only snapshot of the signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
}

impl From<&ProviderUser> for AuthUser {
    fn from(user: &ProviderUser) -> Self {
        let role = user
            .claims
            .get("role")
            .and_then(|role| role.as_str())
            .filter(|role| !role.is_empty())
            .unwrap_or(DEFAULT_ROLE);
        Self {
            id: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: role.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: AuthUser,
    pub token: String,
}

/// A registered identity-change callback. Released explicitly with
/// [`Subscription::release`] or when dropped.
pub struct Subscription {
    provider: Option<Arc<dyn IdentityProvider>>,
    id: ListenerId,
}

impl Subscription {
    pub fn release(&mut self) {
        if let Some(provider) = self.provider.take() {
            provider.remove_listener(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthFacade<'a> {
    handle: &'a BackendHandle,
}

impl<'a> AuthFacade<'a> {
    pub fn new(handle: &'a BackendHandle) -> Self {
        Self { handle }
    }

    fn provider(&self) -> AppResult<&'a Arc<dyn IdentityProvider>> {
        self.handle.identity().ok_or_else(|| {
            AppError::BackendUnavailable("identity service is not initialized".to_string())
        })
    }

    async fn session(
        &self,
        provider: &Arc<dyn IdentityProvider>,
        user: &ProviderUser,
    ) -> AppResult<AuthSession> {
        let token = provider.id_token(true).await?;
        Ok(AuthSession {
            user: AuthUser::from(user),
            token,
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let provider = self.provider()?;
        let result = match provider.sign_in_with_password(email, password).await {
            Ok(user) => self.session(provider, &user).await,
            Err(e) => Err(e),
        };
        result.inspect_err(|e| error!("signIn failed for {}: {}", email, e))
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> AppResult<AuthSession> {
        let provider = self.provider()?;
        let result = async {
            let mut user = provider.create_user(email, password).await?;
            if let Some(name) = display_name {
                user = provider.update_display_name(name).await?;
            }
            self.session(provider, &user).await
        }
        .await;
        if let Ok(session) = &result {
            info!("Registered {}", session.user.id);
        }
        result.inspect_err(|e| error!("signUp failed for {}: {}", email, e))
    }

    pub async fn sign_out(&self) -> AppResult<()> {
        self.provider()?
            .sign_out()
            .await
            .inspect_err(|e| error!("signOut failed: {}", e))
    }

    /// Fresh bearer token for the signed-in user.
    pub async fn id_token(&self, force_refresh: bool) -> AppResult<String> {
        self.provider()?.id_token(force_refresh).await
    }

    /// Calls `callback` with the current identity right away and after every
    /// later transition, until the returned subscription is released.
    pub fn on_auth_state_change<F>(&self, callback: F) -> AppResult<Subscription>
    where
        F: Fn(Option<&AuthUser>) + Send + Sync + 'static,
    {
        let provider = self.provider()?;
        let listener: IdentityListener = Arc::new(move |user: Option<&ProviderUser>| {
            let projected = user.map(AuthUser::from);
            callback(projected.as_ref());
        });
        let id = provider.add_listener(listener);
        Ok(Subscription {
            provider: Some(provider.clone()),
            id,
        })
    }

    /// One-shot read of the identity: subscribes, takes the first emission
    /// and releases the subscription. `None` without a backend.
    pub async fn get_current_user(&self) -> AppResult<Option<AuthUser>> {
        if !self.handle.is_available() {
            return Ok(None);
        }
        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let subscription = self.on_auth_state_change(move |user| {
            let pending = sender.lock().ok().and_then(|mut slot| slot.take());
            if let Some(pending) = pending {
                let _ = pending.send(user.cloned());
            }
        })?;
        let first = receiver.await;
        drop(subscription);
        first.map_err(|_| AppError::AuthError("identity stream closed".to_string()))
    }
}
