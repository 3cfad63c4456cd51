//! Authentication state for the single user of the client.
//!
//! The status lives in a [`watch`] channel owned by [`SessionStore`]; every
//! change goes through `check_auth`, `login`, `logout` or `reset`.
//! Transition hooks run synchronously inside the call that caused the change,
//! before it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use synonymer_shared::{ApiError, AuthCheckResponse};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api_client::ApiClient;
use crate::explanations::keys;
use crate::query_cache::{QueryCache, QueryOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStatus {
    /// Nothing has been checked yet.
    #[default]
    Unknown,
    Authenticated,
    Unauthenticated,
}

impl AuthStatus {
    pub fn is_authenticated(self) -> bool {
        self == AuthStatus::Authenticated
    }
}

type TransitionHook = Arc<dyn Fn(AuthStatus) + Send + Sync>;

struct Inner {
    api: ApiClient,
    cache: QueryCache,
    auth_options: QueryOptions,
    status: watch::Sender<AuthStatus>,
    /// Bumped whenever the session is torn down, so that checks started
    /// before a logout cannot resurrect it.
    epoch: AtomicU64,
    hooks: Mutex<Vec<TransitionHook>>,
}

/// Session service. Cloning gives another handle to the same session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("status", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(api: ApiClient, cache: QueryCache, auth_options: QueryOptions) -> Self {
        let (status, _) = watch::channel(AuthStatus::Unknown);
        Self {
            inner: Arc::new(Inner {
                api,
                cache,
                auth_options,
                status,
                epoch: AtomicU64::new(0),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> AuthStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }

    /// Call `hook` with the new status on every transition. The hook runs on
    /// the caller's task and must not block or call back into the store.
    pub fn on_transition(&self, hook: impl Fn(AuthStatus) + Send + Sync + 'static) {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(hook));
    }

    /// Forget what we know and go back to `Unknown`.
    pub fn reset(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = self.inner.status.send_replace(AuthStatus::Unknown);
        self.transitioned(previous, AuthStatus::Unknown);
    }

    fn set(&self, epoch: u64, status: AuthStatus) {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!(?status, "ignoring auth result from an ended session");
            return;
        }
        let previous = self.inner.status.send_replace(status);
        self.transitioned(previous, status);
    }

    fn transitioned(&self, previous: AuthStatus, status: AuthStatus) {
        if previous == status {
            return;
        }
        info!(from = ?previous, to = ?status, "auth status changed");
        let hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for hook in hooks {
            hook(status);
        }
    }

    /// Whether the session cookie is valid. A recent positive or negative
    /// answer is reused; a failed check counts as logged out.
    pub async fn check_auth(&self) -> bool {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let key = keys::auth_check();

        if let Some(cached) = self
            .inner
            .cache
            .get_fresh_query_data::<AuthCheckResponse>(&key)
        {
            debug!(authenticated = cached.authenticated, "auth check served from cache");
            self.set(epoch, status_for(cached.authenticated));
            return cached.authenticated;
        }

        let api = self.inner.api.clone();
        let result = self
            .inner
            .cache
            .get_or_fetch(key, self.inner.auth_options, move || {
                let api = api.clone();
                async move { api.check_auth().await }
            })
            .await;

        let authenticated = match result {
            Ok(response) => response.authenticated,
            Err(e) => {
                warn!(error = %e, "auth check failed, treating session as logged out");
                false
            }
        };
        self.set(epoch, status_for(authenticated));
        authenticated
    }

    /// Log in with the shared password and re-derive the status from the
    /// server. Returns whether the session is now authenticated.
    pub async fn login(&self, password: &str) -> Result<bool, ApiError> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        if let Err(e) = self.inner.api.login(password).await {
            warn!(error = %e, "login failed");
            self.set(epoch, AuthStatus::Unauthenticated);
            return Err(e);
        }

        info!("login accepted");
        self.inner.cache.invalidate(&keys::auth_check());
        Ok(self.check_auth().await)
    }

    /// End the session. The server call is best effort; local state is
    /// cleared regardless. Hooks see `Unauthenticated` before the cache is
    /// cleared.
    pub async fn logout(&self) {
        if let Err(e) = self.inner.api.logout().await {
            warn!(error = %e, "logout request failed, clearing local session anyway");
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.set(epoch, AuthStatus::Unauthenticated);
        self.inner.cache.reset();
        info!("logged out");
    }
}

fn status_for(authenticated: bool) -> AuthStatus {
    if authenticated {
        AuthStatus::Authenticated
    } else {
        AuthStatus::Unauthenticated
    }
}
