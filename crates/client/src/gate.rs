//! Keeps the push channel open exactly while the session is authenticated.

use std::sync::{Arc, Mutex, Weak};

use synonymer_shared::ApiError;
use tracing::debug;

use crate::push::PushChannel;
use crate::session::{AuthStatus, SessionStore};

struct Inner {
    session: SessionStore,
    push: PushChannel,
    /// Status the channel was last reconciled against.
    applied: Mutex<AuthStatus>,
}

impl Inner {
    fn apply(&self, status: AuthStatus) {
        let mut applied = self
            .applied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *applied == status {
            return;
        }

        debug!(from = ?*applied, to = ?status, "session transition");
        if status.is_authenticated() {
            self.push.close();
            self.push.open();
        } else if applied.is_authenticated() {
            self.push.close();
        }
        *applied = status;
    }
}

/// Drives [`PushChannel::open`]/[`PushChannel::close`] from session transitions.
///
/// The gate hooks into the [`SessionStore`], so the channel follows every
/// transition before the session call that caused it returns, whoever made
/// the call.
#[derive(Clone)]
pub struct SessionGate {
    inner: Arc<Inner>,
}

impl SessionGate {
    pub fn new(session: SessionStore, push: PushChannel) -> Self {
        let inner = Arc::new(Inner {
            session: session.clone(),
            push,
            applied: Mutex::new(AuthStatus::Unknown),
        });

        let gate: Weak<Inner> = Arc::downgrade(&inner);
        session.on_transition(move |status| {
            if let Some(gate) = gate.upgrade() {
                gate.apply(status);
            }
        });

        let gate = Self { inner };
        gate.sync();
        gate
    }

    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    pub fn push(&self) -> &PushChannel {
        &self.inner.push
    }

    /// Reconcile the channel with the session's current status.
    pub fn sync(&self) {
        self.inner.apply(self.inner.session.state());
    }

    pub async fn check_auth(&self) -> bool {
        self.inner.session.check_auth().await
    }

    /// Log in and (re)open the channel on success, even if the session was
    /// already authenticated before.
    pub async fn login(&self, password: &str) -> Result<bool, ApiError> {
        let was_authenticated = self.inner.session.state().is_authenticated();
        let result = self.inner.session.login(password).await;
        if was_authenticated && matches!(result, Ok(true)) {
            // no transition fired; reconnect so the new cookie is used
            let _applied = self
                .inner
                .applied
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.inner.push.close();
            self.inner.push.open();
        }
        result
    }

    /// Close the channel, then end the session.
    pub async fn logout(&self) {
        {
            let mut applied = self
                .inner
                .applied
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.inner.push.close();
            *applied = AuthStatus::Unauthenticated;
        }
        self.inner.session.logout().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api_client::ApiClient;
    use crate::config::ClientConfig;
    use crate::explanations::keys;
    use crate::notify::Notifier;
    use crate::push::{ConnectionState, ReconnectConfig};
    use crate::query_cache::{QueryCache, QueryOptions};

    fn gate() -> (SessionGate, QueryCache) {
        let config = ClientConfig::new("http://127.0.0.1:9");
        let api = ApiClient::new(&config).unwrap();
        let cache = QueryCache::new();
        let session = SessionStore::new(
            api.clone(),
            cache.clone(),
            QueryOptions::stale_after(Duration::from_secs(300)),
        );
        let reconnect = ReconnectConfig {
            max_attempts: 1,
            initial_delay_ms: 10_000,
            ..ReconnectConfig::default()
        };
        let push = PushChannel::new(cache.clone(), Notifier::default(), reconnect, move || {
            api.push_request().ok()
        });
        (SessionGate::new(session, push), cache)
    }

    #[tokio::test]
    async fn unauthenticated_check_never_opens_the_channel() {
        let (gate, _cache) = gate();
        let states = gate.push().watch_state();

        assert!(!gate.check_auth().await);

        assert_eq!(gate.push().state(), ConnectionState::default());
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn authenticated_check_opens_and_logout_closes() {
        let (gate, cache) = gate();
        cache
            .get_or_fetch(
                keys::auth_check(),
                QueryOptions::stale_after(Duration::from_secs(300)),
                || async {
                    Ok(synonymer_shared::AuthCheckResponse {
                        authenticated: true,
                    })
                },
            )
            .await
            .unwrap();

        assert!(gate.check_auth().await);
        assert!(gate.push().state().is_active());

        gate.logout().await;
        assert_eq!(gate.push().state(), ConnectionState::default());
        assert_eq!(gate.session().state(), AuthStatus::Unauthenticated);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn store_transitions_move_the_channel_directly() {
        let (gate, cache) = gate();
        cache
            .get_or_fetch(
                keys::auth_check(),
                QueryOptions::stale_after(Duration::from_secs(300)),
                || async {
                    Ok(synonymer_shared::AuthCheckResponse {
                        authenticated: true,
                    })
                },
            )
            .await
            .unwrap();
        let session = gate.session().clone();

        assert!(session.check_auth().await);
        assert!(gate.push().state().is_active());

        session.reset();
        assert_eq!(gate.push().state(), ConnectionState::default());
    }
}
