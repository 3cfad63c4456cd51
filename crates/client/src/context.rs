//! Wiring for the client core.

use synonymer_shared::ApiError;

use crate::api_client::ApiClient;
use crate::config::ClientConfig;
use crate::explanations::ExplanationQueries;
use crate::gate::SessionGate;
use crate::notify::Notifier;
use crate::push::PushChannel;
use crate::query_cache::{QueryCache, QueryOptions};
use crate::session::SessionStore;

/// Every service of the client, built once and shared by handle.
#[derive(Clone)]
pub struct AppContext {
    pub config: ClientConfig,
    pub api: ApiClient,
    pub cache: QueryCache,
    pub notifier: Notifier,
    pub session: SessionStore,
    pub push: PushChannel,
    pub gate: SessionGate,
    pub explanations: ExplanationQueries,
}

impl AppContext {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let api = ApiClient::new(&config)?;
        let cache = QueryCache::new();
        let notifier = Notifier::default();

        let session = SessionStore::new(
            api.clone(),
            cache.clone(),
            QueryOptions::stale_after(config.auth_stale_time),
        );

        let push_api = api.clone();
        let push = PushChannel::new(
            cache.clone(),
            notifier.clone(),
            config.reconnect.clone(),
            move || match push_api.push_request() {
                Ok(request) => Some(request),
                Err(e) => {
                    tracing::error!(error = %e, "cannot build push handshake");
                    None
                }
            },
        );

        let gate = SessionGate::new(session.clone(), push.clone());
        let explanations = ExplanationQueries::new(
            api.clone(),
            cache.clone(),
            notifier.clone(),
            QueryOptions::stale_after(config.query_stale_time),
            config.page_size,
        );

        Ok(Self {
            config,
            api,
            cache,
            notifier,
            session,
            push,
            gate,
            explanations,
        })
    }

    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(ClientConfig::from_env())
    }
}
