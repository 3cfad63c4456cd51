//! Explanation reads and mutations routed through the query cache.

use synonymer_shared::{ApiError, Explanation, ExplanationPage, ListParams, SynonymNuance};
use tracing::{debug, info, warn};

use crate::api_client::ApiClient;
use crate::fuzzy;
use crate::notify::Notifier;
use crate::query_cache::{QueryCache, QueryOptions};

/// Canonical cache keys.
pub mod keys {
    use synonymer_shared::ListParams;

    use crate::query_cache::QueryKey;

    pub fn auth_check() -> QueryKey {
        QueryKey::from(["auth", "check"])
    }

    pub fn all() -> QueryKey {
        QueryKey::from(["explanations"])
    }

    /// Prefix of every listing, whatever its paging or filter.
    pub fn lists() -> QueryKey {
        all().child("list")
    }

    pub fn list(params: &ListParams) -> QueryKey {
        lists()
            .child(params.skip)
            .child(params.limit)
            .child(params.query.as_deref().unwrap_or(""))
    }

    pub fn detail(id: &str) -> QueryKey {
        all().child("detail").child(id)
    }

    pub fn nuances(id1: &str, id2: &str) -> QueryKey {
        QueryKey::from(["nuances", id1, id2])
    }
}

/// Query layer for the explanation resource.
#[derive(Debug, Clone)]
pub struct ExplanationQueries {
    api: ApiClient,
    cache: QueryCache,
    notifier: Notifier,
    options: QueryOptions,
    page_size: u32,
}

impl ExplanationQueries {
    pub fn new(
        api: ApiClient,
        cache: QueryCache,
        notifier: Notifier,
        options: QueryOptions,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            cache,
            notifier,
            options,
            page_size: page_size.max(1),
        }
    }

    pub async fn list(&self, params: ListParams) -> Result<ExplanationPage, ApiError> {
        let api = self.api.clone();
        let key = keys::list(&params);
        self.cache
            .get_or_fetch(key, self.options, move || {
                let api = api.clone();
                let params = params.clone();
                async move { Ok(api.list_explanations(&params).await) }
            })
            .await
    }

    pub async fn detail(&self, id: &str) -> Result<Explanation, ApiError> {
        let api = self.api.clone();
        let id = id.to_string();
        self.cache
            .get_or_fetch(keys::detail(&id), self.options, move || {
                let api = api.clone();
                let id = id.clone();
                async move { api.get_explanation(&id).await }
            })
            .await
    }

    pub async fn compare(&self, id1: &str, id2: &str) -> Result<SynonymNuance, ApiError> {
        let api = self.api.clone();
        let (first, second) = (id1.to_string(), id2.to_string());
        self.cache
            .get_or_fetch(keys::nuances(id1, id2), self.options, move || {
                let api = api.clone();
                let (first, second) = (first.clone(), second.clone());
                async move { api.compare_explanations(&first, &second).await }
            })
            .await
    }

    /// Rank every explanation against `query` locally.
    ///
    /// Walks the listing one cached page at a time until a short page or the
    /// reported total is reached, so a search costs `total / page_size`
    /// requests when the pages are not cached.
    pub async fn search(&self, query: &str) -> Result<Vec<Explanation>, ApiError> {
        let mut items = Vec::new();
        let mut skip = 0u32;
        loop {
            let page = self.list(ListParams::new(skip, self.page_size)).await?;
            let fetched = u32::try_from(page.items.len()).unwrap_or(u32::MAX);
            items.extend(page.items);
            if fetched < self.page_size || items.len() as u64 >= page.total {
                break;
            }
            skip = skip.saturating_add(fetched);
        }
        debug!(query, candidates = items.len(), "searching explanations");
        Ok(fuzzy::search_explanations(query, items))
    }

    /// Create an explanation; its entries are generated in the background.
    pub async fn create(&self, word: &str) -> Result<Explanation, ApiError> {
        let created = self
            .api
            .create_explanation(word)
            .await
            .map_err(|e| self.report("Failed to add word", e))?;

        info!(id = %created.id, word = %created.word, "explanation created");
        self.cache
            .set_query_data(keys::detail(&created.id), created.clone());
        self.cache.invalidate(&keys::lists());
        Ok(created)
    }

    /// Ask for a fresh entry to be generated.
    pub async fn update(&self, id: &str) -> Result<Explanation, ApiError> {
        let updated = self
            .api
            .update_explanation(id)
            .await
            .map_err(|e| self.report("Failed to regenerate explanation", e))?;

        self.cache
            .set_query_data(keys::detail(&updated.id), updated.clone());
        self.cache.invalidate(&keys::lists());
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.api
            .delete_explanation(id)
            .await
            .map_err(|e| self.report("Failed to delete explanation", e))?;

        info!(%id, "explanation deleted");
        self.cache.remove(&keys::detail(id));
        self.cache.invalidate(&keys::lists());
        Ok(())
    }

    fn report(&self, what: &str, error: ApiError) -> ApiError {
        warn!(error = %error, "{what}");
        self.notifier
            .error(format!("{what}: {}", error.user_message()));
        error
    }
}
