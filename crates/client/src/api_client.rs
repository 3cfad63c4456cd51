//! HTTP API client for the explanation resource and the auth endpoints.
//!
//! Every method is a single round trip with no caching; the query layer in
//! [`crate::explanations`] decides what to keep. Credentials travel as a
//! session cookie kept in a jar shared with the push-channel handshake.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use synonymer_shared::{
    ApiError, AuthCheckResponse, CreateExplanationRequest, Explanation,
    ExplanationPage, ListParams, LoginRequest, LoginResponse, NuanceRequest, SynonymNuance,
    WS_PATH,
};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tracing::{debug, warn};

use crate::config::ClientConfig;

const EXPLANATIONS: &str = "/api/explanations";

/// The listing endpoint either pages or (on older backends) returns every item.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Page(ExplanationPage),
    Items(Vec<Explanation>),
}

/// HTTP client for the synonymer backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    config: ClientConfig,
    cookies: Arc<Jar>,
}

impl ApiClient {
    /// Create a client for `config.base_url` with an empty cookie jar.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let cookies = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(cookies.clone())
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
            cookies,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        self.config.api_url(path)
    }

    async fn read_json<TRes: DeserializeOwned>(resp: reqwest::Response) -> Result<TRes, ApiError> {
        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::from_status(status, text));
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    async fn expect_success(resp: reqwest::Response) -> Result<(), ApiError> {
        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(());
        }
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;
        Err(ApiError::from_status(status, text))
    }

    /// Make a GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(resp).await
    }

    /// Make a POST request with JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let url = self.url(path);
        debug!(%url, "POST");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(resp).await
    }

    /// Make a PUT request without a body
    pub async fn put_empty<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        debug!(%url, "PUT");
        let resp = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(resp).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let url = self.url(path);
        debug!(%url, "DELETE");
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::expect_success(resp).await
    }

    // --- Auth ---

    /// Ask the server whether the session cookie is still valid.
    pub async fn check_auth(&self) -> Result<AuthCheckResponse, ApiError> {
        self.get_json("/api/auth/check").await
    }

    pub async fn login(&self, password: &str) -> Result<LoginResponse, ApiError> {
        if password.is_empty() {
            return Err(ApiError::Validation("Password must not be empty".to_string()));
        }
        self.post_json(
            "/api/auth/login",
            &LoginRequest {
                password: password.to_string(),
            },
        )
        .await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = self.url("/api/auth/logout");
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::expect_success(resp).await
    }

    // --- Explanations ---

    /// List explanations. Never fails: any error is logged and an empty page
    /// is returned, which looks the same as "no matches" to the caller.
    pub async fn list_explanations(&self, params: &ListParams) -> ExplanationPage {
        let mut path = format!("{EXPLANATIONS}?skip={}&limit={}", params.skip, params.limit);
        if let Some(query) = params.query.as_deref() {
            path.push_str("&query=");
            path.push_str(&urlencoding::encode(query));
        }

        match self.get_json::<ListResponse>(&path).await {
            Ok(ListResponse::Page(page)) => page,
            Ok(ListResponse::Items(items)) => {
                let total = items.len() as u64;
                ExplanationPage {
                    items: items
                        .into_iter()
                        .skip(params.skip as usize)
                        .take(params.limit as usize)
                        .collect(),
                    total,
                    skip: params.skip,
                    limit: params.limit,
                }
            }
            Err(e) => {
                warn!(error = %e, "listing explanations failed, returning an empty page");
                ExplanationPage::empty(params.skip, params.limit)
            }
        }
    }

    pub async fn get_explanation(&self, id: &str) -> Result<Explanation, ApiError> {
        self.get_json(&explanation_path(id)?).await
    }

    /// Create an explanation. The returned entity has no entries yet; they
    /// arrive asynchronously and are announced on the push channel.
    pub async fn create_explanation(&self, word: &str) -> Result<Explanation, ApiError> {
        let word = word.trim();
        if word.is_empty() {
            return Err(ApiError::Validation("Word must not be empty".to_string()));
        }
        self.post_json(
            EXPLANATIONS,
            &CreateExplanationRequest {
                word: word.to_string(),
            },
        )
        .await
    }

    /// Ask the backend to generate a new entry for an explanation.
    pub async fn update_explanation(&self, id: &str) -> Result<Explanation, ApiError> {
        self.put_empty(&explanation_path(id)?).await
    }

    pub async fn delete_explanation(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&explanation_path(id)?).await
    }

    /// Compare the words behind two explanation ids.
    pub async fn compare_explanations(
        &self,
        id1: &str,
        id2: &str,
    ) -> Result<SynonymNuance, ApiError> {
        let (first, second) = futures_util::future::try_join(
            self.get_explanation(id1),
            self.get_explanation(id2),
        )
        .await?;

        self.post_json(
            &format!("{EXPLANATIONS}/nuances"),
            &NuanceRequest {
                word1: first.word,
                word2: second.word,
            },
        )
        .await
    }

    // --- Push channel ---

    /// Handshake request for the push channel, carrying the session cookie.
    pub fn push_request(&self) -> Result<Request, ApiError> {
        let http_url = self.url(WS_PATH);
        let mut request = self
            .config
            .ws_url()
            .into_client_request()
            .map_err(|e| ApiError::Validation(format!("invalid push URL: {e}")))?;

        let parsed = url::Url::parse(&http_url)
            .map_err(|e| ApiError::Validation(format!("invalid push URL: {e}")))?;
        if let Some(cookie) = self.cookies.cookies(&parsed) {
            let value = cookie
                .to_str()
                .ok()
                .and_then(|raw| HeaderValue::from_str(raw).ok());
            if let Some(value) = value {
                request.headers_mut().insert(COOKIE, value);
            }
        }

        Ok(request)
    }
}

fn explanation_path(id: &str) -> Result<String, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::Validation("Explanation id must not be empty".to_string()));
    }
    Ok(format!("{EXPLANATIONS}/{}", urlencoding::encode(id)))
}
