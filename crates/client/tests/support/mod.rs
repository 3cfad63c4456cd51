//! In-process fake of the synonymer backend for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use synonymer_client::{AppContext, ClientConfig, ReconnectConfig};
use synonymer_shared::{
    AuthCheckResponse, CreateExplanationRequest, EmotionalWeight, Explanation, ExplanationEntry,
    ExplanationPage, FormalityLevel, LoginRequest, LoginResponse, NuanceRequest, SynonymNuance,
    CLOSE_POLICY_VIOLATION,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

pub const PASSWORD: &str = "hemligt";
const SESSION_COOKIE: &str = "session=valid";

/// What the test wants the open sockets to do next.
#[derive(Debug, Clone)]
pub enum SocketCommand {
    Text(String),
    Close(u16),
}

#[derive(Default)]
pub struct Hits {
    pub auth_check: AtomicUsize,
    pub list: AtomicUsize,
    pub detail: AtomicUsize,
    pub nuances: AtomicUsize,
    pub ws_handshakes: AtomicUsize,
}

pub struct Backend {
    pub addr: SocketAddr,
    pub hits: Hits,
    /// Answer the listing with a 500.
    pub fail_list: AtomicBool,
    /// Answer the listing with a bare array instead of a page.
    pub bare_list: AtomicBool,
    /// Reject the session cookie everywhere, as if it expired server-side.
    pub expire_sessions: AtomicBool,
    explanations: Mutex<Vec<Explanation>>,
    next_id: AtomicUsize,
    sockets: broadcast::Sender<SocketCommand>,
    connected: watch::Sender<usize>,
}

impl Backend {
    /// Bind to an ephemeral port and serve in the background.
    pub async fn start() -> Arc<Backend> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sockets, _) = broadcast::channel(16);
        let (connected, _) = watch::channel(0);

        let backend = Arc::new(Backend {
            addr,
            hits: Hits::default(),
            fail_list: AtomicBool::new(false),
            bare_list: AtomicBool::new(false),
            expire_sessions: AtomicBool::new(false),
            explanations: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            sockets,
            connected,
        });

        let app = Router::new()
            .route("/api/auth/check", get(auth_check))
            .route("/api/auth/login", post(login))
            .route("/api/auth/logout", post(logout))
            .route("/api/explanations", get(list).post(create))
            .route("/api/explanations/nuances", post(nuances))
            .route(
                "/api/explanations/{id}",
                get(detail).put(regenerate).delete(remove),
            )
            .route("/api/ws", get(ws))
            .with_state(backend.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        backend
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointed at this backend, with fast reconnects.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.base_url());
        config.reconnect = ReconnectConfig {
            max_attempts: 3,
            initial_delay_ms: 20,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            connect_timeout_ms: 2_000,
        };
        config
    }

    pub fn context(&self) -> AppContext {
        AppContext::new(self.config()).unwrap()
    }

    /// Store a word whose explanation is already generated.
    pub fn insert(&self, word: &str) -> String {
        let mut explanation = self.new_explanation(word);
        explanation.entries.push(entry_for(word));
        let id = explanation.id.clone();
        self.explanations.lock().unwrap().push(explanation);
        id
    }

    /// Finish generating `id` and announce it on every open socket.
    pub fn complete(&self, id: &str) {
        {
            let mut explanations = self.explanations.lock().unwrap();
            let explanation = explanations
                .iter_mut()
                .find(|e| e.id == id)
                .expect("unknown id");
            let entry = entry_for(&explanation.word);
            explanation.entries.push(entry);
        }
        self.send(SocketCommand::Text(format!(
            r#"{{"type":"explanation_ready","id":"{id}"}}"#
        )));
    }

    pub fn send(&self, command: SocketCommand) {
        let _ = self.sockets.send(command);
    }

    /// Wait until `count` sockets have connected over the backend's lifetime.
    pub async fn wait_for_connections(&self, count: usize) {
        let mut connected = self.connected.subscribe();
        tokio::time::timeout(Duration::from_secs(5), connected.wait_for(|n| *n >= count))
            .await
            .expect("timed out waiting for push connections")
            .unwrap();
    }

    fn new_explanation(&self, word: &str) -> Explanation {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        Explanation {
            id,
            word: word.to_string(),
            entries: Vec::new(),
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: None,
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.expire_sessions.load(Ordering::SeqCst) {
            return false;
        }
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.split(';').any(|c| c.trim() == SESSION_COOKIE))
    }

    fn find(&self, id: &str) -> Option<Explanation> {
        self.explanations
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }
}

fn entry_for(word: &str) -> ExplanationEntry {
    ExplanationEntry {
        explanation: format!("Explanation of {word}"),
        synonyms: vec![format!("{word}-synonym")],
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "detail": "Not authenticated" })),
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "detail": "Explanation not found" })),
    )
        .into_response()
}

async fn auth_check(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Json<AuthCheckResponse> {
    backend.hits.auth_check.fetch_add(1, Ordering::SeqCst);
    Json(AuthCheckResponse {
        authenticated: backend.authorized(&headers),
    })
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<LoginRequest>) -> Response {
    if body.password != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "detail": "Incorrect password" })),
        )
            .into_response();
    }
    backend.expire_sessions.store(false, Ordering::SeqCst);
    (
        [(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/; HttpOnly"))],
        Json(LoginResponse {
            message: "Login successful".to_string(),
        }),
    )
        .into_response()
}

async fn logout() -> Response {
    (
        [(header::SET_COOKIE, "session=; Path=/; Max-Age=0".to_string())],
        Json(serde_json::json!({ "message": "Logged out" })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    query: Option<String>,
}

fn default_limit() -> usize {
    100
}

async fn list(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Query(params): Query<ListQuery>,
) -> Response {
    backend.hits.list.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    if backend.fail_list.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response();
    }

    let all: Vec<Explanation> = backend
        .explanations
        .lock()
        .unwrap()
        .iter()
        .filter(|e| match params.query.as_deref() {
            Some(q) => e.word.contains(q),
            None => true,
        })
        .cloned()
        .collect();

    if backend.bare_list.load(Ordering::SeqCst) {
        return Json(all).into_response();
    }

    Json(ExplanationPage {
        total: all.len() as u64,
        items: all.into_iter().skip(params.skip).take(params.limit).collect(),
        skip: params.skip as u32,
        limit: params.limit as u32,
    })
    .into_response()
}

async fn detail(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    backend.hits.detail.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    match backend.find(&id) {
        Some(explanation) => Json(explanation).into_response(),
        None => not_found(),
    }
}

async fn create(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<CreateExplanationRequest>,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let explanation = backend.new_explanation(&body.word);
    backend
        .explanations
        .lock()
        .unwrap()
        .push(explanation.clone());
    (StatusCode::CREATED, Json(explanation)).into_response()
}

async fn regenerate(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    match backend.find(&id) {
        Some(explanation) => Json(explanation).into_response(),
        None => not_found(),
    }
}

async fn remove(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let mut explanations = backend.explanations.lock().unwrap();
    let before = explanations.len();
    explanations.retain(|e| e.id != id);
    if explanations.len() == before {
        return not_found();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn nuances(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<NuanceRequest>,
) -> Response {
    backend.hits.nuances.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(SynonymNuance {
        nuance_explanation: format!("{} is milder than {}", body.word1, body.word2),
        usage_examples: vec![format!("Jag är {}.", body.word1)],
        context_differences: "Everyday speech".to_string(),
        formality_level: FormalityLevel::EquallyFormal,
        emotional_weight: EmotionalWeight::Word2Stronger,
        word1: body.word1,
        word2: body.word2,
    })
    .into_response()
}

async fn ws(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    backend.hits.ws_handshakes.fetch_add(1, Ordering::SeqCst);
    let authorized = backend.authorized(&headers);
    upgrade.on_upgrade(move |socket| serve_socket(backend, socket, authorized))
}

async fn serve_socket(backend: Arc<Backend>, mut socket: WebSocket, authorized: bool) {
    if !authorized {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "Not authenticated".into(),
            })))
            .await;
        return;
    }

    let mut commands = backend.sockets.subscribe();
    backend.connected.send_modify(|n| *n += 1);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(SocketCommand::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(SocketCommand::Close(code)) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "closing".into(),
                        })))
                        .await;
                    return;
                }
                Err(_) => return,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
