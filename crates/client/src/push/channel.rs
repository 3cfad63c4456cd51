//! Push channel backed by tokio-tungstenite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use synonymer_shared::{PushMessage, CLOSE_POLICY_VIOLATION};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::{CloseReason, ConnectionState, ReconnectConfig};
use crate::explanations::keys;
use crate::notify::Notifier;
use crate::query_cache::QueryCache;

/// Builds the handshake request; called again before every reconnect so
/// that a refreshed session cookie is picked up. `None` skips the attempt.
type RequestBuilder = Arc<dyn Fn() -> Option<Request> + Send + Sync>;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How one connected session ended.
enum SessionEnd {
    /// `close()` was called.
    Shutdown,
    /// The server refused the session.
    AuthRejected,
    /// Anything else; eligible for reconnect.
    Lost(String),
}

struct Run {
    generation: u64,
    shutdown: watch::Sender<bool>,
}

struct Inner {
    cache: QueryCache,
    notifier: Notifier,
    request_builder: RequestBuilder,
    reconnect: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<PushMessage>,
    run: Mutex<Option<Run>>,
    generations: AtomicU64,
}

fn lock(run: &Mutex<Option<Run>>) -> MutexGuard<'_, Option<Run>> {
    run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        lock(&self.run)
            .as_ref()
            .is_some_and(|run| run.generation == generation)
    }

    /// Publish `state` unless this run has been superseded or closed.
    fn set_state_if_current(&self, generation: u64, state: ConnectionState) -> bool {
        let run = lock(&self.run);
        if run.as_ref().is_some_and(|r| r.generation == generation) {
            self.state.send_replace(state);
            true
        } else {
            false
        }
    }

    /// End this run from inside its own task.
    fn finish(&self, generation: u64, reason: CloseReason) {
        let mut run = lock(&self.run);
        if run.as_ref().is_some_and(|r| r.generation == generation) {
            *run = None;
            self.state.send_replace(ConnectionState::Closed(reason));
        }
    }

    fn handle_text(&self, text: &str) {
        let message = match PushMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, frame = %text, "dropping unparseable push frame");
                return;
            }
        };

        match &message {
            PushMessage::ExplanationReady { id } => {
                info!(%id, "explanation ready");
                self.cache.invalidate(&keys::lists());
                self.cache.invalidate(&keys::detail(id));
            }
            PushMessage::ExplanationError { id, error } => {
                warn!(id = ?id, %error, "explanation generation failed");
                self.notifier.error("Error generating explanation");
            }
        }

        let _ = self.events.send(message);
    }
}

/// A single managed realtime connection.
///
/// Cloning gives another handle to the same channel.
#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<Inner>,
}

impl PushChannel {
    pub fn new(
        cache: QueryCache,
        notifier: Notifier,
        reconnect: ReconnectConfig,
        request_builder: impl Fn() -> Option<Request> + Send + Sync + 'static,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let (events, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Inner {
                cache,
                notifier,
                request_builder: Arc::new(request_builder),
                reconnect,
                state,
                events,
                run: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Every parsed push message, after the cache has been updated.
    pub fn events(&self) -> broadcast::Receiver<PushMessage> {
        self.inner.events.subscribe()
    }

    /// Start connecting. Does nothing while a connection is open or in
    /// progress. Must be called from within a tokio runtime.
    pub fn open(&self) {
        let mut run = lock(&self.inner.run);
        if run.is_some() {
            debug!(state = ?self.state(), "push channel already running");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!("cannot open push channel outside of a tokio runtime");
                return;
            }
        };

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown, shutdown_rx) = watch::channel(false);
        self.inner.state.send_replace(ConnectionState::Connecting);
        runtime.spawn(run_connection(
            self.inner.clone(),
            generation,
            shutdown_rx,
        ));

        *run = Some(Run {
            generation,
            shutdown,
        });
        info!(generation, "push channel opening");
    }

    /// Stop the channel: cancels a pending reconnect and closes the socket.
    /// Idempotent; a terminal close reason is left in place when nothing runs.
    pub fn close(&self) {
        let mut run = lock(&self.inner.run);
        if let Some(current) = run.take() {
            let _ = current.shutdown.send(true);
            self.inner
                .state
                .send_replace(ConnectionState::Closed(CloseReason::Requested));
            info!(generation = current.generation, "push channel closed");
        }
    }
}

/// Connection management loop, one per `open()`.
async fn run_connection(
    inner: Arc<Inner>,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;

    loop {
        let outcome = match (inner.request_builder)() {
            None => SessionEnd::Lost("no push endpoint available".to_string()),
            Some(request) => {
                let url = request.uri().to_string();
                if !inner.set_state_if_current(generation, ConnectionState::Connecting) {
                    return;
                }

                let handshake = tokio::time::timeout(
                    inner.reconnect.connect_timeout(),
                    connect_async(request),
                );
                let connected = tokio::select! {
                    biased;
                    _ = shutdown.changed() => return,
                    result = handshake => result,
                };

                match connected {
                    Err(_elapsed) => SessionEnd::Lost(format!(
                        "handshake timed out after {}ms",
                        inner.reconnect.connect_timeout_ms
                    )),
                    Ok(Ok((socket, _response))) => {
                        if !inner.set_state_if_current(generation, ConnectionState::Open) {
                            return;
                        }
                        attempt = 0;
                        info!(%url, "push channel open");
                        run_session(&inner, generation, socket, &mut shutdown).await
                    }
                    Ok(Err(e)) => classify_handshake_error(e),
                }
            }
        };

        match outcome {
            SessionEnd::Shutdown => return,
            SessionEnd::AuthRejected => {
                warn!("push channel rejected by server, not reconnecting");
                inner.finish(generation, CloseReason::AuthFailure);
                return;
            }
            SessionEnd::Lost(reason) => {
                warn!(%reason, attempt, "push channel lost");

                if !inner.reconnect.may_retry(attempt) {
                    error!(
                        max_attempts = inner.reconnect.max_attempts,
                        "push channel giving up"
                    );
                    inner.finish(generation, CloseReason::RetriesExhausted);
                    inner
                        .notifier
                        .error("Lost connection to the server; updates are paused");
                    return;
                }

                let delay = inner.reconnect.delay_for_attempt(attempt);
                attempt += 1;
                if !inner.set_state_if_current(generation, ConnectionState::Reconnecting { attempt })
                {
                    return;
                }
                info!(delay_ms = delay.as_millis() as u64, attempt, "reconnecting push channel");

                tokio::select! {
                    biased;
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn run_session(
    inner: &Inner,
    generation: u64,
    socket: Socket,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                let goodbye = write.send(Message::Close(None));
                if tokio::time::timeout(Duration::from_secs(1), goodbye).await.is_err() {
                    debug!("close frame not acknowledged in time");
                }
                return SessionEnd::Shutdown;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !inner.is_current(generation) {
                        return SessionEnd::Shutdown;
                    }
                    debug!(frame = %text.as_str(), "push frame");
                    inner.handle_text(text.as_str());
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    if code == Some(CLOSE_POLICY_VIOLATION) {
                        return SessionEnd::AuthRejected;
                    }
                    return SessionEnd::Lost(format!("closed by server (code {code:?})"));
                }
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong itself
                }
                Some(Ok(_)) => {
                    // binary and pong frames carry nothing for us
                }
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("stream ended".to_string()),
            }
        }
    }
}

fn classify_handshake_error(error: tungstenite::Error) -> SessionEnd {
    if let tungstenite::Error::Http(response) = &error {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return SessionEnd::AuthRejected;
        }
    }
    SessionEnd::Lost(error.to_string())
}
