//! Per-user streaming session orchestration.
//!
//! A `StreamingSession` owns one user's lifecycle: it borrows a pooled ASR
//! connection (or opens a dedicated one), forwards inbound audio, runs a
//! listener task that polls recognition events, deduplicates finalized
//! transcripts, and streams filtered LLM replies back to the boundary. Any
//! transport failure triggers a single inline reconnect; a further failure
//! surfaces on the next audio frame, which triggers another attempt.

pub mod events;
pub mod history;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AsrConfig;
use crate::core::asr::{
    AsrConnection, AsrError, AsrMode, AsrPool, ControlFrame, PoolAcquire, RecognitionEvent,
    clean_transcript,
};
use crate::core::llm::{LlmClient, ResponseFilter, strip_hidden_spans};

pub use events::SessionEvent;
pub use history::{ConversationStore, Turn};

/// Poll window for the listener's liveness loop.
const LISTEN_POLL: Duration = Duration::from_secs(1);

/// Everything a session needs from the application.
#[derive(Clone)]
pub struct SessionContext {
    pub asr: AsrConfig,
    pub use_pool: bool,
    pub pool: Arc<AsrPool>,
    pub history: Arc<ConversationStore>,
    pub llm: Arc<LlmClient>,
}

/// How the session holds its ASR connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Borrowed from the shared pool; returned on teardown.
    Pooled,
    /// Exclusively owned; closed on teardown.
    Dedicated,
}

impl ConnectionMode {
    fn label(&self) -> &'static str {
        match self {
            Self::Pooled => "pool",
            Self::Dedicated => "dedicated",
        }
    }
}

/// State shared between the session, its listener task, and LLM calls.
struct SessionShared {
    id: String,
    events: mpsc::Sender<SessionEvent>,
    llm: Arc<LlmClient>,
    history: Arc<ConversationStore>,
    running: AtomicBool,
    /// In-flight guard: only one LLM call may be active per session.
    ai_speaking: AtomicBool,
    /// Rolling transcript of the current utterance.
    current_utterance: parking_lot::Mutex<String>,
    /// Last finalized transcript, for deduplication.
    last_final: parking_lot::Mutex<String>,
}

/// One user's streaming relay session.
pub struct StreamingSession {
    ctx: SessionContext,
    mode: ConnectionMode,
    shared: Arc<SessionShared>,
    conn: RwLock<Option<Arc<AsrConnection>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingSession {
    /// Create a session and register it with the history store.
    pub fn new(ctx: SessionContext, events: mpsc::Sender<SessionEvent>) -> Self {
        let id = ctx.history.create_session();
        let mode = if ctx.use_pool {
            ConnectionMode::Pooled
        } else {
            ConnectionMode::Dedicated
        };

        let shared = Arc::new(SessionShared {
            id,
            events,
            llm: ctx.llm.clone(),
            history: ctx.history.clone(),
            running: AtomicBool::new(true),
            ai_speaking: AtomicBool::new(false),
            current_utterance: parking_lot::Mutex::new(String::new()),
            last_final: parking_lot::Mutex::new(String::new()),
        });

        Self {
            ctx,
            mode,
            shared,
            conn: RwLock::new(None),
            listener: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Greet the boundary and establish the ASR leg.
    pub async fn start(&self) {
        let _ = self
            .shared
            .events
            .send(SessionEvent::ConnectionEstablished {
                session_id: self.shared.id.clone(),
                active_sessions: self.ctx.history.active_sessions(),
            })
            .await;

        self.connect_asr().await;
    }

    /// Forward one inbound audio frame to the ASR connection.
    ///
    /// Never blocks on recognition results. A dead or failing connection
    /// triggers one inline reconnect attempt.
    pub async fn forward_audio(&self, pcm: &[u8]) {
        let conn = { self.conn.read().await.clone() };
        let Some(conn) = conn else {
            debug!("Dropping audio frame: session {} has no ASR leg", self.shared.id);
            return;
        };

        if !conn.is_connected() {
            warn!("Session {} ASR connection is down, reconnecting", self.shared.id);
            self.reconnect().await;
            return;
        }

        if let Err(e) = conn.send_audio(pcm).await {
            error!("Session {} failed to forward audio: {}", self.shared.id, e);
            self.reconnect().await;
        }
    }

    /// Clear this session's conversation history.
    pub async fn reset_conversation(&self) {
        self.ctx.history.reset(&self.shared.id);
        let _ = self
            .shared
            .events
            .send(SessionEvent::ConversationReset {
                message: "Conversation history cleared".to_string(),
            })
            .await;
    }

    /// Probe the LLM provider and relay the result.
    pub async fn test_llm(&self) {
        let report = self.ctx.llm.test_connection().await;
        let _ = self
            .shared
            .events
            .send(SessionEvent::LlmTestResult { result: report })
            .await;
    }

    /// Tear the session down. Safe to call even if setup partially failed.
    pub async fn teardown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }

        if let Some(conn) = self.conn.write().await.take() {
            match self.mode {
                ConnectionMode::Pooled => self.ctx.pool.release(&self.shared.id).await,
                ConnectionMode::Dedicated => conn.disconnect(),
            }
        }

        self.ctx.history.remove_session(&self.shared.id);
        info!("Session {} torn down", self.shared.id);
    }

    /// Acquire or open a connection, notify the boundary, start listening.
    async fn connect_asr(&self) -> bool {
        match self.open_connection().await {
            Ok(conn) => {
                *self.conn.write().await = Some(conn.clone());

                let pool_stats = match self.mode {
                    ConnectionMode::Pooled => Some(self.ctx.pool.stats().await),
                    ConnectionMode::Dedicated => None,
                };
                let _ = self
                    .shared
                    .events
                    .send(SessionEvent::AsrConnected {
                        message: format!(
                            "ASR backend connected ({} mode)",
                            self.mode.label()
                        ),
                        connection_mode: self.mode.label(),
                        pool_stats,
                    })
                    .await;

                self.spawn_listener(conn).await;
                true
            }
            Err(e) => {
                error!("Session {} failed to reach ASR backend: {}", self.shared.id, e);
                let _ = self
                    .shared
                    .events
                    .send(SessionEvent::AsrConnectionFailed {
                        message: "Unable to reach the ASR backend".to_string(),
                        error: e.to_string(),
                    })
                    .await;
                false
            }
        }
    }

    async fn open_connection(&self) -> Result<Arc<AsrConnection>, AsrError> {
        match self.mode {
            ConnectionMode::Pooled => match self.ctx.pool.acquire(&self.shared.id).await? {
                PoolAcquire::Connection(conn) => {
                    info!("Session {} bound to pooled ASR connection", self.shared.id);
                    Ok(conn)
                }
                PoolAcquire::Exhausted => Err(AsrError::ConnectionFailed(
                    "connection pool exhausted".to_string(),
                )),
            },
            ConnectionMode::Dedicated => {
                let conn = AsrConnection::connect(&self.ctx.asr).await?;
                conn.send_config(&ControlFrame::stream_start(&AsrMode::two_pass(), "stream"))
                    .await?;
                info!("Session {} opened dedicated ASR connection", self.shared.id);
                Ok(Arc::new(conn))
            }
        }
    }

    async fn spawn_listener(&self, conn: Arc<AsrConnection>) {
        let mut listener = self.listener.lock().await;
        if let Some(old) = listener.take() {
            old.abort();
        }
        let shared = self.shared.clone();
        *listener = Some(tokio::spawn(run_listener(shared, conn)));
    }

    /// Single inline reconnect: cancel the listener, give the current
    /// connection back, re-run the start sequence. Not retried in a loop.
    async fn reconnect(&self) {
        info!("Session {} reconnecting to ASR backend", self.shared.id);

        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }

        if let Some(conn) = self.conn.write().await.take() {
            match self.mode {
                ConnectionMode::Pooled => self.ctx.pool.release(&self.shared.id).await,
                ConnectionMode::Dedicated => conn.disconnect(),
            }
        }

        if self.connect_asr().await {
            info!("Session {} reconnected", self.shared.id);
        }
    }
}

/// Listener task: poll recognition events and drive the reply pipeline.
async fn run_listener(shared: Arc<SessionShared>, conn: Arc<AsrConnection>) {
    debug!("Session {} listener started", shared.id);

    while shared.running.load(Ordering::SeqCst) {
        if !conn.is_connected() {
            warn!("Session {} listener stopping: connection closed", shared.id);
            break;
        }

        match conn.receive(LISTEN_POLL).await {
            RecognitionEvent::NoEvent => continue,
            RecognitionEvent::Partial(text) => {
                *shared.current_utterance.lock() = text.clone();
                if shared.ai_speaking.load(Ordering::SeqCst) {
                    continue;
                }

                let display = clean_transcript(&text);
                if shared
                    .events
                    .send(SessionEvent::RecognitionPartial { text: display })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            RecognitionEvent::Final(text) => {
                *shared.current_utterance.lock() = text.clone();
                if shared.ai_speaking.load(Ordering::SeqCst) {
                    // Last-finalized-wins: no queueing of a second call
                    continue;
                }

                let display = clean_transcript(&text);
                if display.is_empty() {
                    continue;
                }
                {
                    let mut last = shared.last_final.lock();
                    if display == *last {
                        debug!("Session {} ignoring repeated transcript", shared.id);
                        continue;
                    }
                    *last = display.clone();
                }

                if shared
                    .events
                    .send(SessionEvent::RecognitionFinal {
                        text: display.clone(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }

                if !shared.ai_speaking.swap(true, Ordering::SeqCst) {
                    tokio::spawn(run_llm_exchange(shared.clone(), display));
                }
            }
        }
    }

    debug!("Session {} listener finished", shared.id);
}

/// One LLM exchange: stream the reply through the hidden-span filter,
/// persist the filtered copy, clear the in-flight guard.
async fn run_llm_exchange(shared: Arc<SessionShared>, user_text: String) {
    let _ = shared
        .events
        .send(SessionEvent::AiStart {
            user_text: user_text.clone(),
        })
        .await;

    let history = shared.history.history(&shared.id);

    match shared.llm.stream_chat(&user_text, &history).await {
        Ok(mut tokens) => {
            let mut filter = ResponseFilter::new();
            let mut full_response = String::new();
            let mut failed = false;

            while let Some(item) = tokens.recv().await {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                match item {
                    Ok(token) => {
                        full_response.push_str(&token);
                        let visible = filter.push(&token);
                        if !visible.is_empty() {
                            let _ = shared
                                .events
                                .send(SessionEvent::AiChunk { content: visible })
                                .await;
                        }
                    }
                    Err(e) => {
                        error!("Session {} LLM stream failed: {}", shared.id, e);
                        failed = true;
                        break;
                    }
                }
            }

            if failed {
                let _ = shared
                    .events
                    .send(SessionEvent::AiError {
                        error: "AI service is temporarily unavailable".to_string(),
                    })
                    .await;
            } else if shared.running.load(Ordering::SeqCst) {
                let tail = filter.finish();
                if !tail.is_empty() {
                    let _ = shared
                        .events
                        .send(SessionEvent::AiChunk { content: tail })
                        .await;
                }

                let persisted = strip_hidden_spans(&full_response);
                let _ = shared
                    .events
                    .send(SessionEvent::AiComplete {
                        full_response: persisted.clone(),
                    })
                    .await;
                shared.history.append_turn(&shared.id, &user_text, &persisted);
            }
        }
        Err(e) => {
            error!("Session {} LLM call failed: {}", shared.id, e);
            let _ = shared
                .events
                .send(SessionEvent::AiError {
                    error: "AI service is temporarily unavailable".to_string(),
                })
                .await;
        }
    }

    shared.ai_speaking.store(false, Ordering::SeqCst);
}
