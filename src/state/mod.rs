use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::asr::{AsrPool, PoolConfig};
use crate::core::llm::LlmClient;
use crate::core::session::{ConversationStore, SessionContext};

/// Interval between inactive-session cleanup passes.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub pool: Arc<AsrPool>,
    pub history: Arc<ConversationStore>,
    pub llm: Arc<LlmClient>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let pool = AsrPool::new(
            config.asr.clone(),
            PoolConfig {
                min: config.pool.min_connections,
                max: config.pool.max_connections,
                max_idle: config.pool.max_idle,
            },
        );
        if config.pool.enabled {
            pool.initialize().await;
        }

        let history = Arc::new(ConversationStore::new(config.sessions.max_conversation_turns));
        let llm = Arc::new(LlmClient::new(config.llm.clone()));

        // Reap sessions whose client never came back
        let reaper_store = history.clone();
        let max_age = config.sessions.cleanup_after;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                reaper_store.cleanup_inactive(max_age);
            }
        });

        Arc::new(Self {
            config,
            pool,
            history,
            llm,
        })
    }

    /// Bundle of dependencies a streaming session needs.
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            asr: self.config.asr.clone(),
            use_pool: self.config.pool.enabled,
            pool: self.pool.clone(),
            history: self.history.clone(),
            llm: self.llm.clone(),
        }
    }
}
