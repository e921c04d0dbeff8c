pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use core::asr::{AsrConnection, AsrMode, AsrPool, PoolConfig, RecognitionEvent};
pub use core::llm::{LlmClient, ResponseFilter, strip_hidden_spans};
pub use core::session::{ConversationStore, SessionEvent, StreamingSession};
pub use errors::app_error::{AppError, AppResult};
pub use state::AppState;
