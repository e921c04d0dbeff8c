//! LLM completion client and reply filtering.

pub mod client;
pub mod filter;

pub use client::{LlmClient, LlmError, LlmTestReport};
pub use filter::{ResponseFilter, strip_hidden_spans};
