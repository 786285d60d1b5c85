//! Model client interface and its local implementation.
//!
//! The orchestrator only depends on [`LlmClient`]; the local runtime lives
//! in [`local`], and remote HTTP clients are provided by the host
//! application. Remote implementations signal provider backoff with
//! [`LlmError::RateLimited`] so the orchestrator can sleep and retry.

use thiserror::Error;

use crate::types::FileType;

pub mod backend;
pub mod gguf;
pub mod local;

pub use backend::{BackendMemoryInfo, BackendProbes, GpuBackend, GpuLayers, MemoryInfo};
pub use local::{FallbackDecision, LocalLlmClient, LocalLlmOptions};

/// Errors raised by model clients.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Failed to initialize LLM backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreation(String),

    #[error("Failed to tokenize input: {0}")]
    Tokenization(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    /// The provider asked for backoff; the orchestrator sleeps
    /// `retry_after_seconds` and retries at most once.
    #[error("rate limit")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Timed out waiting for LLM response")]
    Timeout,

    #[error("Mutex poisoned - concurrent access failed")]
    MutexPoisoned,
}

/// Text-in, text-out categorization client.
///
/// Implementations must be callable from a background thread so the
/// orchestrator can enforce a wall-clock timeout.
pub trait LlmClient: Send + Sync {
    /// Asks the model for a `"<Category> : <Subcategory>"` line for one
    /// entry. `hint_context` carries the assembled whitelist/language/
    /// consistency block and may be empty.
    fn categorize_file(
        &self,
        file_name: &str,
        file_path: &str,
        file_type: FileType,
        hint_context: &str,
    ) -> Result<String, LlmError>;

    /// Free-form completion without output sanitation.
    fn complete_prompt(&self, prompt: &str, max_tokens: i32) -> Result<String, LlmError>;

    /// Toggles dev dumping of prompts and replies.
    fn set_prompt_logging_enabled(&self, enabled: bool);
}
