//! Generative backends.
//!
//! The dispatcher only sees the `StoryBackend` capability: text generation
//! and schema-guided structured extraction. `ClaudeBackend` implements it on
//! top of the Anthropic Messages API; `testing::MockBackend` implements it
//! for tests.

pub mod claude;

use async_trait::async_trait;
use thiserror::Error;

pub use claude::ClaudeBackend;

/// Errors from a generative backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response contained no tool output")]
    MissingToolOutput,

    #[error("Backend failure: {0}")]
    Failed(String),
}

/// Text generation and structured extraction.
#[async_trait]
pub trait StoryBackend: Send + Sync {
    /// Check that the backend is reachable and the credentials work.
    ///
    /// `Ok(false)` means the backend answered but not as expected.
    async fn authenticate(&self) -> Result<bool, BackendError>;

    /// Generate free text for a prompt.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;

    /// Extract structured data from `text`, shaped by the JSON `schema`.
    ///
    /// Returns the structured document as JSON text.
    async fn extract_structured(
        &self,
        text: &str,
        schema: &serde_json::Value,
    ) -> Result<String, BackendError>;

    /// Provider name, for logs.
    fn name(&self) -> &str;
}
