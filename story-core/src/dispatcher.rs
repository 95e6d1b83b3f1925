//! Request dispatcher.
//!
//! Decodes one request line, routes it by action to the backend and turns
//! every outcome into a `Reply`. No retries and no caching: each request is
//! a fresh backend call.

use crate::backend::{BackendError, StoryBackend};
use crate::document::StoryDocument;
use crate::protocol::{Action, Envelope, ProtocolError, Reply};
use std::sync::Arc;
use thiserror::Error;

/// Errors from dispatching a single request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Routes decoded envelopes to the generative backend.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn StoryBackend>,
    schema: Arc<serde_json::Value>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn StoryBackend>) -> Self {
        Self {
            backend,
            schema: Arc::new(StoryDocument::extraction_schema()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StoryBackend> {
        &self.backend
    }

    /// Decode and dispatch one request line.
    pub async fn handle_line(&self, line: &str) -> Reply {
        let result = match Envelope::decode(line) {
            Ok(envelope) => self.dispatch(&envelope).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(body) => Reply::Body(body),
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                Reply::error(e)
            }
        }
    }

    /// Dispatch an already decoded envelope.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<String, DispatchError> {
        tracing::debug!(
            action = %envelope.action,
            prompt_len = envelope.prompt.len(),
            backend = self.backend.name(),
            "dispatching request"
        );

        match &envelope.action {
            Action::CreateStory => Ok(self.backend.generate(&envelope.prompt).await?),
            Action::ExtractStory => Ok(self
                .backend
                .extract_structured(&envelope.prompt, &self.schema)
                .await?),
            Action::Unsupported(name) => Err(DispatchError::UnsupportedAction(name.clone())),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
