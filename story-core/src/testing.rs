//! Testing utilities.
//!
//! `MockBackend` stands in for the generative backend so the server, the
//! dispatcher and the client can be exercised without API calls.

use crate::backend::{BackendError, StoryBackend};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A backend that echoes prompts or returns scripted responses.
///
/// Clones share state, so a test can keep one clone for assertions while
/// the server owns another.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    script: Mutex<Script>,
    log: Mutex<CallLog>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Default)]
struct Script {
    reject_auth: bool,
    failure: Option<String>,
    responses: VecDeque<String>,
    extraction: Option<String>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct CallLog {
    auth: usize,
    generate: Vec<String>,
    extract: Vec<(String, serde_json::Value)>,
}

impl MockBackend {
    /// A backend that authenticates and echoes every prompt.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echo() -> Self {
        Self::new()
    }

    /// Queue a generation response. Once the queue is empty, prompts are
    /// echoed again.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.script().responses.push_back(text.into());
        self
    }

    /// Fixed JSON returned by every extraction call.
    pub fn with_extraction(self, json: impl Into<String>) -> Self {
        self.script().extraction = Some(json.into());
        self
    }

    /// Sleep this long inside every generation and extraction call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.script().delay = Some(delay);
        self
    }

    /// Answer the authentication probe with `false`.
    pub fn rejecting_auth(self) -> Self {
        self.script().reject_auth = true;
        self
    }

    /// Fail every call (authentication included) with `message`.
    pub fn failing(self, message: impl Into<String>) -> Self {
        self.script().failure = Some(message.into());
        self
    }

    pub fn auth_calls(&self) -> usize {
        self.log().auth
    }

    /// Prompts received by `generate`, in call order.
    pub fn generate_calls(&self) -> Vec<String> {
        self.log().generate.clone()
    }

    /// `(text, schema)` pairs received by `extract_structured`.
    pub fn extract_calls(&self) -> Vec<(String, serde_json::Value)> {
        self.log().extract.clone()
    }

    /// Highest number of backend calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, CallLog> {
        self.inner.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> Result<InFlight<'_>, BackendError> {
        let (failure, delay) = {
            let script = self.script();
            (script.failure.clone(), script.delay)
        };

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.inner.in_flight);

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(BackendError::Failed(message)),
            None => Ok(guard),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoryBackend for MockBackend {
    async fn authenticate(&self) -> Result<bool, BackendError> {
        self.log().auth += 1;
        let script = self.script();
        match &script.failure {
            Some(message) => Err(BackendError::Failed(message.clone())),
            None => Ok(!script.reject_auth),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        self.log().generate.push(prompt.to_string());
        let _guard = self.enter().await?;

        let scripted = self.script().responses.pop_front();
        Ok(scripted.unwrap_or_else(|| prompt.to_string()))
    }

    async fn extract_structured(
        &self,
        text: &str,
        schema: &serde_json::Value,
    ) -> Result<String, BackendError> {
        self.log()
            .extract
            .push((text.to_string(), schema.clone()));
        let _guard = self.enter().await?;

        let scripted = self.script().extraction.clone();
        if let Some(json) = scripted {
            return Ok(json);
        }
        let summary: String = text.chars().take(80).collect();
        let record = serde_json::json!({
            "name": "Untitled",
            "summary": summary,
            "characters": [],
            "locations": [],
        });
        Ok(record.to_string())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (auth, generate, extract) = {
            let log = self.log();
            (log.auth, log.generate.len(), log.extract.len())
        };
        f.debug_struct("MockBackend")
            .field("auth_calls", &auth)
            .field("generate_calls", &generate)
            .field("extract_calls", &extract)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_and_script() {
        let backend = MockBackend::new().with_response("scripted");

        assert_eq!(backend.generate("first").await.unwrap(), "scripted");
        assert_eq!(backend.generate("second").await.unwrap(), "second");
        assert_eq!(backend.generate_calls(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_auth_modes() {
        assert!(MockBackend::new().authenticate().await.unwrap());
        assert!(!MockBackend::new().rejecting_auth().authenticate().await.unwrap());
        assert!(MockBackend::new().failing("down").authenticate().await.is_err());
    }

    #[tokio::test]
    async fn test_default_extraction_is_a_valid_document() {
        let backend = MockBackend::new();
        let json = backend
            .extract_structured("Once upon a time", &serde_json::json!({}))
            .await
            .unwrap();

        let doc = crate::document::StoryDocument::deserialize(&json).unwrap();
        assert_eq!(doc.name(), "Untitled");
        assert_eq!(doc.summary(), Some("Once upon a time"));
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_logged() {
        let backend = MockBackend::new().failing("quota");
        let result = backend.generate("x").await;
        assert!(matches!(result, Err(BackendError::Failed(m)) if m == "quota"));
        assert_eq!(backend.generate_calls().len(), 1);
        assert_eq!(backend.peak_concurrency(), 1);
    }
}
