//! Claude backend over the Anthropic Messages API.
//!
//! Generation is a single-turn text completion. Extraction forces the model
//! to call one tool whose input schema is the document schema, and returns
//! the tool input as JSON.

use super::{BackendError, StoryBackend};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: usize = 4096;

const AUTH_PROBE: &str = "Please reply with just \"yes\". No other words should be included.";
const EXTRACT_TOOL: &str = "record_story";
const EXTRACT_TOOL_DESCRIPTION: &str =
    "Record the title, summary, characters and locations of a story.";

/// Claude-backed story generation.
#[derive(Clone)]
pub struct ClaudeBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: usize,
}

impl std::fmt::Debug for ClaudeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl ClaudeBackend {
    /// Create a backend with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Create a backend from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, BackendError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| BackendError::NoApiKey)?;
        Self::new(api_key)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the backend at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(self.build_headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status,
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }

    fn build_headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| BackendError::Failed(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn text_request(&self, prompt: &str) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![ApiMessage::user(prompt)],
            tools: None,
            tool_choice: None,
        }
    }

    fn extraction_request(&self, text: &str, schema: &serde_json::Value) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![ApiMessage::user(format!("Extract the story: {text}"))],
            tools: Some(vec![ApiTool {
                name: EXTRACT_TOOL.to_string(),
                description: EXTRACT_TOOL_DESCRIPTION.to_string(),
                input_schema: schema.clone(),
            }]),
            tool_choice: Some(ApiToolChoice {
                r#type: "tool".to_string(),
                name: Some(EXTRACT_TOOL.to_string()),
            }),
        }
    }
}

#[async_trait]
impl StoryBackend for ClaudeBackend {
    async fn authenticate(&self) -> Result<bool, BackendError> {
        let response = self.send(&self.text_request(AUTH_PROBE)).await?;
        let reply = response.text();
        Ok(reply.trim().trim_end_matches('.').eq_ignore_ascii_case("yes"))
    }

    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let response = self.send(&self.text_request(prompt)).await?;
        Ok(response.text())
    }

    async fn extract_structured(
        &self,
        text: &str,
        schema: &serde_json::Value,
    ) -> Result<String, BackendError> {
        let response = self.send(&self.extraction_request(text, schema)).await?;
        let input = response
            .tool_input(EXTRACT_TOOL)
            .ok_or(BackendError::MissingToolOutput)?;
        serde_json::to_string(input).map_err(|e| BackendError::Parse(e.to_string()))
    }

    fn name(&self) -> &str {
        "claude"
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ApiToolChoice>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

impl ApiMessage {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ApiToolChoice {
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

impl ApiResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ApiContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn tool_input(&self, tool: &str) -> Option<&serde_json::Value> {
        self.content.iter().find_map(|block| match block {
            ApiContent::ToolUse { name, input, .. } if name == tool => Some(input),
            _ => None,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    ToolUse {
        #[allow(dead_code)]
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}
