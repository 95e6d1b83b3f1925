//! Story generation server, protocol client and document repository.
//!
//! This crate provides:
//! - A story document model with characters and locations
//! - A file-backed repository of saved documents
//! - Prompt policies for story generation
//! - A line-based request/response protocol with a TCP server and client
//! - A Claude backend for generation and structured extraction
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use story_core::{AppConfig, StoryClient, StoryRepository, StoryServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!     let backend = Arc::new(config.claude_backend()?);
//!
//!     let server = StoryServer::start(&config.server, backend).await?;
//!     let addr = server.local_addr();
//!     tokio::spawn(server.run());
//!
//!     let mut client = StoryClient::connect(addr).await?;
//!     let story = client.compose_story(config.policy, "a lighthouse keeper", 2).await?;
//!
//!     let repository = StoryRepository::open(&config.save_dir).await?;
//!     repository.save(story).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod document;
pub mod pool;
pub mod prompt;
pub mod protocol;
pub mod repository;
pub mod server;
pub mod testing;

// Re-export for convenience
pub use story_macros::Schema;

// Primary public API
pub use backend::{BackendError, ClaudeBackend, StoryBackend};
pub use client::{ClientError, StoryClient};
pub use config::{AppConfig, ConfigError};
pub use dispatcher::{DispatchError, Dispatcher};
pub use document::{CharacterEntity, DocumentError, LocationEntity, StoryDocument, StoryRecord};
pub use pool::{PoolError, WorkerPool};
pub use prompt::{PromptError, PromptPolicy, QualityTier};
pub use protocol::{Action, Envelope, ProtocolError, Reply};
pub use repository::{RepositoryError, StoryRepository};
pub use server::{ServerConfig, ServerError, ShutdownHandle, StoryServer};
pub use testing::MockBackend;

#[cfg(test)]
mod tests {
    use super::*;

    /// A scene within a chapter
    #[derive(Schema)]
    #[schema(name = "scene")]
    #[allow(dead_code)]
    struct Scene {
        /// Where the scene happens
        setting: String,
        /// Number of pages
        pages: u32,
        /// Optional mood
        mood: Option<String>,
        #[schema(rename = "cast")]
        characters: Vec<CharacterEntity>,
        #[schema(skip)]
        draft: bool,
    }

    #[test]
    fn test_schema_derive() {
        assert_eq!(Scene::schema_name(), "scene");
        assert_eq!(Scene::schema_description(), "A scene within a chapter");
    }

    #[test]
    fn test_schema_properties() {
        let schema = Scene::json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["setting"]["type"], "string");
        assert_eq!(
            schema["properties"]["setting"]["description"],
            "Where the scene happens"
        );
        assert_eq!(schema["properties"]["pages"]["type"], "integer");
        assert_eq!(schema["properties"]["mood"]["type"], "string");
        assert_eq!(schema["properties"]["cast"]["type"], "array");
        assert_eq!(
            schema["properties"]["cast"]["items"],
            CharacterEntity::json_schema()
        );
        assert!(schema["properties"].get("draft").is_none());

        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("setting")));
        assert!(required.contains(&serde_json::json!("cast")));
        assert!(!required.contains(&serde_json::json!("mood")));
    }
}
