//! Environment-driven configuration.
//!
//! Values come from the process environment, with a `.env` file loaded
//! first when present.
//!
//! | variable            | default     |
//! |---------------------|-------------|
//! | `STORY_HOST`        | `localhost` |
//! | `STORY_PORT`        | `8888`      |
//! | `STORY_SAVE_DIR`    | `saves`     |
//! | `STORY_POOL_SIZE`   | `10`        |
//! | `STORY_POLICY`      | `narrative` |
//! | `STORY_MODEL`       | backend default |
//! | `ANTHROPIC_API_KEY` | none        |

use crate::backend::{BackendError, ClaudeBackend};
use crate::prompt::PromptPolicy;
use crate::server::{ServerConfig, DEFAULT_HOST, DEFAULT_POOL_SIZE, DEFAULT_PORT};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_SAVE_DIR: &str = "saves";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub save_dir: PathBuf,
    pub policy: PromptPolicy,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            policy: PromptPolicy::default(),
            api_key: None,
            model: None,
        }
    }
}

impl AppConfig {
    /// Load `.env` (if any) and read the configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let host = get("STORY_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match get("STORY_PORT") {
            Some(value) => parse_var("STORY_PORT", value)?,
            None => DEFAULT_PORT,
        };
        let pool_size: usize = match get("STORY_POOL_SIZE") {
            Some(value) => parse_var("STORY_POOL_SIZE", value)?,
            None => DEFAULT_POOL_SIZE,
        };
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                var: "STORY_POOL_SIZE",
                value: "0".to_string(),
                reason: "pool size must be at least 1".to_string(),
            });
        }
        let policy = match get("STORY_POLICY") {
            Some(value) => parse_var("STORY_POLICY", value)?,
            None => PromptPolicy::default(),
        };

        Ok(Self {
            server: ServerConfig::new(host, port).with_pool_size(pool_size),
            save_dir: get("STORY_SAVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_DIR)),
            policy,
            api_key: get("ANTHROPIC_API_KEY"),
            model: get("STORY_MODEL"),
        })
    }

    /// Build the Claude backend described by this configuration.
    pub fn claude_backend(&self) -> Result<ClaudeBackend, BackendError> {
        let api_key = self.api_key.as_deref().ok_or(BackendError::NoApiKey)?;
        let backend = ClaudeBackend::new(api_key)?;
        Ok(match &self.model {
            Some(model) => backend.with_model(model),
            None => backend,
        })
    }
}

fn parse_var<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.addr(), "localhost:8888");
        assert_eq!(config.server.pool_size, 10);
        assert_eq!(config.save_dir, PathBuf::from("saves"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("STORY_HOST", "0.0.0.0"),
            ("STORY_PORT", "9000"),
            ("STORY_POOL_SIZE", "4"),
            ("STORY_SAVE_DIR", "/tmp/stories"),
            ("STORY_POLICY", "dialogue"),
            ("STORY_MODEL", "claude-3-haiku"),
            ("ANTHROPIC_API_KEY", "sk-test"),
        ])
        .unwrap();

        assert_eq!(config.server.addr(), "0.0.0.0:9000");
        assert_eq!(config.server.pool_size, 4);
        assert_eq!(config.save_dir, PathBuf::from("/tmp/stories"));
        assert_eq!(config.policy, PromptPolicy::Dialogue);
        assert_eq!(config.model.as_deref(), Some("claude-3-haiku"));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("STORY_PORT", "  "), ("ANTHROPIC_API_KEY", "")]).unwrap();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("STORY_PORT", "eighty")]),
            Err(ConfigError::Invalid { var: "STORY_PORT", .. })
        ));
        assert!(matches!(
            config_from(&[("STORY_POOL_SIZE", "0")]),
            Err(ConfigError::Invalid { var: "STORY_POOL_SIZE", .. })
        ));
        assert!(matches!(
            config_from(&[("STORY_POLICY", "sonnet")]),
            Err(ConfigError::Invalid { var: "STORY_POLICY", .. })
        ));
    }

    #[test]
    fn test_claude_backend_requires_key() {
        let config = AppConfig::default();
        assert!(matches!(config.claude_backend(), Err(BackendError::NoApiKey)));

        let config = AppConfig {
            api_key: Some("sk-test".to_string()),
            model: Some("claude-3-haiku".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(config.claude_backend().unwrap().model(), "claude-3-haiku");
    }
}
