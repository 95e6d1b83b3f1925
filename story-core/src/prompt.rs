//! Prompt policies.
//!
//! A policy turns a user topic and a quality tier into the prompt sent with
//! `CREATE_STORY`. Policies are a closed set selected by name, so adding a
//! style never touches the dispatcher.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from prompt construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Quality tier must be between 1 and 3, got {0}")]
    InvalidTier(u8),

    #[error("Unknown prompt policy: {0}")]
    UnknownPolicy(String),
}

/// Generation quality, from 1 (simplest) to 3 (most sophisticated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QualityTier(u8);

impl QualityTier {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    pub fn new(tier: u8) -> Result<Self, PromptError> {
        if (Self::MIN..=Self::MAX).contains(&tier) {
            Ok(Self(tier))
        } else {
            Err(PromptError::InvalidTier(tier))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Target length band in words.
    pub fn word_range(self) -> (u32, u32) {
        match self.0 {
            1 => (300, 500),
            2 => (500, 800),
            _ => (800, 1000),
        }
    }

    fn complexity(self) -> &'static str {
        if self.0 == 1 {
            "simple"
        } else {
            "complex"
        }
    }

    fn vocabulary(self) -> &'static str {
        match self.0 {
            1 => "basic, everyday vocabulary",
            2 => "higher-frequency, academic vocabulary",
            _ => "some low-frequency, context-specific vocabulary",
        }
    }
}

impl Default for QualityTier {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl TryFrom<u8> for QualityTier {
    type Error = PromptError;

    fn try_from(tier: u8) -> Result<Self, Self::Error> {
        Self::new(tier)
    }
}

/// How the generation prompt is phrased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptPolicy {
    /// A prose narrative.
    #[default]
    Narrative,
    /// A story told entirely through dialogue.
    Dialogue,
    /// A structured outline of the plot.
    Outline,
}

impl PromptPolicy {
    /// Every available policy.
    pub const ALL: [PromptPolicy; 3] = [Self::Narrative, Self::Dialogue, Self::Outline];

    /// Strategy label, as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Narrative => "NARRATIVE",
            Self::Dialogue => "DIALOGUE",
            Self::Outline => "OUTLINE",
        }
    }

    /// Build the generation prompt for `topic`.
    pub fn build_prompt(self, topic: &str, tier: u8) -> Result<String, PromptError> {
        let tier = QualityTier::new(tier)?;
        Ok(self.prompt_for(topic, tier))
    }

    /// Build the generation prompt for an already validated tier.
    pub fn prompt_for(self, topic: &str, tier: QualityTier) -> String {
        let (low, high) = tier.word_range();
        let complexity = tier.complexity();
        let vocabulary = tier.vocabulary();

        match self {
            Self::Narrative => format!(
                "Create a {complexity} {low}-{high} word narrative story with {vocabulary} \
                 with the prompt: \"{topic}\"."
            ),
            Self::Dialogue => format!(
                "Create a {complexity} {low}-{high} word story told only through dialogue \
                 between its characters, with {vocabulary}, with the prompt: \"{topic}\". \
                 Prefix every line with the speaker's name."
            ),
            Self::Outline => format!(
                "Create a {complexity} outline of a {low}-{high} word story with {vocabulary} \
                 with the prompt: \"{topic}\". Give a title, the main characters and locations, \
                 and the plot as numbered beats."
            ),
        }
    }
}

impl fmt::Display for PromptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PromptPolicy {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "narrative" => Ok(Self::Narrative),
            "dialogue" => Ok(Self::Dialogue),
            "outline" => Ok(Self::Outline),
            other => Err(PromptError::UnknownPolicy(other.to_string())),
        }
    }
}
