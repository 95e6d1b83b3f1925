//! Story documents.
//!
//! A `StoryDocument` holds one generated narrative together with the
//! characters and locations extracted from it. Entities are keyed by name;
//! name listings are always lexicographically sorted, which keeps the
//! serialized form deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use story_macros::Schema;
use thiserror::Error;

/// Errors from document serialization.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid UTF-8 in serialized document: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A character that appears in the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "character")]
pub struct CharacterEntity {
    /// The character's name, unique within the story
    pub name: String,
    /// The character's age in years
    pub age: u32,
    /// The character's gender
    pub gender: String,
    /// The character's race
    pub race: String,
    /// The character's species
    pub species: String,
    /// A short description of the character
    pub description: String,
}

impl CharacterEntity {
    pub fn new(
        name: impl Into<String>,
        age: u32,
        gender: impl Into<String>,
        race: impl Into<String>,
        species: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age,
            gender: gender.into(),
            race: race.into(),
            species: species.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for CharacterEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Character Name: {}", self.name)?;
        writeln!(f, "Age: {}", self.age)?;
        writeln!(f, "Gender: {}", self.gender)?;
        writeln!(f, "Species: {}", self.species)?;
        writeln!(f, "Race: {}", self.race)?;
        write!(f, "Description:\n\t{}", self.description)
    }
}

/// A location that appears in the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "location")]
pub struct LocationEntity {
    /// The location's name, unique within the story
    pub name: String,
    /// A short description of the location
    pub description: String,
}

impl LocationEntity {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for LocationEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Location Name: {}", self.name)?;
        write!(f, "Description:\n\t{}", self.description)
    }
}

/// The serialized shape of a story, both on disk and as extraction output.
///
/// `story` is absent from the extraction schema: the backend only extracts
/// structure, the narrative itself is attached by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Schema)]
#[schema(name = "story")]
pub struct StoryRecord {
    /// The title of the story
    pub name: String,
    /// A short summary of the story
    #[schema(required)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[schema(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    /// Every named character in the story
    #[serde(default)]
    pub characters: Vec<CharacterEntity>,
    /// Every named location in the story
    #[serde(default)]
    pub locations: Vec<LocationEntity>,
}

/// A generated story with its characters and locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryDocument {
    name: String,
    summary: Option<String>,
    body_text: Option<String>,
    characters: BTreeMap<String, CharacterEntity>,
    locations: BTreeMap<String, LocationEntity>,
}

impl StoryDocument {
    /// Create an empty document with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: None,
            body_text: None,
            characters: BTreeMap::new(),
            locations: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    /// The full narrative, once generation has completed.
    pub fn body_text(&self) -> Option<&str> {
        self.body_text.as_deref()
    }

    pub fn set_body_text(&mut self, body_text: impl Into<String>) {
        self.body_text = Some(body_text.into());
    }

    // =========================================================================
    // Characters
    // =========================================================================

    /// Add a character, replacing any existing character with the same name.
    pub fn add_character(&mut self, character: CharacterEntity) {
        self.characters.insert(character.name.clone(), character);
    }

    pub fn get_character(&self, name: &str) -> Option<&CharacterEntity> {
        self.characters.get(name)
    }

    /// Remove a character by name, returning it if it was present.
    pub fn remove_character(&mut self, name: &str) -> Option<CharacterEntity> {
        self.characters.remove(name)
    }

    /// Character names in lexicographic order.
    pub fn character_names(&self) -> Vec<String> {
        self.characters.keys().cloned().collect()
    }

    /// Characters in name order.
    pub fn characters(&self) -> impl Iterator<Item = &CharacterEntity> {
        self.characters.values()
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    // =========================================================================
    // Locations
    // =========================================================================

    /// Add a location, replacing any existing location with the same name.
    pub fn add_location(&mut self, location: LocationEntity) {
        self.locations.insert(location.name.clone(), location);
    }

    pub fn get_location(&self, name: &str) -> Option<&LocationEntity> {
        self.locations.get(name)
    }

    /// Remove a location by name, returning it if it was present.
    pub fn remove_location(&mut self, name: &str) -> Option<LocationEntity> {
        self.locations.remove(name)
    }

    /// Location names in lexicographic order.
    pub fn location_names(&self) -> Vec<String> {
        self.locations.keys().cloned().collect()
    }

    /// Locations in name order.
    pub fn locations(&self) -> impl Iterator<Item = &LocationEntity> {
        self.locations.values()
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Serialize to pretty-printed JSON with a 4-space indent.
    pub fn serialize(&self) -> Result<String, DocumentError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.to_record().serialize(&mut ser)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Parse a document from its JSON form.
    pub fn deserialize(blob: &str) -> Result<Self, DocumentError> {
        let record: StoryRecord = serde_json::from_str(blob)?;
        Ok(Self::from_record(record))
    }

    /// Convert to the serialized record shape, entities ordered by name.
    pub fn to_record(&self) -> StoryRecord {
        StoryRecord {
            name: self.name.clone(),
            summary: self.summary.clone(),
            story: self.body_text.clone(),
            characters: self.characters.values().cloned().collect(),
            locations: self.locations.values().cloned().collect(),
        }
    }

    /// Build a document from a record. Later entities win on duplicate names.
    pub fn from_record(record: StoryRecord) -> Self {
        let mut document = Self::new(record.name);
        document.summary = record.summary;

        match record.story {
            Some(story) => document.body_text = Some(story),
            None => tracing::warn!(
                name = %document.name,
                "story document has no \"story\" value"
            ),
        }

        for character in record.characters {
            document.add_character(character);
        }
        for location in record.locations {
            document.add_location(location);
        }

        document
    }

    /// The JSON schema handed to the structured-extraction backend.
    pub fn extraction_schema() -> serde_json::Value {
        StoryRecord::json_schema()
    }
}

impl From<StoryRecord> for StoryDocument {
    fn from(record: StoryRecord) -> Self {
        Self::from_record(record)
    }
}

impl From<StoryDocument> for StoryRecord {
    fn from(document: StoryDocument) -> Self {
        document.to_record()
    }
}

impl fmt::Display for StoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Story Name: {}\n", self.name)?;
        writeln!(f, "Summary: {}\n", self.summary.as_deref().unwrap_or(""))?;

        writeln!(f, "Characters:")?;
        for name in self.characters.keys() {
            writeln!(f, "\t- {name}")?;
        }
        writeln!(f)?;

        writeln!(f, "Locations:")?;
        for name in self.locations.keys() {
            writeln!(f, "\t- {name}")?;
        }
        writeln!(f)?;

        write!(f, "Story:\n\t{}", self.body_text.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> StoryDocument {
        let mut doc = StoryDocument::new("The Lighthouse");
        doc.set_summary("A keeper waits for a ship that never comes.");
        doc.set_body_text("The lamp turned all night.");
        doc.add_character(CharacterEntity::new(
            "Mara", 61, "female", "human", "human", "The last keeper.",
        ));
        doc.add_character(CharacterEntity::new(
            "Gull", 3, "male", "herring gull", "bird", "A persistent visitor.",
        ));
        doc.add_location(LocationEntity::new("The Lamp Room", "Glass on every side."));
        doc
    }

    #[test]
    fn test_names_are_sorted() {
        let mut doc = StoryDocument::new("Sorting");
        for name in ["Zed", "Ann", "Mo"] {
            doc.add_character(CharacterEntity::new(name, 30, "", "", "", ""));
        }
        assert_eq!(doc.character_names(), vec!["Ann", "Mo", "Zed"]);
    }

    #[test]
    fn test_add_character_replaces_existing() {
        let mut doc = StoryDocument::new("Upsert");
        doc.add_character(CharacterEntity::new("Ann", 20, "f", "elf", "elf", "old"));
        doc.add_character(CharacterEntity::new("Ann", 99, "f", "orc", "orc", "new"));

        let ann = doc.get_character("Ann").unwrap();
        assert_eq!(ann.age, 99);
        assert_eq!(ann.race, "orc");
        assert_eq!(ann.description, "new");
        assert_eq!(doc.character_count(), 1);
    }

    #[test]
    fn test_missing_entities_are_none() {
        let doc = StoryDocument::new("Empty");
        assert!(doc.get_character("Nobody").is_none());
        assert!(doc.get_location("Nowhere").is_none());
    }

    #[test]
    fn test_remove_deletes_key() {
        let mut doc = sample_document();

        let removed = doc.remove_character("Mara").unwrap();
        assert_eq!(removed.name, "Mara");
        assert_eq!(doc.character_names(), vec!["Gull"]);
        assert!(doc.remove_character("Mara").is_none());

        let removed = doc.remove_location("The Lamp Room").unwrap();
        assert_eq!(removed.description, "Glass on every side.");
        assert!(doc.location_names().is_empty());
        assert!(doc.remove_location("The Lamp Room").is_none());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let doc = sample_document();
        let json = doc.serialize().unwrap();
        let restored = StoryDocument::deserialize(&json).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_serialized_entities_ordered_by_name() {
        let json = sample_document().serialize().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let names: Vec<_> = value["characters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Gull", "Mara"]);
        assert_eq!(value["story"], "The lamp turned all night.");
        assert!(json.contains("\n    \"name\""));
    }

    #[test]
    fn test_deserialize_without_story() {
        let json = r#"{
            "name": "Fragment",
            "summary": "Only a summary.",
            "characters": [],
            "locations": [{"name": "Pier", "description": "Wet."}]
        }"#;

        let doc = StoryDocument::deserialize(json).unwrap();
        assert_eq!(doc.name(), "Fragment");
        assert_eq!(doc.summary(), Some("Only a summary."));
        assert!(doc.body_text().is_none());
        assert_eq!(doc.location_names(), vec!["Pier"]);
    }

    #[test]
    fn test_deserialize_rejects_negative_age() {
        let json = r#"{
            "name": "Broken",
            "summary": "",
            "characters": [{"name": "X", "age": -4, "gender": "", "race": "", "species": "", "description": ""}],
            "locations": []
        }"#;

        assert!(matches!(
            StoryDocument::deserialize(json),
            Err(DocumentError::Json(_))
        ));
    }

    #[test]
    fn test_extraction_schema_shape() {
        let schema = StoryDocument::extraction_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["name"]["type"], "string");
        assert_eq!(schema["properties"]["summary"]["type"], "string");
        assert!(schema["properties"].get("story").is_none());

        let required = schema["required"].as_array().unwrap();
        for field in ["name", "summary", "characters", "locations"] {
            assert!(required.iter().any(|v| v == field), "{field} should be required");
        }

        let character = &schema["properties"]["characters"]["items"];
        assert_eq!(character["properties"]["age"]["type"], "integer");
        assert_eq!(character["required"].as_array().unwrap().len(), 6);

        let location = &schema["properties"]["locations"]["items"];
        assert_eq!(location["required"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_display_lists_entities() {
        let text = sample_document().to_string();
        assert!(text.starts_with("Story Name: The Lighthouse"));
        assert!(text.contains("\t- Gull\n\t- Mara"));
        assert!(text.contains("\t- The Lamp Room"));
    }
}
