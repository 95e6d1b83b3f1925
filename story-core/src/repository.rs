//! Story repository: the authoritative in-memory cache of saved documents.
//!
//! Every document is persisted as `<save_dir>/<name>.json`. The directory is
//! scanned once when the repository is opened (and again on `reload_all`);
//! reads are served from memory and never touch disk.

use crate::document::{DocumentError, StoryDocument};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed story file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: DocumentError,
    },

    #[error("Serialization error: {0}")]
    Document(#[from] DocumentError),

    #[error("Invalid story name {0:?}: names are used as file names")]
    InvalidName(String),
}

/// File-backed store of every known story document.
///
/// Share it between tasks with an `Arc`. The map lock is never held across
/// file IO. Writers (`save`, `reload_all`) are serialized by a separate
/// mutex, so memory and disk agree once every save has returned.
#[derive(Debug)]
pub struct StoryRepository {
    save_dir: PathBuf,
    documents: RwLock<HashMap<String, StoryDocument>>,
    write_lock: Mutex<()>,
}

impl StoryRepository {
    /// Open the repository rooted at `save_dir`, creating the directory if it
    /// does not exist, and load every document in it.
    pub async fn open(save_dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let save_dir = save_dir.into();
        if !fs::try_exists(&save_dir).await? {
            fs::create_dir_all(&save_dir).await?;
        }

        let repository = Self {
            save_dir,
            documents: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        };
        repository.reload_all().await?;
        Ok(repository)
    }

    /// Directory the documents are persisted in.
    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Replace the in-memory contents with what is on disk.
    ///
    /// Any unreadable or malformed document file fails the whole reload; the
    /// previous contents are kept in that case. Returns the number of
    /// documents loaded.
    pub async fn reload_all(&self) -> Result<usize, RepositoryError> {
        let _writer = self.write_lock.lock().await;
        let mut loaded = HashMap::new();
        let mut entries = fs::read_dir(&self.save_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !is_document_file(&path) {
                continue;
            }

            let content = fs::read_to_string(&path)
                .await
                .map_err(|source| RepositoryError::Read {
                    path: path.clone(),
                    source,
                })?;
            let document = StoryDocument::deserialize(&content)
                .map_err(|source| RepositoryError::Malformed { path, source })?;

            loaded.insert(document.name().to_string(), document);
        }

        let count = loaded.len();
        *self.documents.write().await = loaded;

        tracing::info!(
            count,
            dir = %self.save_dir.display(),
            "loaded story documents"
        );
        Ok(count)
    }

    /// Insert or replace a document and write it to disk.
    ///
    /// The in-memory entry is updated before the write, so a failed write
    /// still leaves the new document visible to `load`. Saves run one at a
    /// time, so the last save of a name wins both in memory and on disk.
    pub async fn save(&self, document: StoryDocument) -> Result<PathBuf, RepositoryError> {
        validate_name(document.name())?;

        let content = document.serialize()?;
        let path = self.document_path(document.name());

        let _writer = self.write_lock.lock().await;
        self.documents
            .write()
            .await
            .insert(document.name().to_string(), document);

        fs::write(&path, content)
            .await
            .map_err(|source| RepositoryError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "saved story document");
        Ok(path)
    }

    /// Get a copy of the document stored under `name`.
    pub async fn load(&self, name: &str) -> Option<StoryDocument> {
        self.documents.read().await.get(name).cloned()
    }

    /// All document names in lexicographic order.
    pub async fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.documents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.documents.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.save_dir.join(format!("{name}.json"))
    }
}

fn is_document_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

fn validate_name(name: &str) -> Result<(), RepositoryError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(RepositoryError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CharacterEntity;
    use tempfile::TempDir;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Odyssey").is_ok());
        assert!(validate_name("The Iliad, Book II").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("a\\b").is_err());
    }

    #[test]
    fn test_document_file_filter() {
        assert!(is_document_file(Path::new("/saves/Odyssey.json")));
        assert!(!is_document_file(Path::new("/saves/.DS_Store")));
        assert!(!is_document_file(Path::new("/saves/notes.txt")));
    }

    #[tokio::test]
    async fn test_open_creates_missing_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let save_dir = temp_dir.path().join("nested").join("saves");

        let repo = StoryRepository::open(&save_dir)
            .await
            .expect("Open should succeed");

        assert!(save_dir.exists());
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_save_writes_named_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = StoryRepository::open(temp_dir.path())
            .await
            .expect("Open should succeed");

        let mut doc = StoryDocument::new("Beowulf");
        doc.set_summary("A hero fights monsters.");
        doc.add_character(CharacterEntity::new(
            "Grendel", 100, "male", "giant", "monster", "Hates the mead hall.",
        ));

        let path = repo.save(doc.clone()).await.expect("Save should succeed");
        assert_eq!(path, temp_dir.path().join("Beowulf.json"));

        let on_disk = std::fs::read_to_string(&path).expect("File should exist");
        assert_eq!(StoryDocument::deserialize(&on_disk).unwrap(), doc);
    }

    #[tokio::test]
    async fn test_save_rejects_path_names() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = StoryRepository::open(temp_dir.path())
            .await
            .expect("Open should succeed");

        let result = repo.save(StoryDocument::new("../outside")).await;
        assert!(matches!(result, Err(RepositoryError::InvalidName(_))));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_previous_state() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = StoryRepository::open(temp_dir.path())
            .await
            .expect("Open should succeed");
        repo.save(StoryDocument::new("Kept"))
            .await
            .expect("Save should succeed");

        std::fs::write(temp_dir.path().join("broken.json"), "{ not json")
            .expect("Write should succeed");

        let result = repo.reload_all().await;
        assert!(matches!(result, Err(RepositoryError::Malformed { .. })));
        assert_eq!(repo.all_names().await, vec!["Kept"]);
    }
}
