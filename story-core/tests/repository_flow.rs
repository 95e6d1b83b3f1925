//! Repository tests against real save directories.

use std::sync::Arc;
use story_core::{
    CharacterEntity, LocationEntity, RepositoryError, StoryDocument, StoryRepository,
};
use tempfile::TempDir;

fn odyssey() -> StoryDocument {
    let mut doc = StoryDocument::new("Odyssey");
    doc.set_summary("A journey");
    doc.set_body_text("...");
    doc
}

#[tokio::test]
async fn test_odyssey_scenario() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = StoryRepository::open(temp_dir.path()).await.unwrap();
    assert!(repo.all_names().await.is_empty());

    repo.save(odyssey()).await.unwrap();

    assert_eq!(repo.all_names().await, vec!["Odyssey"]);
    let loaded = repo.load("Odyssey").await.expect("Odyssey should be loaded");
    assert_eq!(loaded.summary(), Some("A journey"));
    assert_eq!(loaded.body_text(), Some("..."));
    assert!(repo.load("Iliad").await.is_none());
}

#[tokio::test]
async fn test_same_name_save_is_last_write_wins() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = StoryRepository::open(temp_dir.path()).await.unwrap();

    let mut first = odyssey();
    first.add_character(CharacterEntity::new(
        "Cyclops", 300, "male", "giant", "cyclops", "One eye",
    ));
    repo.save(first).await.unwrap();

    let mut second = StoryDocument::new("Odyssey");
    second.set_summary("The way home");
    repo.save(second.clone()).await.unwrap();

    assert_eq!(repo.all_names().await, vec!["Odyssey"]);
    assert_eq!(repo.len().await, 1);
    let loaded = repo.load("Odyssey").await.unwrap();
    assert_eq!(loaded, second);
    assert_eq!(loaded.character_count(), 0);

    let on_disk = std::fs::read_to_string(temp_dir.path().join("Odyssey.json")).unwrap();
    assert_eq!(StoryDocument::deserialize(&on_disk).unwrap(), second);
}

#[tokio::test]
async fn test_reopen_loads_saved_documents() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    {
        let repo = StoryRepository::open(temp_dir.path()).await.unwrap();
        let mut doc = odyssey();
        doc.add_character(CharacterEntity::new(
            "Odysseus", 40, "male", "human", "human", "King of Ithaca",
        ));
        doc.add_location(LocationEntity::new("Ithaca", "A rocky island"));
        repo.save(doc).await.unwrap();
        repo.save(StoryDocument::new("Aeneid")).await.unwrap();
    }

    std::fs::write(temp_dir.path().join("README.txt"), "not a story").unwrap();

    let repo = StoryRepository::open(temp_dir.path()).await.unwrap();
    assert_eq!(repo.all_names().await, vec!["Aeneid", "Odyssey"]);

    let doc = repo.load("Odyssey").await.unwrap();
    assert_eq!(doc.get_character("Odysseus").map(|c| c.age), Some(40));
    assert_eq!(
        doc.get_location("Ithaca").map(|l| l.description.as_str()),
        Some("A rocky island")
    );
}

#[tokio::test]
async fn test_file_written_with_four_space_indent() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = StoryRepository::open(temp_dir.path()).await.unwrap();

    let path = repo.save(odyssey()).await.unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.contains("\n    \"name\": \"Odyssey\""));
}

#[tokio::test]
async fn test_document_without_story_field_loads() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(
        temp_dir.path().join("Draft.json"),
        r#"{"name": "Draft", "summary": "Unwritten", "characters": [], "locations": []}"#,
    )
    .unwrap();

    let repo = StoryRepository::open(temp_dir.path()).await.unwrap();
    let doc = repo.load("Draft").await.unwrap();
    assert_eq!(doc.summary(), Some("Unwritten"));
    assert_eq!(doc.body_text(), None);
}

#[tokio::test]
async fn test_malformed_file_fails_open() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(temp_dir.path().join("Broken.json"), "[1, 2").unwrap();

    let result = StoryRepository::open(temp_dir.path()).await;
    assert!(matches!(result, Err(RepositoryError::Malformed { .. })));
}

#[tokio::test]
async fn test_reload_picks_up_external_changes() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = StoryRepository::open(temp_dir.path()).await.unwrap();
    repo.save(odyssey()).await.unwrap();

    std::fs::remove_file(temp_dir.path().join("Odyssey.json")).unwrap();
    std::fs::write(
        temp_dir.path().join("Iliad.json"),
        StoryDocument::new("Iliad").serialize().unwrap(),
    )
    .unwrap();

    // Reads are served from memory until reloaded.
    assert!(repo.contains("Odyssey").await);

    assert_eq!(repo.reload_all().await.unwrap(), 1);
    assert_eq!(repo.all_names().await, vec!["Iliad"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_and_reads() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = Arc::new(StoryRepository::open(temp_dir.path()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..16 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let mut doc = StoryDocument::new(format!("Story {i:02}"));
            doc.set_summary(format!("Summary {i}"));
            repo.save(doc).await.unwrap();
            repo.all_names().await
        }));
    }
    for handle in handles {
        let names = handle.await.unwrap();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    assert_eq!(repo.len().await, 16);
    let reopened = StoryRepository::open(temp_dir.path()).await.unwrap();
    assert_eq!(reopened.all_names().await, repo.all_names().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_of_one_name_agree_with_disk() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = Arc::new(StoryRepository::open(temp_dir.path()).await.unwrap());

    for round in 0..20 {
        let mut handles = Vec::new();
        for i in 0..8usize {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let mut doc = StoryDocument::new("Same");
                // Widely different lengths make torn writes visible.
                doc.set_summary("x".repeat(1 + i * 5_000));
                repo.save(doc).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reopened = StoryRepository::open(temp_dir.path())
            .await
            .unwrap_or_else(|e| panic!("round {round}: reopen failed: {e}"));
        assert_eq!(
            reopened.load("Same").await,
            repo.load("Same").await,
            "round {round}: disk and memory disagree"
        );
        assert_eq!(reopened.all_names().await, vec!["Same"]);
    }
}
