//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use story_core::{
    AppConfig, PromptPolicy, ShutdownHandle, StoryClient, StoryDocument, StoryRepository,
    StoryServer,
};

/// Authenticate, bind and serve until Ctrl+C or SIGTERM.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let backend = config
        .claude_backend()
        .context("ANTHROPIC_API_KEY must be set to run the server")?;

    tracing::info!(model = backend.model(), "starting story server");
    let server = StoryServer::start(&config.server, Arc::new(backend)).await?;
    setup_shutdown_signal(server.shutdown_handle());

    server.run().await?;
    Ok(())
}

/// Compose a story through a running server.
pub async fn create(
    config: &AppConfig,
    policy: PromptPolicy,
    topic: &str,
    tier: u8,
    save: bool,
) -> Result<()> {
    let mut client = StoryClient::connect(config.server.addr()).await?;
    let result = client.compose_story(policy, topic, tier).await;
    client.disconnect().await;

    let document = result?;
    println!("{document}");
    if save {
        save_document(config, document).await?;
    }
    Ok(())
}

/// Extract a document from narrative text through a running server.
pub async fn extract(config: &AppConfig, file: &Path, save: bool) -> Result<()> {
    let narrative = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if narrative.trim().is_empty() {
        bail!("{} is empty", file.display());
    }

    let mut client = StoryClient::connect(config.server.addr()).await?;
    let result = client.extract_story(&narrative).await;
    client.disconnect().await;

    let mut document = result?;
    document.set_body_text(narrative);
    println!("{document}");
    if save {
        save_document(config, document).await?;
    }
    Ok(())
}

pub async fn list(config: &AppConfig) -> Result<()> {
    let repository = StoryRepository::open(&config.save_dir).await?;
    let names = repository.all_names().await;

    if names.is_empty() {
        println!("No saved stories in {}", repository.save_dir().display());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

pub async fn show(config: &AppConfig, name: &str) -> Result<()> {
    let repository = StoryRepository::open(&config.save_dir).await?;
    match repository.load(name).await {
        Some(document) => {
            println!("{document}");
            Ok(())
        }
        None => bail!("No story named {name:?}"),
    }
}

async fn save_document(config: &AppConfig, document: StoryDocument) -> Result<()> {
    let repository = StoryRepository::open(&config.save_dir).await?;
    let path = repository.save(document).await?;
    println!("\nSaved to {}", path.display());
    Ok(())
}

/// Spawn a task that triggers `handle` on SIGTERM/SIGINT.
fn setup_shutdown_signal(handle: ShutdownHandle) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        handle.shutdown();
    });
}
