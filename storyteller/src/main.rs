//! Storyteller: story server and command-line client.
//!
//! ```bash
//! # Run the server (needs ANTHROPIC_API_KEY)
//! cargo run -p storyteller -- serve
//!
//! # Ask a running server for a story and save it
//! cargo run -p storyteller -- create "a lighthouse keeper" --tier 2
//!
//! # Browse saved stories
//! cargo run -p storyteller -- list
//! cargo run -p storyteller -- show "The Lighthouse"
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use story_core::{AppConfig, PromptPolicy};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "storyteller")]
#[command(about = "Generate, extract and store short stories", long_about = None)]
struct Cli {
    /// Server host (overrides STORY_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port (overrides STORY_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Directory of saved stories (overrides STORY_SAVE_DIR)
    #[arg(long, global = true)]
    save_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the story server
    Serve {
        /// Connections served at once (overrides STORY_POOL_SIZE)
        #[arg(long)]
        pool_size: Option<usize>,
    },
    /// Generate a story on a running server, extract it and save it
    Create {
        /// What the story is about
        topic: String,
        /// Quality tier, 1 (simplest) to 3
        #[arg(long, default_value_t = 1)]
        tier: u8,
        /// Prompt style: narrative, dialogue or outline (overrides STORY_POLICY)
        #[arg(long)]
        policy: Option<PromptPolicy>,
        /// Print the story without saving it
        #[arg(long)]
        no_save: bool,
    },
    /// Extract a story document from a narrative text file and save it
    Extract {
        /// File containing the narrative
        file: PathBuf,
        /// Print the document without saving it
        #[arg(long)]
        no_save: bool,
    },
    /// List saved stories
    List,
    /// Show a saved story
    Show {
        /// Story name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyteller=info,story_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(save_dir) = cli.save_dir {
        config.save_dir = save_dir;
    }

    match cli.command {
        Commands::Serve { pool_size } => {
            if let Some(pool_size) = pool_size {
                config.server.pool_size = pool_size;
            }
            commands::serve(&config).await?
        }
        Commands::Create {
            topic,
            tier,
            policy,
            no_save,
        } => {
            let policy = policy.unwrap_or(config.policy);
            commands::create(&config, policy, &topic, tier, !no_save).await?
        }
        Commands::Extract { file, no_save } => commands::extract(&config, &file, !no_save).await?,
        Commands::List => commands::list(&config).await?,
        Commands::Show { name } => commands::show(&config, &name).await?,
    }

    Ok(())
}
