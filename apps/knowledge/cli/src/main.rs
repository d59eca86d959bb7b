//! Knowledge CLI
//!
//! Stores texts in the knowledge base and searches them by meaning.
//! Configuration comes from the environment; results are printed as JSON.

use clap::{Parser, Subcommand};
use color_eyre::Section;
use core_config::FromEnv;
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_knowledge::{
    KnowledgeManager, KnowledgeMetadata, MilvusStore, QwenEmbedder, SearchOptions,
};
use eyre::{Result, WrapErr};
use tracing::info;

mod commands;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "knowledge-cli")]
#[command(about = "Store and search texts in a vector knowledge base")]
struct Cli {
    /// Collection to use instead of KNOWLEDGE_COLLECTION
    #[arg(short, long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed and store one text
    Store {
        text: String,

        #[arg(long, default_value = "")]
        topic: String,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(short, long, default_value_t = 1.0)]
        weight: f32,

        /// Comma separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Find stored texts similar to a query
    Search {
        query: String,

        #[arg(short, long, default_value_t = 5)]
        limit: usize,

        /// Minimum similarity a result must reach
        #[arg(short, long, default_value_t = 0.0)]
        threshold: f32,
    },

    /// Show the collection name, vector dimension and statistics
    Info,

    /// List collections in the vector database
    Collections,

    /// Drop a collection and everything in it
    Drop {
        name: String,

        /// Confirm the drop
        #[arg(long)]
        yes: bool,
    },

    /// Store sample items and run a sample query
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let cli = Cli::parse();

    let config = Config::from_env()
        .wrap_err("Invalid configuration")
        .suggestion("Set QWEN_API_KEY, ZILLIZ_ENDPOINT and ZILLIZ_TOKEN (or ZILLIZ_API_KEY)")?
        .with_collection(cli.collection);
    init_tracing(&config.environment);

    info!("Connecting to vector database...");
    let store = MilvusStore::connect(config.milvus.clone())
        .await
        .wrap_err("Vector database connection failed")?;

    let output = match cli.command {
        Commands::Collections => commands::collections(&store).await?,
        Commands::Drop { name, yes } => commands::drop_collection(&store, &name, yes).await?,
        Commands::Store {
            text,
            topic,
            title,
            weight,
            tags,
        } => {
            let metadata = KnowledgeMetadata::new(topic)
                .with_title(title)
                .with_weight(weight)
                .with_tags(tags);
            let manager = open_manager(&config, store).await?;
            commands::store(&manager, &text, metadata).await?
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            let options = SearchOptions::new(limit).with_score_threshold(threshold);
            let manager = open_manager(&config, store).await?;
            commands::search(&manager, &query, options).await?
        }
        Commands::Info => commands::info(&open_manager(&config, store).await?).await?,
        Commands::Demo => commands::demo(&open_manager(&config, store).await?).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn open_manager(
    config: &Config,
    store: MilvusStore,
) -> Result<KnowledgeManager<QwenEmbedder, MilvusStore>> {
    let embedder = QwenEmbedder::new(config.qwen.clone())?;
    let manager = KnowledgeManager::connect(embedder, store, config.manager.clone())
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to open collection '{}'",
                config.manager.collection_name
            )
        })?;

    info!(
        collection = manager.collection_name(),
        dimension = manager.dimension(),
        "Knowledge base ready"
    );
    Ok(manager)
}
