//! Knowledge Domain Library
//!
//! Stores texts as embeddings in a Milvus-compatible vector database and
//! retrieves them by semantic similarity.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ KnowledgeManager │  ← store / store_batch / search / info, collection bootstrap
//! └────────┬─────────┘
//!          │
//! ┌────────▼────────┐     ┌─────────────────┐
//! │   VectorStore   │     │    Embedder     │
//! │     (trait)     │     │    (trait)      │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │
//! ┌────────▼────────┐     ┌────────▼────────┐
//! │   MilvusStore   │     │  QwenEmbedder   │
//! │  (REST v2 API)  │     │ (OpenAI-compat) │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! Every collection uses the single layout in [`milvus::schema`] with a cosine
//! index on the vector field.
//!
//! # Usage
//!
//! ```rust,no_run
//! use core_config::FromEnv;
//! use domain_knowledge::{
//!     KnowledgeManager, KnowledgeMetadata, ManagerOptions, MilvusConfig, MilvusStore,
//!     QwenEmbedder, SearchOptions,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = QwenEmbedder::from_env()?;
//! let store = MilvusStore::connect(MilvusConfig::from_env()?).await?;
//! let manager = KnowledgeManager::connect(embedder, store, ManagerOptions::from_env()?).await?;
//!
//! manager
//!     .store("Python是一种编程语言", KnowledgeMetadata::new("编程"))
//!     .await?;
//!
//! for result in manager.search("什么是Python？", SearchOptions::new(1)).await? {
//!     println!("{:.3} {}", result.similarity_score, result.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod embedding;
pub mod error;
pub mod manager;
pub mod milvus;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use embedding::{Embedder, QwenConfig, QwenEmbedder};
pub use error::{KnowledgeError, KnowledgeResult};
pub use manager::{KnowledgeManager, ManagerOptions};
pub use milvus::{Credential, MilvusConfig, MilvusStore};
pub use models::{
    CollectionDescription, CollectionStats, CreateCollection, InsertOutcome, KnowledgeItem,
    KnowledgeMetadata, ManagerInfo, SearchHit, SearchOptions, SearchQuery, SearchResult,
    StoreReceipt,
};
pub use store::VectorStore;
