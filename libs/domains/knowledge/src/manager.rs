use std::sync::atomic::{AtomicI32, Ordering};

use chrono::Utc;
use core_config::{ConfigError, FromEnv, env_or_default};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use validator::Validate;

use crate::embedding::Embedder;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::milvus::schema;
use crate::models::{
    CollectionDescription, CreateCollection, InsertOutcome, KnowledgeItem, KnowledgeMetadata,
    ManagerInfo, SearchOptions, SearchQuery, SearchResult, StoreReceipt,
};
use crate::store::VectorStore;

pub const DEFAULT_COLLECTION: &str = "knowledge_base";

/// Collection a manager is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub collection_name: String,
    pub description: String,
}

impl ManagerOptions {
    pub fn new(collection_name: impl Into<String>) -> Self {
        let collection_name = collection_name.into();
        Self {
            description: format!("Knowledge base collection - {}", collection_name),
            collection_name,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::new(DEFAULT_COLLECTION)
    }
}

impl FromEnv for ManagerOptions {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(env_or_default("KNOWLEDGE_COLLECTION", DEFAULT_COLLECTION)))
    }
}

/// Text-level knowledge base over one embedder and one collection
///
/// Obtained through [`KnowledgeManager::connect`], which returns only once the
/// embedding dimension is known and the collection exists and matches it.
pub struct KnowledgeManager<E: Embedder, S: VectorStore> {
    embedder: E,
    store: S,
    options: ManagerOptions,
    dimension: usize,
    bootstrap: OnceCell<()>,
    last_created_at: AtomicI32,
}

fn validate_text(text: &str) -> KnowledgeResult<()> {
    if text.trim().is_empty() {
        return Err(KnowledgeError::Validation(
            "Text must not be empty".to_string(),
        ));
    }
    // Same unit as the other VarChar bounds, which validator counts in characters
    let length = text.chars().count();
    if length > schema::MAX_TEXT_LENGTH {
        return Err(KnowledgeError::Validation(format!(
            "Text is {} characters, the limit is {}",
            length,
            schema::MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// One receipt per stored row, carrying primary keys only when the database
/// reported exactly one per row
fn receipts(outcome: InsertOutcome, count: usize) -> Vec<StoreReceipt> {
    // A partial id list cannot be matched to rows, so none are threaded back
    if outcome.primary_keys.len() == count {
        outcome
            .primary_keys
            .into_iter()
            .map(|key| StoreReceipt::new(Some(key)))
            .collect()
    } else {
        (0..count).map(|_| StoreReceipt::new(None)).collect()
    }
}

impl<E: Embedder, S: VectorStore> KnowledgeManager<E, S> {
    #[instrument(skip(embedder, store), fields(collection = %options.collection_name))]
    pub async fn connect(embedder: E, store: S, options: ManagerOptions) -> KnowledgeResult<Self> {
        let dimension = embedder.dimension().await;
        debug!(dimension, "Embedding dimension resolved");

        let manager = Self {
            embedder,
            store,
            options,
            dimension,
            bootstrap: OnceCell::new(),
            last_created_at: AtomicI32::new(i32::MIN),
        };
        manager.ensure_collection().await?;

        Ok(manager)
    }

    pub fn collection_name(&self) -> &str {
        &self.options.collection_name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Runs the collection bootstrap at most once per manager, concurrent
    /// callers wait on the same attempt; a failed attempt is retried next time
    async fn ensure_collection(&self) -> KnowledgeResult<()> {
        self.bootstrap
            .get_or_try_init(|| self.bootstrap_collection())
            .await?;
        Ok(())
    }

    async fn bootstrap_collection(&self) -> KnowledgeResult<()> {
        let name = &self.options.collection_name;

        if !self.store.list_collections().await?.contains(name) {
            info!(collection = %name, dimension = self.dimension, "Creating collection");
            let input = CreateCollection::new(name.clone(), self.dimension)
                .with_description(self.options.description.clone())
                .with_embedding_model(self.embedder.model_name());
            self.store.create_collection(input).await?;
        }

        let description = self
            .store
            .describe_collection(name)
            .await?
            .ok_or_else(|| KnowledgeError::CollectionNotFound(name.clone()))?;

        self.validate_schema(&description)
    }

    /// Reject a collection built for a different embedder
    fn validate_schema(&self, description: &CollectionDescription) -> KnowledgeResult<()> {
        let mismatch = |details: String| KnowledgeError::SchemaMismatch {
            collection: self.options.collection_name.clone(),
            details,
        };

        if let Some(dimension) = description.dimension.or(description.recorded_dimension()) {
            if dimension != self.dimension {
                return Err(mismatch(format!(
                    "collection stores {}-dimensional vectors but the embedder produces {}",
                    dimension, self.dimension
                )));
            }
        }

        if let Some(model) = description.embedding_model() {
            let active = self.embedder.model_name();
            if model != active {
                return Err(mismatch(format!(
                    "collection was populated by '{}' but the active model is '{}'",
                    model, active
                )));
            }
        }

        Ok(())
    }

    /// Unix seconds, never lower than a value this manager handed out before
    fn next_created_at(&self) -> i32 {
        let now = i32::try_from(Utc::now().timestamp()).unwrap_or(i32::MAX);
        let previous = self.last_created_at.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }

    /// Embed and store one text
    #[instrument(skip(self, text, metadata), fields(collection = %self.options.collection_name))]
    pub async fn store(
        &self,
        text: &str,
        metadata: KnowledgeMetadata,
    ) -> KnowledgeResult<StoreReceipt> {
        validate_text(text)?;
        metadata.validate()?;
        self.ensure_collection().await?;

        let vector = self.embedder.embed(text).await?;
        let item = KnowledgeItem::new(vector, text.to_string(), metadata, self.next_created_at());

        let outcome = self
            .store
            .insert_records(&self.options.collection_name, vec![item], self.dimension)
            .await?;

        receipts(outcome, 1)
            .into_iter()
            .next()
            .ok_or_else(|| KnowledgeError::Internal("No receipt produced".to_string()))
    }

    /// Embed and store texts in one embedding call and one insert call.
    ///
    /// `metadatas[i]` belongs to `texts[i]`; a length mismatch is rejected
    /// before anything is sent.
    #[instrument(skip(self, texts, metadatas), fields(collection = %self.options.collection_name, count = texts.len()))]
    pub async fn store_batch(
        &self,
        texts: &[String],
        metadatas: Vec<KnowledgeMetadata>,
    ) -> KnowledgeResult<Vec<StoreReceipt>> {
        if texts.len() != metadatas.len() {
            return Err(KnowledgeError::Validation(format!(
                "Got {} texts but {} metadata entries",
                texts.len(),
                metadatas.len()
            )));
        }
        if texts.is_empty() {
            return Ok(vec![]);
        }
        for (text, metadata) in texts.iter().zip(&metadatas) {
            validate_text(text)?;
            metadata.validate()?;
        }
        self.ensure_collection().await?;

        let vectors = self.embedder.embed_batch(texts).await?;
        if vectors.len() != texts.len() {
            return Err(KnowledgeError::Embedding(format!(
                "Expected {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }

        let created_at = self.next_created_at();
        let items: Vec<KnowledgeItem> = vectors
            .into_iter()
            .zip(texts.iter().cloned())
            .zip(metadatas)
            .map(|((vector, text), metadata)| KnowledgeItem::new(vector, text, metadata, created_at))
            .collect();

        let outcome = self
            .store
            .insert_records(&self.options.collection_name, items, self.dimension)
            .await?;

        Ok(receipts(outcome, texts.len()))
    }

    /// Semantic search, best match first.
    ///
    /// Results scoring below `options.score_threshold` are dropped.
    #[instrument(skip(self, query), fields(collection = %self.options.collection_name, limit = options.limit))]
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> KnowledgeResult<Vec<SearchResult>> {
        if options.limit == 0 {
            return Err(KnowledgeError::Validation(
                "Search limit must be at least 1".to_string(),
            ));
        }
        if !options.score_threshold.is_finite() {
            return Err(KnowledgeError::Validation(
                "Score threshold must be a finite number".to_string(),
            ));
        }
        // Nothing can match a blank query; the text bound only applies to stored rows
        if query.trim().is_empty() {
            debug!("Blank query, returning no results");
            return Ok(Vec::new());
        }
        self.ensure_collection().await?;

        let vector = self.embedder.embed(query).await?;
        let hits = self
            .store
            .search(
                &self.options.collection_name,
                SearchQuery::new(vector, options.limit),
            )
            .await?;

        let mut results: Vec<SearchResult> = hits.into_iter().map(SearchResult::from).collect();
        // Best match first regardless of how the store ordered its hits
        results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        results.retain(|result| result.similarity_score >= options.score_threshold);

        debug!(results = results.len(), "Search completed");
        Ok(results)
    }

    #[instrument(skip(self), fields(collection = %self.options.collection_name))]
    pub async fn info(&self) -> KnowledgeResult<ManagerInfo> {
        let stats = self.store.get_stats(&self.options.collection_name).await?;

        Ok(ManagerInfo {
            collection_name: self.options.collection_name.clone(),
            vector_dimension: self.dimension,
            stats,
        })
    }
}
