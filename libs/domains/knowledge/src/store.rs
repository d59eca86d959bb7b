use async_trait::async_trait;

use crate::error::KnowledgeResult;
use crate::models::{
    CollectionDescription, CollectionStats, CreateCollection, InsertOutcome, KnowledgeItem,
    SearchHit, SearchQuery,
};

/// Vector storage operations against a remote database
///
/// Every collection follows the fixed layout in [`crate::milvus::schema`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    // ===== Collection Management =====

    async fn list_collections(&self) -> KnowledgeResult<Vec<String>>;

    /// Create a collection; an existing collection with that name is left untouched
    async fn create_collection(&self, input: CreateCollection) -> KnowledgeResult<()>;

    /// Describe a collection, `None` when it does not exist
    async fn describe_collection(&self, name: &str)
    -> KnowledgeResult<Option<CollectionDescription>>;

    /// Load a collection into memory so it can be searched
    async fn load_collection(&self, name: &str) -> KnowledgeResult<()>;

    async fn get_stats(&self, name: &str) -> KnowledgeResult<CollectionStats>;

    /// Drop a collection; dropping a missing collection succeeds
    async fn drop_collection(&self, name: &str) -> KnowledgeResult<()>;

    // ===== Record Operations =====

    /// Insert rows whose vectors all have `dimension` components.
    ///
    /// A missing collection is created first, and the collection is loaded afterwards.
    async fn insert_records(
        &self,
        name: &str,
        items: Vec<KnowledgeItem>,
        dimension: usize,
    ) -> KnowledgeResult<InsertOutcome>;

    /// Nearest neighbours of `query.vector`, best match first
    async fn search(&self, name: &str, query: SearchQuery) -> KnowledgeResult<Vec<SearchHit>>;
}
