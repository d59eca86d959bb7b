use async_trait::async_trait;

use crate::error::KnowledgeResult;

/// Trait for text embedding providers
///
/// `embed_batch` output is index-aligned with its input and produced by one
/// remote call per batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded on collections this embedder populates
    fn model_name(&self) -> String;

    /// Generate the embedding for a single text
    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>>;

    /// Generate embeddings for multiple texts in one request
    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>>;

    /// Length of the vectors this embedder produces.
    ///
    /// Never fails: when the dimension cannot be discovered a documented
    /// default is returned instead.
    async fn dimension(&self) -> usize;
}
