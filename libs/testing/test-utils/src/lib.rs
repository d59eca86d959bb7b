//! Shared test utilities for the knowledge crates
//!
//! This crate provides in-process stand-ins for the two remote services and
//! deterministic test data:
//! - `FakeEmbeddingService`: OpenAI-compatible `/embeddings` endpoint
//! - `FakeMilvus`: stateful Milvus REST v2 server
//! - `TestDataBuilder`: Deterministic collection names (always available)
//! - `assertions`: Custom assertion helpers
//!
//! Both fakes listen on a random localhost port and stop when dropped.
//!
//! # Usage
//!
//! ```rust,no_run
//! use test_utils::{FakeEmbeddingService, FakeMilvus, TestDataBuilder};
//!
//! #[tokio::test]
//! async fn my_knowledge_test() {
//!     let embeddings = FakeEmbeddingService::start("sk-test", 64).await;
//!     let milvus = FakeMilvus::start("db-token").await;
//!     let builder = TestDataBuilder::from_test_name("my_knowledge_test");
//!
//!     let collection = builder.collection_name("main");
//!     // point QwenConfig at embeddings.url() and MilvusConfig at milvus.url()
//! }
//! ```

mod embedding;
mod milvus;
mod server;

pub use embedding::{EmbeddingFailure, FakeEmbeddingService, char_bucket_embedding};
pub use milvus::FakeMilvus;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_store_and_search");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Collection name valid for the vector database (letters, digits, underscores)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("my_test");
    /// let name = builder.collection_name("main");
    /// assert!(name.starts_with("test_main_"));
    /// ```
    pub fn collection_name(&self, suffix: &str) -> String {
        format!("test_{}_{}", suffix, self.seed)
    }

    /// `count` distinct texts sharing `prefix`
    pub fn texts(&self, prefix: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("{} {} #{}", prefix, self.seed % 10_000, i))
            .collect()
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that scores never increase
    pub fn assert_descending(scores: &[f32], context: &str) {
        for pair in scores.windows(2) {
            assert!(
                pair[0] >= pair[1],
                "{}: scores not in descending order: {:?}",
                context,
                scores
            );
        }
    }

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }
}
