//! End-to-end tests for KnowledgeManager
//!
//! Both remote services are replaced by in-process fakes, so these tests
//! exercise the full text → embedding → database → result path:
//! - collection bootstrap and schema validation
//! - store / store_batch / search / info contracts
//! - validation before any remote call
//! - soft and strict read policies

use domain_knowledge::milvus::schema;
use domain_knowledge::{
    Credential, KnowledgeError, KnowledgeManager, KnowledgeMetadata, ManagerOptions, MilvusConfig,
    MilvusStore, QwenConfig, QwenEmbedder, SearchOptions,
};
use futures::future::join_all;
use test_utils::assertions::{assert_descending, assert_some};
use test_utils::{FakeEmbeddingService, FakeMilvus, TestDataBuilder};

const API_KEY: &str = "sk-test";
const TOKEN: &str = "db-token";
const DIM: usize = 1024;
const MODEL: &str = "text-embedding-v3";

type Manager = KnowledgeManager<QwenEmbedder, MilvusStore>;

struct Harness {
    embeddings: FakeEmbeddingService,
    milvus: FakeMilvus,
    collection: String,
}

impl Harness {
    async fn start(test_name: &str) -> Self {
        Self {
            embeddings: FakeEmbeddingService::start(API_KEY, DIM).await,
            milvus: FakeMilvus::start(TOKEN).await,
            collection: TestDataBuilder::from_test_name(test_name).collection_name("kb"),
        }
    }

    fn embedder(&self) -> QwenEmbedder {
        QwenEmbedder::new(QwenConfig::new(API_KEY).with_base_url(self.embeddings.url())).unwrap()
    }

    fn milvus_config(&self) -> MilvusConfig {
        MilvusConfig::new(self.milvus.url(), Credential::Token(TOKEN.to_string()))
    }

    async fn manager_with(&self, config: MilvusConfig) -> Result<Manager, KnowledgeError> {
        let store = MilvusStore::connect(config).await?;
        KnowledgeManager::connect(
            self.embedder(),
            store,
            ManagerOptions::new(&self.collection),
        )
        .await
    }

    async fn manager(&self) -> Manager {
        self.manager_with(self.milvus_config()).await.unwrap()
    }

    /// Remote calls made to either service so far
    fn remote_calls(&self) -> usize {
        self.embeddings.request_count() + self.milvus.request_count()
    }
}

#[tokio::test]
async fn test_connect_bootstraps_collection_with_embedding_properties() {
    let harness = Harness::start("connect_bootstrap").await;

    let manager = harness.manager().await;

    assert_eq!(manager.collection_name(), harness.collection);
    assert_eq!(manager.dimension(), DIM);
    assert!(harness.milvus.has_collection(&harness.collection));
    assert_eq!(
        harness
            .milvus
            .property(&harness.collection, schema::PROPERTY_EMBEDDING_MODEL)
            .as_deref(),
        Some(MODEL)
    );
    assert_eq!(
        harness
            .milvus
            .property(&harness.collection, schema::PROPERTY_EMBEDDING_DIM)
            .as_deref(),
        Some("1024")
    );
}

#[tokio::test]
async fn test_second_manager_reuses_collection() {
    let harness = Harness::start("reuse_collection").await;

    let first = harness.manager().await;
    first
        .store("persisted", KnowledgeMetadata::new("t"))
        .await
        .unwrap();

    let second = harness.manager().await;
    assert_eq!(second.info().await.unwrap().stats.row_count, 1);
    assert_eq!(harness.milvus.requests_to("collections/create"), 1);
}

#[tokio::test]
async fn test_connect_rejects_collection_of_other_dimension() {
    let harness = Harness::start("dimension_mismatch").await;
    harness.milvus.add_collection(&harness.collection, 768);

    let err = harness
        .manager_with(harness.milvus_config())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, KnowledgeError::SchemaMismatch { ref collection, .. } if *collection == harness.collection));
}

#[tokio::test]
async fn test_connect_rejects_collection_of_other_model() {
    let harness = Harness::start("model_mismatch").await;
    harness.milvus.add_collection(&harness.collection, DIM);
    harness.milvus.set_property(
        &harness.collection,
        schema::PROPERTY_EMBEDDING_MODEL,
        "text-embedding-v1",
    );

    let err = harness
        .manager_with(harness.milvus_config())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, KnowledgeError::SchemaMismatch { .. }));
    assert!(err.to_string().contains("text-embedding-v1"));
}

#[tokio::test]
async fn test_store_then_search_recalls_text() {
    let harness = Harness::start("round_trip").await;
    let manager = harness.manager().await;
    let text = "Rust的所有权系统保证内存安全";

    let receipt = manager
        .store(
            text,
            KnowledgeMetadata::new("Rust")
                .with_title("所有权")
                .with_weight(2.0)
                .with_tags(["rust", "memory"]),
        )
        .await
        .unwrap();

    let results = manager
        .search(text, SearchOptions::new(1).with_score_threshold(0.0))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let top = &results[0];
    assert_eq!(top.text, text);
    assert_eq!(top.metadata.topic, "Rust");
    assert_eq!(top.metadata.title, "所有权");
    assert_eq!(top.metadata.weight, 2.0);
    assert_eq!(top.metadata.tags, vec!["rust", "memory"]);
    assert!(top.created_at.is_some());
    assert!(top.similarity_score > 0.99);
    assert_eq!(receipt.primary_key, Some(top.id));
}

#[tokio::test]
async fn test_python_question_finds_python_item() {
    let harness = Harness::start("python_scenario").await;
    let manager = harness.manager().await;

    let texts = vec![
        "Python是一种编程语言".to_string(),
        "深度学习".to_string(),
        "自然语言处理".to_string(),
    ];
    let metadatas = vec![
        KnowledgeMetadata::new("编程"),
        KnowledgeMetadata::new("人工智能"),
        KnowledgeMetadata::new("NLP"),
    ];
    manager.store_batch(&texts, metadatas).await.unwrap();

    let results = manager
        .search("什么是Python？", SearchOptions::new(1))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "Python是一种编程语言");
    assert_eq!(results[0].metadata.topic, "编程");
}

#[tokio::test]
async fn test_store_batch_uses_one_embedding_and_one_insert_call() {
    let harness = Harness::start("batch_calls").await;
    let manager = harness.manager().await;
    let builder = TestDataBuilder::from_test_name("batch_calls");
    let texts = builder.texts("document", 3);
    let embedding_batches_before = harness.embeddings.batch_sizes().len();
    let inserts_before = harness.milvus.requests_to("entities/insert");

    let receipts = manager
        .store_batch(
            &texts,
            vec![
                KnowledgeMetadata::new("a"),
                KnowledgeMetadata::new("b"),
                KnowledgeMetadata::new("c"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(receipts.len(), 3);
    assert!(receipts.iter().all(|r| r.primary_key.is_some()));
    assert_eq!(
        &harness.embeddings.batch_sizes()[embedding_batches_before..],
        &[3]
    );
    assert_eq!(
        harness.milvus.requests_to("entities/insert"),
        inserts_before + 1
    );

    let rows = harness.milvus.rows(&harness.collection);
    let stored: Vec<(&str, &str)> = rows
        .iter()
        .map(|row| (row["text"].as_str().unwrap(), row["topic"].as_str().unwrap()))
        .collect();
    assert_eq!(
        stored,
        vec![
            (texts[0].as_str(), "a"),
            (texts[1].as_str(), "b"),
            (texts[2].as_str(), "c")
        ]
    );
    // One batch shares one timestamp
    assert_eq!(rows[0]["created_at"], rows[2]["created_at"]);
}

#[tokio::test]
async fn test_store_batch_length_mismatch_makes_no_remote_calls() {
    let harness = Harness::start("batch_mismatch").await;
    let manager = harness.manager().await;
    let before = harness.remote_calls();

    let err = manager
        .store_batch(
            &["one".to_string(), "two".to_string()],
            vec![KnowledgeMetadata::default()],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, KnowledgeError::Validation(_)));
    assert_eq!(harness.remote_calls(), before);
}

#[tokio::test]
async fn test_invalid_metadata_makes_no_remote_calls() {
    let harness = Harness::start("invalid_metadata").await;
    let manager = harness.manager().await;
    let before = harness.remote_calls();

    let too_many_tags = KnowledgeMetadata::new("t").with_tags((0..11).map(|i| format!("tag{}", i)));
    let err = manager.store("text", too_many_tags).await.unwrap_err();

    assert!(matches!(err, KnowledgeError::Validation(_)));
    assert_eq!(harness.remote_calls(), before);
}

#[tokio::test]
async fn test_search_sorted_and_threshold_never_adds_results() {
    let harness = Harness::start("threshold").await;
    let manager = harness.manager().await;
    let texts = vec![
        "向量数据库存储嵌入".to_string(),
        "向量检索".to_string(),
        "今天天气很好".to_string(),
        "数据库索引".to_string(),
    ];
    manager
        .store_batch(&texts, vec![KnowledgeMetadata::default(); texts.len()])
        .await
        .unwrap();

    let mut previous = usize::MAX;
    for threshold in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
        let results = manager
            .search(
                "向量数据库",
                SearchOptions::new(10).with_score_threshold(threshold),
            )
            .await
            .unwrap();

        let scores: Vec<f32> = results.iter().map(|r| r.similarity_score).collect();
        assert_descending(&scores, "manager search");
        assert!(scores.iter().all(|s| *s >= threshold));
        assert!(results.len() <= previous);
        previous = results.len();
    }
}

#[tokio::test]
async fn test_search_empty_collection_returns_empty_list() {
    let harness = Harness::start("empty_search").await;
    let manager = harness.manager().await;

    let results = manager
        .search("anything at all", SearchOptions::default())
        .await
        .unwrap();

    assert!(results.is_empty());
}

#[tokio::test]
async fn test_blank_query_on_empty_collection_returns_empty_list() {
    let harness = Harness::start("blank_search").await;
    let manager = harness.manager().await;
    let before = harness.remote_calls();

    let results = manager.search("", SearchOptions::default()).await.unwrap();

    assert!(results.is_empty());
    assert_eq!(harness.remote_calls(), before);
}

#[tokio::test]
async fn test_store_accepts_cjk_text_longer_in_bytes_than_the_bound() {
    let harness = Harness::start("cjk_length").await;
    let manager = harness.manager().await;
    let text = "知".repeat(30_000);
    assert!(text.len() > schema::MAX_TEXT_LENGTH);

    let receipt = manager
        .store(&text, KnowledgeMetadata::new("长文本"))
        .await
        .unwrap();

    let rows = harness.milvus.rows(&harness.collection);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["text"].as_str().map(|t| t.chars().count()), Some(30_000));
    assert!(receipt.primary_key.is_some());
}

#[tokio::test]
async fn test_store_rejects_text_over_the_character_bound() {
    let harness = Harness::start("text_bound").await;
    let manager = harness.manager().await;
    let before = harness.remote_calls();

    let err = manager
        .store(
            &"知".repeat(schema::MAX_TEXT_LENGTH + 1),
            KnowledgeMetadata::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, KnowledgeError::Validation(_)));
    assert_eq!(harness.remote_calls(), before);
}

#[tokio::test]
async fn test_search_load_failure_soft_by_default_strict_when_configured() {
    let harness = Harness::start("load_failure").await;
    let soft = harness.manager().await;
    soft.store("stored text", KnowledgeMetadata::default())
        .await
        .unwrap();
    let strict = harness
        .manager_with(harness.milvus_config().with_strict_mode(true))
        .await
        .unwrap();

    harness.milvus.set_load_failure(true);

    assert!(
        soft.search("stored text", SearchOptions::default())
            .await
            .unwrap()
            .is_empty()
    );
    let err = strict
        .search("stored text", SearchOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_service_error());

    // Writes fail hard regardless of the read policy
    assert!(
        soft.store("another", KnowledgeMetadata::default())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_embedding_failure_propagates_from_store() {
    let harness = Harness::start("embedding_failure").await;
    let manager = harness.manager().await;
    harness
        .embeddings
        .set_failure(Some(test_utils::EmbeddingFailure::ServerError));

    let err = manager
        .store("text", KnowledgeMetadata::default())
        .await
        .unwrap_err();

    assert!(matches!(err, KnowledgeError::Embedding(_)));
    assert_eq!(harness.milvus.row_count(&harness.collection), Some(0));
}

#[tokio::test]
async fn test_created_at_never_decreases() {
    let harness = Harness::start("created_at").await;
    let manager = harness.manager().await;

    for text in ["first", "second", "third"] {
        manager
            .store(text, KnowledgeMetadata::default())
            .await
            .unwrap();
    }

    let stamps: Vec<i64> = harness
        .milvus
        .rows(&harness.collection)
        .iter()
        .map(|row| assert_some(row["created_at"].as_i64(), "created_at"))
        .collect();
    assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn test_concurrent_stores_all_land() {
    let harness = Harness::start("concurrent").await;
    let manager = harness.manager().await;

    let texts = TestDataBuilder::from_test_name("concurrent").texts("parallel", 5);
    let results = join_all(
        texts
            .iter()
            .map(|text| manager.store(text, KnowledgeMetadata::default())),
    )
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(manager.info().await.unwrap().stats.row_count, 5);
}

#[tokio::test]
async fn test_info_reports_collection_and_dimension() {
    let harness = Harness::start("info").await;
    let manager = harness.manager().await;
    manager
        .store("one", KnowledgeMetadata::default())
        .await
        .unwrap();

    let info = manager.info().await.unwrap();

    assert_eq!(info.collection_name, harness.collection);
    assert_eq!(info.vector_dimension, DIM);
    assert_eq!(info.stats.row_count, 1);
}
