//! Command implementations, each producing the JSON printed on stdout

use domain_knowledge::{
    Embedder, KnowledgeManager, KnowledgeMetadata, SearchOptions, VectorStore,
};
use eyre::{Result, bail};
use serde_json::{Value, json};
use tracing::info;

pub const DEMO_QUERY: &str = "什么是Python？";

/// Sample items stored by the `demo` command: (text, topic, title, tags)
pub const DEMO_ITEMS: [(&str, &str, &str, &[&str]); 3] = [
    ("Python是一种编程语言", "编程", "Python简介", &["python", "编程"]),
    ("深度学习", "人工智能", "深度学习", &["AI"]),
    ("自然语言处理", "自然语言处理", "NLP", &["AI", "NLP"]),
];

pub async fn store<E: Embedder, S: VectorStore>(
    manager: &KnowledgeManager<E, S>,
    text: &str,
    metadata: KnowledgeMetadata,
) -> Result<Value> {
    let receipt = manager.store(text, metadata).await?;
    Ok(serde_json::to_value(receipt)?)
}

pub async fn search<E: Embedder, S: VectorStore>(
    manager: &KnowledgeManager<E, S>,
    query: &str,
    options: SearchOptions,
) -> Result<Value> {
    let results = manager.search(query, options).await?;
    Ok(serde_json::to_value(results)?)
}

pub async fn info<E: Embedder, S: VectorStore>(manager: &KnowledgeManager<E, S>) -> Result<Value> {
    Ok(serde_json::to_value(manager.info().await?)?)
}

pub async fn collections<S: VectorStore>(store: &S) -> Result<Value> {
    Ok(json!(store.list_collections().await?))
}

pub async fn drop_collection<S: VectorStore>(store: &S, name: &str, confirmed: bool) -> Result<Value> {
    if !confirmed {
        bail!("Refusing to drop collection '{}' without --yes", name);
    }

    store.drop_collection(name).await?;
    info!(collection = name, "Collection dropped");
    Ok(json!({ "dropped": name }))
}

/// Store the sample items and run the sample query against them
pub async fn demo<E: Embedder, S: VectorStore>(manager: &KnowledgeManager<E, S>) -> Result<Value> {
    let texts: Vec<String> = DEMO_ITEMS
        .iter()
        .map(|(text, ..)| text.to_string())
        .collect();
    let metadatas = DEMO_ITEMS
        .iter()
        .map(|(_, topic, title, tags)| {
            KnowledgeMetadata::new(*topic)
                .with_title(*title)
                .with_tags(tags.iter().copied())
        })
        .collect();

    let receipts = manager.store_batch(&texts, metadatas).await?;
    info!(stored = receipts.len(), "Demo items stored");

    let results = manager.search(DEMO_QUERY, SearchOptions::new(1)).await?;
    let info = manager.info().await?;

    Ok(json!({
        "stored": receipts,
        "query": DEMO_QUERY,
        "results": results,
        "info": info,
    }))
}
