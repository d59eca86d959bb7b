use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::schema::{self, FIELD_ID, FIELD_VECTOR};
use super::{Credential, MilvusConfig};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{
    CollectionDescription, CollectionStats, CreateCollection, InsertOutcome, KnowledgeItem,
    SearchHit, SearchQuery,
};
use crate::store::VectorStore;

const API_PREFIX: &str = "v2/vectordb";

/// Envelope wrapped around every REST response
#[derive(Debug, Deserialize)]
struct MilvusResponse {
    code: i64,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl MilvusResponse {
    fn is_success(&self) -> bool {
        self.code == 0 || self.code == 200
    }
}

/// Milvus/Zilliz implementation of [`VectorStore`] over the v2 REST API
pub struct MilvusStore {
    client: Client,
    config: MilvusConfig,
    bearer: String,
}

impl MilvusStore {
    /// Connect with the first configured credential the database accepts.
    ///
    /// Each credential is probed with a collection listing. When every
    /// credential is rejected the last error is returned.
    pub async fn connect(config: MilvusConfig) -> KnowledgeResult<Self> {
        let mut last_error = None;

        for credential in &config.credentials {
            let store = Self::with_credential(config.clone(), credential)?;
            match store.list_collections().await {
                Ok(collections) => {
                    info!(
                        endpoint = %config.endpoint,
                        credential = credential.label(),
                        collections = collections.len(),
                        "Connected to vector database"
                    );
                    return Ok(store);
                }
                Err(e) => {
                    warn!(
                        credential = credential.label(),
                        error = %e,
                        "Vector database rejected credential"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            KnowledgeError::Config("No vector database credential configured".to_string())
        }))
    }

    /// Build a store for one credential without contacting the database
    pub fn with_credential(config: MilvusConfig, credential: &Credential) -> KnowledgeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KnowledgeError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bearer: credential.bearer(),
            config,
        })
    }

    pub fn strict_mode(&self) -> bool {
        self.config.strict_mode
    }

    /// POST to a REST path and unwrap the `data` member of the envelope
    async fn post(&self, path: &str, body: Value) -> KnowledgeResult<Value> {
        let url = format!("{}/{}/{}", self.config.endpoint, API_PREFIX, path);
        debug!(%url, "Vector database request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| KnowledgeError::vector_db(format!("Request to {} failed: {}", path, e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            KnowledgeError::vector_db(format!("Failed to read {} response: {}", path, e))
        })?;

        // Gateways answer some failures with a non-JSON body, keep it as the message
        let envelope: MilvusResponse = match serde_json::from_str(&text) {
            Ok(envelope) if status.is_success() => envelope,
            _ => {
                return Err(KnowledgeError::VectorDb {
                    code: Some(i64::from(status.as_u16())),
                    message: if text.is_empty() {
                        status.to_string()
                    } else {
                        text
                    },
                });
            }
        };

        if !envelope.is_success() {
            return Err(KnowledgeError::VectorDb {
                code: Some(envelope.code),
                message: envelope
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }
}

fn is_not_found(err: &KnowledgeError) -> bool {
    match err {
        KnowledgeError::VectorDb { code, message } => {
            // Only a missing collection counts; a missing index or field must surface as is
            let message = message.to_lowercase();
            *code == Some(100)
                || [
                    "collection not found",
                    "can't find collection",
                    "collection not exist",
                    "collection does not exist",
                ]
                .iter()
                .any(|phrase| message.contains(phrase))
        }
        KnowledgeError::CollectionNotFound(_) => true,
        _ => false,
    }
}

fn is_already_exists(err: &KnowledgeError) -> bool {
    matches!(err, KnowledgeError::VectorDb { message, .. } if message.to_lowercase().contains("already exist"))
}

/// Ids come back as JSON numbers or, for 64-bit safety, as strings
fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_description(name: &str, data: &Value) -> CollectionDescription {
    let fields = data["fields"].as_array().cloned().unwrap_or_default();

    let dimension = fields
        .iter()
        .find(|field| field["name"] == FIELD_VECTOR || field["type"] == "FloatVector")
        .and_then(|field| field["params"].as_array())
        .and_then(|params| params.iter().find(|param| param["key"] == "dim"))
        .and_then(|param| match &param["value"] {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            _ => None,
        });

    let properties: HashMap<String, String> = match &data["properties"] {
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| {
                let key = entry["key"].as_str()?;
                Some((key.to_string(), value_to_string(&entry["value"])))
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect(),
        _ => HashMap::new(),
    };

    CollectionDescription {
        name: data["collectionName"]
            .as_str()
            .unwrap_or(name)
            .to_string(),
        description: data["description"].as_str().unwrap_or_default().to_string(),
        dimension,
        fields: fields
            .iter()
            .filter_map(|field| field["name"].as_str().map(str::to_string))
            .collect(),
        properties,
    }
}

fn parse_hit(row: Value) -> KnowledgeResult<SearchHit> {
    let mut fields = match row {
        Value::Object(fields) => fields,
        other => {
            return Err(KnowledgeError::vector_db(format!(
                "Unexpected search row: {}",
                other
            )));
        }
    };

    let id = fields
        .remove(FIELD_ID)
        .as_ref()
        .and_then(value_to_i64)
        .ok_or_else(|| KnowledgeError::vector_db("Search row is missing its id"))?;

    let score = fields
        .remove("distance")
        .and_then(|distance| distance.as_f64())
        .ok_or_else(|| KnowledgeError::vector_db("Search row is missing its distance"))?
        as f32;

    // Some deployments nest output fields under `entity`
    if let Some(Value::Object(entity)) = fields.remove("entity") {
        fields.extend(entity);
    }

    Ok(SearchHit { id, score, fields })
}

fn parse_hits(data: Value) -> KnowledgeResult<Vec<SearchHit>> {
    let rows = match data {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => {
            return Err(KnowledgeError::vector_db(format!(
                "Unexpected search response: {}",
                other
            )));
        }
    };

    let mut hits = rows
        .into_iter()
        .map(parse_hit)
        .collect::<KnowledgeResult<Vec<_>>>()?;
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(hits)
}

#[async_trait]
impl VectorStore for MilvusStore {
    #[instrument(skip(self))]
    async fn list_collections(&self) -> KnowledgeResult<Vec<String>> {
        let data = self.post("collections/list", json!({})).await?;
        Ok(data
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self, input), fields(collection = %input.name, dimension = input.dimension))]
    async fn create_collection(&self, input: CreateCollection) -> KnowledgeResult<()> {
        if self
            .list_collections()
            .await?
            .iter()
            .any(|name| name == &input.name)
        {
            debug!("Collection already exists, leaving it untouched");
            return Ok(());
        }

        // Another process may win the race between the listing and this call
        match self
            .post("collections/create", schema::create_request(&input))
            .await
        {
            Ok(_) => info!("Created collection"),
            Err(e) if is_already_exists(&e) => {
                debug!("Collection was created concurrently");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if let Some(properties) = schema::embedding_properties(&input) {
            let body = json!({
                "collectionName": input.name,
                "properties": properties,
            });
            // The collection is usable without them; only the startup model check is lost
            if let Err(e) = self.post("collections/alter_properties", body).await {
                warn!(error = %e, "Failed to record embedding properties on collection");
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn describe_collection(
        &self,
        name: &str,
    ) -> KnowledgeResult<Option<CollectionDescription>> {
        match self
            .post("collections/describe", json!({ "collectionName": name }))
            .await
        {
            Ok(data) => Ok(Some(parse_description(name, &data))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn load_collection(&self, name: &str) -> KnowledgeResult<()> {
        match self
            .post("collections/load", json!({ "collectionName": name }))
            .await
        {
            Ok(_) => {
                debug!("Collection loaded");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(KnowledgeError::CollectionNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self, name: &str) -> KnowledgeResult<CollectionStats> {
        match self
            .post("collections/get_stats", json!({ "collectionName": name }))
            .await
        {
            Ok(Value::Null) => Ok(CollectionStats::default()),
            Ok(data) => Ok(serde_json::from_value(data)?),
            Err(e) if is_not_found(&e) => Err(KnowledgeError::CollectionNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn drop_collection(&self, name: &str) -> KnowledgeResult<()> {
        match self
            .post("collections/drop", json!({ "collectionName": name }))
            .await
        {
            Ok(_) => {
                info!("Dropped collection");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!("Collection did not exist");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn insert_records(
        &self,
        name: &str,
        items: Vec<KnowledgeItem>,
        dimension: usize,
    ) -> KnowledgeResult<InsertOutcome> {
        if items.is_empty() {
            return Ok(InsertOutcome::default());
        }

        if let Some(item) = items.iter().find(|item| item.vector.len() != dimension) {
            return Err(KnowledgeError::Validation(format!(
                "Vector has {} dimensions but collection '{}' expects {}",
                item.vector.len(),
                name,
                dimension
            )));
        }

        if !self
            .list_collections()
            .await?
            .iter()
            .any(|existing| existing == name)
        {
            info!("Collection does not exist, creating it before insert");
            self.create_collection(CreateCollection::new(name, dimension))
                .await?;
        }

        let count = items.len();
        let body = json!({
            "collectionName": name,
            "data": items,
        });
        let data = self.post("entities/insert", body).await?;

        let insert_count = data["insertCount"]
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(count);
        let primary_keys = data["insertIds"]
            .as_array()
            .map(|ids| ids.iter().filter_map(value_to_i64).collect())
            .unwrap_or_default();

        // New rows are not searchable until the collection is loaded
        self.load_collection(name).await?;

        info!(insert_count, "Inserted records");
        Ok(InsertOutcome {
            insert_count,
            primary_keys,
        })
    }

    #[instrument(skip(self, query), fields(limit = query.limit))]
    async fn search(&self, name: &str, query: SearchQuery) -> KnowledgeResult<Vec<SearchHit>> {
        // Searching an unloaded collection fails, so load first.
        // Soft mode keeps reads available when that fails; strict mode reports it.
        if let Err(e) = self.load_collection(name).await {
            if self.config.strict_mode {
                return Err(e);
            }
            warn!(error = %e, "Collection could not be loaded, returning no results");
            return Ok(Vec::new());
        }

        let body = json!({
            "collectionName": name,
            "data": [query.vector],
            "annsField": FIELD_VECTOR,
            "limit": query.limit,
            "outputFields": query.output_fields,
        });
        let hits = parse_hits(self.post("entities/search", body).await?)?;

        debug!(hits = hits.len(), "Search completed");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hits_flat_rows_sorted_by_score() {
        let hits = parse_hits(json!([
            { "id": 1, "distance": 0.2, "text": "low" },
            { "id": "2", "distance": 0.9, "text": "high" }
        ]))
        .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[0].fields["text"], "high");
        assert!(!hits[0].fields.contains_key("distance"));
        assert_eq!(hits[1].id, 1);
    }

    #[test]
    fn test_parse_hit_flattens_entity() {
        let hit = parse_hit(json!({
            "id": 7,
            "distance": 0.5,
            "entity": { "text": "nested", "topic": "t" }
        }))
        .unwrap();

        assert_eq!(hit.fields["text"], "nested");
        assert_eq!(hit.fields["topic"], "t");
    }

    #[test]
    fn test_parse_hit_requires_id() {
        assert!(parse_hit(json!({ "distance": 0.5 })).is_err());
        assert!(parse_hits(json!({ "unexpected": true })).is_err());
        assert!(parse_hits(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_parse_description_dimension_and_properties() {
        let description = parse_description(
            "kb",
            &json!({
                "collectionName": "kb",
                "description": "Knowledge base collection - kb",
                "fields": [
                    { "name": "id", "type": "Int64", "primaryKey": true },
                    { "name": "vector", "type": "FloatVector", "params": [{ "key": "dim", "value": "1024" }] },
                    { "name": "text", "type": "VarChar" }
                ],
                "properties": [
                    { "key": "knowledge.embedding.model", "value": "text-embedding-v3" }
                ]
            }),
        );

        assert_eq!(description.dimension, Some(1024));
        assert_eq!(description.fields, vec!["id", "vector", "text"]);
        assert_eq!(description.embedding_model(), Some("text-embedding-v3"));
    }

    #[test]
    fn test_error_classification() {
        assert!(is_not_found(&KnowledgeError::VectorDb {
            code: Some(100),
            message: "collection not found[collection=kb]".into()
        }));
        assert!(!is_not_found(&KnowledgeError::vector_db(
            "collection already exists"
        )));
        assert!(!is_not_found(&KnowledgeError::VectorDb {
            code: Some(700),
            message: "index does not exist[collection=kb]".into()
        }));
        assert!(!is_not_found(&KnowledgeError::vector_db(
            "field not found: embedding"
        )));
        assert!(is_not_found(&KnowledgeError::vector_db(
            "can't find collection: kb"
        )));
        assert!(is_already_exists(&KnowledgeError::vector_db(
            "collection kb already exists"
        )));
    }
}
