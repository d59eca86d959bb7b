use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::milvus::schema;

fn default_weight() -> f32 {
    1.0
}

/// Caller-supplied descriptive fields of a knowledge item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct KnowledgeMetadata {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub topic: String,

    #[serde(default)]
    #[validate(length(max = 100))]
    pub title: String,

    /// Importance hint, no range is enforced
    #[serde(default = "default_weight")]
    pub weight: f32,

    #[serde(default)]
    #[validate(length(max = 10), custom(function = "validate_tags"))]
    pub tags: Vec<String>,
}

fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags
        .iter()
        .any(|tag| tag.chars().count() > schema::MAX_TAG_LENGTH)
    {
        let mut error = ValidationError::new("tag_length");
        error.message = Some(
            format!(
                "each tag must be at most {} characters",
                schema::MAX_TAG_LENGTH
            )
            .into(),
        );
        return Err(error);
    }
    Ok(())
}

impl Default for KnowledgeMetadata {
    fn default() -> Self {
        Self {
            topic: String::new(),
            title: String::new(),
            weight: default_weight(),
            tags: Vec::new(),
        }
    }
}

impl KnowledgeMetadata {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// One row of the fixed collection schema, as sent to the database.
///
/// The primary key is assigned by the database and therefore absent here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub vector: Vec<f32>,
    pub text: String,
    pub topic: String,
    pub weight: f32,
    pub created_at: i32,
    pub title: String,
    pub tags: Vec<String>,
}

impl KnowledgeItem {
    pub fn new(vector: Vec<f32>, text: String, metadata: KnowledgeMetadata, created_at: i32) -> Self {
        Self {
            vector,
            text,
            topic: metadata.topic,
            weight: metadata.weight,
            created_at,
            title: metadata.title,
            tags: metadata.tags,
        }
    }
}

/// Input for creating a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCollection {
    pub name: String,
    pub dimension: usize,
    pub description: String,
    /// Recorded as a collection property so later startups can detect a model switch
    pub embedding_model: Option<String>,
}

impl CreateCollection {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        let name = name.into();
        Self {
            description: format!("Knowledge base collection - {}", name),
            name,
            dimension,
            embedding_model: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }
}

/// Schema and properties of an existing collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub name: String,
    pub description: String,
    /// Dimension of the vector field, when the database reports one
    pub dimension: Option<usize>,
    pub fields: Vec<String>,
    pub properties: HashMap<String, String>,
}

impl CollectionDescription {
    pub fn embedding_model(&self) -> Option<&str> {
        self.properties
            .get(schema::PROPERTY_EMBEDDING_MODEL)
            .map(String::as_str)
    }

    pub fn recorded_dimension(&self) -> Option<usize> {
        self.properties
            .get(schema::PROPERTY_EMBEDDING_DIM)
            .and_then(|dim| dim.parse().ok())
    }
}

/// Result of a batch insert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub insert_count: usize,
    /// Database-assigned primary keys in insertion order; may be empty
    pub primary_keys: Vec<i64>,
}

/// Nearest-neighbour query against one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub output_fields: Vec<String>,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>, limit: usize) -> Self {
        Self {
            vector,
            limit,
            output_fields: schema::DEFAULT_OUTPUT_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
        }
    }

    pub fn with_output_fields(mut self, fields: Vec<String>) -> Self {
        self.output_fields = fields;
        self
    }
}

/// Raw record returned by a vector search, best match first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    /// Cosine similarity as reported by the database
    pub score: f32,
    pub fields: Map<String, Value>,
}

impl SearchHit {
    fn string_field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Collection statistics, descriptive only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    #[serde(alias = "rowCount", default)]
    pub row_count: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Search options for [`crate::KnowledgeManager::search`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    /// Results scoring below this are dropped; equal scores are kept
    pub score_threshold: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            score_threshold: 0.0,
        }
    }
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_score_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }
}

/// Search result as exposed to callers of the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub text: String,
    pub metadata: KnowledgeMetadata,
    pub created_at: Option<i32>,
    pub similarity_score: f32,
}

impl From<SearchHit> for SearchResult {
    fn from(hit: SearchHit) -> Self {
        let metadata = KnowledgeMetadata {
            topic: hit.string_field(schema::FIELD_TOPIC).unwrap_or_default(),
            title: hit.string_field(schema::FIELD_TITLE).unwrap_or_default(),
            weight: hit
                .fields
                .get(schema::FIELD_WEIGHT)
                .and_then(Value::as_f64)
                .map(|w| w as f32)
                .unwrap_or_else(default_weight),
            tags: hit
                .fields
                .get(schema::FIELD_TAGS)
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        Self {
            id: hit.id,
            text: hit.string_field(schema::FIELD_TEXT).unwrap_or_default(),
            created_at: hit
                .fields
                .get(schema::FIELD_CREATED_AT)
                .and_then(Value::as_i64)
                .and_then(|ts| i32::try_from(ts).ok()),
            similarity_score: hit.score,
            metadata,
        }
    }
}

/// Receipt for a stored text.
///
/// `receipt_id` is generated client-side and cannot be used to fetch or delete
/// the record. `primary_key` is the database-assigned id when the insert
/// response reported one for this row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub receipt_id: Uuid,
    pub primary_key: Option<i64>,
}

impl StoreReceipt {
    pub fn new(primary_key: Option<i64>) -> Self {
        Self {
            receipt_id: Uuid::new_v4(),
            primary_key,
        }
    }
}

/// Summary of the collection a manager is bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub collection_name: String,
    pub vector_dimension: usize,
    pub stats: CollectionStats,
}
