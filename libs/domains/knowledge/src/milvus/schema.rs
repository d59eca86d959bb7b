//! The single fixed collection layout used for every knowledge collection.
//!
//! | field        | type                          |
//! |--------------|-------------------------------|
//! | `id`         | Int64, primary key, auto id   |
//! | `vector`     | FloatVector(dim)              |
//! | `text`       | VarChar(65535)                |
//! | `topic`      | VarChar(500)                  |
//! | `weight`     | Float                         |
//! | `created_at` | Int32                         |
//! | `title`      | VarChar(100)                  |
//! | `tags`       | Array<VarChar(100)>, cap 10   |
//!
//! The vector field carries one AUTOINDEX index with the COSINE metric.

use serde_json::{Value, json};

use crate::models::CreateCollection;

pub const FIELD_ID: &str = "id";
pub const FIELD_VECTOR: &str = "vector";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_TOPIC: &str = "topic";
pub const FIELD_WEIGHT: &str = "weight";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_TAGS: &str = "tags";

pub const MAX_TEXT_LENGTH: usize = 65_535;
pub const MAX_TOPIC_LENGTH: usize = 500;
pub const MAX_TITLE_LENGTH: usize = 100;
pub const MAX_TAG_LENGTH: usize = 100;
pub const MAX_TAGS: usize = 10;

pub const METRIC_TYPE: &str = "COSINE";

/// Collection properties recording which embedder produced the vectors
pub const PROPERTY_EMBEDDING_MODEL: &str = "knowledge.embedding.model";
pub const PROPERTY_EMBEDDING_DIM: &str = "knowledge.embedding.dim";

pub const DEFAULT_OUTPUT_FIELDS: [&str; 6] = [
    FIELD_TEXT,
    FIELD_TOPIC,
    FIELD_WEIGHT,
    FIELD_CREATED_AT,
    FIELD_TITLE,
    FIELD_TAGS,
];

fn varchar(name: &str, max_length: usize) -> Value {
    json!({
        "fieldName": name,
        "dataType": "VarChar",
        "elementTypeParams": { "max_length": max_length.to_string() }
    })
}

/// Schema object for `collections/create`
pub fn collection_schema(dimension: usize) -> Value {
    json!({
        "autoId": true,
        "enableDynamicField": false,
        "fields": [
            {
                "fieldName": FIELD_ID,
                "dataType": "Int64",
                "isPrimary": true
            },
            {
                "fieldName": FIELD_VECTOR,
                "dataType": "FloatVector",
                "elementTypeParams": { "dim": dimension.to_string() }
            },
            varchar(FIELD_TEXT, MAX_TEXT_LENGTH),
            varchar(FIELD_TOPIC, MAX_TOPIC_LENGTH),
            { "fieldName": FIELD_WEIGHT, "dataType": "Float" },
            { "fieldName": FIELD_CREATED_AT, "dataType": "Int32" },
            varchar(FIELD_TITLE, MAX_TITLE_LENGTH),
            {
                "fieldName": FIELD_TAGS,
                "dataType": "Array",
                "elementDataType": "VarChar",
                "elementTypeParams": {
                    "max_capacity": MAX_TAGS.to_string(),
                    "max_length": MAX_TAG_LENGTH.to_string()
                }
            }
        ]
    })
}

pub fn index_params() -> Value {
    json!([{
        "fieldName": FIELD_VECTOR,
        "indexName": FIELD_VECTOR,
        "indexType": "AUTOINDEX",
        "metricType": METRIC_TYPE
    }])
}

/// Full request body for `collections/create`
pub fn create_request(input: &CreateCollection) -> Value {
    json!({
        "collectionName": input.name,
        "description": input.description,
        "schema": collection_schema(input.dimension),
        "indexParams": index_params()
    })
}

/// Properties written after creation, `None` when there is nothing to record
pub fn embedding_properties(input: &CreateCollection) -> Option<Value> {
    input.embedding_model.as_ref().map(|model| {
        json!({
            PROPERTY_EMBEDDING_MODEL: model,
            PROPERTY_EMBEDDING_DIM: input.dimension.to_string()
        })
    })
}
