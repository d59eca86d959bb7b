//! Fake Milvus/Zilliz REST v2 server
//!
//! Implements the `/v2/vectordb/...` paths the knowledge store uses, with the
//! same `{code, data, message}` envelope and error codes as the real service:
//! `1800` for rejected credentials, `100` for a missing collection, `101` for
//! searching an unloaded collection and `1100` for a dimension mismatch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use crate::server::TestServer;

const VECTOR_FIELD: &str = "vector";

#[derive(Debug, Clone)]
struct FakeCollection {
    dimension: usize,
    description: String,
    fields: Vec<Value>,
    properties: BTreeMap<String, String>,
    rows: Vec<Map<String, Value>>,
    loaded: bool,
}

impl FakeCollection {
    fn new(dimension: usize, description: String, fields: Vec<Value>) -> Self {
        Self {
            dimension,
            description,
            fields,
            properties: BTreeMap::new(),
            rows: Vec::new(),
            loaded: false,
        }
    }
}

struct MilvusState {
    token: String,
    collections: Mutex<BTreeMap<String, FakeCollection>>,
    fail_load: AtomicBool,
    next_id: AtomicI64,
    requests: Mutex<Vec<String>>,
}

impl MilvusState {
    fn collections(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, FakeCollection>> {
        self.collections.lock().expect("collections lock poisoned")
    }
}

/// In-process vector database
///
/// # Example
///
/// ```no_run
/// use test_utils::FakeMilvus;
///
/// # async fn example() {
/// let milvus = FakeMilvus::start("token").await;
/// milvus.add_collection("existing", 8);
/// assert_eq!(milvus.row_count("existing"), Some(0));
/// # }
/// ```
pub struct FakeMilvus {
    server: TestServer,
    state: Arc<MilvusState>,
}

impl FakeMilvus {
    /// Start a server accepting `Authorization: Bearer <token>`
    pub async fn start(token: &str) -> Self {
        let state = Arc::new(MilvusState {
            token: token.to_string(),
            collections: Mutex::new(BTreeMap::new()),
            fail_load: AtomicBool::new(false),
            next_id: AtomicI64::new(450_000_000_000_000_000),
            requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/v2/vectordb/{*path}", post(dispatch))
            .with_state(state.clone());

        Self {
            server: TestServer::start(router).await,
            state,
        }
    }

    /// Endpoint to configure the client with
    pub fn url(&self) -> &str {
        self.server.url()
    }

    /// Paths requested so far, relative to `/v2/vectordb/`
    pub fn requests(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .expect("requests lock poisoned")
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }

    /// Number of requests made to one path, e.g. `entities/insert`
    pub fn requests_to(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| *p == path).count()
    }

    /// Make every `collections/load` call fail
    pub fn set_load_failure(&self, fail: bool) {
        self.state.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Seed an empty collection that was not created through the API
    pub fn add_collection(&self, name: &str, dimension: usize) {
        self.state.collections().insert(
            name.to_string(),
            FakeCollection::new(dimension, String::new(), Vec::new()),
        );
    }

    pub fn set_property(&self, collection: &str, key: &str, value: &str) {
        if let Some(c) = self.state.collections().get_mut(collection) {
            c.properties.insert(key.to_string(), value.to_string());
        }
    }

    pub fn property(&self, collection: &str, key: &str) -> Option<String> {
        self.state
            .collections()
            .get(collection)
            .and_then(|c| c.properties.get(key).cloned())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.state.collections().contains_key(name)
    }

    pub fn row_count(&self, name: &str) -> Option<usize> {
        self.state.collections().get(name).map(|c| c.rows.len())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state
            .collections()
            .get(name)
            .is_some_and(|c| c.loaded)
    }

    /// Stored rows without their vectors
    pub fn rows(&self, name: &str) -> Vec<Map<String, Value>> {
        self.state
            .collections()
            .get(name)
            .map(|c| {
                c.rows
                    .iter()
                    .map(|row| {
                        let mut row = row.clone();
                        row.remove(VECTOR_FIELD);
                        row
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "code": 0, "data": data }))
}

fn fail(code: i64, message: impl Into<String>) -> Json<Value> {
    Json(json!({ "code": code, "message": message.into(), "data": {} }))
}

fn not_found(name: &str) -> Json<Value> {
    fail(
        100,
        format!("collection not found[database=default][collection={}]", name),
    )
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn as_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn schema_dimension(schema: &Value) -> Option<usize> {
    schema["fields"]
        .as_array()?
        .iter()
        .find(|field| field["dataType"] == "FloatVector")
        .and_then(|field| match &field["elementTypeParams"]["dim"] {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            _ => None,
        })
}

async fn dispatch(
    State(state): State<Arc<MilvusState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    state
        .requests
        .lock()
        .expect("requests lock poisoned")
        .push(path.clone());

    let expected = format!("Bearer {}", state.token);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected);
    if !authorized {
        return fail(1800, "user hasn't authenticated");
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let name = body["collectionName"].as_str().unwrap_or_default().to_string();

    match path.as_str() {
        "collections/list" => list(&state),
        "collections/create" => create(&state, &name, &body),
        "collections/describe" => describe(&state, &name),
        "collections/alter_properties" => alter_properties(&state, &name, &body),
        "collections/drop" => drop_collection(&state, &name),
        "collections/load" => load(&state, &name),
        "collections/get_stats" => get_stats(&state, &name),
        "entities/insert" => insert(&state, &name, &body),
        "entities/search" => search(&state, &name, &body),
        other => fail(404, format!("unknown path {}", other)),
    }
}

fn list(state: &MilvusState) -> Json<Value> {
    let names: Vec<String> = state.collections().keys().cloned().collect();
    ok(json!(names))
}

fn drop_collection(state: &MilvusState, name: &str) -> Json<Value> {
    match state.collections().remove(name) {
        Some(_) => ok(json!({})),
        None => not_found(name),
    }
}

fn get_stats(state: &MilvusState, name: &str) -> Json<Value> {
    let collections = state.collections();
    match collections.get(name) {
        Some(c) => ok(json!({ "rowCount": c.rows.len() })),
        None => not_found(name),
    }
}

fn create(state: &MilvusState, name: &str, body: &Value) -> Json<Value> {
    let mut collections = state.collections();
    if collections.contains_key(name) {
        return fail(65535, format!("collection already exists: {}", name));
    }
    let Some(dimension) = schema_dimension(&body["schema"]) else {
        return fail(1100, "schema has no vector field with a dimension");
    };

    let fields = body["schema"]["fields"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let description = body["description"].as_str().unwrap_or_default().to_string();

    collections.insert(
        name.to_string(),
        FakeCollection::new(dimension, description, fields),
    );
    ok(json!({}))
}

fn describe(state: &MilvusState, name: &str) -> Json<Value> {
    let collections = state.collections();
    let Some(c) = collections.get(name) else {
        return not_found(name);
    };

    let mut fields: Vec<Value> = c
        .fields
        .iter()
        .filter_map(|field| {
            let field_name = field["fieldName"].as_str()?;
            let data_type = field["dataType"].as_str().unwrap_or_default();
            let params: Vec<Value> = field["elementTypeParams"]
                .as_object()
                .map(|params| {
                    params
                        .iter()
                        .map(|(key, value)| json!({ "key": key, "value": value }))
                        .collect()
                })
                .unwrap_or_default();
            Some(json!({
                "name": field_name,
                "type": data_type,
                "primaryKey": field["isPrimary"].as_bool().unwrap_or(false),
                "params": params,
            }))
        })
        .collect();

    // Seeded collections only know their vector field
    if fields.is_empty() {
        fields.push(json!({
            "name": VECTOR_FIELD,
            "type": "FloatVector",
            "params": [{ "key": "dim", "value": c.dimension.to_string() }],
        }));
    }

    let properties: Vec<Value> = c
        .properties
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect();

    let load_state = if c.loaded {
        "LoadStateLoaded"
    } else {
        "LoadStateNotLoad"
    };

    ok(json!({
        "collectionName": name,
        "description": c.description,
        "fields": fields,
        "properties": properties,
        "load": load_state,
    }))
}

fn alter_properties(state: &MilvusState, name: &str, body: &Value) -> Json<Value> {
    let mut collections = state.collections();
    let Some(c) = collections.get_mut(name) else {
        return not_found(name);
    };

    if let Some(properties) = body["properties"].as_object() {
        for (key, value) in properties {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            c.properties.insert(key.clone(), value);
        }
    }
    ok(json!({}))
}

fn load(state: &MilvusState, name: &str) -> Json<Value> {
    let mut collections = state.collections();
    let Some(c) = collections.get_mut(name) else {
        return not_found(name);
    };
    if state.fail_load.load(Ordering::SeqCst) {
        return fail(65535, "failed to load collection: insufficient query nodes");
    }
    c.loaded = true;
    ok(json!({}))
}

fn insert(state: &MilvusState, name: &str, body: &Value) -> Json<Value> {
    let mut collections = state.collections();
    let Some(c) = collections.get_mut(name) else {
        return not_found(name);
    };
    let Some(rows) = body["data"].as_array() else {
        return fail(1100, "data must be an array");
    };

    // Validate everything first so a bad row writes nothing
    for row in rows {
        let Some(vector) = as_vector(&row[VECTOR_FIELD]) else {
            return fail(1100, "row is missing its vector");
        };
        if vector.len() != c.dimension {
            return fail(
                1100,
                format!(
                    "the dim ({}) of field data(vector) is not equal to schema dim ({})",
                    vector.len(),
                    c.dimension
                ),
            );
        }
    }

    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        let id = state.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = row.as_object().cloned().unwrap_or_default();
        stored.insert("id".to_string(), json!(id));
        c.rows.push(stored);
        ids.push(id);
    }

    ok(json!({ "insertCount": ids.len(), "insertIds": ids }))
}

fn search(state: &MilvusState, name: &str, body: &Value) -> Json<Value> {
    let collections = state.collections();
    let Some(c) = collections.get(name) else {
        return not_found(name);
    };
    if !c.loaded {
        return fail(101, format!("collection not loaded[collection={}]", name));
    }

    let Some(query) = body["data"].get(0).and_then(as_vector) else {
        return fail(1100, "data must contain one query vector");
    };
    if query.len() != c.dimension {
        return fail(
            1100,
            format!(
                "vector dimension mismatch, expected vector size({}), actual {}",
                c.dimension,
                query.len()
            ),
        );
    }

    let limit = body["limit"].as_u64().unwrap_or(10) as usize;
    let output_fields: Vec<&str> = body["outputFields"]
        .as_array()
        .map(|fields| fields.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut scored: Vec<(f32, &Map<String, Value>)> = c
        .rows
        .iter()
        .filter_map(|row| {
            let vector = as_vector(&row[VECTOR_FIELD])?;
            Some((cosine(&query, &vector), row))
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let hits: Vec<Value> = scored
        .into_iter()
        .take(limit)
        .map(|(score, row)| {
            let mut hit = Map::new();
            hit.insert("id".to_string(), row["id"].clone());
            hit.insert("distance".to_string(), json!(score));
            for field in &output_fields {
                if let Some(value) = row.get(*field) {
                    hit.insert(field.to_string(), value.clone());
                }
            }
            Value::Object(hit)
        })
        .collect();

    ok(Value::Array(hits))
}
