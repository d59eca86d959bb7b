//! Fake OpenAI-compatible embedding service
//!
//! Serves `POST /embeddings`. Vectors come from [`char_bucket_embedding`], so
//! texts sharing characters have positive cosine similarity and identical
//! texts have similarity 1.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::server::TestServer;

/// Deterministic embedding: each character adds weight to bucket
/// `code point % dimension`, and the result is L2-normalised
pub fn char_bucket_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    if dimension == 0 {
        return vector;
    }

    for c in text.chars() {
        vector[c as usize % dimension] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

/// Ways the fake service can misbehave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingFailure {
    /// Respond with HTTP 500
    ServerError,
    /// Omit the `embedding` field of the last item
    MissingEmbedding,
    /// Return one item fewer than requested
    ShortBatch,
    /// Sleep before answering
    Slow(Duration),
}

struct EmbeddingState {
    api_key: String,
    dimension: usize,
    failure: Mutex<Option<EmbeddingFailure>>,
    requests: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

/// In-process embedding API
///
/// # Example
///
/// ```no_run
/// use test_utils::FakeEmbeddingService;
///
/// # async fn example() {
/// let service = FakeEmbeddingService::start("sk-test", 64).await;
/// let base_url = service.url();
/// assert_eq!(service.request_count(), 0);
/// # }
/// ```
pub struct FakeEmbeddingService {
    server: TestServer,
    state: Arc<EmbeddingState>,
}

impl FakeEmbeddingService {
    /// Start a service accepting `api_key` and producing `dimension`-long
    /// vectors unless a request asks for other `dimensions`
    pub async fn start(api_key: &str, dimension: usize) -> Self {
        let state = Arc::new(EmbeddingState {
            api_key: api_key.to_string(),
            dimension,
            failure: Mutex::new(None),
            requests: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/embeddings", post(embeddings))
            .with_state(state.clone());

        Self {
            server: TestServer::start(router).await,
            state,
        }
    }

    /// Base URL to configure the client with
    pub fn url(&self) -> &str {
        self.server.url()
    }

    pub fn set_failure(&self, failure: Option<EmbeddingFailure>) {
        *self.state.failure.lock().expect("failure lock poisoned") = failure;
    }

    /// Number of `/embeddings` calls received, including rejected ones
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Number of inputs in each accepted request, in arrival order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state
            .batch_sizes
            .lock()
            .expect("batch size lock poisoned")
            .clone()
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message, "type": "invalid_request_error" } })),
    )
        .into_response()
}

async fn embeddings(
    State(state): State<Arc<EmbeddingState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Bearer {}", state.api_key);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected);
    if !authorized {
        return error(StatusCode::UNAUTHORIZED, "Incorrect API key provided");
    }

    let failure = *state.failure.lock().expect("failure lock poisoned");
    match failure {
        Some(EmbeddingFailure::ServerError) => {
            return error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
        Some(EmbeddingFailure::Slow(delay)) => tokio::time::sleep(delay).await,
        _ => {}
    }

    let Some(inputs) = body["input"].as_array() else {
        return error(StatusCode::BAD_REQUEST, "input must be an array of strings");
    };
    if body["encoding_format"] != "float" {
        return error(StatusCode::BAD_REQUEST, "encoding_format must be float");
    }
    let dimension = body["dimensions"]
        .as_u64()
        .map(|d| d as usize)
        .unwrap_or(state.dimension);

    state
        .batch_sizes
        .lock()
        .expect("batch size lock poisoned")
        .push(inputs.len());

    let mut data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let text = input.as_str().unwrap_or_default();
            json!({
                "object": "embedding",
                "index": index,
                "embedding": char_bucket_embedding(text, dimension),
            })
        })
        .collect();

    match failure {
        Some(EmbeddingFailure::MissingEmbedding) => {
            if let Some(Value::Object(last)) = data.last_mut() {
                last.remove("embedding");
            }
        }
        Some(EmbeddingFailure::ShortBatch) => {
            data.pop();
        }
        _ => {}
    }

    // Clients must order by `index`, not by position
    data.reverse();

    let tokens: usize = inputs
        .iter()
        .map(|input| input.as_str().map(|s| s.chars().count()).unwrap_or_default())
        .sum();

    Json(json!({
        "object": "list",
        "data": data,
        "model": body["model"],
        "usage": { "prompt_tokens": tokens, "total_tokens": tokens }
    }))
    .into_response()
}
