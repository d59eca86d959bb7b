use std::time::Duration;

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse_optional, env_parse_or, env_required_any};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use super::Embedder;
use crate::error::{KnowledgeError, KnowledgeResult};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-v3";
/// Output size of `text-embedding-v3`, used when discovery fails
pub const DEFAULT_DIMENSION: usize = 1024;

const DIMENSION_PROBE: &str = "测试";

/// Qwen (DashScope) embedding provider configuration
#[derive(Clone)]
pub struct QwenConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Requested output size; probed from the service when unset
    pub dimension: Option<usize>,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for QwenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QwenConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl QwenConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimension: None,
            timeout_secs: 30,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl FromEnv for QwenConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_required_any(&["QWEN_API_KEY", "DASHSCOPE_API_KEY"])?;

        Ok(Self {
            api_key,
            base_url: env_or_default("QWEN_BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: env_or_default("QWEN_EMBEDDING_MODEL", DEFAULT_MODEL),
            dimension: env_parse_optional("QWEN_EMBEDDING_DIMENSION")?,
            timeout_secs: env_parse_or("QWEN_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Qwen embeddings over the OpenAI-compatible endpoint
pub struct QwenEmbedder {
    client: Client,
    config: QwenConfig,
    probed_dimension: OnceCell<usize>,
}

impl QwenEmbedder {
    pub fn new(config: QwenConfig) -> KnowledgeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KnowledgeError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            probed_dimension: OnceCell::new(),
        })
    }

    pub fn from_env() -> KnowledgeResult<Self> {
        Self::new(QwenConfig::from_env()?)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    #[serde(default)]
    total_tokens: u32,
}

/// Order by `index` and reject responses that do not cover every input exactly once
fn into_vectors(mut data: Vec<EmbeddingData>, expected: usize) -> KnowledgeResult<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(KnowledgeError::Embedding(format!(
            "Expected {} embeddings, received {}",
            expected,
            data.len()
        )));
    }

    data.sort_by_key(|d| d.index);

    data.into_iter()
        .enumerate()
        .map(|(position, d)| {
            if d.index != position {
                return Err(KnowledgeError::Embedding(format!(
                    "Embedding for input {} is missing",
                    position
                )));
            }
            d.embedding.ok_or_else(|| {
                KnowledgeError::Embedding(format!(
                    "Response is missing the embedding for input {}",
                    position
                ))
            })
        })
        .collect()
}

#[async_trait]
impl Embedder for QwenEmbedder {
    fn model_name(&self) -> String {
        self.config.model.clone()
    }

    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| KnowledgeError::Embedding("No embedding returned".to_string()))
    }

    #[instrument(skip(self, texts), fields(count = texts.len(), model = %self.config.model))]
    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            encoding_format: "float",
            dimensions: self.config.dimension,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Embedding(format!(
                "Qwen API error ({}): {}",
                status, error_text
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("Invalid response body: {}", e)))?;

        debug!(
            response_model = body.model.as_deref().unwrap_or_default(),
            total_tokens = body.usage.as_ref().map(|u| u.total_tokens).unwrap_or_default(),
            "Embedding request completed"
        );

        into_vectors(body.data, texts.len())
    }

    async fn dimension(&self) -> usize {
        if let Some(dimension) = self.config.dimension {
            return dimension;
        }

        let probed = self
            .probed_dimension
            .get_or_try_init(|| async { self.embed(DIMENSION_PROBE).await.map(|v| v.len()) })
            .await;

        match probed {
            Ok(dimension) => *dimension,
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = DEFAULT_DIMENSION,
                    "Could not discover embedding dimension, using default"
                );
                DEFAULT_DIMENSION
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "QWEN_API_KEY",
        "DASHSCOPE_API_KEY",
        "QWEN_BASE_URL",
        "QWEN_EMBEDDING_MODEL",
        "QWEN_EMBEDDING_DIMENSION",
        "QWEN_TIMEOUT_SECS",
    ];

    fn with_env<F: FnOnce()>(set: &[(&str, &str)], f: F) {
        let vars: Vec<(&str, Option<&str>)> = VARS
            .iter()
            .map(|key| (*key, set.iter().find(|(k, _)| k == key).map(|(_, v)| *v)))
            .collect();
        temp_env::with_vars(vars, f);
    }

    fn data(index: usize, embedding: Option<Vec<f32>>) -> EmbeddingData {
        EmbeddingData { embedding, index }
    }

    #[test]
    fn test_from_env_defaults() {
        with_env(&[("QWEN_API_KEY", "sk-test")], || {
            let config = QwenConfig::from_env().unwrap();
            assert_eq!(config.api_key, "sk-test");
            assert_eq!(config.base_url, DEFAULT_BASE_URL);
            assert_eq!(config.model, "text-embedding-v3");
            assert_eq!(config.dimension, None);
            assert_eq!(config.timeout_secs, 30);
        });
    }

    #[test]
    fn test_from_env_accepts_dashscope_key_and_overrides() {
        with_env(
            &[
                ("DASHSCOPE_API_KEY", "sk-dash"),
                ("QWEN_BASE_URL", "http://localhost:9000/v1/"),
                ("QWEN_EMBEDDING_MODEL", "text-embedding-v4"),
                ("QWEN_EMBEDDING_DIMENSION", "768"),
            ],
            || {
                let config = QwenConfig::from_env().unwrap();
                assert_eq!(config.api_key, "sk-dash");
                assert_eq!(config.base_url, "http://localhost:9000/v1");
                assert_eq!(config.model, "text-embedding-v4");
                assert_eq!(config.dimension, Some(768));
            },
        );
    }

    #[test]
    fn test_from_env_missing_key() {
        with_env(&[], || {
            let err = QwenConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::MissingOneOf(_)));
        });
    }

    #[test]
    fn test_from_env_rejects_bad_dimension() {
        with_env(
            &[("QWEN_API_KEY", "k"), ("QWEN_EMBEDDING_DIMENSION", "wide")],
            || {
                assert!(matches!(
                    QwenConfig::from_env(),
                    Err(ConfigError::ParseError { .. })
                ));
            },
        );
    }

    #[test]
    fn test_debug_hides_api_key() {
        let debug = format!("{:?}", QwenConfig::new("sk-secret"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn test_request_omits_unset_dimensions() {
        let input = vec!["a".to_string()];
        let request = EmbeddingRequest {
            model: "text-embedding-v3",
            input: &input,
            encoding_format: "float",
            dimensions: None,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["encoding_format"], "float");
        assert!(body.get("dimensions").is_none());
    }

    #[test]
    fn test_into_vectors_reorders_by_index() {
        let vectors = into_vectors(
            vec![data(1, Some(vec![2.0])), data(0, Some(vec![1.0]))],
            2,
        )
        .unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_into_vectors_fails_whole_batch() {
        let missing = into_vectors(vec![data(0, Some(vec![1.0])), data(1, None)], 2);
        assert!(matches!(missing, Err(KnowledgeError::Embedding(_))));

        let short = into_vectors(vec![data(0, Some(vec![1.0]))], 2);
        assert!(short.is_err());

        let duplicated = into_vectors(
            vec![data(0, Some(vec![1.0])), data(0, Some(vec![1.0]))],
            2,
        );
        assert!(duplicated.is_err());
    }

    #[tokio::test]
    async fn test_configured_dimension_skips_probe() {
        // Unroutable base URL: a probe would fail and fall back to 1024
        let embedder = QwenEmbedder::new(
            QwenConfig::new("k")
                .with_base_url("http://127.0.0.1:9")
                .with_dimension(8),
        )
        .unwrap();
        assert_eq!(embedder.dimension().await, 8);
    }
}
