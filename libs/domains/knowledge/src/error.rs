use core_config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Embedding service error: {0}")]
    Embedding(String),

    #[error("Vector database error{}: {message}", code_suffix(.code))]
    VectorDb { code: Option<i64>, message: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Schema mismatch for collection '{collection}': {details}")]
    SchemaMismatch { collection: String, details: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" (code {})", c)).unwrap_or_default()
}

impl KnowledgeError {
    pub fn vector_db(message: impl Into<String>) -> Self {
        KnowledgeError::VectorDb {
            code: None,
            message: message.into(),
        }
    }

    /// A remote call failed, timed out or answered with something unusable
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            KnowledgeError::Embedding(_) | KnowledgeError::VectorDb { .. }
        )
    }
}

impl From<ConfigError> for KnowledgeError {
    fn from(err: ConfigError) -> Self {
        KnowledgeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for KnowledgeError {
    fn from(err: serde_json::Error) -> Self {
        KnowledgeError::Internal(format!("JSON error: {}", err))
    }
}

impl From<validator::ValidationErrors> for KnowledgeError {
    fn from(errors: validator::ValidationErrors) -> Self {
        KnowledgeError::Validation(errors.to_string())
    }
}
