use std::fmt;

use core_config::{ConfigError, FromEnv, env_flag, env_optional, env_parse_or, env_required};

/// Credential accepted by the vector database REST API
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    ApiKey(String),
    UserPassword { username: String, password: String },
}

impl Credential {
    /// Value sent after `Bearer `; user/password pairs use `user:password`
    pub fn bearer(&self) -> String {
        match self {
            Credential::Token(token) | Credential::ApiKey(token) => token.clone(),
            Credential::UserPassword { username, password } => format!("{}:{}", username, password),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Credential::Token(_) => "token",
            Credential::ApiKey(_) => "api key",
            Credential::UserPassword { .. } => "username/password",
        }
    }
}

// Keep secrets out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            other => f.debug_tuple(other.label()).field(&"***").finish(),
        }
    }
}

/// Vector database connection configuration
#[derive(Debug, Clone)]
pub struct MilvusConfig {
    pub endpoint: String,
    /// Tried in order by [`super::MilvusStore::connect`]
    pub credentials: Vec<Credential>,
    pub timeout_secs: u64,
    /// Surface load failures on the read path instead of returning no results
    pub strict_mode: bool,
}

impl MilvusConfig {
    pub fn new(endpoint: impl Into<String>, credential: Credential) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credentials: vec![credential],
            timeout_secs: 30,
            strict_mode: false,
        }
    }

    pub fn with_fallback_credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }
}

impl FromEnv for MilvusConfig {
    /// - `ZILLIZ_ENDPOINT` (required)
    /// - `ZILLIZ_TOKEN`, `ZILLIZ_API_KEY`, `ZILLIZ_USERNAME` + `ZILLIZ_PASSWORD`:
    ///   at least one credential, kept in this priority order
    /// - `ZILLIZ_TIMEOUT_SECS` (default 30)
    /// - `KNOWLEDGE_STRICT_MODE` (default false)
    fn from_env() -> Result<Self, ConfigError> {
        let endpoint = env_required("ZILLIZ_ENDPOINT")?;

        let mut credentials = Vec::new();
        if let Some(token) = env_optional("ZILLIZ_TOKEN") {
            credentials.push(Credential::Token(token));
        }
        if let Some(api_key) = env_optional("ZILLIZ_API_KEY") {
            credentials.push(Credential::ApiKey(api_key));
        }
        if let (Some(username), Some(password)) =
            (env_optional("ZILLIZ_USERNAME"), env_optional("ZILLIZ_PASSWORD"))
        {
            credentials.push(Credential::UserPassword { username, password });
        }

        if credentials.is_empty() {
            return Err(ConfigError::MissingOneOf(vec![
                "ZILLIZ_TOKEN".to_string(),
                "ZILLIZ_API_KEY".to_string(),
                "ZILLIZ_USERNAME/ZILLIZ_PASSWORD".to_string(),
            ]));
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
            timeout_secs: env_parse_or("ZILLIZ_TIMEOUT_SECS", 30)?,
            strict_mode: env_flag("KNOWLEDGE_STRICT_MODE", false)?,
        })
    }
}
