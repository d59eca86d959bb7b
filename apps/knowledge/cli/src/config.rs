//! Configuration for the knowledge CLI

use core_config::{ConfigError, Environment, FromEnv};
use domain_knowledge::{ManagerOptions, MilvusConfig, QwenConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub qwen: QwenConfig,
    pub milvus: MilvusConfig,
    pub manager: ManagerOptions,
}

impl Config {
    /// Bind to another collection than the configured one
    pub fn with_collection(mut self, collection: Option<String>) -> Self {
        if let Some(name) = collection {
            self.manager = ManagerOptions::new(name);
        }
        self
    }
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: Environment::from_env(),
            qwen: QwenConfig::from_env()?,
            milvus: MilvusConfig::from_env()?,
            manager: ManagerOptions::from_env()?,
        })
    }
}
