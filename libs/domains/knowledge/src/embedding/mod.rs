mod provider;
mod qwen;

#[cfg(test)]
pub use provider::MockEmbedder;
pub use provider::Embedder;
pub use qwen::{DEFAULT_DIMENSION, QwenConfig, QwenEmbedder};
