mod client;
mod config;
pub mod schema;

pub use client::MilvusStore;
pub use config::{Credential, MilvusConfig};
