//! Storage port consumed by the task engine.
//!
//! The engine only ever calls [`LinkStore::batch_delete`]; the rest of the
//! trait is the boundary the surrounding service implements with its
//! repository adapters.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("link not found: {0}")]
    NotFound(String),

    #[error("link already exists: {0}")]
    AlreadyExists(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored short link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortLink {
    #[serde(rename = "shortURL")]
    pub short_url: String,
    #[serde(rename = "longURL")]
    pub long_url: String,
}

/// Mapping from owner id to the short-url ids queued for deletion.
pub type DeleteBatch = HashMap<String, Vec<String>>;

/// Repository boundary for short links.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn save(&self, link: &ShortLink) -> Result<()>;

    async fn batch_save(&self, links: &[ShortLink]) -> Result<()>;

    /// Delete every listed short url, grouped by owning user.
    async fn batch_delete(&self, ids: &DeleteBatch) -> Result<()>;

    async fn find(&self, short_url: &str) -> Result<ShortLink>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
