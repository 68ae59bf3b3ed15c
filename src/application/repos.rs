//! Read-side port onto the CMS.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("content source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document `{what}`: {reason}")]
    Malformed { what: String, reason: String },
}

impl SourceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Documents are opaque JSON: the CMS schema is owned elsewhere.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Every published document in `collection`.
    async fn list(&self, collection: &str) -> Result<Vec<Value>, SourceError>;

    async fn find(&self, collection: &str, slug: &str) -> Result<Value, SourceError>;

    async fn global(&self, name: &str) -> Result<Value, SourceError>;
}
