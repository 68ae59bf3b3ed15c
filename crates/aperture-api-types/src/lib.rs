//! Request and response bodies of the aperture cache administration API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/revalidate`.
///
/// Exactly one of `collection` or `global` names the mutated content; `doc`
/// carries the affected record so cascades can resolve slugs and relations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevalidateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevalidateResponse {
    pub revalidated: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheAction {
    Warm,
    Clear,
}

/// Body of `POST /api/cache`. An empty tag list with `clear` clears everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheActionRequest {
    pub action: CacheAction,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheActionResponse {
    pub action: CacheAction,
    pub tags: Vec<String>,
    /// Entries removed for `clear`, reads fetched for `warm`.
    pub affected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub entries: usize,
    pub tags: usize,
    pub in_flight: usize,
    pub queued_events: usize,
    pub dropped_events: u64,
    pub client_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
