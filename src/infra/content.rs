//! Content source adapters: a directory of JSON documents, or the CMS REST API
//! through the client request cache.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::application::repos::{ContentSource, SourceError};
use crate::cache::{ClientCache, ClientError, RequestOptions};

/// Reads `<root>/collections/<name>/<slug>.json` and `<root>/globals/<name>.json`.
#[derive(Debug, Clone)]
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn list(&self, collection: &str) -> Result<Vec<Value>, SourceError> {
        let dir = self.root.join("collections").join(segment(collection)?);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SourceError::unavailable(err)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(SourceError::unavailable)?
        {
            let path = entry.path();
            if path.extension() == Some(OsStr::new("json")) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            docs.push(read_document(&path).await?);
        }
        debug!(collection, count = docs.len(), "Listed collection from disk");
        Ok(docs)
    }

    async fn find(&self, collection: &str, slug: &str) -> Result<Value, SourceError> {
        let path = self
            .root
            .join("collections")
            .join(segment(collection)?)
            .join(format!("{}.json", segment(slug)?));
        read_document(&path).await
    }

    async fn global(&self, name: &str) -> Result<Value, SourceError> {
        let path = self
            .root
            .join("globals")
            .join(format!("{}.json", segment(name)?));
        read_document(&path).await
    }
}

/// Path segments are restricted to `[A-Za-z0-9_-]`.
fn segment(value: &str) -> Result<&str, SourceError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(value)
    } else {
        Err(SourceError::not_found(format!("`{value}`")))
    }
}

/// Parse one document, defaulting its `slug` to the file stem.
async fn read_document(path: &Path) -> Result<Value, SourceError> {
    let what = path.display().to_string();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(SourceError::not_found(what)),
        Err(err) => return Err(SourceError::unavailable(err)),
    };

    let mut doc: Value = serde_json::from_slice(&bytes).map_err(|err| SourceError::Malformed {
        what: what.clone(),
        reason: err.to_string(),
    })?;
    if let Value::Object(fields) = &mut doc
        && !fields.contains_key("slug")
        && let Some(stem) = path.file_stem().and_then(OsStr::to_str)
    {
        fields.insert("slug".into(), Value::String(stem.to_string()));
    }
    Ok(doc)
}

/// Reads the CMS REST API (`/api/<collection>`, `/api/globals/<name>`).
#[derive(Clone)]
pub struct CmsContentSource {
    client: ClientCache,
    base: String,
    max_age: Duration,
}

impl CmsContentSource {
    pub fn new(client: ClientCache, base: &Url, max_age: Duration) -> Self {
        Self {
            client,
            base: base.as_str().trim_end_matches('/').to_string(),
            max_age,
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, SourceError> {
        Url::parse_with_params(&format!("{}/api/{path}", self.base), params).map_err(|err| {
            SourceError::Malformed {
                what: path.to_string(),
                reason: err.to_string(),
            }
        })
    }

    async fn get(&self, url: Url, what: String) -> Result<Value, SourceError> {
        self.client
            .fetch::<Value>(url.as_str(), RequestOptions::default(), self.max_age)
            .await
            .map_err(|err| match err {
                ClientError::Status {
                    status: StatusCode::NOT_FOUND,
                    ..
                } => SourceError::not_found(what),
                ClientError::Decode { reason, .. } => SourceError::Malformed { what, reason },
                other => SourceError::unavailable(other),
            })
    }
}

fn docs(body: Value, what: &str) -> Result<Vec<Value>, SourceError> {
    match body {
        Value::Object(mut fields) => match fields.remove("docs") {
            Some(Value::Array(docs)) => Ok(docs),
            _ => Err(SourceError::Malformed {
                what: what.to_string(),
                reason: "missing `docs` array".into(),
            }),
        },
        _ => Err(SourceError::Malformed {
            what: what.to_string(),
            reason: "expected an object".into(),
        }),
    }
}

#[async_trait]
impl ContentSource for CmsContentSource {
    async fn list(&self, collection: &str) -> Result<Vec<Value>, SourceError> {
        let url = self.url(collection, &[("limit", "1000"), ("depth", "1")])?;
        let body = self.get(url, collection.to_string()).await?;
        docs(body, collection)
    }

    async fn find(&self, collection: &str, slug: &str) -> Result<Value, SourceError> {
        let what = format!("{collection}/{slug}");
        let url = self.url(
            collection,
            &[("where[slug][equals]", slug), ("limit", "1"), ("depth", "1")],
        )?;
        let body = self.get(url, what.clone()).await?;
        docs(body, &what)?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found(what))
    }

    async fn global(&self, name: &str) -> Result<Value, SourceError> {
        let url = self.url(&format!("globals/{name}"), &[("depth", "1")])?;
        self.get(url, format!("global {name}")).await
    }
}
