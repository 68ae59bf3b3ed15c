//! Edge response middleware.
//!
//! Decorates successful GET/HEAD responses with the validators and
//! `Cache-Control` policy of their content class, and answers matching
//! conditional requests with an empty 304.

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, Method, Request, StatusCode,
        header::{
            CACHE_CONTROL, CONTENT_LENGTH, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
            VARY,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, instrument, warn};

use super::edge::{CacheControl, build_cache_control, compute_etag, format_http_date, handle_conditional};

/// Set by handlers to the time their payload was produced (RFC 3339).
pub const X_CACHE_TIMESTAMP: &str = "x-cache-timestamp";
/// Set by handlers to how the server cache produced the payload.
pub const X_CACHE: &str = "x-cache";

const MAX_EDGE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// `Cache-Control` value applied by [`edge_cache_layer`].
#[derive(Debug, Clone)]
pub struct EdgePolicy {
    cache_control: HeaderValue,
}

impl EdgePolicy {
    pub fn new(control: &CacheControl) -> Self {
        let cache_control = HeaderValue::from_str(&build_cache_control(control))
            .unwrap_or_else(|_| HeaderValue::from_static("no-store"));
        Self { cache_control }
    }

    pub fn cache_control(&self) -> &HeaderValue {
        &self.cache_control
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn edge_cache_layer(
    State(policy): State<EdgePolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }

    let if_none_match = header_string(request.headers(), IF_NONE_MATCH.as_str());
    let if_modified_since = header_string(request.headers(), IF_MODIFIED_SINCE.as_str());

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_EDGE_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(cache = "edge", error = %err, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let etag = match header_string(&parts.headers, ETAG.as_str()) {
        Some(etag) => etag,
        None => {
            let etag = compute_etag(&bytes);
            if let Ok(value) = HeaderValue::from_str(&etag) {
                parts.headers.insert(ETAG, value);
            }
            etag
        }
    };

    let last_modified = parts
        .headers
        .get(X_CACHE_TIMESTAMP)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok());
    if let Some(value) = last_modified
        .and_then(format_http_date)
        .and_then(|date| HeaderValue::from_str(&date).ok())
    {
        parts.headers.insert(LAST_MODIFIED, value);
    }

    if !parts.headers.contains_key(CACHE_CONTROL) {
        parts
            .headers
            .insert(CACHE_CONTROL, policy.cache_control.clone());
    }
    parts
        .headers
        .insert(VARY, HeaderValue::from_static("Accept-Encoding"));

    if let Some(status) = handle_conditional(
        if_none_match.as_deref(),
        if_modified_since.as_deref(),
        Some(etag.as_str()),
        last_modified,
    ) {
        debug!(cache = "edge", outcome = "not_modified", etag = %etag, "Validator matched");
        parts.status = status;
        parts.headers.remove(CONTENT_LENGTH);
        return Response::from_parts(parts, Body::empty());
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
