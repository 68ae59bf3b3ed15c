//! Cache administration hooks: CMS revalidation, manual warm/clear, stats.

use std::collections::BTreeSet;

use aperture_api_types::{
    CacheAction, CacheActionRequest, CacheActionResponse, CacheStatsResponse, RevalidateRequest,
    RevalidateResponse,
};
use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::cache::{InvalidationEvent, Tag};

use super::error::ApiError;
use super::middleware::no_store;
use super::state::AppState;

pub fn build_admin_router() -> Router<AppState> {
    Router::new()
        .route("/api/revalidate", post(revalidate))
        .route("/api/cache", post(cache_action))
        .route("/api/cache/stats", get(cache_stats))
        .layer(middleware::from_fn(no_store))
}

#[derive(Debug, Default, Deserialize)]
struct SecretQuery {
    secret: Option<String>,
}

/// Accepts `?secret=` or `Authorization: Bearer <secret>`.
fn authorize(state: &AppState, query: &SecretQuery, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_secret.as_deref() else {
        return Err(ApiError::admin_disabled());
    };

    let provided = query.secret.as_deref().or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.strip_prefix("Bearer "))
    });
    match provided {
        Some(provided) if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        _ => Err(ApiError::unauthorized()),
    }
}

fn malformed(err: JsonRejection) -> ApiError {
    ApiError::bad_request("Malformed request body", Some(err.body_text()))
}

async fn revalidate(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
    headers: HeaderMap,
    body: Result<Json<RevalidateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    authorize(&state, &query, &headers)?;
    let Json(request) = body.map_err(malformed)?;

    let event = match (trimmed(request.collection), trimmed(request.global)) {
        (Some(collection), None) => InvalidationEvent::collection(collection, request.doc),
        (None, Some(global)) => InvalidationEvent::global(global),
        _ => {
            return Err(ApiError::bad_request(
                "Exactly one of `collection` or `global` is required",
                None,
            ));
        }
    };

    let submission = state.cache.trigger.submit(event).await;
    let body = RevalidateResponse {
        revalidated: submission.queued(),
        tags: submission.tags.iter().map(|tag| tag.to_string()).collect(),
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

async fn cache_action(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
    headers: HeaderMap,
    body: Result<Json<CacheActionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    authorize(&state, &query, &headers)?;
    let Json(request) = body.map_err(malformed)?;

    let tags: BTreeSet<Tag> = request
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(Tag::from)
        .collect();

    let affected = match request.action {
        CacheAction::Clear if tags.is_empty() => {
            let report = state.cache.sweep.run_once().await;
            let leftover = state.cache.store.clear();
            state.cache.client.clear();
            report.removed + leftover
        }
        CacheAction::Clear => state.cache.consumer.deliver(&tags).await.removed,
        CacheAction::Warm => state.content.warm(&tags).await,
    };
    info!(action = ?request.action, tags = tags.len(), affected, "Cache action applied");

    Ok(Json(CacheActionResponse {
        action: request.action,
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        affected,
    })
    .into_response())
}

async fn cache_stats(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, &query, &headers)?;

    let cache = &state.cache;
    Ok(Json(CacheStatsResponse {
        entries: cache.store.len(),
        tags: cache.store.tag_count(),
        in_flight: cache.server.in_flight(),
        queued_events: cache.queue.len(),
        dropped_events: cache.queue.dropped(),
        client_entries: cache.client.len(),
    })
    .into_response())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
