use std::num::NonZeroU32;

use axum::{
    Router,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{AGE, CACHE_CONTROL, CONTENT_TYPE, ETAG},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use time::format_description::well_known::Rfc3339;
use tokio::time::Instant;

use crate::application::content::ContentRead;
use crate::cache::{
    CacheControl, CacheStatus, Cached, ContentClass, EdgePolicy, X_CACHE, X_CACHE_TIMESTAMP,
    build_cache_control, edge_cache_layer,
};

use super::error::ApiError;
use super::state::AppState;

/// Public JSON routes, each group behind the edge policy of its class.
pub fn build_public_router(state: &AppState) -> Router<AppState> {
    let dynamic = Router::new().route("/api/stats", get(stats));

    let semi_static = Router::new()
        .route("/api/galleries", get(galleries))
        .route("/api/galleries/page/{page}", get(galleries_page))
        .route("/api/galleries/{slug}", get(gallery))
        .route("/api/images", get(images))
        .route("/api/posts", get(posts))
        .route("/api/posts/{slug}", get(post));

    let static_pages = Router::new()
        .route("/api/home", get(home))
        .route("/api/globals/{name}", get(global));

    [
        (ContentClass::Dynamic, dynamic),
        (ContentClass::SemiStatic, semi_static),
        (ContentClass::StaticPage, static_pages),
    ]
    .into_iter()
    .fold(Router::<AppState>::new(), |router, (class, routes)| {
        let policy = EdgePolicy::new(&state.cache.server.policy(class).edge);
        router.merge(routes.route_layer(middleware::from_fn_with_state(policy, edge_cache_layer)))
    })
}

async fn home(State(state): State<AppState>) -> Result<Response, ApiError> {
    serve(&state, ContentRead::Home).await
}

async fn stats(State(state): State<AppState>) -> Result<Response, ApiError> {
    serve(&state, ContentRead::Stats).await
}

async fn galleries(State(state): State<AppState>) -> Result<Response, ApiError> {
    serve(&state, ContentRead::Galleries).await
}

async fn galleries_page(
    State(state): State<AppState>,
    Path(page): Path<String>,
) -> Result<Response, ApiError> {
    let page = page
        .parse::<NonZeroU32>()
        .map_err(|_| ApiError::bad_request("Invalid page number", Some(format!("`{page}`"))))?;
    serve(&state, ContentRead::GalleriesPage(page)).await
}

async fn gallery(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, ContentRead::Gallery(slug)).await
}

async fn images(State(state): State<AppState>) -> Result<Response, ApiError> {
    serve(&state, ContentRead::Images).await
}

async fn posts(State(state): State<AppState>) -> Result<Response, ApiError> {
    serve(&state, ContentRead::BlogPosts).await
}

async fn post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, ContentRead::BlogPost(slug)).await
}

async fn global(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, ContentRead::Global(name)).await
}

async fn serve(state: &AppState, read: ContentRead) -> Result<Response, ApiError> {
    let cached = state.content.read(&read).await?;
    let mut response = cached_response(&cached);
    if cached.status == CacheStatus::Stale {
        let edge = &state.cache.server.policy(read.class()).edge;
        if let Ok(value) = HeaderValue::from_str(&build_cache_control(&stale_edge_control(edge))) {
            response.headers_mut().insert(CACHE_CONTROL, value);
        }
    }
    Ok(response)
}

/// A stale body must not be cached downstream as fresh: both max-ages drop
/// to zero while the stale windows are kept.
fn stale_edge_control(edge: &CacheControl) -> CacheControl {
    CacheControl {
        max_age: Some(0),
        s_maxage: Some(0),
        ..edge.clone()
    }
}

fn cached_response(cached: &Cached) -> Response {
    let mut response = (
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        cached.entry.value.clone(),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(cached.status.as_header()));
    headers.insert(AGE, HeaderValue::from(cached.entry.age(Instant::now()).as_secs()));
    if let Some(value) = cached
        .entry
        .stored_at
        .format(&Rfc3339)
        .ok()
        .and_then(|stamp| HeaderValue::from_str(&stamp).ok())
    {
        headers.insert(X_CACHE_TIMESTAMP, value);
    }
    if let Some(value) = cached
        .entry
        .etag
        .as_deref()
        .and_then(|etag| HeaderValue::from_str(etag).ok())
    {
        headers.insert(ETAG, value);
    }
    response
}
