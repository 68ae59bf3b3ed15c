mod admin;
mod error;
mod middleware;
mod public;
mod state;

pub use error::{ApiError, codes};
pub use state::AppState;

use axum::{Router, http::StatusCode, middleware as axum_middleware, routing::get};

pub use admin::build_admin_router;
pub use middleware::RequestContext;
pub use public::build_public_router;

use self::middleware::{log_responses, no_store, set_request_context};

/// Public content routes, admin hooks and `/health`, with request logging.
pub fn build_router(state: AppState) -> Router {
    let health = Router::new()
        .route("/health", get(|| async { StatusCode::NO_CONTENT }))
        .layer(axum_middleware::from_fn(no_store));

    build_public_router(&state)
        .merge(build_admin_router())
        .merge(health)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
