//! Axum router construction.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete router.
///
/// CORS allows any origin so a dashboard served elsewhere can poll the
/// status endpoint.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/api/status", get(handlers::get_status))
        .route("/api/trigger", post(handlers::trigger))
        .route("/api/triggerNext", get(handlers::trigger))
        .route("/api/start", post(handlers::start))
        .route("/api/stop", post(handlers::stop))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
