//! Route definitions for the vaultfs HTTP endpoints.

use axum::Router;
use axum::middleware as axum_middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Build the router with every route and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/files/{id}/content", get(handlers::content::download))
        .route("/files/{id}/thumbnail", get(handlers::thumbnail::thumbnail));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/f/{public_id}/{name}", get(handlers::direct_link::download))
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn(middleware::logging::request_logging))
        .with_state(state)
}
