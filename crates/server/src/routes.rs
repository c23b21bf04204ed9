//! Route configuration.

use crate::handlers;
use crate::metrics::{metrics_handler, register_metrics};
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let append_limit = DefaultBodyLimit::max(state.max_append_size());

    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers)
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/status", get(handlers::get_status))
        // Upload sessions
        .route("/v1/uploads", post(handlers::open_upload))
        .route("/v1/uploads/import", post(handlers::import_upload))
        .route(
            "/v1/uploads/{upload_id}",
            get(handlers::get_upload).delete(handlers::abort_upload),
        )
        .route(
            "/v1/uploads/{upload_id}/append",
            put(handlers::append_upload).layer(append_limit),
        )
        // Imported content
        .route("/v1/content/{checksum}", get(handlers::get_content))
        .route("/v1/content/{checksum}/data", get(handlers::get_content_data));

    let mut router = Router::new().merge(api_routes);

    // Keep /metrics network-restricted to the scraper; see crate::metrics.
    if state.config.server.metrics_enabled {
        register_metrics();
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
