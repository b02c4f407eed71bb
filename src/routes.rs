use axum::{Router, middleware, routing::get};
use std::sync::Arc;

use crate::handlers::{health_handler, metrics_handler, not_found_handler};
use crate::rate_limit::admission_middleware;
use crate::state::AppState;

// Everything except GET /healthz and GET /metrics goes through admission first.
// Admitted requests that match nothing end in a 404.
pub fn router(state: Arc<AppState>) -> Router {
    let admitted = Router::new()
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(state, admission_middleware));

    Router::new()
        .route(
            "/healthz",
            get(health_handler).fallback_service(admitted.clone()),
        )
        .route(
            "/metrics",
            get(metrics_handler).fallback_service(admitted.clone()),
        )
        .fallback_service(admitted)
}
