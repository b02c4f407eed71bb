use axum::http::StatusCode;

// liveness probe - empty 200, never rate limited
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}
