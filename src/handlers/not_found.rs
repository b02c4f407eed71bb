use axum::http::StatusCode;

// reached only by admitted requests that match no route
pub async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}
