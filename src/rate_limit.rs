//! Admission middleware: one request in, one admission decision out.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::state::AppState;

pub const DEFAULT_API_KEY_HEADER: &str = "API_KEY";

pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

pub const REJECTION_REASON: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Axum middleware enforcing the admission decision.
///
/// Rejected requests get 429 with a fixed reason and never reach the next
/// stage. Store failures surface as 500 carrying the error text. Admitted
/// requests carry their [`crate::models::AllowDecision`] as a request
/// extension and get `X-RateLimit-Remaining` on the response.
///
/// The header is written after the inner service returns, so it replaces any
/// `X-RateLimit-Remaining` a handler set. Handlers read the extension instead.
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let address = client_address(&request, state.trust_proxy_headers);
    let api_key = request
        .headers()
        .get(&state.api_key_header)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let decision = match state.engine.allow(&address, &api_key).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(address = %address, "Admission check failed: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    if !decision.allowed {
        debug!(address = %address, has_api_key = !api_key.is_empty(), "Request rejected");
        return (StatusCode::TOO_MANY_REQUESTS, REJECTION_REASON).into_response();
    }

    request.extensions_mut().insert(decision);

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    response
}

// Observed peer address, or the forwarding headers when they are trusted
fn client_address(request: &Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let forwarded = header_str(request, "x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(|ip| ip.trim().trim_matches(|c: char| c == '[' || c == ']'))
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        if let Some(ip) = header_str(request, "x-real-ip").map(str::trim).filter(|ip| !ip.is_empty()) {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|value| value.to_str().ok())
}
