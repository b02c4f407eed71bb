use axum::http::HeaderName;
use crate::admission::AdmissionEngine;
// app's shared state

pub struct AppState {
    pub engine: AdmissionEngine,
    pub api_key_header: HeaderName, // carries the credential identity
    pub trust_proxy_headers: bool,  // honor X-Forwarded-For / X-Real-IP
}

impl AppState {
    pub fn new(engine: AdmissionEngine, api_key_header: HeaderName) -> Self {
        Self {
            engine,
            api_key_header,
            trust_proxy_headers: false,
        }
    }

    pub fn with_trusted_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }
}
