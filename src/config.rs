use clap::{Parser, ValueEnum};
use std::time::Duration;
use axum::http::HeaderName;

use crate::admission::{
    AdmissionConfig, DEFAULT_FREEZE_SECS, DEFAULT_MAX_REQUESTS_API_KEY, DEFAULT_MAX_REQUESTS_IP,
};
use crate::error::ConfigError;
use crate::rate_limit::DEFAULT_API_KEY_HEADER;
use crate::store::{DEFAULT_CONNECT_TIMEOUT, StoreConfig};
use crate::worker::LoadTestPlan;

// Longest per-request timeout the load tester accepts
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// Which counter store backs admission
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    // shared Redis, required for more than one instance
    Redis,
    // in-process, single instance only
    Memory,
}

// Gateway CLI arguments - every flag falls back to an environment variable
#[derive(Parser, Debug, Clone)]
#[command(name = "admission-gateway")]
#[command(about = "Distributed request admission gateway backed by a shared Redis counter store")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Counter store backend
    #[arg(long, env = "COUNTER_STORE", value_enum, default_value_t = StoreKind::Redis)]
    pub store: StoreKind,

    // Counter store location, "host:port" or a redis:// URL
    #[arg(long, env = "REDIS_HOST", default_value = "localhost:6379")]
    pub redis_host: String,

    // Requests per window for an address identity
    #[arg(long, env = "MAX_REQUESTS_PER_SECOND_IP", default_value_t = DEFAULT_MAX_REQUESTS_IP)]
    pub max_requests_ip: u64,

    // Requests per window for an API key identity
    #[arg(long, env = "MAX_REQUESTS_PER_SECOND_API_TOKEN", default_value_t = DEFAULT_MAX_REQUESTS_API_KEY)]
    pub max_requests_api_key: u64,

    // Seconds a key stays frozen after exceeding its budget
    #[arg(long, env = "FREEZE_TIME_IN_SECONDS", default_value_t = DEFAULT_FREEZE_SECS)]
    pub freeze_secs: u64,

    // Request header carrying the API key
    #[arg(long, env = "API_KEY_HEADER", default_value = DEFAULT_API_KEY_HEADER)]
    pub api_key_header: String,

    // Take the client address from X-Forwarded-For / X-Real-IP
    #[arg(long, env = "TRUST_PROXY_HEADERS")]
    pub trust_proxy_headers: bool,

    // Startup bound for connecting to the store, in milliseconds
    #[arg(long, env = "STORE_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub store_connect_timeout_ms: u64,

    // Per-command store timeout in milliseconds, 0 disables it
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 0)]
    pub store_timeout_ms: u64,

    // Increment and first expiry in a single script
    #[arg(long, env = "ATOMIC_INCREMENT")]
    pub atomic_increment: bool,

    // Flush the counter database once connected
    #[arg(long, env = "FLUSH_ON_START")]
    pub flush_on_start: bool,
}

impl Args {
    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            max_requests_ip: self.max_requests_ip,
            max_requests_api_key: self.max_requests_api_key,
            freeze_secs: self.freeze_secs,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::new(&self.redis_host);
        config.connect_timeout = Duration::from_millis(self.store_connect_timeout_ms);
        config.command_timeout = (self.store_timeout_ms > 0).then(|| Duration::from_millis(self.store_timeout_ms));
        config.atomic_increment = self.atomic_increment;
        config.flush_on_start = self.flush_on_start;
        config
    }

    pub fn api_key_header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.api_key_header.as_bytes())
            .map_err(|_| ConfigError::InvalidHeaderName(self.api_key_header.clone()))
    }
}

// Load tester CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "loadtest")]
#[command(about = "Stress test an HTTP endpoint with concurrent GET requests")]
pub struct LoadArgs {
    // URL to be tested
    #[arg(short, long)]
    pub url: String,

    // Number of requests to be sent
    #[arg(short, long)]
    pub requests: usize,

    // Number of concurrent workers
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrency: u64,

    // API key sent with every request, omitted when empty
    #[arg(short = 'a', long, default_value = "")]
    pub api_key: String,

    // Header name used for the API key
    #[arg(long, default_value = DEFAULT_API_KEY_HEADER)]
    pub header_name: String,

    // Per-request timeout in seconds
    #[arg(short, long, default_value = "10", value_parser = parse_timeout)]
    pub timeout: Duration,

    // Bypass any system proxy
    #[arg(long)]
    pub no_proxy: bool,

    // Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl LoadArgs {
    pub fn plan(&self) -> LoadTestPlan {
        LoadTestPlan {
            url: self.url.clone(),
            api_key: (!self.api_key.is_empty()).then(|| self.api_key.clone()),
            header_name: self.header_name.clone(),
            requests: self.requests,
            concurrency: self.concurrency as usize,
            timeout: self.timeout,
            no_proxy: self.no_proxy,
        }
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: u64 = value
        .parse()
        .map_err(|_| format!("{value:?} is not a whole number of seconds"))?;
    let timeout = Duration::from_secs(secs);

    if timeout.is_zero() {
        return Err("timeout must be at least one second".to_string());
    }
    if timeout > MAX_REQUEST_TIMEOUT {
        return Err(format!(
            "timeout value exceeds the maximum allowed value of {:?}",
            MAX_REQUEST_TIMEOUT
        ));
    }
    Ok(timeout)
}
