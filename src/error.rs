//! Error types for the admission gateway and the load tester.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Which identity an admission check was keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    ApiKey,
    Address,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKind::ApiKey => f.write_str("API key"),
            IdentityKind::Address => f.write_str("IP"),
        }
    }
}

/// Failures talking to the shared counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    /// Used by in-process stores and test doubles.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`crate::admission::AdmissionEngine::allow`].
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("no identity provided")]
    NoIdentity,

    #[error("error validating {kind}: error checking frozen state: {source}")]
    FrozenCheck {
        kind: IdentityKind,
        #[source]
        source: StoreError,
    },

    #[error("error validating {kind}: error incrementing request count: {source}")]
    Increment {
        kind: IdentityKind,
        #[source]
        source: StoreError,
    },

    #[error("error validating {kind}: error freezing key: {source}")]
    Freeze {
        kind: IdentityKind,
        #[source]
        source: StoreError,
    },
}

/// Errors that stop a load test before any request is issued.
#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("target URL must not be empty")]
    EmptyUrl,

    #[error("invalid credential header: {0}")]
    InvalidHeader(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Configuration errors detected while building runtime values from flags.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
}
