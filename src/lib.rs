//! Distributed request admission gateway.
//!
//! Every request is admitted or rejected against a per-identity budget kept in
//! a shared counter store, so any number of gateway instances enforce one
//! budget. Identities are the client address or an API key; a key that
//! overruns its budget is frozen for a configurable period. The crate also
//! ships the concurrent load generator used to exercise a deployment.

pub mod admission;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod report;
pub mod routes;
pub mod state;
pub mod store;
pub mod worker;

pub use admission::{AdmissionConfig, AdmissionEngine};
pub use error::{AdmissionError, LoadTestError, StoreError};
pub use models::AllowDecision;
pub use report::LoadReport;
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore};
pub use worker::{LoadGenerator, LoadTestPlan};
