//! Fixed-window-with-freeze admission decisions.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::{AdmissionError, IdentityKind};
use crate::metrics::{ADMISSION_CHECKS, ADMISSION_ERRORS, ADMISSION_LATENCY, ADMISSION_REJECTED};
use crate::models::AllowDecision;
use crate::store::CounterStore;

pub const DEFAULT_MAX_REQUESTS_IP: u64 = 10;
pub const DEFAULT_MAX_REQUESTS_API_KEY: u64 = 20;
pub const DEFAULT_FREEZE_SECS: u64 = 60;

/// Budgets and freeze duration, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Requests per window for an address identity
    pub max_requests_ip: u64,
    /// Requests per window for an API key identity
    pub max_requests_api_key: u64,
    /// Seconds a key stays frozen after exceeding its budget
    pub freeze_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests_ip: DEFAULT_MAX_REQUESTS_IP,
            max_requests_api_key: DEFAULT_MAX_REQUESTS_API_KEY,
            freeze_secs: DEFAULT_FREEZE_SECS,
        }
    }
}

/// Stateless decision logic over a shared [`CounterStore`].
///
/// All mutable state lives in the store, so the engine can be cloned freely
/// and called from any number of tasks.
#[derive(Clone)]
pub struct AdmissionEngine {
    store: Arc<dyn CounterStore>,
    config: AdmissionConfig,
}

impl AdmissionEngine {
    pub fn new(store: Arc<dyn CounterStore>, config: AdmissionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Decide whether a request may proceed.
    ///
    /// A non-empty `api_key` takes precedence and is checked against the API
    /// key budget; the address is then ignored. Otherwise `address` is checked
    /// against the address budget. Exactly one identity is validated.
    pub async fn allow(&self, address: &str, api_key: &str) -> Result<AllowDecision, AdmissionError> {
        ADMISSION_CHECKS.inc();

        let (key, max_requests, kind) = if !api_key.is_empty() {
            (api_key, self.config.max_requests_api_key, IdentityKind::ApiKey)
        } else if !address.is_empty() {
            (address, self.config.max_requests_ip, IdentityKind::Address)
        } else {
            ADMISSION_ERRORS.inc();
            return Err(AdmissionError::NoIdentity);
        };

        let start = Instant::now();

        let result = self.validate(key, max_requests, kind).await;

        ADMISSION_LATENCY.observe(start.elapsed().as_secs_f64());
        match &result {
            Ok(decision) if !decision.allowed => ADMISSION_REJECTED.inc(),
            Err(_) => ADMISSION_ERRORS.inc(),
            _ => {}
        }

        result
    }

    async fn validate(
        &self,
        key: &str,
        max_requests: u64,
        kind: IdentityKind,
    ) -> Result<AllowDecision, AdmissionError> {
        let frozen = self
            .store
            .is_frozen(key)
            .await
            .map_err(|source| AdmissionError::FrozenCheck { kind, source })?;

        if frozen.frozen {
            trace!(key, ttl = frozen.ttl_seconds, "Key is frozen");
            return Ok(AllowDecision::denied());
        }

        let count = self
            .store
            .increment(key)
            .await
            .map_err(|source| AdmissionError::Increment { kind, source })?;

        if count > max_requests {
            self.store
                .freeze(key, self.config.freeze_secs)
                .await
                .map_err(|source| AdmissionError::Freeze { kind, source })?;

            debug!(
                key,
                count,
                max_requests,
                freeze_secs = self.config.freeze_secs,
                "Budget exceeded, key frozen"
            );
            return Ok(AllowDecision::denied());
        }

        let remaining = max_requests - count;
        trace!(key, count, remaining, "Request admitted");
        Ok(AllowDecision::allowed(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{FrozenState, MemoryCounterStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // Store double that replays scripted answers and records every call
    #[derive(Default)]
    struct ScriptedStore {
        frozen: Mutex<VecDeque<Result<FrozenState, String>>>,
        counts: Mutex<VecDeque<Result<u64, String>>>,
        freeze_error: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn with_counts(counts: &[u64]) -> Self {
            Self {
                counts: Mutex::new(counts.iter().map(|c| Ok(*c)).collect()),
                ..Default::default()
            }
        }

        fn frozen_for(ttl_seconds: f64) -> Self {
            let store = Self::default();
            store.frozen.lock().unwrap().push_back(Ok(FrozenState {
                frozen: true,
                ttl_seconds,
            }));
            store
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CounterStore for ScriptedStore {
        async fn increment(&self, key: &str) -> Result<u64, StoreError> {
            self.calls.lock().unwrap().push(format!("increment {key}"));
            match self.counts.lock().unwrap().pop_front() {
                Some(Ok(count)) => Ok(count),
                Some(Err(msg)) => Err(StoreError::Unavailable(msg)),
                None => panic!("unexpected increment for {key}"),
            }
        }

        async fn freeze(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(format!("freeze {key} {seconds}"));
            match &self.freeze_error {
                Some(msg) => Err(StoreError::Unavailable(msg.clone())),
                None => Ok(()),
            }
        }

        async fn is_frozen(&self, key: &str) -> Result<FrozenState, StoreError> {
            self.calls.lock().unwrap().push(format!("is_frozen {key}"));
            match self.frozen.lock().unwrap().pop_front() {
                Some(Ok(state)) => Ok(state),
                Some(Err(msg)) => Err(StoreError::Unavailable(msg)),
                None => Ok(FrozenState::NOT_FROZEN),
            }
        }
    }

    fn engine(store: Arc<ScriptedStore>, max_ip: u64, max_api_key: u64) -> AdmissionEngine {
        AdmissionEngine::new(
            store,
            AdmissionConfig {
                max_requests_ip: max_ip,
                max_requests_api_key: max_api_key,
                freeze_secs: 60,
            },
        )
    }

    #[tokio::test]
    async fn test_remaining_counts_down_to_zero() {
        let store = Arc::new(ScriptedStore::with_counts(&[1, 2, 3, 4, 5]));
        let engine = engine(store.clone(), 5, 20);

        let mut remaining = Vec::new();
        for _ in 0..5 {
            let decision = engine.allow("k", "").await.unwrap();
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }

        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
        assert!(!store.calls().iter().any(|c| c.starts_with("freeze")));
    }

    #[tokio::test]
    async fn test_over_budget_denies_and_freezes() {
        let store = Arc::new(ScriptedStore::with_counts(&[6]));
        let engine = engine(store.clone(), 5, 20);

        let decision = engine.allow("k", "").await.unwrap();

        assert_eq!(decision, AllowDecision::denied());
        assert_eq!(store.calls(), vec!["is_frozen k", "increment k", "freeze k 60"]);
    }

    #[tokio::test]
    async fn test_frozen_key_skips_increment() {
        let store = Arc::new(ScriptedStore::frozen_for(30.0));
        let engine = engine(store.clone(), 5, 10);

        let decision = engine.allow("", "token1").await.unwrap();

        assert_eq!(decision, AllowDecision::denied());
        assert_eq!(store.calls(), vec!["is_frozen token1"]);
    }

    #[tokio::test]
    async fn test_api_key_takes_precedence() {
        let store = Arc::new(ScriptedStore::with_counts(&[5]));
        let engine = engine(store.clone(), 5, 10);

        let decision = engine.allow("1.2.3.4", "token1").await.unwrap();

        // API key budget (10) applies, not the address budget (5)
        assert_eq!(decision, AllowDecision::allowed(5));
        assert!(store.calls().iter().all(|c| c.ends_with("token1")));
    }

    #[tokio::test]
    async fn test_address_budget_when_no_api_key() {
        let store = Arc::new(ScriptedStore::with_counts(&[3]));
        let engine = engine(store, 5, 10);

        let decision = engine.allow("1.2.3.4", "").await.unwrap();
        assert_eq!(decision, AllowDecision::allowed(2));
    }

    #[tokio::test]
    async fn test_no_identity_is_invalid() {
        let store = Arc::new(ScriptedStore::default());
        let engine = engine(store.clone(), 5, 10);

        let checks = ADMISSION_CHECKS.get();
        let errors = ADMISSION_ERRORS.get();

        let err = engine.allow("", "").await.unwrap_err();

        assert!(matches!(err, AdmissionError::NoIdentity));
        assert!(store.calls().is_empty());
        // counters are process-wide, other tests only add to them
        assert!(ADMISSION_CHECKS.get() >= checks + 1.0);
        assert!(ADMISSION_ERRORS.get() >= errors + 1.0);
    }

    #[tokio::test]
    async fn test_frozen_check_error_propagates() {
        let store = Arc::new(ScriptedStore::default());
        store.frozen.lock().unwrap().push_back(Err("isFrozen error".to_string()));
        let engine = engine(store.clone(), 5, 10);

        let err = engine.allow("1.2.3.4", "").await.unwrap_err();

        assert!(matches!(err, AdmissionError::FrozenCheck { kind: IdentityKind::Address, .. }));
        assert_eq!(store.calls(), vec!["is_frozen 1.2.3.4"]);
    }

    #[tokio::test]
    async fn test_increment_error_propagates() {
        let store = Arc::new(ScriptedStore::default());
        store.counts.lock().unwrap().push_back(Err("upsert error".to_string()));
        let engine = engine(store, 5, 10);

        let err = engine.allow("1.2.3.4", "").await.unwrap_err();
        assert!(matches!(err, AdmissionError::Increment { .. }));
    }

    #[tokio::test]
    async fn test_freeze_error_propagates() {
        let store = Arc::new(ScriptedStore {
            counts: Mutex::new(VecDeque::from([Ok(12)])),
            freeze_error: Some("freeze error".to_string()),
            ..Default::default()
        });
        let engine = engine(store, 5, 10);

        let err = engine.allow("", "token1").await.unwrap_err();

        assert!(matches!(err, AdmissionError::Freeze { kind: IdentityKind::ApiKey, .. }));
        assert!(err.to_string().contains("freeze error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_end_to_end() {
        let store = Arc::new(MemoryCounterStore::new());
        let engine = AdmissionEngine::new(
            store.clone(),
            AdmissionConfig {
                max_requests_ip: 2,
                max_requests_api_key: 20,
                freeze_secs: 5,
            },
        );

        assert_eq!(engine.allow("10.0.0.1", "").await.unwrap(), AllowDecision::allowed(1));
        assert_eq!(engine.allow("10.0.0.1", "").await.unwrap(), AllowDecision::allowed(0));
        assert_eq!(engine.allow("10.0.0.1", "").await.unwrap(), AllowDecision::denied());

        // the freeze outlives a normal window
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert_eq!(engine.allow("10.0.0.1", "").await.unwrap(), AllowDecision::denied());

        // other identities are unaffected
        assert_eq!(engine.allow("10.0.0.2", "").await.unwrap(), AllowDecision::allowed(1));

        tokio::time::advance(std::time::Duration::from_secs(4)).await;
        assert_eq!(engine.allow("10.0.0.1", "").await.unwrap(), AllowDecision::allowed(1));
    }
}
