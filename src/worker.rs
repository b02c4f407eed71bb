use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use crate::error::LoadTestError;
use crate::models::{LoadJob, LoadResult};
use crate::rate_limit::DEFAULT_API_KEY_HEADER;
use crate::report::LoadReport;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// Most jobs queued at once; bigger runs are fed while workers drain
pub const JOB_QUEUE_CAPACITY: usize = 1024;

// What to fire, how many times, and how wide
#[derive(Debug, Clone)]
pub struct LoadTestPlan {
    pub url: String,
    pub api_key: Option<String>, // empty or None - header omitted
    pub header_name: String,
    pub requests: usize,
    pub concurrency: usize,
    pub timeout: Duration, // per request, not per run
    pub no_proxy: bool,
}

impl LoadTestPlan {
    pub fn new(url: impl Into<String>, requests: usize, concurrency: usize) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            header_name: DEFAULT_API_KEY_HEADER.to_string(),
            requests,
            concurrency,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            no_proxy: false,
        }
    }
}

// Everything a worker needs to build one request
struct Target {
    url: String,
    credential: Option<(HeaderName, HeaderValue)>,
}

/// Fixed pool of workers draining a bounded job queue.
///
/// `concurrency` must be at least 1 whenever `requests` is non-zero; that is
/// checked by the command line, not here. With no workers no job is queued
/// and the report counts no outcomes.
pub struct LoadGenerator {
    client: reqwest::Client,
    target: Arc<Target>,
    requests: usize,
    concurrency: usize,
}

impl LoadGenerator {
    pub fn new(plan: LoadTestPlan) -> Result<Self, LoadTestError> {
        if plan.url.trim().is_empty() {
            return Err(LoadTestError::EmptyUrl);
        }

        let credential = match plan.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => {
                let name = HeaderName::from_bytes(plan.header_name.as_bytes())
                    .map_err(|e| LoadTestError::InvalidHeader(format!("{}: {}", plan.header_name, e)))?;
                let value = HeaderValue::from_str(key)
                    .map_err(|e| LoadTestError::InvalidHeader(e.to_string()))?;
                Some((name, value))
            }
            None => None,
        };

        let mut builder = reqwest::Client::builder().timeout(plan.timeout);
        if plan.no_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            target: Arc::new(Target {
                url: plan.url,
                credential,
            }),
            requests: plan.requests,
            concurrency: plan.concurrency,
        })
    }

    /// Issue every request and aggregate the outcomes once all workers exit.
    pub async fn run(&self) -> LoadReport {
        info!(
            url = %self.target.url,
            requests = self.requests,
            concurrency = self.concurrency,
            "Starting load test"
        );

        let started_at = Utc::now();
        let start = Instant::now();

        let (job_tx, job_rx) = mpsc::channel::<LoadJob>(self.requests.clamp(1, JOB_QUEUE_CAPACITY));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<LoadResult>();

        let jobs = Arc::new(Mutex::new(job_rx));
        let mut workers = JoinSet::new();
        for id in 0..self.concurrency {
            workers.spawn(load_worker(
                id,
                Arc::clone(&jobs),
                result_tx.clone(),
                self.client.clone(),
                Arc::clone(&self.target),
            ));
        }
        drop(jobs);
        drop(result_tx);

        // without workers nothing drains the queue
        if self.concurrency > 0 {
            for id in 0..self.requests {
                // every worker is gone
                if job_tx.send(LoadJob { id }).await.is_err() {
                    break;
                }
            }
        }
        drop(job_tx); // closed - workers stop once drained

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Load worker failed: {}", e);
            }
        }

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }

        LoadReport::from_results(started_at, start.elapsed(), self.requests, &results)
    }
}

async fn load_worker(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<LoadJob>>>,
    results: mpsc::UnboundedSender<LoadResult>,
    client: reqwest::Client,
    target: Arc<Target>,
) {
    debug!(worker = id, "Load worker started");

    // keep pulling jobs until the queue is drained
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else { break };

        let result = fire(&client, &target).await;
        if let Some(e) = &result.error {
            debug!(worker = id, job = job.id, "Request failed: {}", e);
        }

        if results.send(result).is_err() {
            break;
        }
    }

    debug!(worker = id, "Load worker finished");
}

// One GET; latency covers the round trip up to the response head
async fn fire(client: &reqwest::Client, target: &Target) -> LoadResult {
    let start = Instant::now();

    let mut request = client.get(&target.url);
    if let Some((name, value)) = &target.credential {
        request = request.header(name.clone(), value.clone());
    }

    match request.send().await {
        Ok(res) => {
            let latency = start.elapsed();
            let status = res.status().as_u16();
            // drain so the connection can be reused
            let _ = res.bytes().await;
            LoadResult::success(status, latency)
        }
        Err(e) => LoadResult::failure(e.to_string(), start.elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionConfig, AdmissionEngine};
    use crate::routes::router;
    use crate::state::AppState;
    use crate::store::MemoryCounterStore;
    use axum::http::{HeaderMap, StatusCode};
    use axum::{Router, routing::get};
    use std::collections::BTreeMap;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        addr
    }

    fn plan(url: String, requests: usize, concurrency: usize) -> LoadTestPlan {
        LoadTestPlan {
            no_proxy: true,
            ..LoadTestPlan::new(url, requests, concurrency)
        }
    }

    #[tokio::test]
    async fn test_all_requests_succeed() {
        let addr = serve(Router::new().route("/", get(|| async { "ok" }))).await;

        let generator = LoadGenerator::new(plan(format!("http://{addr}/"), 10, 2)).unwrap();
        let report = generator.run().await;

        assert_eq!(report.total_requests, 10);
        assert_eq!(report.success_count, 10);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.status_counts, BTreeMap::from([(200, 10)]));
        assert!(report.average_latency.is_some());
    }

    #[tokio::test]
    async fn test_zero_requests() {
        let generator = LoadGenerator::new(plan("http://127.0.0.1:9/".to_string(), 0, 2)).unwrap();
        let report = generator.run().await;

        assert_eq!(report.total_requests, 0);
        assert_eq!(report.success_count, 0);
        assert_eq!(report.error_count, 0);
        assert!(report.average_latency.is_none());
        assert!(report.status_counts.is_empty());
    }

    #[tokio::test]
    async fn test_run_larger_than_job_queue() {
        let addr = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let requests = JOB_QUEUE_CAPACITY * 2 + 7;

        let generator = LoadGenerator::new(plan(format!("http://{addr}/"), requests, 8)).unwrap();
        let report = generator.run().await;

        assert_eq!(report.total_requests, requests);
        assert_eq!(report.success_count, requests);
        assert_eq!(report.status_counts, BTreeMap::from([(200, requests)]));
    }

    #[tokio::test]
    async fn test_no_workers_does_not_hang() {
        let generator = LoadGenerator::new(plan("http://127.0.0.1:9/".to_string(), 5_000, 0)).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), generator.run())
            .await
            .unwrap();

        assert_eq!(report.total_requests, 5_000);
        assert_eq!(report.success_count, 0);
        assert_eq!(report.error_count, 0);
    }

    #[tokio::test]
    async fn test_transport_errors_are_counted() {
        // grab a free port, then close it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let generator = LoadGenerator::new(plan(format!("http://{addr}/"), 3, 2)).unwrap();
        let report = generator.run().await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.error_count, 3);
        assert!(report.average_latency.is_none());
    }

    #[tokio::test]
    async fn test_credential_header_sent() {
        let app = Router::new().route(
            "/",
            get(|headers: HeaderMap| async move {
                match headers.get("api_key").and_then(|v| v.to_str().ok()) {
                    Some("secret") => StatusCode::OK,
                    _ => StatusCode::UNAUTHORIZED,
                }
            }),
        );
        let addr = serve(app).await;

        let mut with_key = plan(format!("http://{addr}/"), 4, 2);
        with_key.api_key = Some("secret".to_string());
        let report = LoadGenerator::new(with_key).unwrap().run().await;
        assert_eq!(report.status_counts, BTreeMap::from([(200, 4)]));

        let mut empty_key = plan(format!("http://{addr}/"), 2, 1);
        empty_key.api_key = Some(String::new());
        let report = LoadGenerator::new(empty_key).unwrap().run().await;
        assert_eq!(report.status_counts, BTreeMap::from([(401, 2)]));
    }

    #[tokio::test]
    async fn test_against_admission_gateway() {
        let engine = AdmissionEngine::new(
            Arc::new(MemoryCounterStore::new()),
            AdmissionConfig {
                max_requests_ip: 5,
                max_requests_api_key: 20,
                freeze_secs: 60,
            },
        );
        let state = Arc::new(AppState::new(engine, HeaderName::from_static("api_key")));
        let addr = serve(router(state)).await;

        let report = LoadGenerator::new(plan(format!("http://{addr}/"), 10, 1))
            .unwrap()
            .run()
            .await;

        assert_eq!(report.success_count, 10);
        assert_eq!(report.status_counts, BTreeMap::from([(404, 5), (429, 5)]));
    }

    #[test]
    fn test_empty_url_rejected() {
        let err = LoadGenerator::new(plan("  ".to_string(), 1, 1)).err().unwrap();
        assert!(matches!(err, LoadTestError::EmptyUrl));
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let mut bad = plan("http://localhost/".to_string(), 1, 1);
        bad.api_key = Some("k".to_string());
        bad.header_name = "bad header".to_string();

        let err = LoadGenerator::new(bad).err().unwrap();
        assert!(matches!(err, LoadTestError::InvalidHeader(_)));
    }
}
