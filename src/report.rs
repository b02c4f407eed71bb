//! Load test aggregation and the printed report.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::models::LoadResult;

/// Aggregate outcome of one load test run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub total_requests: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Mean over successful requests; `None` when nothing succeeded
    #[serde(rename = "average_latency_ms", serialize_with = "as_opt_millis")]
    pub average_latency: Option<Duration>,
    pub status_counts: BTreeMap<u16, usize>,
}

impl LoadReport {
    pub fn from_results(
        started_at: DateTime<Utc>,
        elapsed: Duration,
        total_requests: usize,
        results: &[LoadResult],
    ) -> Self {
        let mut success_count = 0usize;
        let mut error_count = 0usize;
        let mut total_latency = Duration::ZERO;
        let mut status_counts = BTreeMap::new();

        for result in results {
            match (result.is_success(), result.status) {
                (true, Some(status)) => {
                    success_count += 1;
                    total_latency += result.latency;
                    *status_counts.entry(status).or_insert(0) += 1;
                }
                _ => error_count += 1,
            }
        }

        let average_latency = mean_latency(total_latency, success_count);

        Self {
            started_at,
            elapsed,
            total_requests,
            success_count,
            error_count,
            average_latency,
            status_counts,
        }
    }
}

// Divide on whole nanoseconds so large counts are not narrowed
fn mean_latency(total: Duration, count: usize) -> Option<Duration> {
    if count == 0 {
        return None;
    }
    let nanos = total.as_nanos() / count as u128;
    Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Load Test Report ---")?;
        writeln!(f, "Started at: {}", self.started_at.to_rfc3339())?;
        writeln!(f, "Total time execution: {:?}", self.elapsed)?;
        writeln!(f, "Total requests: {}", self.total_requests)?;
        writeln!(f, "Successful requests: {}", self.success_count)?;
        writeln!(f, "Errored requests: {}", self.error_count)?;
        if let Some(avg) = self.average_latency {
            writeln!(f, "Average latency: {:?}", avg)?;
        }
        writeln!(f, "Status Code Distribution:")?;
        for (code, count) in &self.status_counts {
            writeln!(f, "  {}: {}", code, count)?;
        }
        Ok(())
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1_000_000.0)
}

fn as_opt_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => as_millis(d, s),
        None => s.serialize_none(),
    }
}
