use std::time::Duration;

// Admission decision for one identity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowDecision {
    pub allowed: bool,
    pub remaining: u64, // only meaningful when allowed
}

impl AllowDecision {
    pub fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    pub fn denied() -> Self {
        Self {
            allowed: false,
            remaining: 0,
        }
    }
}

// One unit of load-test work - the job index only
#[derive(Debug, Clone, Copy)]
pub struct LoadJob {
    pub id: usize,
}

// Outcome of a single load-test request
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: Option<String>, // transport failure, counted but not fatal
}

impl LoadResult {
    pub fn success(status: u16, latency: Duration) -> Self {
        Self {
            status: Some(status),
            latency,
            error: None,
        }
    }

    pub fn failure(error: String, latency: Duration) -> Self {
        Self {
            status: None,
            latency,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
