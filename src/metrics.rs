use lazy_static::lazy_static;
use prometheus::{Counter, Histogram, register_counter, register_histogram};


lazy_static! {
    pub static ref ADMISSION_CHECKS: Counter =
        register_counter!("admission_checks_total", "Total admission decisions evaluated")
            .expect("register admission_checks_total");
    pub static ref ADMISSION_REJECTED: Counter =
        register_counter!("admission_rejected_total", "Requests rejected for exceeding their budget")
            .expect("register admission_rejected_total");
    pub static ref ADMISSION_ERRORS: Counter =
        register_counter!("admission_errors_total", "Admission checks failed by the counter store")
            .expect("register admission_errors_total");
    pub static ref ADMISSION_LATENCY: Histogram = register_histogram!(
        "admission_decision_latency_seconds",
        "Time spent deciding admission, store round trips included"
    )
    .expect("register admission_decision_latency_seconds");
}
