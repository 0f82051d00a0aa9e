//! Prometheus metrics for billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Journal entry counter by document kind and intent.
pub static JOURNAL_ENTRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_journal_entries_total",
        "Total number of journal entries posted",
        &["document_kind", "intent"]
    )
    .expect("Failed to register journal_entries_total")
});

/// Invoice counter by lifecycle transition.
pub static INVOICE_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoice_transitions_total",
        "Total number of invoice lifecycle transitions",
        &["transition"] // issue, void, revert, delete
    )
    .expect("Failed to register invoice_transitions_total")
});

/// Payment counter by method.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payments_total",
        "Total number of payments recorded by method",
        &["method"]
    )
    .expect("Failed to register payments_total")
});

/// Allocation counter.
pub static ALLOCATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_allocations_total",
        "Total number of payment applications created",
        &["outcome"] // applied, rejected
    )
    .expect("Failed to register allocations_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&JOURNAL_ENTRIES_TOTAL);
    Lazy::force(&INVOICE_TRANSITIONS_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&ALLOCATIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
