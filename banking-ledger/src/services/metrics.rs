//! Prometheus metrics for banking-ledger.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};

/// gRPC request counter by method and status.
pub static GRPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register grpc_requests_total")
});

/// gRPC request duration histogram by method.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register grpc_request_duration")
});

/// Engine operation counter (deposit, withdraw, transfer, statement...).
pub static OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_operations_total",
        "Total number of ledger engine operations",
        &["operation", "outcome"] // ok, error
    )
    .expect("Failed to register operations_total")
});

/// How atomic scopes ended.
pub static SCOPE_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_scope_outcomes_total",
        "Total number of atomic scopes by outcome",
        &["outcome"] // committed, rolled_back, commit_failed
    )
    .expect("Failed to register scope_outcomes_total")
});

/// Money moved, by operation and currency.
pub static AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_amount_total",
        "Total amount moved by committed operations",
        &["operation", "currency"]
    )
    .expect("Failed to register amount_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_errors_total",
        "Total number of errors by kind",
        &["error_kind"]
    )
    .expect("Failed to register errors_total")
});

pub static STATEMENTS_GENERATED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "ledger_statements_generated_total",
        "Total number of statements generated"
    )
    .expect("Failed to register statements_generated")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&GRPC_REQUESTS_TOTAL);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&OPERATIONS_TOTAL);
    Lazy::force(&SCOPE_OUTCOMES_TOTAL);
    Lazy::force(&AMOUNT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&STATEMENTS_GENERATED);
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
