use once_cell::sync::Lazy;
use prometheus::{Counter, Histogram, HistogramOpts};

pub static DOCUMENTS_INDEXED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_documents_indexed_total",
        "Total number of documents indexed"
    )
    .expect("register vectordb_documents_indexed_total")
});

pub static DOCUMENTS_UPDATED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_documents_updated_total",
        "Total number of documents replaced by update"
    )
    .expect("register vectordb_documents_updated_total")
});

pub static DOCUMENTS_DELETED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_documents_deleted_total",
        "Total number of documents tombstoned"
    )
    .expect("register vectordb_documents_deleted_total")
});

pub static SEARCHES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_searches_total",
        "Total number of query documents searched"
    )
    .expect("register vectordb_searches_total")
});

// Over-fetch rounds beyond the first, caused by tombstones
pub static SEARCH_RETRIES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_search_retries_total",
        "Total number of widened searches after tombstone filtering"
    )
    .expect("register vectordb_search_retries_total")
});

pub static SEARCH_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "vectordb_search_latency_seconds",
        "Per-query search latency in seconds",
    )
    .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]);
    prometheus::register_histogram!(opts).expect("register vectordb_search_latency_seconds")
});

pub static WAL_APPENDS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!("vectordb_wal_appends_total", "Total WAL entries appended")
        .expect("register vectordb_wal_appends_total")
});

pub static WAL_APPEND_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "vectordb_wal_append_latency_seconds",
        "WAL append (write + fsync) latency in seconds",
    )
    .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]);
    prometheus::register_histogram!(opts).expect("register vectordb_wal_append_latency_seconds")
});

pub static WAL_CORRUPT_TAIL_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_wal_corrupt_tail_total",
        "Total number of torn WAL tails discarded during replay"
    )
    .expect("register vectordb_wal_corrupt_tail_total")
});

pub static WAL_ENTRIES_REPLAYED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_wal_entries_replayed_total",
        "Total WAL entries applied during recovery"
    )
    .expect("register vectordb_wal_entries_replayed_total")
});

pub static SNAPSHOTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!("vectordb_snapshots_total", "Total snapshots taken")
        .expect("register vectordb_snapshots_total")
});

pub static SNAPSHOT_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "vectordb_snapshot_latency_seconds",
        "Snapshot latency in seconds",
    )
    .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0]);
    prometheus::register_histogram!(opts).expect("register vectordb_snapshot_latency_seconds")
});

pub static SNAPSHOT_FALLBACKS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "vectordb_snapshot_fallbacks_total",
        "Total corrupt snapshots skipped in favor of an older one"
    )
    .expect("register vectordb_snapshot_fallbacks_total")
});

/// Prometheus text exposition of every registered metric.
pub fn render() -> String {
    use prometheus::{Encoder, TextEncoder};
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let mf = prometheus::gather();
    if let Err(e) = encoder.encode(&mf, &mut buf) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
