//! Prometheus metrics for votes, loaders and the feed

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static::lazy_static! {
    /// Applied vote transitions by kind (cast/retract/flip)
    pub static ref VOTES_APPLIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "votes_applied_total",
        "Vote transitions committed",
        &["transition"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Rejected or aborted votes by error kind
    pub static ref VOTE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "vote_failures_total",
        "Votes that were rejected or rolled back",
        &["kind"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Bulk fetches dispatched by request-scoped loaders
    pub static ref LOADER_BATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "loader_batches_total",
        "Bulk fetches dispatched by key batchers",
        &["loader"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Distinct keys per bulk fetch
    pub static ref LOADER_BATCH_KEYS: HistogramVec = register_histogram_vec!(
        "loader_batch_keys",
        "Distinct keys per bulk fetch",
        &["loader"],
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref FEED_PAGES_TOTAL: IntCounter = register_int_counter!(
        "feed_pages_total",
        "Feed pages served"
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Render the default registry in text exposition format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
