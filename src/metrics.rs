//! Prometheus metrics

use lazy_static::lazy_static;
use prometheus::{
    self, core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Byte range requests issued, by backend
    pub static ref CHUNK_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("chunk_requests", "The number of byte range requests issued"),
        &["backend"]
    ).unwrap();
    // Bytes retrieved, by backend
    pub static ref CHUNK_BYTES_RETRIEVED: IntCounterVec = IntCounterVec::new(
        Opts::new("chunk_bytes_retrieved", "The number of bytes retrieved"),
        &["backend"]
    ).unwrap();
    // Failed byte range requests, by backend
    pub static ref CHUNK_REQUEST_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("chunk_request_failures", "The number of failed byte range requests"),
        &["backend"]
    ).unwrap();
    // Byte range request histogram by response time
    pub static ref CHUNK_REQUEST_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("chunk_request_time", "The time taken by each byte range request"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(), // Change buckets here if desired
        },
        &["backend"],
    ).unwrap();
    // Layout cache hits, misses and evictions
    pub static ref LAYOUT_CACHE_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("layout_cache_events", "The number of layout cache hits, misses and evictions"),
        &["event"]
    ).unwrap();
}

/// Register all metrics with [REGISTRY].
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let collectors: [Box<dyn Collector>; 5] = [
        Box::new(CHUNK_REQUESTS.clone()),
        Box::new(CHUNK_BYTES_RETRIEVED.clone()),
        Box::new(CHUNK_REQUEST_FAILURES.clone()),
        Box::new(CHUNK_REQUEST_TIME.clone()),
        Box::new(LAYOUT_CACHE_EVENTS.clone()),
    ];
    for collector in collectors {
        REGISTRY.register(collector)?;
    }
    Ok(())
}

/// Returns the registered metrics in the Prometheus text exposition format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
