/// Metrics Module - Prometheus Instrumentation
///
/// Global registry plus the counters, gauges and histograms the proxy
/// components report into. Registered once at startup and exposed in text
/// format on GET /metrics.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0];

/// JSON-RPC methods the proxy treats specially; everything else is folded
/// into one label value to keep cardinality bounded against arbitrary client
/// input.
const KNOWN_METHODS: &[&str] = &[
    "eth_getBlockByNumber",
    "eth_getTransactionReceipt",
    "eth_blockNumber",
    "eth_syncing",
    "eth_chainId",
    "eth_call",
    "eth_getBalance",
    "eth_getLogs",
    "eth_sendRawTransaction",
];

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Inbound JSON-RPC sub-requests by method
    pub static ref RPC_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("chainproxy_rpc_requests_total", "Inbound JSON-RPC sub-requests by method"),
        &["method"]
    ).unwrap();

    /// Cache hits by cache (block, txreceipt)
    pub static ref CACHE_HITS: IntCounterVec = IntCounterVec::new(
        Opts::new("chainproxy_cache_hits_total", "Cache hits by cache"),
        &["cache"]
    ).unwrap();

    /// Cache misses by cache (block, txreceipt)
    pub static ref CACHE_MISSES: IntCounterVec = IntCounterVec::new(
        Opts::new("chainproxy_cache_misses_total", "Cache misses by cache"),
        &["cache"]
    ).unwrap();

    /// Healthcheck failovers by backend kind
    pub static ref HEALTHCHECK_FAILOVERS: IntCounterVec = IntCounterVec::new(
        Opts::new("chainproxy_healthcheck_failovers_total", "Active-backend changes forced by failed healthchecks"),
        &["kind"]
    ).unwrap();

    /// Upstream transport errors and non-200 replies
    pub static ref UPSTREAM_ERRORS: IntCounter = IntCounter::new(
        "chainproxy_upstream_errors_total",
        "Upstream transport errors and non-200 replies"
    ).unwrap();

    /// Latest observed chain tip
    pub static ref BLOCK_HEIGHT: IntGauge = IntGauge::new(
        "chainproxy_block_height",
        "Latest chain tip observed by the finalization tracker"
    ).unwrap();

    /// Upstream RPC latency
    pub static ref UPSTREAM_RPC_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("chainproxy_upstream_rpc_duration_seconds", "Upstream RPC POST latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
    ).unwrap();
}

/// Registers all metrics with the global registry.
/// Call this once at service startup.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(RPC_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(CACHE_HITS.clone()))?;
    REGISTRY.register(Box::new(CACHE_MISSES.clone()))?;
    REGISTRY.register(Box::new(HEALTHCHECK_FAILOVERS.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_ERRORS.clone()))?;
    REGISTRY.register(Box::new(BLOCK_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_RPC_DURATION.clone()))?;
    Ok(())
}

/// Gather metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

/// Label value for a client-supplied method name.
pub fn method_label(method: &str) -> &str {
    if KNOWN_METHODS.contains(&method) {
        method
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_label_bounds_cardinality() {
        assert_eq!(method_label("eth_getBlockByNumber"), "eth_getBlockByNumber");
        assert_eq!(method_label("eth_chainId"), "eth_chainId");
        assert_eq!(method_label("debug_traceTransaction"), "other");
        assert_eq!(method_label(""), "other");
    }
}
