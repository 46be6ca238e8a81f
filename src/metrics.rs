use tracing::trace;

// Trace-backed counters; the Prometheus recorder installed in main renders
// whatever the exporter collects on /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "bazaar.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn batch_elapsed(files: usize, elapsed_ms: u128) {
    trace!(
        target = "bazaar.metrics",
        files = files,
        elapsed_ms = elapsed_ms as u64,
        "upload_batch_elapsed"
    );
}
