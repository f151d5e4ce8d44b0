use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{trace, warn};

// Request accounting goes through trace events; the Prometheus recorder only
// backs the /metrics rendering.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "storefront.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "storefront.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

/// Installs the global recorder once per process. A second install (tests
/// building several routers) yields `None` and `/metrics` renders empty.
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(target = "storefront.metrics", error = %err, "prometheus recorder not installed");
            None
        }
    }
}
