//! Metrics for the scheduler, exported via the `metrics` facade with a
//! Prometheus recorder bound at process start.

use metrics_exporter_prometheus::PrometheusBuilder;

/// Installs the global Prometheus recorder. Call once at startup.
pub fn install_recorder() {
    PrometheusBuilder::new()
        .install()
        .unwrap_or_else(|e| tracing::warn!(error = %e, "failed to install prometheus recorder"));
}

pub fn record_tick(considered: usize, enqueued: usize) {
    metrics::counter!("scheduler_ticks_total").increment(1);
    metrics::counter!("scheduler_campaigns_considered_total").increment(considered as u64);
    metrics::counter!("scheduler_campaigns_enqueued_total").increment(enqueued as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_functions_do_not_panic_without_a_recorder() {
        record_tick(10, 4);
    }
}
