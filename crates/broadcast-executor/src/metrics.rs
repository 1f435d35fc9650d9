//! Metrics for the broadcast executor, exported via the `metrics` facade
//! with a Prometheus recorder bound at process start.

use metrics_exporter_prometheus::PrometheusBuilder;

/// Installs the global Prometheus recorder. Call once at startup.
pub fn install_recorder() {
    PrometheusBuilder::new()
        .install()
        .unwrap_or_else(|e| tracing::warn!(error = %e, "failed to install prometheus recorder"));
}

pub fn record_job_outcome(outcome: &str) {
    metrics::counter!("broadcast_jobs_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_attempt_claimed() {
    metrics::counter!("broadcast_attempts_claimed_total").increment(1);
}

pub fn record_retry(classification: &str) {
    metrics::counter!("broadcast_retries_total", "classification" => classification.to_string()).increment(1);
}

pub fn set_queue_depth(depth: u64) {
    metrics::gauge!("broadcast_queue_depth").set(depth as f64);
}

pub fn set_active_lanes(count: usize) {
    metrics::gauge!("broadcast_active_lanes").set(count as f64);
}

/// Ratio of retries seen in a single run against `BROADCAST_RETRY_STORM_THRESHOLD`.
/// An alerting gauge, not a behavioral gate — the run is never throttled on it.
pub fn set_retry_storm_ratio(retries_this_run: u64, threshold: u64) {
    if threshold == 0 {
        return;
    }
    metrics::gauge!("broadcast_retry_storm_ratio").set(retries_this_run as f64 / threshold as f64);
}

/// Ratio of attempts recovered from stuck in-flight against `BROADCAST_STUCK_INFLIGHT_THRESHOLD`.
pub fn set_stuck_inflight_ratio(recovered: u64, threshold: u64) {
    if threshold == 0 {
        return;
    }
    metrics::gauge!("broadcast_stuck_inflight_ratio").set(recovered as f64 / threshold as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_functions_do_not_panic_without_a_recorder() {
        record_job_outcome("sent");
        record_attempt_claimed();
        record_retry("retriable-rate-limit");
        set_queue_depth(3);
        set_active_lanes(2);
        set_retry_storm_ratio(12, 100);
        set_stuck_inflight_ratio(3, 100);
        set_retry_storm_ratio(5, 0);
    }
}
