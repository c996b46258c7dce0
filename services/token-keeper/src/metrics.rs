//! Prometheus metrics exposition
//!
//! The counters and histograms themselves are recorded by `account_manager`;
//! this module installs the recorder that `GET /metrics` renders.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries for `scheduler_job_duration_seconds`, 100ms to 10 minutes.
const JOB_DURATION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Builder with job durations rendered as a histogram rather than a summary.
fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("scheduler_job_duration_seconds".to_string()),
        JOB_DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}
