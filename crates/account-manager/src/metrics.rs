//! Metric recording for refresh, quota and scheduler activity
//!
//! - `token_refresh_total` (counter): label `outcome`
//! - `quota_check_total` (counter): label `outcome`
//! - `scheduler_job_runs_total` (counter): labels `job`, `outcome`
//! - `scheduler_job_duration_seconds` (histogram): label `job`
//!
//! Without an installed recorder these calls are no-ops.

/// Record the outcome of one account's token refresh.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("token_refresh_total", "outcome" => outcome).increment(1);
}

/// Record the outcome of one account's quota check.
pub fn record_quota_check(outcome: &'static str) {
    metrics::counter!("quota_check_total", "outcome" => outcome).increment(1);
}

/// Record a finished scheduler job run.
pub fn record_job_run(job: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("scheduler_job_runs_total", "job" => job, "outcome" => outcome).increment(1);
    metrics::histogram!("scheduler_job_duration_seconds", "job" => job).record(duration_secs);
}
