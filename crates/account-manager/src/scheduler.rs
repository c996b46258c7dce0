//! Periodic job scheduler
//!
//! Three jobs from a fixed table, each on its own interval timer:
//! `token_refresh`, `quota_check` and `health_check`. A job is either idle
//! or running. A tick or manual trigger that lands while the same job is
//! still running is dropped, not queued. Different jobs may overlap.
//!
//! Every run executes in its own spawned task, so a panic inside a job is
//! caught at the join handle, recorded as a failed run, and the timer loop
//! keeps going.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::manager::AccountManager;
use crate::metrics;

/// Runs kept in the status snapshot.
const SNAPSHOT_HISTORY: usize = 10;

/// Scheduled job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    TokenRefresh,
    QuotaCheck,
    HealthCheck,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::TokenRefresh,
        JobKind::QuotaCheck,
        JobKind::HealthCheck,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::TokenRefresh => "token_refresh",
            JobKind::QuotaCheck => "quota_check",
            JobKind::HealthCheck => "health_check",
        }
    }

    pub fn from_name(name: &str) -> Option<JobKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn index(&self) -> usize {
        match self {
            JobKind::TokenRefresh => 0,
            JobKind::QuotaCheck => 1,
            JobKind::HealthCheck => 2,
        }
    }
}

/// Per-job schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub interval_minutes: u64,
}

fn enabled() -> bool {
    true
}

impl JobSettings {
    fn every(interval_minutes: u64) -> Self {
        Self {
            enabled: true,
            interval_minutes,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// Scheduler configuration, embedded as the `[scheduler]` table of the
/// service config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Status snapshot file; `None` keeps the snapshot in memory only
    pub status_file: Option<PathBuf>,
    /// Bounded run history length
    pub max_history: usize,
    pub token_refresh: JobSettings,
    pub quota_check: JobSettings,
    pub health_check: JobSettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            status_file: Some(PathBuf::from("logs/daemon_status.json")),
            max_history: 100,
            token_refresh: JobSettings::every(30),
            quota_check: JobSettings::every(120),
            health_check: JobSettings::every(5),
        }
    }
}

impl SchedulerSettings {
    pub fn job(&self, kind: JobKind) -> &JobSettings {
        match kind {
            JobKind::TokenRefresh => &self.token_refresh,
            JobKind::QuotaCheck => &self.quota_check,
            JobKind::HealthCheck => &self.health_check,
        }
    }
}

/// Daemon lifecycle state shown in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    Starting,
    Running,
    Stopped,
}

/// One finished job run.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub job: JobKind,
    pub started_at: i64,
    pub duration_ms: u64,
    pub success: bool,
    pub message: String,
}

/// Per-job counters in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
    pub last_run: Option<JobRun>,
}

/// Scheduler status as served by the API and written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: DaemonStatus,
    pub started_at: i64,
    pub uptime_secs: i64,
    pub updated_at: i64,
    pub jobs: IndexMap<&'static str, JobState>,
    pub recent_runs: Vec<JobRun>,
}

/// Why a manual trigger was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("job is disabled")]
    Disabled,
    #[error("job is already running")]
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct Counters {
    runs: u64,
    failures: u64,
    last_run: Option<JobRun>,
}

struct Board {
    status: DaemonStatus,
    counters: [Counters; 3],
    history: VecDeque<JobRun>,
}

/// A claimed running flag. Released on drop, wherever the run ends up.
struct RunGuard {
    scheduler: Arc<Scheduler>,
    kind: JobKind,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.scheduler.running[self.kind.index()].store(false, Ordering::Release);
    }
}

/// Periodic runner over an `AccountManager`.
pub struct Scheduler {
    manager: Arc<AccountManager>,
    settings: SchedulerSettings,
    started_at: i64,
    running: [AtomicBool; 3],
    board: Mutex<Board>,
}

impl Scheduler {
    pub fn new(manager: Arc<AccountManager>, settings: SchedulerSettings) -> Self {
        Self {
            manager,
            started_at: common::now_secs(),
            running: Default::default(),
            board: Mutex::new(Board {
                status: DaemonStatus::Starting,
                counters: Default::default(),
                history: VecDeque::with_capacity(settings.max_history),
            }),
            settings,
        }
    }

    pub fn manager(&self) -> &Arc<AccountManager> {
        &self.manager
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.running[kind.index()].load(Ordering::Acquire)
    }

    pub fn set_status(&self, status: DaemonStatus) {
        self.board().status = status;
    }

    /// Start one timer loop per enabled job.
    ///
    /// The first tick fires one full interval after start. Ticks missed
    /// while a run is in progress are skipped rather than replayed.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        JobKind::ALL
            .into_iter()
            .filter(|kind| self.settings.job(*kind).enabled)
            .map(|kind| {
                let scheduler = Arc::clone(self);
                let period = self.settings.job(kind).interval();
                info!(job = kind.name(), interval_secs = period.as_secs(), "scheduling job");
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // First tick completes immediately
                    ticker.tick().await;

                    loop {
                        ticker.tick().await;
                        scheduler.run_job(kind).await;
                    }
                })
            })
            .collect()
    }

    /// Run `kind` now and wait for it. `None` if it was already running.
    pub async fn run_job(self: &Arc<Self>, kind: JobKind) -> Option<JobRun> {
        let scheduler = Arc::clone(self);
        self.run_guarded(kind, async move { scheduler.execute(kind).await })
            .await
    }

    /// Start `kind` in the background, for manual triggers.
    ///
    /// The running flag is claimed before returning, so `Ok` means this
    /// trigger owns the run.
    pub fn trigger(self: &Arc<Self>, kind: JobKind) -> std::result::Result<(), TriggerError> {
        if !self.settings.job(kind).enabled {
            return Err(TriggerError::Disabled);
        }
        let guard = self.claim(kind).ok_or(TriggerError::AlreadyRunning)?;
        info!(job = kind.name(), "manual job trigger");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let job = {
                let scheduler = Arc::clone(&scheduler);
                async move { scheduler.execute(kind).await }
            };
            scheduler.run_claimed(guard, job).await;
        });
        Ok(())
    }

    /// Current status snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        let now = common::now_secs();
        let board = self.board();
        let jobs = JobKind::ALL
            .into_iter()
            .map(|kind| {
                let settings = self.settings.job(kind);
                let counters = &board.counters[kind.index()];
                (
                    kind.name(),
                    JobState {
                        enabled: settings.enabled,
                        interval_minutes: settings.interval_minutes,
                        running: self.is_running(kind),
                        runs: counters.runs,
                        failures: counters.failures,
                        last_run: counters.last_run.clone(),
                    },
                )
            })
            .collect();
        let skip = board.history.len().saturating_sub(SNAPSHOT_HISTORY);
        StatusSnapshot {
            status: board.status,
            started_at: self.started_at,
            uptime_secs: now - self.started_at,
            updated_at: now,
            jobs,
            recent_runs: board.history.iter().skip(skip).cloned().collect(),
        }
    }

    /// Write the snapshot to the configured status file, if any.
    pub async fn write_status(&self) -> Result<()> {
        let Some(path) = &self.settings.status_file else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::Config(format!("creating {}: {e}", dir.display())))?;
        }
        jetbrains_auth::write_json_atomic(path, &self.snapshot()).await?;
        Ok(())
    }

    /// Take the job's running flag, or `None` if a run holds it.
    fn claim(self: &Arc<Self>, kind: JobKind) -> Option<RunGuard> {
        self.running[kind.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(RunGuard {
            scheduler: Arc::clone(self),
            kind,
        })
    }

    /// Claim the job's running flag, then run `job`.
    async fn run_guarded<F>(self: &Arc<Self>, kind: JobKind, job: F) -> Option<JobRun>
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        let Some(guard) = self.claim(kind) else {
            warn!(job = kind.name(), "previous run still in progress, skipping");
            return None;
        };
        Some(self.run_claimed(guard, job).await)
    }

    /// Run `job` in its own task and record the result. The flag is released
    /// after the run is recorded.
    async fn run_claimed<F>(&self, guard: RunGuard, job: F) -> JobRun
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        let kind = guard.kind;
        let started_at = common::now_secs();
        let started = Instant::now();
        info!(job = kind.name(), "job started");

        let (success, message) = match tokio::spawn(job).await {
            Ok(Ok(summary)) => (true, summary),
            Ok(Err(e)) => (false, e.to_string()),
            Err(e) if e.is_panic() => (false, String::from("job panicked")),
            Err(e) => (false, format!("job aborted: {e}")),
        };

        let elapsed = started.elapsed();
        let run = JobRun {
            job: kind,
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            success,
            message,
        };
        if success {
            info!(job = kind.name(), duration_ms = run.duration_ms, result = %run.message, "job finished");
        } else {
            error!(job = kind.name(), duration_ms = run.duration_ms, error = %run.message, "job failed");
        }
        metrics::record_job_run(
            kind.name(),
            if success { "success" } else { "failure" },
            elapsed.as_secs_f64(),
        );
        self.record(run.clone());
        drop(guard);
        run
    }

    async fn execute(&self, kind: JobKind) -> Result<String> {
        match kind {
            JobKind::TokenRefresh => Ok(self.manager.refresh_all(false).await?.summary()),
            JobKind::QuotaCheck => Ok(self.manager.check_quota_all().await?.summary()),
            JobKind::HealthCheck => {
                let accounts = self.manager.list().await?;
                let due = accounts.iter().filter(|a| a.access_due).count();
                self.write_status().await?;
                Ok(format!("{} accounts, {due} with access token due", accounts.len()))
            }
        }
    }

    fn record(&self, run: JobRun) {
        let mut board = self.board();
        let counters = &mut board.counters[run.job.index()];
        counters.runs += 1;
        if !run.success {
            counters.failures += 1;
        }
        counters.last_run = Some(run.clone());

        let max = self.settings.max_history.max(1);
        while board.history.len() >= max {
            board.history.pop_front();
        }
        board.history.push_back(run);
    }

    fn board(&self) -> std::sync::MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
