//! Account maintenance for JetBrains AI credentials
//!
//! Decides which tokens are due, runs the vendor exchanges through
//! `jetbrains_auth`, persists results and exports the usable accounts. The
//! scheduler drives the same operations on timers for daemon mode.
//!
//! Refresh lifecycle for one account:
//! 1. `policy::needs_refresh()` marks the access and id tokens due or not
//! 2. A due id token is renewed from the refresh token, when there is one
//! 3. A due access token (or a just-renewed id token) triggers the license
//!    exchange for a new access token
//! 4. Whatever succeeded is written in one backup-then-write cycle
//! 5. With auto-export on, the export file is regenerated

pub mod error;
pub mod export;
pub mod manager;
pub mod metrics;
pub mod policy;
pub mod scheduler;

pub use error::{Error, Result};
pub use export::{ExportEntry, export, write_export};
pub use manager::{
    AccountManager, AccountResult, AccountSummary, BatchReport, ManagerSettings, Outcome,
};
pub use policy::{RefreshPlan, needs_refresh};
pub use scheduler::{
    DaemonStatus, JobKind, JobRun, JobSettings, Scheduler, SchedulerSettings, StatusSnapshot,
    TriggerError,
};
