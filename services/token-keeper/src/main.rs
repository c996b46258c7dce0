//! JetBrains Token Keeper
//!
//! Keeps the tokens in a JetBrains AI accounts document fresh:
//! 1. One-shot commands refresh tokens, check quota, list, back up or export
//! 2. `daemon` runs the same operations on timers and serves a status API
//! 3. Every change is written back with a backup of the previous file

mod api;
mod config;
mod metrics;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use account_manager::{
    AccountManager, AccountResult, AccountSummary, BatchReport, DaemonStatus, Outcome, Scheduler,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jetbrains_auth::{AccountStore, TokenClient};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "jetbrains-token-keeper",
    version,
    about = "Refresh and export JetBrains AI account tokens"
)]
struct Cli {
    /// Service config file (TOML)
    #[arg(long, global = true, env = "TOKEN_KEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Accounts document, overriding `[accounts] path`
    #[arg(long, global = true, env = "TOKEN_KEEPER_ACCOUNTS")]
    accounts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh due tokens for one account, or all of them
    Refresh {
        account: Option<String>,
        /// Refresh even tokens that are not due
        #[arg(long)]
        force: bool,
    },
    /// Update the stored quota for one account, or all of them
    Quota { account: Option<String> },
    /// Show accounts with expiry and quota, without tokens
    List,
    /// Copy the accounts document to its backup path
    Backup,
    /// Write usable accounts to the export file
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Run scheduled jobs until SIGINT/SIGTERM
    Daemon,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // JSON logs to stderr so stdout stays clean for command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let (mut config, source) =
        Config::locate(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(accounts) = cli.accounts {
        config.accounts.path = accounts;
    }
    info!(
        config = %source.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".into()),
        accounts = %config.accounts.path.display(),
        "configuration loaded"
    );

    let manager = build_manager(&config)?;

    let ok = match cli.command {
        Command::Refresh {
            account: Some(name),
            force,
        } => print_result("refresh", &manager.refresh_one(&name, force).await?),
        Command::Refresh {
            account: None,
            force,
        } => print_report("refresh", &manager.refresh_all(force).await?),
        Command::Quota { account: Some(name) } => {
            print_result("quota", &manager.check_quota_one(&name).await?)
        }
        Command::Quota { account: None } => {
            print_report("quota", &manager.check_quota_all().await?)
        }
        Command::List => {
            print_accounts(&manager.list().await?);
            true
        }
        Command::Backup => {
            if manager.backup().await? {
                println!("backed up to {}", manager.store().backup_path().display());
            } else {
                println!("nothing to back up: {} does not exist", manager.store().path().display());
            }
            true
        }
        Command::Export { output } => {
            let path = output.unwrap_or_else(|| config.export_path());
            let count = manager.export_to_file(&path).await?;
            println!("exported {count} accounts to {}", path.display());
            true
        }
        Command::Daemon => {
            run_daemon(config, Arc::new(manager)).await?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn build_manager(config: &Config) -> Result<AccountManager> {
    let store = AccountStore::new(&config.accounts.path).with_backup_path(config.backup_path());
    let client = TokenClient::new(config.vendor.clone(), config.timeout())
        .context("failed to build HTTP client")?;
    Ok(AccountManager::new(store, client, config.manager_settings()))
}

/// Scheduler plus optional status API, until a shutdown signal.
async fn run_daemon(config: Config, manager: Arc<AccountManager>) -> Result<()> {
    let prometheus = metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let scheduler = Arc::new(Scheduler::new(manager, config.scheduler.clone()));
    scheduler.set_status(DaemonStatus::Running);
    if let Err(e) = scheduler.write_status().await {
        warn!(error = %e, "failed to write status file");
    }

    let jobs = scheduler.spawn();
    info!(jobs = jobs.len(), "daemon running");

    let server = match config.server.listen_addr {
        Some(addr) => {
            let app = api::build_router(
                api::ApiState::new(scheduler.clone(), prometheus),
                config.server.max_connections,
            );
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind to {addr}"))?;
            info!(addr = %addr, "status API listening");

            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
            let handle = tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
            });
            Some((shutdown_tx, handle))
        }
        None => None,
    };

    shutdown_signal().await;

    for job in &jobs {
        job.abort();
    }
    if let Some((shutdown_tx, handle)) = server {
        let _ = shutdown_tx.send(());
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "status API error during shutdown"),
            Err(e) => error!(error = %e, "status API task panicked"),
        }
    }

    scheduler.set_status(DaemonStatus::Stopped);
    if let Err(e) = scheduler.write_status().await {
        warn!(error = %e, "failed to write final status file");
    }
    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Refreshed {
            access_token,
            id_token,
        } => match (access_token, id_token) {
            (true, true) => "refreshed id and access tokens".into(),
            (true, false) => "refreshed access token".into(),
            (false, true) => "refreshed id token".into(),
            (false, false) => "refreshed".into(),
        },
        Outcome::QuotaUpdated { status } => format!("quota {status}"),
        Outcome::Skipped { reason } => format!("skipped: {reason}"),
        Outcome::Failed { reason } => format!("FAILED: {reason}"),
    }
}

/// Print one result; `false` when it failed.
fn print_result(action: &str, result: &AccountResult) -> bool {
    println!("{action} {}: {}", result.account, describe(&result.outcome));
    !result.outcome.is_failure()
}

/// Print a batch summary and per-account lines; `false` when any account failed.
fn print_report(action: &str, report: &BatchReport) -> bool {
    println!("{action}: {}", report.summary());
    for result in &report.results {
        println!("  {}: {}", result.account, describe(&result.outcome));
    }
    report.failed() == 0
}

fn print_accounts(accounts: &[AccountSummary]) {
    let now = common::now_secs();
    let expiry = |at: Option<i64>| match at {
        Some(at) => common::describe_expiry(at, now),
        None => String::from("unknown"),
    };
    for account in accounts {
        let quota = account
            .quota
            .as_ref()
            .map(|q| {
                format!(
                    "{} ({:.1}% used, {} left)",
                    q.status,
                    q.usage_percentage,
                    q.remaining_amount
                )
            })
            .unwrap_or_else(|| String::from("not checked"));
        println!(
            "{}\n  license: {}\n  access token: {}{}\n  id token: {}{}\n  quota: {quota}",
            account.name,
            account.license_id.as_deref().unwrap_or("-"),
            expiry(account.access_token_expires_at),
            if account.access_due { " (due)" } else { "" },
            expiry(account.id_token_expires_at),
            if account.id_due { " (due)" } else { "" },
        );
    }
    if accounts.is_empty() {
        println!("no accounts");
    }
}
