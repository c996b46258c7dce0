//! Configuration types and loading
//!
//! Precedence: CLI args > env vars (through clap) > config file > defaults.
//! The config file is optional when it is the default path; an explicitly
//! named file must exist. Tokens never live in the TOML, only in the
//! accounts document it points at.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use account_manager::{ManagerSettings, SchedulerSettings};
use jetbrains_auth::Endpoints;
use serde::Deserialize;

/// Config file used when none is named.
pub const DEFAULT_CONFIG_FILE: &str = "token-keeper.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub accounts: AccountsConfig,
    pub vendor: Endpoints,
    pub refresh: RefreshConfig,
    pub scheduler: SchedulerSettings,
    pub server: ServerConfig,
}

/// Accounts document location and export behaviour
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub path: PathBuf,
    /// Defaults to `<stem>-backup.<ext>` next to `path`
    pub backup_path: Option<PathBuf>,
    /// Defaults to `jetbrainsai.json` next to `path`
    pub export_path: Option<PathBuf>,
    pub auto_export: bool,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config.json"),
            backup_path: None,
            export_path: None,
            auto_export: true,
        }
    }
}

/// Refresh policy and vendor call settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub skew_secs: i64,
    pub id_token_lifetime_secs: i64,
    pub timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            skew_secs: account_manager::policy::DEFAULT_SKEW_SECS,
            id_token_lifetime_secs: account_manager::manager::DEFAULT_ID_TOKEN_LIFETIME_SECS,
            timeout_secs: jetbrains_auth::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Status API settings (daemon mode only)
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// No listener when unset
    pub listen_addr: Option<SocketAddr>,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            max_connections: 64,
        }
    }
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the named file, or the default file if it exists, or defaults.
    pub fn locate(cli_path: Option<&Path>) -> common::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = cli_path {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            return Ok((Self::load(&default_path)?, Some(default_path)));
        }
        let config = Self::default();
        config.validate()?;
        Ok((config, None))
    }

    /// Reject settings that would make every run fail or spin.
    pub fn validate(&self) -> common::Result<()> {
        for (name, url) in [
            ("oauth_url", &self.vendor.oauth_url),
            ("jwt_auth_url", &self.vendor.jwt_auth_url),
            ("quota_url", &self.vendor.quota_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "vendor.{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.refresh.timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.refresh.skew_secs < 0 {
            return Err(common::Error::Config(
                "refresh.skew_secs must not be negative".into(),
            ));
        }
        if self.refresh.id_token_lifetime_secs <= 0 {
            return Err(common::Error::Config(
                "refresh.id_token_lifetime_secs must be greater than 0".into(),
            ));
        }

        for kind in account_manager::JobKind::ALL {
            if self.scheduler.job(kind).interval_minutes == 0 {
                return Err(common::Error::Config(format!(
                    "scheduler.{}.interval_minutes must be greater than 0",
                    kind.name()
                )));
            }
        }
        if self.scheduler.max_history == 0 {
            return Err(common::Error::Config(
                "scheduler.max_history must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.refresh.timeout_secs)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.accounts
            .backup_path
            .clone()
            .unwrap_or_else(|| jetbrains_auth::store::default_backup_path(&self.accounts.path))
    }

    pub fn export_path(&self) -> PathBuf {
        self.accounts.export_path.clone().unwrap_or_else(|| {
            self.accounts
                .path
                .with_file_name(account_manager::export::DEFAULT_EXPORT_FILE)
        })
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            skew_secs: self.refresh.skew_secs,
            id_token_lifetime_secs: self.refresh.id_token_lifetime_secs,
            export_path: Some(self.export_path()),
            auto_export: self.accounts.auto_export,
        }
    }
}
