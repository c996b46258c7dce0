//! Error types for account manager operations

/// Document-level failures. Per-account vendor failures never surface here;
/// they are reported as `Outcome::Failed` inside an `AccountResult`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("account not found: {0}")]
    NotFound(String),

    #[error("export failed: {0}")]
    Export(String),
}

/// Only store failures are propagated with `?`; vendor failures have already
/// been turned into per-account outcomes by then.
impl From<jetbrains_auth::Error> for Error {
    fn from(err: jetbrains_auth::Error) -> Self {
        match err {
            jetbrains_auth::Error::Config(msg) => Error::Config(msg),
            jetbrains_auth::Error::NotFound(name) => Error::NotFound(name),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Result alias for account manager operations.
pub type Result<T> = std::result::Result<T, Error>;
