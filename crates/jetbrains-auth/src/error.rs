//! Error types for account storage and vendor token operations

/// Errors from account storage and vendor calls.
///
/// `Config` is document-level and aborts whatever operation hit it. `Auth`,
/// `Quota` and `Network` are per-account: batch callers record them and move
/// on to the next account.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("token exchange failed ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("quota lookup failed ({status}): {body}")]
    Quota { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("account not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Timeouts and connection failures. The next scheduled run retries them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Metric label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Auth { .. } => "auth",
            Error::Quota { .. } => "quota",
            Error::Network(_) => "network",
            Error::NotFound(_) => "not_found",
        }
    }
}

/// Map a transport-level reqwest failure to `Error::Network`.
pub(crate) fn network(context: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Network(format!("{context}: request timed out: {err}"))
    } else {
        Error::Network(format!("{context}: {err}"))
    }
}

/// Result alias for auth and storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_carries_status_and_body() {
        let err = Error::Auth {
            status: 401,
            body: r#"{"error":"invalid_grant"}"#.into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"), "got: {msg}");
        assert!(msg.contains("invalid_grant"), "got: {msg}");
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(Error::Network("timed out".into()).is_transient());
        assert!(
            !Error::Auth {
                status: 500,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!Error::Config("bad json".into()).is_transient());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(Error::NotFound("a".into()).kind(), "not_found");
        assert_eq!(
            Error::Quota {
                status: 502,
                body: String::new()
            }
            .kind(),
            "quota"
        );
    }
}
