//! JetBrains vendor endpoint defaults
//!
//! Public client configuration used by the JetBrains IDEs. None of these are
//! secrets; deployments may override the URLs through the `[vendor]` table of
//! the service configuration.

/// OAuth token endpoint (refresh-token grant that yields a new id token)
pub const OAUTH_TOKEN_URL: &str = "https://oauth.account.jetbrains.com/oauth2/token";

/// Exchanges an id token plus license id for an AI-platform access token (JWT)
pub const JWT_AUTH_URL: &str =
    "https://api.jetbrains.ai/auth/jetbrains-jwt/provide-access/license/v2";

/// Quota lookup for an access token
pub const QUOTA_URL: &str = "https://api.jetbrains.ai/user/v5/quota/get";

/// Public OAuth client id used by the IDEs
pub const CLIENT_ID: &str = "ide";

/// User agent sent to the AI-platform endpoints
pub const USER_AGENT: &str = "ktor-client";

/// Default `grazie-agent` header identifying the calling IDE plugin
pub const DEFAULT_GRAZIE_AGENT: &str =
    r#"{"name":"aia:dataspell","version":"251.26094.80.22:251.26927.75"}"#;

/// License state the access-token exchange must report for a usable token
pub const PAID_LICENSE_STATE: &str = "PAID";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
