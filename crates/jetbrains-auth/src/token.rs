//! Vendor token exchanges and quota lookup
//!
//! Three single-attempt calls against the JetBrains endpoints:
//! 1. Refresh-token grant on the OAuth server, yielding a new id token
//! 2. Id token + license id exchange, yielding an AI-platform access token
//! 3. Quota lookup for an access token
//!
//! There is no retry loop here. A failed call is reported to the caller, and
//! the next scheduled run is the retry.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::QuotaInfo;
use crate::constants::{
    CLIENT_ID, DEFAULT_GRAZIE_AGENT, DEFAULT_TIMEOUT_SECS, JWT_AUTH_URL, OAUTH_TOKEN_URL,
    PAID_LICENSE_STATE, QUOTA_URL, USER_AGENT,
};
use crate::error::{Error, Result, network};
use crate::{jwt, quota};

/// Vendor endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub oauth_url: String,
    pub jwt_auth_url: String,
    pub quota_url: String,
    pub client_id: String,
    pub grazie_agent: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            oauth_url: OAUTH_TOKEN_URL.to_string(),
            jwt_auth_url: JWT_AUTH_URL.to_string(),
            quota_url: QUOTA_URL.to_string(),
            client_id: CLIENT_ID.to_string(),
            grazie_agent: DEFAULT_GRAZIE_AGENT.to_string(),
        }
    }
}

/// Result of the id token + license exchange.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub access_token: String,
    /// `exp` claim of the new token, if it could be read
    pub expires_at: Option<i64>,
}

/// Result of the refresh-token grant.
#[derive(Debug, Clone)]
pub struct IdGrant {
    pub id_token: String,
    /// Rotated refresh token, when the server issued one
    pub refresh_token: Option<String>,
    pub id_token_expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct LicenseTokenResponse {
    state: Option<String>,
    token: Option<String>,
}

/// HTTP client for the vendor endpoints.
///
/// Owns one `reqwest::Client` (connection pool shared by every call) and the
/// endpoint set. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl TokenClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { http, endpoints })
    }

    /// Client with default endpoints and timeout.
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            Endpoints::default(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Exchange an id token and license id for a new access token.
    ///
    /// Fails with `Auth` on a non-2xx status, an unparseable body, or a
    /// license that is not in the paid state.
    pub async fn refresh_access_token(&self, id_token: &str, license_id: &str) -> Result<AccessGrant> {
        let response = self
            .http
            .post(&self.endpoints.jwt_auth_url)
            .bearer_auth(id_token)
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::ACCEPT_CHARSET, "UTF-8")
            .json(&serde_json::json!({ "licenseId": license_id }))
            .send()
            .await
            .map_err(|e| network("access token exchange", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| network("reading access token response", e))?;

        if !status.is_success() {
            return Err(Error::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: LicenseTokenResponse = serde_json::from_str(&body).map_err(|e| Error::Auth {
            status: status.as_u16(),
            body: format!("invalid access token response: {e}"),
        })?;

        let state = parsed.state.unwrap_or_default();
        if state != PAID_LICENSE_STATE {
            return Err(Error::Auth {
                status: status.as_u16(),
                body: format!("license state is {state:?}, expected {PAID_LICENSE_STATE}"),
            });
        }

        let access_token = parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth {
                status: status.as_u16(),
                body: "access token response has no token".into(),
            })?;

        let expires_at = jwt::expiration(&access_token);
        debug!(has_expiry = expires_at.is_some(), "access token exchanged");
        Ok(AccessGrant {
            access_token,
            expires_at,
        })
    }

    /// Obtain a new id token with a refresh token.
    pub async fn refresh_id_token(&self, refresh_token: &str) -> Result<IdGrant> {
        let requested_at = common::now_secs();
        let response = self
            .http
            .post(&self.endpoints.oauth_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.endpoints.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| network("id token refresh", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| network("reading id token response", e))?;

        if !status.is_success() {
            return Err(Error::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OAuthTokenResponse = serde_json::from_str(&body).map_err(|e| Error::Auth {
            status: status.as_u16(),
            body: format!("invalid id token response: {e}"),
        })?;

        let id_token = parsed
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth {
                status: status.as_u16(),
                body: "id token response has no id_token".into(),
            })?;

        let id_token_expires_at = jwt::expiration(&id_token)
            .or_else(|| parsed.expires_in.map(|secs| requested_at + secs as i64));

        debug!(
            rotated_refresh_token = parsed.refresh_token.is_some(),
            has_expiry = id_token_expires_at.is_some(),
            "id token refreshed"
        );
        Ok(IdGrant {
            id_token,
            refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
            id_token_expires_at,
        })
    }

    /// Look up the quota attached to an access token.
    pub async fn check_quota(&self, access_token: &str) -> Result<QuotaInfo> {
        let response = self
            .http
            .post(&self.endpoints.quota_url)
            .header("grazie-authenticate-jwt", access_token)
            .header("grazie-agent", &self.endpoints.grazie_agent)
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| network("quota lookup", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| network("reading quota response", e))?;

        if !status.is_success() {
            return Err(Error::Quota {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = serde_json::from_str(&body).map_err(|e| Error::Quota {
            status: status.as_u16(),
            body: format!("invalid quota response: {e}"),
        })?;

        quota::summarize(&payload).ok_or_else(|| Error::Quota {
            status: status.as_u16(),
            body: "quota response has no current usage".into(),
        })
    }
}
