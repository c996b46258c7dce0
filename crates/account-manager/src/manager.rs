//! Account orchestration
//!
//! `AccountManager` ties the store, the token client and the policy together.
//! Every operation starts from a fresh read of the document, and every
//! persisted change goes through `AccountStore::update_account`, so a refresh
//! and a quota check running side by side each re-read before writing and
//! never drop the other's fields.
//!
//! Per-account vendor failures are results, not errors: a batch always
//! attempts every account and reports what happened to each.

use std::path::{Path, PathBuf};

use jetbrains_auth::{
    AccessGrant, AccountRecord, AccountStore, IdGrant, QuotaInfo, QuotaStatus, TokenClient,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::export::{self, ExportEntry};
use crate::metrics;
use crate::policy::{self, DEFAULT_SKEW_SECS};

/// Fallback id token lifetime when neither the token nor the response says.
pub const DEFAULT_ID_TOKEN_LIFETIME_SECS: i64 = 259_200;

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Seconds before expiry at which a token counts as due
    pub skew_secs: i64,
    /// Assumed id token lifetime when the expiry cannot be determined
    pub id_token_lifetime_secs: i64,
    /// Where `export_to_file` and auto-export write
    pub export_path: Option<PathBuf>,
    /// Regenerate the export after every operation that persisted a change
    pub auto_export: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            skew_secs: DEFAULT_SKEW_SECS,
            id_token_lifetime_secs: DEFAULT_ID_TOKEN_LIFETIME_SECS,
            export_path: None,
            auto_export: false,
        }
    }
}

/// What happened to one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Refreshed { access_token: bool, id_token: bool },
    QuotaUpdated { status: QuotaStatus },
    Skipped { reason: String },
    Failed { reason: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Refreshed { .. } => "refreshed",
            Outcome::QuotaUpdated { .. } => "updated",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Outcome plus the account's record after the operation.
#[derive(Debug, Clone, Serialize)]
pub struct AccountResult {
    pub account: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Whether anything was written for this account
    pub persisted: bool,
    #[serde(skip)]
    pub record: AccountRecord,
}

/// Per-account results of a batch, in document order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<AccountResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Refreshed { .. } | Outcome::QuotaUpdated { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    pub fn persisted(&self) -> usize {
        self.results.iter().filter(|r| r.persisted).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AccountResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }

    /// One-line summary for logs and job history.
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} skipped",
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Token-free view of one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub name: String,
    pub license_id: Option<String>,
    pub has_id_token: bool,
    pub has_refresh_token: bool,
    pub has_access_token: bool,
    pub access_token_expires_at: Option<i64>,
    pub id_token_expires_at: Option<i64>,
    pub access_due: bool,
    pub id_due: bool,
    pub quota: Option<QuotaInfo>,
}

/// Vendor results for one account, applied in a single write.
#[derive(Default)]
struct Changes {
    id: Option<IdGrant>,
    access: Option<AccessGrant>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.access.is_none()
    }

    fn apply(&self, record: &mut AccountRecord, now: i64, id_token_lifetime: i64) {
        if let Some(grant) = &self.id {
            record.id_token = Some(grant.id_token.clone());
            if let Some(refresh_token) = &grant.refresh_token {
                record.refresh_token = Some(refresh_token.clone());
            }
            record.id_token_expires_at = Some(
                grant
                    .id_token_expires_at
                    .unwrap_or(now + id_token_lifetime)
                    .into(),
            );
        }
        if let Some(grant) = &self.access {
            record.access_token = Some(grant.access_token.clone());
            record.access_token_expires_at = grant.expires_at.map(Into::into);
        }
    }
}

/// Orchestrates refresh, quota and export over one accounts document.
pub struct AccountManager {
    store: AccountStore,
    client: TokenClient,
    settings: ManagerSettings,
}

impl AccountManager {
    pub fn new(store: AccountStore, client: TokenClient, settings: ManagerSettings) -> Self {
        Self {
            store,
            client,
            settings,
        }
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Refresh one account's due tokens.
    pub async fn refresh_one(&self, name: &str, force: bool) -> Result<AccountResult> {
        let document = self.store.load().await?;
        let record = document
            .accounts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let result = self.refresh_record(name, record, force).await?;
        if result.persisted {
            self.auto_export().await;
        }
        Ok(result)
    }

    /// Refresh every account, in document order.
    ///
    /// Only a document-level failure aborts the batch.
    pub async fn refresh_all(&self, force: bool) -> Result<BatchReport> {
        let document = self.store.load().await?;
        let mut report = BatchReport::default();
        for (name, record) in document.accounts {
            report
                .results
                .push(self.refresh_record(&name, record, force).await?);
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            force,
            "token refresh finished"
        );
        if report.persisted() > 0 {
            self.auto_export().await;
        }
        Ok(report)
    }

    /// Check quota for one account.
    pub async fn check_quota_one(&self, name: &str) -> Result<AccountResult> {
        let document = self.store.load().await?;
        let record = document
            .accounts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        self.check_quota_record(name, record).await
    }

    /// Check quota for every account with an access token.
    pub async fn check_quota_all(&self) -> Result<BatchReport> {
        let document = self.store.load().await?;
        let mut report = BatchReport::default();
        for (name, record) in document.accounts {
            report
                .results
                .push(self.check_quota_record(&name, record).await?);
        }
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "quota check finished"
        );
        Ok(report)
    }

    /// Token-free summaries of every account, in document order.
    pub async fn list(&self) -> Result<Vec<AccountSummary>> {
        let document = self.store.load().await?;
        let now = common::now_secs();
        let skew = self.settings.skew_secs;
        Ok(document
            .accounts
            .into_iter()
            .map(|(name, record)| AccountSummary {
                license_id: record.license_id().map(str::to_string),
                has_id_token: record.id_token().is_some(),
                has_refresh_token: record.refresh_token().is_some(),
                has_access_token: record.access_token().is_some(),
                access_token_expires_at: record.access_expires_at(),
                id_token_expires_at: record.id_expires_at(),
                access_due: policy::is_due(record.access_expires_at(), now, skew),
                id_due: policy::is_due(record.id_expires_at(), now, skew),
                quota: record.quota(),
                name,
            })
            .collect())
    }

    /// Copy the document to its backup path. `false` when there is no document yet.
    pub async fn backup(&self) -> Result<bool> {
        Ok(self.store.backup().await?)
    }

    /// Export entries for the current document.
    pub async fn export_entries(&self) -> Result<Vec<ExportEntry>> {
        let document = self.store.load().await?;
        Ok(export::export(&document))
    }

    /// Write the export file. Returns the number of exported accounts.
    pub async fn export_to_file(&self, path: &Path) -> Result<usize> {
        let entries = self.export_entries().await?;
        export::write_export(path, &entries).await?;
        info!(path = %path.display(), accounts = entries.len(), "exported accounts");
        Ok(entries.len())
    }

    /// Regenerate the configured export after a change. Never fails the caller.
    async fn auto_export(&self) {
        if !self.settings.auto_export {
            return;
        }
        let Some(path) = &self.settings.export_path else {
            return;
        };
        if let Err(e) = self.export_to_file(path).await {
            warn!(path = %path.display(), error = %e, "auto-export failed");
        }
    }

    async fn refresh_record(
        &self,
        name: &str,
        record: AccountRecord,
        force: bool,
    ) -> Result<AccountResult> {
        let now = common::now_secs();
        let plan = policy::needs_refresh(&record, now, force, self.settings.skew_secs);
        let refresh_token = record.refresh_token().filter(|_| plan.refresh_id);

        if refresh_token.is_none() && !plan.refresh_access {
            let reason = if plan.refresh_id {
                "id token due but no refresh token"
            } else {
                "tokens are not due"
            };
            debug!(account = name, reason, "refresh skipped");
            metrics::record_refresh("skipped");
            return Ok(AccountResult {
                account: name.to_string(),
                outcome: Outcome::Skipped {
                    reason: String::from(reason),
                },
                persisted: false,
                record,
            });
        }

        let mut changes = Changes::default();
        let mut reasons = Vec::new();

        if let Some(refresh_token) = refresh_token {
            match self.client.refresh_id_token(refresh_token).await {
                Ok(grant) => changes.id = Some(grant),
                Err(e) => {
                    warn!(
                        account = name,
                        error = %e,
                        kind = e.kind(),
                        transient = e.is_transient(),
                        "id token refresh failed"
                    );
                    reasons.push(format!("id token refresh: {e}"));
                }
            }
        }

        // A new id token always gets a matching access token
        if plan.refresh_access || changes.id.is_some() {
            let id_token = changes
                .id
                .as_ref()
                .map(|grant| grant.id_token.as_str())
                .or(record.id_token());
            match (id_token, record.license_id()) {
                (Some(id_token), Some(license_id)) => {
                    match self.client.refresh_access_token(id_token, license_id).await {
                        Ok(grant) => changes.access = Some(grant),
                        Err(e) => {
                            warn!(
                                account = name,
                                error = %e,
                                kind = e.kind(),
                                transient = e.is_transient(),
                                "access token exchange failed"
                            );
                            reasons.push(format!("access token exchange: {e}"));
                        }
                    }
                }
                (None, _) => {
                    warn!(account = name, "access token due but account has no id token");
                    reasons.push(String::from("no id token for access token exchange"));
                }
                (_, None) => {
                    warn!(account = name, "access token due but account has no license id");
                    reasons.push(String::from("no license id for access token exchange"));
                }
            }
        }

        let mut persisted = false;
        let mut record = record;
        if !changes.is_empty() {
            let lifetime = self.settings.id_token_lifetime_secs;
            match self
                .store
                .update_account(name, |r| changes.apply(r, now, lifetime))
                .await
            {
                Ok(updated) => {
                    record = updated;
                    persisted = true;
                }
                Err(jetbrains_auth::Error::NotFound(_)) => {
                    warn!(account = name, "account removed from document before write");
                    reasons.push(String::from("account removed from document before write"));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let outcome = if reasons.is_empty() {
            info!(
                account = name,
                id_token = changes.id.is_some(),
                access_token = changes.access.is_some(),
                "tokens refreshed"
            );
            Outcome::Refreshed {
                access_token: changes.access.is_some(),
                id_token: changes.id.is_some(),
            }
        } else {
            Outcome::Failed {
                reason: reasons.join("; "),
            }
        };
        metrics::record_refresh(outcome.label());

        Ok(AccountResult {
            account: name.to_string(),
            outcome,
            persisted,
            record,
        })
    }

    async fn check_quota_record(&self, name: &str, record: AccountRecord) -> Result<AccountResult> {
        let Some(access_token) = record.access_token() else {
            debug!(account = name, "no access token, quota not checked");
            metrics::record_quota_check("skipped");
            return Ok(AccountResult {
                account: name.to_string(),
                outcome: Outcome::Skipped {
                    reason: String::from("no access token"),
                },
                persisted: false,
                record,
            });
        };

        let info = match self.client.check_quota(access_token).await {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    account = name,
                    error = %e,
                    kind = e.kind(),
                    transient = e.is_transient(),
                    "quota check failed"
                );
                metrics::record_quota_check("failed");
                return Ok(AccountResult {
                    account: name.to_string(),
                    outcome: Outcome::Failed {
                        reason: e.to_string(),
                    },
                    persisted: false,
                    record,
                });
            }
        };

        let status = info.status.clone();
        let result = match self
            .store
            .update_account(name, |r| r.set_quota(&info))
            .await
        {
            Ok(updated) => {
                info!(account = name, status = %status, "quota updated");
                AccountResult {
                    account: name.to_string(),
                    outcome: Outcome::QuotaUpdated { status },
                    persisted: true,
                    record: updated,
                }
            }
            Err(jetbrains_auth::Error::NotFound(_)) => AccountResult {
                account: name.to_string(),
                outcome: Outcome::Failed {
                    reason: String::from("account removed from document before write"),
                },
                persisted: false,
                record,
            },
            Err(e) => return Err(e.into()),
        };
        metrics::record_quota_check(result.outcome.label());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use jetbrains_auth::Endpoints;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    /// Mock vendor.
    ///
    /// - OAuth: `rt_good` → `id_new` + rotated `rt_rotated`; anything else → 400
    /// - License: `LIC-BAD` → 403; otherwise token `at:<license>:<bearer>`
    /// - Quota: `at_slow` sleeps past the client timeout; otherwise 50 of 100 used
    struct Vendor {
        endpoints: Endpoints,
        calls: Arc<AtomicUsize>,
    }

    async fn start_vendor() -> Vendor {
        let calls = Arc::new(AtomicUsize::new(0));
        let (oauth_calls, license_calls, quota_calls) = (calls.clone(), calls.clone(), calls.clone());

        let app = axum::Router::new()
            .route(
                "/oauth2/token",
                post(move |body: String| {
                    oauth_calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if body.contains("refresh_token=rt_good") {
                            (
                                StatusCode::OK,
                                Json(json!({"id_token": "id_new", "refresh_token": "rt_rotated"})),
                            )
                        } else {
                            (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"})))
                        }
                    }
                }),
            )
            .route(
                "/license/v2",
                post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    license_calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let bearer = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.strip_prefix("Bearer "))
                            .unwrap_or_default()
                            .to_string();
                        let license = body["licenseId"].as_str().unwrap_or_default().to_string();
                        if license == "LIC-BAD" {
                            return (StatusCode::FORBIDDEN, Json(json!({"error": "no license"})));
                        }
                        (
                            StatusCode::OK,
                            Json(json!({"state": "PAID", "token": format!("at:{license}:{bearer}")})),
                        )
                    }
                }),
            )
            .route(
                "/quota/get",
                post(move |headers: HeaderMap| {
                    quota_calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let token = headers
                            .get("grazie-authenticate-jwt")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        if token == "at_slow" {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        Json(json!({
                            "current": {
                                "current": {"amount": "50"},
                                "maximum": {"amount": "100"}
                            }
                        }))
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Vendor {
            endpoints: Endpoints {
                oauth_url: format!("http://{addr}/oauth2/token"),
                jwt_auth_url: format!("http://{addr}/license/v2"),
                quota_url: format!("http://{addr}/quota/get"),
                ..Endpoints::default()
            },
            calls,
        }
    }

    async fn manager_for(
        dir: &tempfile::TempDir,
        document: &Value,
        vendor: &Vendor,
        settings: ManagerSettings,
    ) -> (AccountManager, PathBuf) {
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, serde_json::to_string_pretty(document).unwrap())
            .await
            .unwrap();
        let client = TokenClient::new(vendor.endpoints.clone(), Duration::from_secs(1)).unwrap();
        (
            AccountManager::new(AccountStore::new(&path), client, settings),
            path,
        )
    }

    async fn read_json(path: &Path) -> Value {
        serde_json::from_str(&tokio::fs::read_to_string(path).await.unwrap()).unwrap()
    }

    fn far_future() -> i64 {
        common::now_secs() + 99_999
    }

    /// Access expired, id token valid.
    fn access_due(license: &str) -> Value {
        json!({
            "id_token": "id_old",
            "refresh_token": "rt_good",
            "access_token": "at_old",
            "access_token_expires_at": 1_000,
            "id_token_expires_at": far_future(),
            "license_id": license
        })
    }

    #[tokio::test]
    async fn refresh_all_persists_successes_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {
            "a": access_due("LIC-A"),
            "b": access_due("LIC-BAD"),
            "c": access_due("LIC-C")
        }});
        let (manager, path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let report = manager.refresh_all(false).await.unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 0);
        assert_eq!(report.failures().next().unwrap().account, "b");

        let written = read_json(&path).await;
        assert_eq!(written["accounts"]["a"]["access_token"], "at:LIC-A:id_old");
        assert_eq!(written["accounts"]["c"]["access_token"], "at:LIC-C:id_old");
        assert_eq!(written["accounts"]["b"]["access_token"], "at_old");
        // Opaque access token has no readable expiry
        assert!(written["accounts"]["a"].get("access_token_expires_at").is_none());
    }

    #[tokio::test]
    async fn unusable_account_fails_and_fresh_account_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {
            "A": {"access_token": "at_a", "access_token_expires_at": 1_000, "license_id": "LIC-A"},
            "B": {"access_token": "at_b", "access_token_expires_at": far_future()}
        }});
        let (manager, path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;
        let before = tokio::fs::read(&path).await.unwrap();

        let report = manager.refresh_all(false).await.unwrap();

        assert_eq!(report.results[0].account, "A");
        assert!(report.results[0].outcome.is_failure());
        assert_eq!(
            report.results[1].outcome,
            Outcome::Skipped {
                reason: "id token due but no refresh token".into()
            }
        );
        assert_eq!(vendor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), before);
        assert!(!manager.store().backup_path().exists());
    }

    #[tokio::test]
    async fn fresh_account_is_skipped_as_not_due() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {"a": {
            "id_token": "id_a",
            "refresh_token": "rt_good",
            "access_token_expires_at": far_future(),
            "id_token_expires_at": far_future(),
            "license_id": "LIC-A"
        }}});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let result = manager.refresh_one("a", false).await.unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Skipped {
                reason: "tokens are not due".into()
            }
        );
        assert_eq!(vendor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_id_token_is_refreshed_before_access_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {"work": {
            "id_token": "id_old",
            "refresh_token": "rt_good",
            "access_token": "at_old",
            "access_token_expires_at": far_future(),
            "id_token_expires_at": 1_000,
            "license_id": "LIC-W"
        }}});
        let (manager, path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let before = common::now_secs();
        let result = manager.refresh_one("work", false).await.unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Refreshed {
                access_token: true,
                id_token: true
            }
        );

        let written = read_json(&path).await;
        let work = &written["accounts"]["work"];
        assert_eq!(work["id_token"], "id_new");
        assert_eq!(work["refresh_token"], "rt_rotated");
        assert_eq!(work["access_token"], "at:LIC-W:id_new");
        let id_exp = work["id_token_expires_at"].as_i64().unwrap();
        assert!(id_exp >= before + DEFAULT_ID_TOKEN_LIFETIME_SECS);
        assert!(id_exp <= common::now_secs() + DEFAULT_ID_TOKEN_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn rotated_tokens_survive_failed_access_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {"work": {
            "id_token": "id_old",
            "refresh_token": "rt_good",
            "access_token": "at_old",
            "license_id": "LIC-BAD"
        }}});
        let (manager, path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let result = manager.refresh_one("work", false).await.unwrap();
        assert!(result.outcome.is_failure());
        assert!(result.persisted);

        let written = read_json(&path).await;
        assert_eq!(written["accounts"]["work"]["id_token"], "id_new");
        assert_eq!(written["accounts"]["work"]["refresh_token"], "rt_rotated");
        assert_eq!(written["accounts"]["work"]["access_token"], "at_old");
    }

    #[tokio::test]
    async fn rejected_refresh_token_still_tries_access_with_current_id_token() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {"work": {
            "id_token": "id_old",
            "refresh_token": "rt_revoked",
            "license_id": "LIC-W"
        }}});
        let (manager, path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let result = manager.refresh_one("work", false).await.unwrap();
        match &result.outcome {
            Outcome::Failed { reason } => assert!(reason.contains("id token refresh"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
        let written = read_json(&path).await;
        assert_eq!(written["accounts"]["work"]["access_token"], "at:LIC-W:id_old");
        assert_eq!(written["accounts"]["work"]["refresh_token"], "rt_revoked");
    }

    #[tokio::test]
    async fn force_refreshes_fresh_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let mut account = access_due("LIC-F");
        account["access_token_expires_at"] = json!(far_future());
        let doc = json!({"accounts": {"f": account}});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let unforced = manager.refresh_one("f", false).await.unwrap();
        assert!(matches!(unforced.outcome, Outcome::Skipped { .. }));

        let forced = manager.refresh_one("f", true).await.unwrap();
        assert_eq!(
            forced.outcome,
            Outcome::Refreshed {
                access_token: true,
                id_token: true
            }
        );
        assert_eq!(forced.record.access_token(), Some("at:LIC-F:id_new"));
    }

    #[tokio::test]
    async fn refresh_one_unknown_account_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {}});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let err = manager.refresh_one("ghost", false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref n) if n == "ghost"), "got: {err:?}");
    }

    #[tokio::test]
    async fn missing_document_aborts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let client = TokenClient::new(vendor.endpoints.clone(), Duration::from_secs(1)).unwrap();
        let manager = AccountManager::new(
            AccountStore::new(dir.path().join("missing.json")),
            client,
            ManagerSettings::default(),
        );

        let err = manager.refresh_all(false).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn refresh_keeps_unknown_fields_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let mut account = access_due("LIC-A");
        account["labels"] = json!(["primary"]);
        let doc = json!({"accounts": {"a": account}, "generated_by": "setup-tool"});
        let (manager, path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        manager.refresh_all(false).await.unwrap();

        let written = read_json(&path).await;
        assert_eq!(written["generated_by"], "setup-tool");
        assert_eq!(written["accounts"]["a"]["labels"], json!(["primary"]));
        assert_eq!(read_json(manager.store().backup_path()).await, doc);
    }

    #[tokio::test]
    async fn quota_timeout_keeps_prior_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let prior = json!({"remaining_amount": "10", "usage_percentage": 90.0, "status": "warning"});
        let doc = json!({"accounts": {
            "a": {"access_token": "at_a"},
            "c": {"access_token": "at_slow", "quota_info": prior},
            "d": {"license_id": "LIC-D"}
        }});
        let (manager, path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let report = manager.check_quota_all().await.unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        match &report.results[1].outcome {
            Outcome::Failed { reason } => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }

        let written = read_json(&path).await;
        assert_eq!(written["accounts"]["c"]["quota_info"], prior);
        assert_eq!(written["accounts"]["a"]["quota_info"]["status"], "normal");
        assert_eq!(written["accounts"]["a"]["quota_info"]["remaining_amount"], "50");
        assert!(written["accounts"]["d"].get("quota_info").is_none());
    }

    #[tokio::test]
    async fn check_quota_one_updates_status() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {"a": {"access_token": "at_a"}}});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let result = manager.check_quota_one("a").await.unwrap();
        assert_eq!(
            result.outcome,
            Outcome::QuotaUpdated {
                status: QuotaStatus::Normal
            }
        );
        assert_eq!(result.record.quota().unwrap().remaining_amount, "50");
    }

    #[tokio::test]
    async fn auto_export_follows_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let export_path = dir.path().join("jetbrainsai.json");
        let settings = ManagerSettings {
            export_path: Some(export_path.clone()),
            auto_export: true,
            ..ManagerSettings::default()
        };
        let doc = json!({"accounts": {"a": access_due("LIC-A")}});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, settings).await;

        manager.refresh_all(false).await.unwrap();

        let exported = read_json(&export_path).await;
        assert_eq!(
            exported,
            json!([{"jwt": "at:LIC-A:id_old", "licenseId": "LIC-A", "authorization": "id_old"}])
        );
    }

    #[tokio::test]
    async fn no_auto_export_when_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let export_path = dir.path().join("jetbrainsai.json");
        let settings = ManagerSettings {
            export_path: Some(export_path.clone()),
            auto_export: true,
            ..ManagerSettings::default()
        };
        let doc = json!({"accounts": {"b": {"access_token_expires_at": far_future()}}});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, settings).await;

        manager.refresh_all(false).await.unwrap();
        assert!(!export_path.exists());
    }

    #[tokio::test]
    async fn list_reports_due_flags_without_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let mut fresh = access_due("LIC-F");
        fresh["access_token_expires_at"] = json!(far_future());
        let doc = json!({"accounts": {"due": access_due("LIC-D"), "fresh": fresh}});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let summaries = manager.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "due");
        assert!(summaries[0].access_due);
        assert!(!summaries[1].access_due);
        assert!(!summaries[1].id_due);

        let json = serde_json::to_string(&summaries).unwrap();
        assert!(!json.contains("at_old"), "summaries must not expose tokens");
        assert!(!json.contains("rt_good"), "summaries must not expose tokens");
    }

    #[tokio::test]
    async fn export_to_file_counts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = start_vendor().await;
        let doc = json!({"accounts": {
            "a": {"access_token": "at_a", "license_id": "LIC-A", "id_token": "id_a"},
            "b": {"access_token": "at_b"},
            "c": {"access_token": "at_c", "license_id": "LIC-C"}
        }});
        let (manager, _path) = manager_for(&dir, &doc, &vendor, ManagerSettings::default()).await;

        let out = dir.path().join("out.json");
        assert_eq!(manager.export_to_file(&out).await.unwrap(), 1);
        assert!(manager.backup().await.unwrap());
    }
}
