//! Export to the external `jetbrainsai.json` schema
//!
//! Consumers of the export only need the access token, the license id and
//! the id token used as the authorization header. Accounts that cannot
//! produce a usable entry are left out.

use std::path::Path;

use jetbrains_auth::AccountsDocument;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default export file name, placed next to the accounts document.
pub const DEFAULT_EXPORT_FILE: &str = "jetbrainsai.json";

/// One exported account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub jwt: String,
    #[serde(rename = "licenseId")]
    pub license_id: String,
    pub authorization: String,
}

/// Build export entries in document order.
///
/// An account needs an access token, a license id and an id token to be
/// exported; the format has no way to express a partial account.
pub fn export(document: &AccountsDocument) -> Vec<ExportEntry> {
    document
        .accounts
        .iter()
        .filter_map(|(name, record)| {
            let (Some(jwt), Some(license_id), Some(authorization)) =
                (record.access_token(), record.license_id(), record.id_token())
            else {
                debug!(account = %name, "account is missing a token or license id, not exported");
                return None;
            };
            Some(ExportEntry {
                jwt: jwt.to_string(),
                license_id: license_id.to_string(),
                authorization: authorization.to_string(),
            })
        })
        .collect()
}

/// Write entries to `path` as a pretty JSON array.
pub async fn write_export(path: &Path, entries: &[ExportEntry]) -> Result<()> {
    jetbrains_auth::write_json_atomic(path, entries)
        .await
        .map_err(|e| Error::Export(e.to_string()))
}
