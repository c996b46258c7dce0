//! Accounts document model
//!
//! The on-disk document is `{"accounts": {name: record}, ...}`. Fields this
//! crate does not understand, at either level, are captured in `extra` and
//! written back untouched. Account order follows the file.
//!
//! A write to one account must leave every other account exactly as it was
//! read, so fields that are only ever displayed keep their raw JSON:
//! timestamps keep the original number and the quota snapshot is stored as
//! the object the last writer produced.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// Top-level accounts document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountsDocument {
    pub accounts: IndexMap<String, AccountRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One named account's tokens, expiries and last quota snapshot.
///
/// A missing expiry means the token's lifetime is unknown and it is treated
/// as due for refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_expires_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
    /// Raw snapshot; read it through `quota()`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_info: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountRecord {
    pub fn id_token(&self) -> Option<&str> {
        non_empty(&self.id_token)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(&self.refresh_token)
    }

    pub fn access_token(&self) -> Option<&str> {
        non_empty(&self.access_token)
    }

    pub fn license_id(&self) -> Option<&str> {
        non_empty(&self.license_id)
    }

    pub fn access_expires_at(&self) -> Option<i64> {
        self.access_token_expires_at.as_ref().map(Timestamp::secs)
    }

    pub fn id_expires_at(&self) -> Option<i64> {
        self.id_token_expires_at.as_ref().map(Timestamp::secs)
    }

    /// Parsed quota snapshot. `None` when there is none or it is not an object.
    pub fn quota(&self) -> Option<QuotaInfo> {
        self.quota_info
            .as_ref()
            .filter(|v| v.is_object())
            .and_then(|v| QuotaInfo::deserialize(v).ok())
    }

    /// Replace the stored quota snapshot wholesale.
    pub fn set_quota(&mut self, info: &QuotaInfo) {
        self.quota_info = Some(info.to_value());
    }
}

/// Empty strings in the document mean "not set".
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Unix epoch seconds as written in the document.
///
/// Older tools wrote `time.time()` floats. The number is kept as read so an
/// untouched account is written back exactly; `secs()` truncates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(Number);

impl Timestamp {
    pub fn secs(&self) -> i64 {
        self.0
            .as_i64()
            .or_else(|| self.0.as_f64().map(|f| f as i64))
            .unwrap_or(i64::MAX)
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Self(Number::from(secs))
    }
}

/// Last known quota snapshot. Replaced wholesale on every successful check.
///
/// Reading is lenient: amounts may be numbers or strings, an unrecognised
/// status is kept verbatim, and unknown keys land in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
    #[serde(default = "not_available", deserialize_with = "lenient::text")]
    pub remaining_amount: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub usage_percentage: f64,
    #[serde(default, deserialize_with = "lenient::status")]
    pub status: QuotaStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QuotaInfo {
    pub fn new(remaining_amount: String, usage_percentage: f64, status: QuotaStatus) -> Self {
        Self {
            remaining_amount,
            usage_percentage,
            status,
            extra: Map::new(),
        }
    }

    fn to_value(&self) -> Value {
        let mut object = self.extra.clone();
        object.insert(
            "remaining_amount".into(),
            Value::String(self.remaining_amount.clone()),
        );
        object.insert(
            "usage_percentage".into(),
            Number::from_f64(self.usage_percentage).map_or(Value::Null, Value::Number),
        );
        object.insert("status".into(), Value::String(self.status.to_string()));
        Value::Object(object)
    }
}

fn not_available() -> String {
    String::from("N/A")
}

/// Usage band derived from the usage percentage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuotaStatus {
    Normal,
    Warning,
    Critical,
    #[default]
    Unknown,
    /// Written by another tool; kept as is
    Other(String),
}

impl QuotaStatus {
    pub fn as_str(&self) -> &str {
        match self {
            QuotaStatus::Normal => "normal",
            QuotaStatus::Warning => "warning",
            QuotaStatus::Critical => "critical",
            QuotaStatus::Unknown => "unknown",
            QuotaStatus::Other(value) => value,
        }
    }
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for QuotaStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "normal" => QuotaStatus::Normal,
            "warning" => QuotaStatus::Warning,
            "critical" => QuotaStatus::Critical,
            "unknown" => QuotaStatus::Unknown,
            _ => QuotaStatus::Other(value),
        }
    }
}

impl From<QuotaStatus> for String {
    fn from(value: QuotaStatus) -> Self {
        match value {
            QuotaStatus::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

/// Quota fields written by other tools come in more than one shape.
mod lenient {
    use super::*;

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Null => super::not_available(),
            other => other.to_string(),
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_f64().unwrap_or_default(),
            Value::String(s) => s.trim().trim_end_matches('%').parse().unwrap_or_default(),
            _ => 0.0,
        })
    }

    pub fn status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<QuotaStatus, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => QuotaStatus::from(s),
            _ => QuotaStatus::Unknown,
        })
    }
}
