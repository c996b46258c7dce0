//! Quota summarisation
//!
//! The quota endpoint reports used and maximum credit as decimal strings
//! under `current`. This module reduces that payload to the stored
//! `QuotaInfo`: remaining amount, usage percentage and a usage band.

use serde_json::Value;

use crate::account::{QuotaInfo, QuotaStatus};

/// Usage above this percentage is critical.
const CRITICAL_PERCENT: f64 = 90.0;

/// Usage above this percentage is a warning.
const WARNING_PERCENT: f64 = 80.0;

/// Band a usage percentage.
pub fn classify_usage(usage_percentage: f64) -> QuotaStatus {
    if usage_percentage > CRITICAL_PERCENT {
        QuotaStatus::Critical
    } else if usage_percentage > WARNING_PERCENT {
        QuotaStatus::Warning
    } else {
        QuotaStatus::Normal
    }
}

/// Summarise a vendor quota payload.
///
/// Returns `None` when the payload has no `current` object at all (the
/// caller treats that as a failed lookup). Amounts that cannot be parsed
/// produce an `Unknown` snapshot rather than an error.
pub fn summarize(payload: &Value) -> Option<QuotaInfo> {
    let current = payload.get("current").filter(|v| v.is_object())?;

    let used = amount(current.pointer("/current/amount"));
    let maximum = amount(current.pointer("/maximum/amount"));

    let info = match (used, maximum) {
        (Some(used), Some(maximum)) if maximum > 0.0 => {
            let usage_percentage = used / maximum * 100.0;
            QuotaInfo::new(
                (maximum - used).to_string(),
                usage_percentage,
                classify_usage(usage_percentage),
            )
        }
        _ => QuotaInfo::new(String::from("N/A"), 0.0, QuotaStatus::Unknown),
    };
    Some(info)
}

/// Parse an amount that may be a number or a decimal string such as `"1234."`.
fn amount(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('.').parse::<f64>().ok(),
        _ => None,
    }
}
