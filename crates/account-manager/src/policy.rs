//! Refresh policy
//!
//! Pure decision over timestamps and token presence. Nothing here touches
//! the network or the document.

use jetbrains_auth::AccountRecord;

/// Default margin before expiry at which a token counts as due.
pub const DEFAULT_SKEW_SECS: i64 = 300;

/// Which tokens of one account are due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub refresh_access: bool,
    pub refresh_id: bool,
}

impl RefreshPlan {
    pub fn is_empty(&self) -> bool {
        !self.refresh_access && !self.refresh_id
    }
}

/// True when a token expiring at `expires_at` should be refreshed at `now`.
///
/// An unknown expiry is always due.
pub fn is_due(expires_at: Option<i64>, now: i64, skew: i64) -> bool {
    expires_at.is_none_or(|at| now >= at.saturating_sub(skew))
}

/// Decide what to refresh for `record`.
///
/// With `force`, a token is also due whenever the token it is exchanged from
/// is present: the id token for the access token, the refresh token for the
/// id token. Forcing never makes a due token not due.
pub fn needs_refresh(record: &AccountRecord, now: i64, force: bool, skew: i64) -> RefreshPlan {
    RefreshPlan {
        refresh_access: is_due(record.access_expires_at(), now, skew)
            || (force && record.id_token().is_some()),
        refresh_id: is_due(record.id_expires_at(), now, skew)
            || (force && record.refresh_token().is_some()),
    }
}
