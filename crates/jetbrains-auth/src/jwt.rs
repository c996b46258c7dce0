//! JWT expiry extraction
//!
//! Tokens are otherwise opaque. The only claim ever read is `exp`, used to
//! stamp `*_expires_at` after an exchange. Signatures are not verified.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<serde_json::Number>,
}

/// Read the `exp` claim (epoch seconds) from a compact JWT.
///
/// Returns `None` for anything that is not a three-part token with a
/// base64url JSON payload carrying a numeric `exp`.
pub fn expiration(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        debug!("token is not a three-part JWT");
        return None;
    };

    // Some issuers pad the payload; the no-pad engine rejects '='.
    let bytes = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "JWT payload is not base64url");
            return None;
        }
    };

    let claim: ExpiryClaim = match serde_json::from_slice(&bytes) {
        Ok(claim) => claim,
        Err(e) => {
            debug!(error = %e, "JWT payload is not JSON");
            return None;
        }
    };

    claim
        .exp
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
}

#[cfg(test)]
pub(crate) fn encode_for_test(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}
