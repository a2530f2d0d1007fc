//! Dev-auth token issuance and verification:
//! `base64url(JSON{userId, workspaceId, exp}) + "." + base64url_hmac_sha256(payload, secret)`.
//! Eight-hour default expiry; verification is constant-time via `hmac`'s
//! `Mac::verify_slice`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::errors::RelayError;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOKEN_TTL_MS: i64 = 8 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevAuthClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
    pub exp: i64,
}

fn sign(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Issues a token for `(user_id, workspace_id)` expiring `ttl_ms` after `now_ms`.
pub fn issue_token(secret: &[u8], user_id: &str, workspace_id: &str, now_ms: i64, ttl_ms: i64) -> (String, i64) {
    let expires_at_ms = now_ms + ttl_ms;
    let claims = DevAuthClaims { user_id: user_id.to_string(), workspace_id: workspace_id.to_string(), exp: expires_at_ms };
    let payload = serde_json::to_vec(&claims).expect("claims always serialize");
    let signature = sign(&payload, secret);
    let token = format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), URL_SAFE_NO_PAD.encode(&signature));
    (token, expires_at_ms)
}

/// Verifies a token's signature and expiry, returning its claims.
pub fn verify_token(secret: &[u8], token: &str, now_ms: i64) -> Result<DevAuthClaims, RelayError> {
    let (payload_part, signature_part) =
        token.split_once('.').ok_or_else(|| RelayError::auth("malformed token"))?;

    let payload = URL_SAFE_NO_PAD.decode(payload_part).map_err(|_| RelayError::auth("malformed token payload"))?;
    let signature = URL_SAFE_NO_PAD.decode(signature_part).map_err(|_| RelayError::auth("malformed token signature"))?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&payload);
    mac.verify_slice(&signature).map_err(|_| RelayError::auth("invalid token signature"))?;

    let claims: DevAuthClaims =
        serde_json::from_slice(&payload).map_err(|_| RelayError::auth("malformed token claims"))?;
    if claims.exp <= now_ms {
        return Err(RelayError::auth("token expired"));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn issued_token_verifies_with_matching_claims() {
        let (token, expires_at_ms) = issue_token(SECRET, "user-1", "ws-1", 1_000_000, DEFAULT_TOKEN_TTL_MS);
        let claims = verify_token(SECRET, &token, 1_000_001).expect("verifies");
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.workspace_id, "ws-1");
        assert_eq!(claims.exp, expires_at_ms);
    }

    #[test]
    fn rejects_expired_token() {
        let (token, _) = issue_token(SECRET, "user-1", "ws-1", 1_000_000, 10);
        let err = verify_token(SECRET, &token, 1_000_011).unwrap_err();
        assert!(matches!(err, RelayError::Sync(e) if e.code == notewire_core::errors::SyncErrorCode::Auth));
    }

    #[test]
    fn rejects_tampered_signature() {
        let (token, _) = issue_token(SECRET, "user-1", "ws-1", 1_000_000, DEFAULT_TOKEN_TTL_MS);
        let (payload, _sig) = token.split_once('.').unwrap();
        let forged = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(b"not-the-real-signature!"));
        let err = verify_token(SECRET, &forged, 1_000_001).unwrap_err();
        assert!(matches!(err, RelayError::Sync(e) if e.code == notewire_core::errors::SyncErrorCode::Auth));
    }

    #[test]
    fn rejects_wrong_secret() {
        let (token, _) = issue_token(SECRET, "user-1", "ws-1", 1_000_000, DEFAULT_TOKEN_TTL_MS);
        let err = verify_token(b"different-secret", &token, 1_000_001).unwrap_err();
        assert!(matches!(err, RelayError::Sync(e) if e.code == notewire_core::errors::SyncErrorCode::Auth));
    }
}
