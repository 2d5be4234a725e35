//! Self-verifying purchase tokens: `shortId.expiryB32.signature`. No
//! server-side lookup is needed to authenticate a token; single-use is
//! enforced separately, by the participant object recording which token it
//! already consumed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseToken {
    pub short_id: String,
    pub expiry_unix_ms: i64,
    pub signature: String,
}

impl std::fmt::Display for PurchaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.short_id, self.expiry_b32(), self.signature)
    }
}

impl PurchaseToken {
    fn expiry_b32(&self) -> String {
        base32::encode(
            base32::Alphabet::Rfc4648 { padding: false },
            &self.expiry_unix_ms.to_be_bytes(),
        )
    }
}

/// Mints a new token for `(drop_id, user_id)` good until `expires_at`,
/// signed with the drop's HMAC secret key.
pub fn mint_purchase_token(
    secret_key: &[u8],
    drop_id: &str,
    user_id: &str,
    expires_at: OffsetDateTime,
) -> PurchaseToken {
    let mut short_id_bytes = [0u8; 10];
    rand::rng().fill_bytes(&mut short_id_bytes);
    let short_id = URL_SAFE_NO_PAD.encode(short_id_bytes);
    let expiry_unix_ms = expires_at.unix_timestamp() * 1000;

    let signature = sign(secret_key, drop_id, user_id, &short_id, expiry_unix_ms);

    PurchaseToken {
        short_id,
        expiry_unix_ms,
        signature,
    }
}

fn sign(secret_key: &[u8], drop_id: &str, user_id: &str, short_id: &str, expiry_unix_ms: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret_key).expect("hmac accepts any key length");
    mac.update(drop_id.as_bytes());
    mac.update(b"\x00");
    mac.update(user_id.as_bytes());
    mac.update(b"\x00");
    mac.update(short_id.as_bytes());
    mac.update(b"\x00");
    mac.update(expiry_unix_ms.to_string().as_bytes());
    let full = mac.finalize().into_bytes();
    // First 80 bits (10 bytes) of the MAC, base64url-encoded.
    URL_SAFE_NO_PAD.encode(&full[..10])
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid purchase token format")]
    MalformedFormat,
    #[error("purchase token signature mismatch")]
    SignatureMismatch,
    #[error("purchase token expired")]
    Expired,
}

/// Parses and verifies a purchase token string against `secret_key` for the
/// claimed `(drop_id, user_id)`. Does not check single-use; that's the
/// participant object's job.
pub fn verify_purchase_token(
    secret_key: &[u8],
    drop_id: &str,
    user_id: &str,
    token: &str,
    now: OffsetDateTime,
) -> Result<PurchaseToken, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(TokenError::MalformedFormat);
    }
    let (short_id, expiry_b32, signature) = (parts[0], parts[1], parts[2]);

    let expiry_bytes = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, expiry_b32)
        .ok_or(TokenError::MalformedFormat)?;
    if expiry_bytes.len() != 8 {
        return Err(TokenError::MalformedFormat);
    }
    let expiry_unix_ms = i64::from_be_bytes(expiry_bytes.try_into().unwrap());

    let expected_signature = sign(secret_key, drop_id, user_id, short_id, expiry_unix_ms);
    if expected_signature.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() != 1 {
        return Err(TokenError::SignatureMismatch);
    }

    if now.unix_timestamp() * 1000 >= expiry_unix_ms {
        return Err(TokenError::Expired);
    }

    Ok(PurchaseToken {
        short_id: short_id.to_string(),
        expiry_unix_ms,
        signature: signature.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn mint_then_verify_round_trips() {
        let secret = b"super-secret-key";
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(5);
        let token = mint_purchase_token(secret, "drop-1", "user-1", expires_at);
        let token_str = token.to_string();

        let verified =
            verify_purchase_token(secret, "drop-1", "user-1", &token_str, OffsetDateTime::now_utc())
                .expect("should verify");
        assert_eq!(verified.short_id, token.short_id);
    }

    #[test]
    fn rejects_wrong_user() {
        let secret = b"super-secret-key";
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(5);
        let token = mint_purchase_token(secret, "drop-1", "user-1", expires_at).to_string();
        let result = verify_purchase_token(secret, "drop-1", "user-2", &token, OffsetDateTime::now_utc());
        assert!(matches!(result, Err(TokenError::SignatureMismatch)));
    }

    #[test]
    fn rejects_expired_token() {
        let secret = b"super-secret-key";
        let expires_at = OffsetDateTime::now_utc() - Duration::minutes(1);
        let token = mint_purchase_token(secret, "drop-1", "user-1", expires_at).to_string();
        let result = verify_purchase_token(secret, "drop-1", "user-1", &token, OffsetDateTime::now_utc());
        assert!(matches!(result, Err(TokenError::Expired)));
    }

    #[test]
    fn one_bit_flip_in_signature_invalidates() {
        let secret = b"super-secret-key";
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(5);
        let mut token_str = mint_purchase_token(secret, "drop-1", "user-1", expires_at).to_string();
        let last = token_str.pop().unwrap();
        let flipped = if last == 'A' { 'B' } else { 'A' };
        token_str.push(flipped);

        let result = verify_purchase_token(secret, "drop-1", "user-1", &token_str, OffsetDateTime::now_utc());
        assert!(result.is_err());
    }

    #[test]
    fn malformed_format_is_rejected() {
        let result = verify_purchase_token(b"k", "d", "u", "not-a-token", OffsetDateTime::now_utc());
        assert!(matches!(result, Err(TokenError::MalformedFormat)));
    }
}
