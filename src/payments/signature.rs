//! Webhook signature verification.
//!
//! The gateway signs the literal bytes of the request body with HMAC-SHA256
//! and sends the hex digest in a header. Verification must run over those raw
//! bytes; hashing a re-serialized parse breaks on whitespace and field order.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Returns true only when `header` holds the hex HMAC-SHA256 of `raw_body`
/// under `secret`. Missing or malformed headers are a mismatch, not an error.
/// The comparison is constant-time.
pub fn verify_signature(raw_body: &[u8], header: Option<&str>, secret: &[u8]) -> bool {
    let Some(header) = header else {
        return false;
    };
    let Ok(claimed) = hex::decode(header.trim()) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(raw_body);
    mac.verify_slice(&claimed).is_ok()
}

/// Hex HMAC-SHA256 of `body` under `secret`. Used by tests and tooling to
/// produce signatures the verifier accepts.
pub fn sign(body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
