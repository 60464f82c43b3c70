//! HMAC-SHA256 webhook signatures over `timestamp || body`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-notion-signature";
pub const TIMESTAMP_HEADER: &str = "x-notion-timestamp";

fn mac(secret: &str, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Some(mac)
}

/// Hex-encoded signature for `timestamp || body`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    mac(secret, timestamp, body)
        .map(|m| hex::encode(m.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Check a hex signature (optionally prefixed with `sha256=`) in constant
/// time. Malformed hex never matches.
#[must_use]
pub fn verify(secret: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    let Some(mac) = mac(secret, timestamp, body) else {
        return false;
    };
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(&provided).into()
}
