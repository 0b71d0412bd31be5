// Webhook Signing - HMAC-SHA256 over the exact request body

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Lowercase hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Value for the `X-Webhook-Signature` header.
pub fn signature_header(secret: &str, payload: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, sign_payload(secret, payload))
}

/// Receiver-side check of a `sha256=<hex>` header value in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
