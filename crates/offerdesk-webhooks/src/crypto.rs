//! HMAC-SHA256 signature verification for inbound webhooks.
//!
//! The signature covers `{message id}.{timestamp}.{body}` with the shared
//! signing secret, so neither the payload nor its delivery identity can be
//! replayed under a different envelope.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 signature for a delivery.
pub fn compute_signature(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(message_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Verify a presented signature using constant-time comparison.
#[must_use]
pub fn verify_signature(
    presented_hex: &str,
    secret: &str,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> bool {
    let computed = compute_signature(secret, message_id, timestamp, body);
    constant_time_eq(presented_hex.as_bytes(), computed.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
