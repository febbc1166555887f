//! Device fingerprinting for the anonymous demo endpoint.
//!
//! The fingerprint hashes only the browser's header signature, never the IP,
//! so a device keeps the same fingerprint across network changes. Per-IP
//! tracking uses the composite key instead. Blocking by fingerprint is what
//! lets the abuse guard bar a device globally while it rotates addresses.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Headers folded into the device fingerprint, in hash order.
/// Missing headers contribute an empty segment so the digest stays stable.
pub const FINGERPRINT_HEADERS: [&str; 6] = [
    "user-agent",
    "accept-language",
    "accept-encoding",
    "sec-ch-ua",
    "sec-ch-ua-platform",
    "sec-ch-ua-mobile",
];

/// Stable device identifier: SHA-256 over the header set
pub fn device_fingerprint(headers: &HeaderMap) -> String {
    let mut hasher = Sha256::new();
    for name in FINGERPRINT_HEADERS {
        if let Some(value) = headers.get(name) {
            hasher.update(value.as_bytes());
        }
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

/// Tracking key scoped to one fingerprint as seen from one IP
pub fn composite_key(fingerprint: &str, ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(b":");
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}
