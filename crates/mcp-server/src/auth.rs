use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub(crate) const SIGNATURE_HEADER: &str = "x-gastown-signature";
pub(crate) const TIMESTAMP_HEADER: &str = "x-gastown-timestamp";

/// Checks `X-Gastown-Signature: hex(hmac_sha256(token, "<timestamp>.<body>"))`.
#[derive(Clone)]
pub(crate) struct SignatureVerifier {
    token: String,
    freshness: Duration,
}

impl SignatureVerifier {
    pub(crate) fn new(token: String, freshness: Duration) -> Self {
        Self { token, freshness }
    }

    pub(crate) fn validate(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .unwrap_or_default()
        };
        self.verify(body, header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER), unix_now())
    }

    pub(crate) fn verify(&self, body: &[u8], signature: &str, timestamp: &str, now: u64) -> bool {
        let Ok(ts) = timestamp.parse::<u64>() else {
            tracing::warn!("Invalid signature timestamp: {timestamp:?}");
            return false;
        };

        if ts.abs_diff(now) > self.freshness.as_secs() {
            tracing::warn!("Signature timestamp too old: {ts} vs {now}");
            return false;
        }

        let Ok(expected) = hex::decode(signature) else {
            return false;
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(self.token.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Hex signature for `body` at `timestamp`, as a client would compute it.
pub fn sign(token: &str, timestamp: u64, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
