//! Request signing for the upstream chat API.
//!
//! The upstream authenticates every call with
//! `Authorization: Bearer {base64(key_a)}.{base64(hmac_sha256(key_b, canonical))}`
//! where the canonical string is `"{METHOD}:{path}:{timestamp}\n{body}"`.
//! The same timestamp must be sent in the `Date` header.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Timestamp format used in the signed string and the `Date` header.
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp the way the upstream expects (UTC, second precision).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// Current timestamp in upstream format.
pub fn timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Computes bearer tokens from immutable key material.
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
}

impl Signer {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Compute the `Authorization` header value for one request.
    pub fn sign(&self, body: &[u8], path: &str, timestamp: &str, method: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.credentials.key_b)
            .expect("HMAC accepts keys of any length");
        mac.update(format!("{}:{path}:{timestamp}\n", method.to_uppercase()).as_bytes());
        mac.update(body);
        let signature = BASE64.encode(mac.finalize().into_bytes());

        format!(
            "Bearer {}.{}",
            BASE64.encode(&self.credentials.key_a),
            signature
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signer() -> Signer {
        Signer::new(Credentials {
            key_a: b"public-key".to_vec(),
            key_b: b"secret-key".to_vec(),
        })
    }

    const TS: &str = "2025-02-22T06:29:51Z";

    #[test]
    fn test_sign_is_deterministic() {
        let s = signer();
        let a = s.sign(b"{\"a\":1}", "/chats/stream", TS, "POST");
        let b = s.sign(b"{\"a\":1}", "/chats/stream", TS, "POST");
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_input_changes_the_signature() {
        let s = signer();
        let base = s.sign(b"body", "/chats/stream", TS, "POST");
        assert_ne!(base, s.sign(b"body2", "/chats/stream", TS, "POST"));
        assert_ne!(base, s.sign(b"body", "/storage/upload", TS, "POST"));
        assert_ne!(base, s.sign(b"body", "/chats/stream", "2025-02-22T06:29:52Z", "POST"));
        assert_ne!(base, s.sign(b"body", "/chats/stream", TS, "GET"));
    }

    #[test]
    fn test_header_layout() {
        let token = signer().sign(b"", "/storage/upload", TS, "POST");
        let rest = token.strip_prefix("Bearer ").unwrap();
        let (key_a, sig) = rest.split_once('.').unwrap();
        assert_eq!(BASE64.decode(key_a).unwrap(), b"public-key");
        // HMAC-SHA256 digest is 32 bytes
        assert_eq!(BASE64.decode(sig).unwrap().len(), 32);
    }

    #[test]
    fn test_signature_matches_canonical_hmac() {
        let mut mac = HmacSha256::new_from_slice(b"secret-key").unwrap();
        mac.update(b"POST:/chats/stream:2025-02-22T06:29:51Z\n{}");
        let expected = BASE64.encode(mac.finalize().into_bytes());

        let token = signer().sign(b"{}", "/chats/stream", TS, "post");
        assert!(token.ends_with(&format!(".{expected}")));
    }

    #[test]
    fn test_format_timestamp() {
        let at = Utc.with_ymd_and_hms(2025, 2, 22, 6, 29, 51).unwrap();
        assert_eq!(format_timestamp(at), TS);
    }
}
