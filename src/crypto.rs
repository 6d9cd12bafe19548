use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `message`, keyed with the canonical code phrase, rendered
/// as lowercase hex. Used both for beacon envelopes and handshake proofs.
pub fn sign(phrase: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(phrase.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a lowercase-hex HMAC in constant time. A malformed hex string is
/// simply a failed verification, never a panic.
pub fn verify(phrase: &str, message: &str, expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(phrase.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    // Mac::verify_slice compares in constant time internally.
    mac.verify_slice(&expected).is_ok()
}

/// Handshake proof: HMAC over `<timestamp>:<fingerprint>`, keyed by the
/// phrase. Binding the server fingerprint into the proof stops a third host
/// from replaying it against a different sender.
pub fn auth_proof(phrase: &str, timestamp_ms: &str, fingerprint: &str) -> String {
    sign(phrase, &format!("{}:{}", timestamp_ms, fingerprint))
}

pub fn verify_auth_proof(
    phrase: &str,
    timestamp_ms: &str,
    fingerprint: &str,
    proof_hex: &str,
) -> bool {
    verify(phrase, &format!("{}:{}", timestamp_ms, fingerprint), proof_hex)
}

/// Fixed-time byte comparison, used wherever digests are matched against an
/// expected value.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Milliseconds since the Unix epoch, as the decimal string the wire expects.
pub fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================
    // HMAC Sign/Verify Tests
    // ============================================================================

    #[test]
    fn test_sign_verify_roundtrip() {
        let tag = sign("swift-ocean", "hello beacon");
        assert_eq!(tag.len(), 64);
        assert!(verify("swift-ocean", "hello beacon", &tag));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let tag = sign("swift-ocean", "hello beacon");
        assert!(!verify("swift-river", "hello beacon", &tag));
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let tag = sign("swift-ocean", "hello beacon");
        assert!(!verify("swift-ocean", "hello beacon!", &tag));
    }

    #[test]
    fn test_verify_rejects_bad_hex() {
        assert!(!verify("swift-ocean", "hello", "not-hex-at-all"));
        assert!(!verify("swift-ocean", "hello", ""));
    }

    #[test]
    fn test_sign_is_deterministic() {
        assert_eq!(sign("a-b", "msg"), sign("a-b", "msg"));
    }

    // ============================================================================
    // Auth Proof Tests
    // ============================================================================

    #[test]
    fn test_auth_proof_roundtrip() {
        let ts = "1722600000000";
        let fp = "ab".repeat(32);
        let proof = auth_proof("swift-ocean", ts, &fp);
        assert!(verify_auth_proof("swift-ocean", ts, &fp, &proof));
    }

    #[test]
    fn test_auth_proof_binds_fingerprint() {
        let ts = "1722600000000";
        let proof = auth_proof("swift-ocean", ts, &"ab".repeat(32));
        assert!(!verify_auth_proof("swift-ocean", ts, &"cd".repeat(32), &proof));
    }

    #[test]
    fn test_auth_proof_binds_timestamp() {
        let fp = "ab".repeat(32);
        let proof = auth_proof("swift-ocean", "1722600000000", &fp);
        assert!(!verify_auth_proof("swift-ocean", "1722600000001", &fp, &proof));
    }

    // ============================================================================
    // Constant-Time Compare Tests
    // ============================================================================

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
