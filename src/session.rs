// src/session.rs
// Client-held session mirror of the last access decision, carried as one
// HMAC-SHA256-signed token so the record is written and read atomically
// as a unit.

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::access::{AccessStatus, VisitorRecord};
use crate::config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SessionPayload {
    record: VisitorRecord,
    issued_at: u64,
    expires_at: u64,
}

fn sign_payload(secret: &str, payload: &str) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn verify_signature(secret: &str, payload: &str, sig: &[u8]) -> bool {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    mac.verify_slice(sig).is_ok()
}

fn issue_with_secret(secret: &str, record: &VisitorRecord, now: u64, ttl_secs: u64) -> String {
    let payload = SessionPayload {
        record: record.clone(),
        issued_at: now,
        expires_at: now + ttl_secs,
    };
    let payload_json = match serde_json::to_string(&payload) {
        Ok(json) => json,
        Err(_) => {
            eprintln!("[session] failed serializing record for {}", record.ip);
            return String::new();
        }
    };
    let sig = sign_payload(secret, &payload_json);
    format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload_json.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    )
}

fn recall_with_secret(secret: &str, token: &str, ip: &str, now: u64) -> Option<VisitorRecord> {
    let mut parts = token.splitn(2, '.');
    let payload_b64 = parts.next()?;
    let sig_b64 = parts.next()?;
    let payload_bytes = general_purpose::STANDARD.decode(payload_b64.as_bytes()).ok()?;
    let sig = general_purpose::STANDARD.decode(sig_b64.as_bytes()).ok()?;
    let payload_json = String::from_utf8(payload_bytes).ok()?;
    if !verify_signature(secret, &payload_json, &sig) {
        return None;
    }
    let payload: SessionPayload = serde_json::from_str(&payload_json).ok()?;
    if now >= payload.expires_at || payload.record.ip != ip {
        return None;
    }
    Some(VisitorRecord {
        checked: AccessStatus::Cached,
        ..payload.record
    })
}

/// Issue a fresh token mirroring `record`. Every terminal decision writes
/// one; the record inside is stored exactly as produced.
pub fn issue(record: &VisitorRecord, now: u64, ttl_secs: u64) -> String {
    issue_with_secret(&config::session_secret(), record, now, ttl_secs)
}

/// Recall the mirrored record for this exact `ip` from a presented token.
/// Returns the stored record with `checked` set to `cached`; tampered,
/// expired and cross-IP tokens all read as a miss.
pub fn recall(token: &str, ip: &str, now: u64) -> Option<VisitorRecord> {
    recall_with_secret(&config::session_secret(), token, ip, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderId;

    const SECRET: &str = "unit-test-secret";

    fn denied_record() -> VisitorRecord {
        VisitorRecord {
            ip: "1.2.3.4".to_string(),
            has_access: false,
            checked: AccessStatus::Blacklist,
            blacklist_source: Some(ProviderId::BotScout),
            attempts: Some(3),
        }
    }

    #[test]
    fn round_trip_preserves_everything_but_marks_the_source_cached() {
        let record = denied_record();
        let token = issue_with_secret(SECRET, &record, 1_000, 600);
        let recalled = recall_with_secret(SECRET, &token, "1.2.3.4", 1_100).unwrap();
        assert_eq!(recalled.checked, AccessStatus::Cached);
        assert!(!recalled.has_access);
        assert_eq!(recalled.blacklist_source, Some(ProviderId::BotScout));
        assert_eq!(recalled.attempts, Some(3));

        // Repeated recalls are bit-identical.
        let again = recall_with_secret(SECRET, &token, "1.2.3.4", 1_200).unwrap();
        assert_eq!(again, recalled);
    }

    #[test]
    fn expired_tokens_read_as_a_miss() {
        let token = issue_with_secret(SECRET, &denied_record(), 1_000, 600);
        assert!(recall_with_secret(SECRET, &token, "1.2.3.4", 1_600).is_none());
    }

    #[test]
    fn tokens_are_bound_to_the_exact_ip() {
        let token = issue_with_secret(SECRET, &denied_record(), 1_000, 600);
        assert!(recall_with_secret(SECRET, &token, "5.6.7.8", 1_100).is_none());
    }

    #[test]
    fn tampered_payloads_fail_verification() {
        let token = issue_with_secret(SECRET, &denied_record(), 1_000, 600);
        let sig = token.split('.').nth(1).unwrap();
        let granted = serde_json::json!({
            "record": {
                "ip": "1.2.3.4",
                "has_access": true,
                "checked": "none",
                "blacklist_source": null,
                "attempts": null
            },
            "issued_at": 1_000,
            "expires_at": 100_000
        });
        let forged = format!(
            "{}.{}",
            general_purpose::STANDARD.encode(granted.to_string().as_bytes()),
            sig
        );
        assert!(recall_with_secret(SECRET, &forged, "1.2.3.4", 1_100).is_none());
    }

    #[test]
    fn wrong_secret_and_garbage_tokens_are_rejected() {
        let token = issue_with_secret(SECRET, &denied_record(), 1_000, 600);
        assert!(recall_with_secret("other-secret", &token, "1.2.3.4", 1_100).is_none());
        assert!(recall_with_secret(SECRET, "not-a-token", "1.2.3.4", 1_100).is_none());
        assert!(recall_with_secret(SECRET, "a.b", "1.2.3.4", 1_100).is_none());
    }
}
