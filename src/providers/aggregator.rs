use std::time::Duration;

use serde_json::Value;

use crate::config::ProviderSettings;
use crate::providers::{FetchError, ProviderId, ProviderIo, ReputationProvider, Verdict};

/// Licensed aggregation feed: `GET ?license_key=<k>&ip=<ip>` answers
/// `{status:200, body_response:{ip_addresses:{<ip>:{confidence:0.0-1.0}}}}`.
/// Confidence is scaled x100 onto the shared scale before comparison.
pub(crate) struct AggregatorProvider;

pub(crate) const AGGREGATOR: AggregatorProvider = AggregatorProvider;

impl ReputationProvider for AggregatorProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Aggregator
    }

    fn is_configured(&self, settings: &ProviderSettings) -> bool {
        settings.api_key.is_some() && !settings.endpoint.is_empty()
    }

    fn fetch(
        &self,
        io: &ProviderIo<'_>,
        settings: &ProviderSettings,
        subject: &str,
    ) -> Result<Verdict, FetchError> {
        let key = settings.api_key.as_deref().ok_or(FetchError::KeyRejected)?;
        let url = format!("{}?license_key={}&ip={}", settings.endpoint, key, subject);
        let resp = io
            .http
            .get(&url, Duration::from_secs(settings.timeout_secs))
            .map_err(FetchError::Transport)?;
        if resp.status != 200 {
            return Err(FetchError::Status(resp.status));
        }
        parse_body(&resp.body, subject)
    }
}

fn parse_body(body: &[u8], subject: &str) -> Result<Verdict, FetchError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| FetchError::Malformed("invalid json"))?;
    match value.get("status").and_then(Value::as_i64) {
        Some(200) => {}
        Some(other) => return Err(FetchError::Status(other.clamp(0, u16::MAX as i64) as u16)),
        None => return Err(FetchError::Malformed("missing status")),
    }
    let Some(entry) = value
        .pointer("/body_response/ip_addresses")
        .and_then(|addresses| addresses.get(subject))
    else {
        // Answered, no data for this subject.
        return Ok(Verdict::clean());
    };
    let confidence = entry
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or(FetchError::Malformed("missing confidence"))?;
    let scaled = (confidence * 100.0).round().clamp(0.0, 100.0) as u8;
    if scaled == 0 {
        return Ok(Verdict {
            flagged: false,
            confidence: 0,
            raw: entry.clone(),
        });
    }
    Ok(Verdict::hit(scaled, entry.clone()))
}

#[cfg(test)]
mod tests {
    use super::parse_body;
    use crate::providers::FetchError;

    fn body(confidence: f64) -> Vec<u8> {
        serde_json::json!({
            "status": 200,
            "body_response": {
                "ip_addresses": { "1.2.3.4": { "confidence": confidence } }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn unit_confidence_is_scaled_to_the_shared_range() {
        let verdict = parse_body(&body(0.87), "1.2.3.4").unwrap();
        assert!(verdict.flagged);
        assert_eq!(verdict.confidence, 87);
    }

    #[test]
    fn zero_confidence_is_clean() {
        let verdict = parse_body(&body(0.0), "1.2.3.4").unwrap();
        assert!(!verdict.flagged);
        assert_eq!(verdict.confidence, 0);
    }

    #[test]
    fn missing_subject_entry_is_clean() {
        let verdict = parse_body(&body(0.9), "9.9.9.9").unwrap();
        assert!(!verdict.flagged);
    }

    #[test]
    fn body_status_other_than_200_is_a_failure() {
        let payload = br#"{"status":402,"body_response":{}}"#;
        assert_eq!(
            parse_body(payload, "1.2.3.4"),
            Err(FetchError::Status(402))
        );
    }

    #[test]
    fn missing_confidence_is_malformed() {
        let payload = serde_json::json!({
            "status": 200,
            "body_response": { "ip_addresses": { "1.2.3.4": {} } }
        })
        .to_string();
        assert_eq!(
            parse_body(payload.as_bytes(), "1.2.3.4"),
            Err(FetchError::Malformed("missing confidence"))
        );
    }
}
