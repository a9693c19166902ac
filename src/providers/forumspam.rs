use std::time::Duration;

use serde_json::Value;

use crate::config::ProviderSettings;
use crate::providers::{FetchError, ProviderId, ProviderIo, ReputationProvider, Verdict};

/// Query-string JSON API: `GET ?ip=<ip>&json` answers
/// `{success:1, ip:{appears:1, confidence:<0-100>, ...}}`.
pub(crate) struct ForumSpamProvider;

pub(crate) const FORUMSPAM: ForumSpamProvider = ForumSpamProvider;

impl ReputationProvider for ForumSpamProvider {
    fn id(&self) -> ProviderId {
        ProviderId::ForumSpam
    }

    fn fetch(
        &self,
        io: &ProviderIo<'_>,
        settings: &ProviderSettings,
        subject: &str,
    ) -> Result<Verdict, FetchError> {
        let url = format!("{}?ip={}&json", settings.endpoint, subject);
        let resp = io
            .http
            .get(&url, Duration::from_secs(settings.timeout_secs))
            .map_err(FetchError::Transport)?;
        if resp.status != 200 {
            return Err(FetchError::Status(resp.status));
        }
        parse_body(&resp.body)
    }
}

fn parse_body(body: &[u8]) -> Result<Verdict, FetchError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| FetchError::Malformed("invalid json"))?;
    if value.get("success").and_then(Value::as_i64) != Some(1) {
        return Err(FetchError::Malformed("success != 1"));
    }
    let ip = value
        .get("ip")
        .ok_or(FetchError::Malformed("missing ip object"))?;
    if ip.get("appears").and_then(Value::as_i64).unwrap_or(0) != 1 {
        return Ok(Verdict::clean());
    }
    let confidence = ip
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .round()
        .clamp(0.0, 100.0) as u8;
    Ok(Verdict::hit(confidence, ip.clone()))
}
