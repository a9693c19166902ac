use std::time::Duration;

use crate::config::ProviderSettings;
use crate::providers::{FetchError, ProviderId, ProviderIo, ReputationProvider, Verdict};

/// Pipe-delimited text API: `GET ?ip=<ip>&key=<k>` answers `Y|type|count`.
/// A match is the first field `Y`; any `!` in the body is a key error.
pub(crate) struct BotScoutProvider;

pub(crate) const BOTSCOUT: BotScoutProvider = BotScoutProvider;

/// The answer carries no graded score, so a match is normalized to full
/// confidence and compared against the threshold like any other verdict.
const MATCH_CONFIDENCE: u8 = 100;

impl ReputationProvider for BotScoutProvider {
    fn id(&self) -> ProviderId {
        ProviderId::BotScout
    }

    fn is_configured(&self, settings: &ProviderSettings) -> bool {
        settings.api_key.is_some()
    }

    fn fetch(
        &self,
        io: &ProviderIo<'_>,
        settings: &ProviderSettings,
        subject: &str,
    ) -> Result<Verdict, FetchError> {
        let key = settings.api_key.as_deref().ok_or(FetchError::KeyRejected)?;
        let url = format!("{}?ip={}&key={}", settings.endpoint, subject, key);
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
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.contains('!') {
        return Err(FetchError::KeyRejected);
    }
    let raw = serde_json::json!({ "response": text });
    match text.split('|').next() {
        Some("Y") => Ok(Verdict::hit(MATCH_CONFIDENCE, raw)),
        Some("N") => Ok(Verdict {
            flagged: false,
            confidence: 0,
            raw,
        }),
        _ => Err(FetchError::Malformed("unrecognized response")),
    }
}
