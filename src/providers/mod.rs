mod aggregator;
mod botscout;
pub mod breaker;
pub mod cache;
mod forumspam;
mod httpbl;
pub mod registry;
pub mod transport;

use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::metrics::{self, MetricName};
use crate::storage::KeyValueStore;
use self::transport::{DnsResolver, HttpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "aggregator")]
    Aggregator,
    #[serde(rename = "forumspam")]
    ForumSpam,
    #[serde(rename = "botscout")]
    BotScout,
    #[serde(rename = "httpbl")]
    HttpBl,
}

impl ProviderId {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Aggregator => "aggregator",
            ProviderId::ForumSpam => "forumspam",
            ProviderId::BotScout => "botscout",
            ProviderId::HttpBl => "httpbl",
        }
    }
}

/// A provider answer normalized onto one comparable scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub flagged: bool,
    /// 0-100 after provider-specific scaling.
    pub confidence: u8,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Verdict {
    pub fn clean() -> Self {
        Verdict {
            flagged: false,
            confidence: 0,
            raw: serde_json::Value::Null,
        }
    }

    pub fn hit(confidence: u8, raw: serde_json::Value) -> Self {
        Verdict {
            flagged: true,
            confidence,
            raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Transport(String),
    Status(u16),
    /// The provider rejected our credentials; counted as a provider failure,
    /// never as a match.
    KeyRejected,
    Malformed(&'static str),
}

impl FetchError {
    fn describe(&self) -> String {
        match self {
            FetchError::Transport(err) => format!("transport error: {}", err),
            FetchError::Status(code) => format!("unexpected status {}", code),
            FetchError::KeyRejected => "key rejected".to_string(),
            FetchError::Malformed(what) => format!("malformed payload: {}", what),
        }
    }
}

pub struct ProviderIo<'a> {
    pub http: &'a dyn HttpTransport,
    pub dns: &'a dyn DnsResolver,
}

/// One reputation source. Adapters normalize their wire format into a
/// `Verdict`; everything around the call (cache, breaker, counters) is the
/// shared `lookup` pipeline.
pub trait ReputationProvider {
    fn id(&self) -> ProviderId;

    /// False when local settings are incomplete (missing key or endpoint).
    /// An unconfigured provider is skipped without touching the breaker.
    fn is_configured(&self, settings: &ProviderSettings) -> bool {
        let _ = settings;
        true
    }

    /// Whether a flagged verdict from this source may deny access.
    fn eligible_for_deny(&self) -> bool {
        true
    }

    fn fetch(
        &self,
        io: &ProviderIo<'_>,
        settings: &ProviderSettings,
        subject: &str,
    ) -> Result<Verdict, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpinionReason {
    Disabled,
    Unconfigured,
    /// The breaker is open; distinct from "not flagged" in logs and metrics.
    CircuitOpen,
    Failed,
}

impl NoOpinionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            NoOpinionReason::Disabled => "disabled",
            NoOpinionReason::Unconfigured => "unconfigured",
            NoOpinionReason::CircuitOpen => "circuit_open",
            NoOpinionReason::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Verdict(Verdict),
    NoOpinion(NoOpinionReason),
}

impl LookupOutcome {
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            LookupOutcome::Verdict(v) => Some(v),
            LookupOutcome::NoOpinion(_) => None,
        }
    }
}

/// Query one provider through its cache and breaker. Failures of any kind
/// degrade to `NoOpinion`; this function never errors.
pub fn lookup<S: KeyValueStore>(
    store: &S,
    io: &ProviderIo<'_>,
    provider: &dyn ReputationProvider,
    settings: &ProviderSettings,
    site_id: &str,
    subject: &str,
    now: u64,
) -> LookupOutcome {
    let id = provider.id();
    if !settings.enabled {
        return LookupOutcome::NoOpinion(NoOpinionReason::Disabled);
    }
    if !provider.is_configured(settings) {
        return LookupOutcome::NoOpinion(NoOpinionReason::Unconfigured);
    }

    if let Some(verdict) = cache::get(store, site_id, id, subject, now) {
        metrics::increment(store, MetricName::ProviderCacheHitsTotal, Some(id.as_str()));
        return LookupOutcome::Verdict(verdict);
    }

    if breaker::is_open(store, site_id, id, now) {
        crate::log_line(&format!(
            "[providers][{}] circuit open; skipping lookup for {}",
            id.as_str(),
            subject
        ));
        metrics::increment(store, MetricName::BreakerOpenSkipsTotal, Some(id.as_str()));
        return LookupOutcome::NoOpinion(NoOpinionReason::CircuitOpen);
    }

    metrics::increment(store, MetricName::ProviderQueriesTotal, Some(id.as_str()));
    match provider.fetch(io, settings, subject) {
        Ok(verdict) => {
            breaker::record_success(store, site_id, id, now);
            cache::put(
                store,
                site_id,
                id,
                subject,
                &verdict,
                settings.cache_ttl_secs,
                now,
            );
            LookupOutcome::Verdict(verdict)
        }
        Err(err) => {
            eprintln!(
                "[providers][{}] lookup failed for {}: {}",
                id.as_str(),
                subject,
                err.describe()
            );
            metrics::increment(store, MetricName::ProviderFailuresTotal, Some(id.as_str()));
            breaker::record_failure(store, site_id, id, now);
            LookupOutcome::NoOpinion(NoOpinionReason::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDnsResolver, FakeHttpTransport, InMemoryStore};

    fn settings() -> ProviderSettings {
        let mut cfg = crate::config::Config::default();
        cfg.providers.forumspam.cache_ttl_secs = 3600;
        cfg.providers.forumspam.clone()
    }

    fn io<'a>(http: &'a FakeHttpTransport, dns: &'a FakeDnsResolver) -> ProviderIo<'a> {
        ProviderIo { http, dns }
    }

    #[test]
    fn lookup_serves_cached_verdict_without_transport_calls() {
        let store = InMemoryStore::default();
        let http = FakeHttpTransport::with_body(200, br#"{"success":1,"ip":{"appears":0}}"#);
        let dns = FakeDnsResolver::default();
        let provider = registry::ProviderRegistry::standard()
            .by_id(ProviderId::ForumSpam)
            .unwrap();
        let settings = settings();

        let first = lookup(&store, &io(&http, &dns), provider, &settings, "default", "1.2.3.4", 1_000);
        assert!(matches!(first, LookupOutcome::Verdict(_)));
        assert_eq!(http.calls(), 1);

        let second = lookup(&store, &io(&http, &dns), provider, &settings, "default", "1.2.3.4", 1_100);
        assert_eq!(second.verdict(), first.verdict());
        assert_eq!(http.calls(), 1);
    }

    #[test]
    fn lookup_skips_disabled_and_unconfigured_providers() {
        let store = InMemoryStore::default();
        let http = FakeHttpTransport::with_body(200, b"Y|MULTI|3");
        let dns = FakeDnsResolver::default();
        let reg = registry::ProviderRegistry::standard();

        let mut disabled = settings();
        disabled.enabled = false;
        let outcome = lookup(
            &store,
            &io(&http, &dns),
            reg.by_id(ProviderId::ForumSpam).unwrap(),
            &disabled,
            "default",
            "1.2.3.4",
            0,
        );
        assert_eq!(outcome, LookupOutcome::NoOpinion(NoOpinionReason::Disabled));

        // botscout without an api key never reaches the transport.
        let keyless = crate::config::Config::default().providers.botscout;
        let outcome = lookup(
            &store,
            &io(&http, &dns),
            reg.by_id(ProviderId::BotScout).unwrap(),
            &keyless,
            "default",
            "1.2.3.4",
            0,
        );
        assert_eq!(
            outcome,
            LookupOutcome::NoOpinion(NoOpinionReason::Unconfigured)
        );
        assert_eq!(http.calls(), 0);
    }

    #[test]
    fn lookup_counts_failures_and_opens_the_breaker() {
        let store = InMemoryStore::default();
        let http = FakeHttpTransport::failing("connection refused");
        let dns = FakeDnsResolver::default();
        let provider = registry::ProviderRegistry::standard()
            .by_id(ProviderId::ForumSpam)
            .unwrap();
        let settings = settings();
        let now = 10_000;

        for _ in 0..6 {
            let outcome = lookup(&store, &io(&http, &dns), provider, &settings, "default", "1.2.3.4", now);
            assert_eq!(outcome, LookupOutcome::NoOpinion(NoOpinionReason::Failed));
        }
        assert_eq!(http.calls(), 6);

        // Seventh attempt is skipped entirely.
        let outcome = lookup(&store, &io(&http, &dns), provider, &settings, "default", "1.2.3.4", now);
        assert_eq!(
            outcome,
            LookupOutcome::NoOpinion(NoOpinionReason::CircuitOpen)
        );
        assert_eq!(http.calls(), 6);
    }

    #[test]
    fn lookup_with_zero_ttl_queries_every_time() {
        let store = InMemoryStore::default();
        let http = FakeHttpTransport::with_body(200, br#"{"success":1,"ip":{"appears":0}}"#);
        let dns = FakeDnsResolver::default();
        let provider = registry::ProviderRegistry::standard()
            .by_id(ProviderId::ForumSpam)
            .unwrap();
        let mut settings = settings();
        settings.cache_ttl_secs = 0;

        lookup(&store, &io(&http, &dns), provider, &settings, "default", "1.2.3.4", 0);
        lookup(&store, &io(&http, &dns), provider, &settings, "default", "1.2.3.4", 1);
        assert_eq!(http.calls(), 2);
    }
}
