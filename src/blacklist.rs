// src/blacklist.rs
// Long-horizon "confirmed malicious by provider X" rows. Rows outlive the
// provider query caches and are re-verified against their owning provider
// after the configured horizon instead of being trusted or dropped blindly.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::providers::{self, registry::ProviderRegistry, LookupOutcome, ProviderId, ProviderIo};
use crate::storage::{read_counter, KeyValueStore};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlacklistEntry {
    pub source: ProviderId,
    /// Opaque provider payload captured at confirmation time.
    #[serde(default)]
    pub data: serde_json::Value,
    pub last_updated: u64,
}

impl BlacklistEntry {
    pub fn is_stale(&self, now: u64, horizon_secs: u64) -> bool {
        now >= self.last_updated.saturating_add(horizon_secs)
    }
}

fn entry_key(site_id: &str, ip: &str) -> String {
    format!("blacklist:{}:{}", site_id, ip)
}

fn attempts_key(site_id: &str, ip: &str) -> String {
    format!("blacklist_attempts:{}:{}", site_id, ip)
}

pub fn get(store: &impl KeyValueStore, site_id: &str, ip: &str) -> Option<BlacklistEntry> {
    let raw = store.get(&entry_key(site_id, ip)).ok().flatten()?;
    serde_json::from_slice(&raw).ok()
}

/// First-detection insert. Concurrent evaluations of the same IP race to
/// this key; only one write lands, the rest see an existing row.
pub fn insert_if_absent(
    store: &impl KeyValueStore,
    site_id: &str,
    ip: &str,
    entry: &BlacklistEntry,
) -> bool {
    match serde_json::to_vec(entry) {
        Ok(payload) => store
            .set_if_absent(&entry_key(site_id, ip), &payload)
            .unwrap_or_else(|_| {
                eprintln!("[blacklist] failed persisting row for {}", ip);
                false
            }),
        Err(_) => {
            eprintln!("[blacklist] failed serializing row for {}", ip);
            false
        }
    }
}

fn refresh(store: &impl KeyValueStore, site_id: &str, ip: &str, entry: &BlacklistEntry) {
    if let Ok(payload) = serde_json::to_vec(entry) {
        if store.set(&entry_key(site_id, ip), &payload).is_err() {
            eprintln!("[blacklist] failed refreshing row for {}", ip);
        }
    }
}

pub fn remove(store: &impl KeyValueStore, site_id: &str, ip: &str) {
    let _ = store.delete(&entry_key(site_id, ip));
    let _ = store.delete(&attempts_key(site_id, ip));
}

pub fn increment_attempts(store: &impl KeyValueStore, site_id: &str, ip: &str) -> i64 {
    store
        .increment(&attempts_key(site_id, ip), 1)
        .unwrap_or_else(|_| {
            eprintln!("[blacklist] failed counting attempt for {}", ip);
            0
        })
}

pub fn attempts(store: &impl KeyValueStore, site_id: &str, ip: &str) -> u64 {
    read_counter(store, &attempts_key(site_id, ip)).max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverifyOutcome {
    StillFlagged,
    Removed,
    /// The provider gave no opinion; the row is left untouched and the
    /// evaluation continues without denying.
    Unknown,
}

impl ReverifyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReverifyOutcome::StillFlagged => "still_flagged",
            ReverifyOutcome::Removed => "removed",
            ReverifyOutcome::Unknown => "unknown",
        }
    }
}

/// Re-check a stale row against its owning provider through the normal
/// adapter pipeline. Still flagged refreshes `last_updated` (the attempt
/// counter key is untouched); affirmatively clean deletes the row.
pub fn reverify<S: KeyValueStore>(
    store: &S,
    io: &ProviderIo<'_>,
    registry: &ProviderRegistry,
    cfg: &Config,
    site_id: &str,
    ip: &str,
    entry: &BlacklistEntry,
    now: u64,
) -> ReverifyOutcome {
    let Some(provider) = registry.by_id(entry.source) else {
        crate::log_line(&format!(
            "[blacklist] no registered provider {} to reverify {}; keeping row",
            entry.source.as_str(),
            ip
        ));
        return ReverifyOutcome::Unknown;
    };
    let settings = cfg.providers.get(entry.source);
    match providers::lookup(store, io, provider, settings, site_id, ip, now) {
        LookupOutcome::Verdict(verdict)
            if verdict.flagged && verdict.confidence >= settings.min_confidence =>
        {
            refresh(
                store,
                site_id,
                ip,
                &BlacklistEntry {
                    source: entry.source,
                    data: verdict.raw,
                    last_updated: now,
                },
            );
            ReverifyOutcome::StillFlagged
        }
        LookupOutcome::Verdict(_) => {
            remove(store, site_id, ip);
            ReverifyOutcome::Removed
        }
        LookupOutcome::NoOpinion(reason) => {
            crate::log_line(&format!(
                "[blacklist] reverify of {} via {} gave no opinion ({}); keeping row",
                ip,
                entry.source.as_str(),
                reason.as_str()
            ));
            ReverifyOutcome::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDnsResolver, FakeHttpTransport, InMemoryStore};

    const HORIZON: u64 = 30 * 86_400;

    fn entry(last_updated: u64) -> BlacklistEntry {
        BlacklistEntry {
            source: ProviderId::BotScout,
            data: serde_json::json!({"response": "Y|IP|4"}),
            last_updated,
        }
    }

    fn cfg_with_botscout_key() -> Config {
        let mut cfg = Config::default();
        cfg.providers.botscout.api_key = Some("test-key".to_string());
        cfg.providers.botscout.min_confidence = 20;
        cfg
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let row = entry(1_000);
        assert!(!row.is_stale(1_000 + HORIZON - 1, HORIZON));
        assert!(row.is_stale(1_000 + HORIZON, HORIZON));
    }

    #[test]
    fn insert_if_absent_keeps_the_first_row() {
        let store = InMemoryStore::default();
        assert!(insert_if_absent(&store, "default", "1.2.3.4", &entry(1_000)));
        assert!(!insert_if_absent(&store, "default", "1.2.3.4", &entry(9_000)));
        assert_eq!(get(&store, "default", "1.2.3.4").unwrap().last_updated, 1_000);
    }

    #[test]
    fn reverify_refreshes_a_still_flagged_row_and_preserves_attempts() {
        let store = InMemoryStore::default();
        let row = entry(1_000);
        insert_if_absent(&store, "default", "1.2.3.4", &row);
        increment_attempts(&store, "default", "1.2.3.4");
        increment_attempts(&store, "default", "1.2.3.4");

        let http = FakeHttpTransport::with_body(200, b"Y|IP|7");
        let dns = FakeDnsResolver::default();
        let io = ProviderIo { http: &http, dns: &dns };
        let now = 1_000 + HORIZON + 5;
        let outcome = reverify(
            &store,
            &io,
            &ProviderRegistry::standard(),
            &cfg_with_botscout_key(),
            "default",
            "1.2.3.4",
            &row,
            now,
        );

        assert_eq!(outcome, ReverifyOutcome::StillFlagged);
        let refreshed = get(&store, "default", "1.2.3.4").unwrap();
        assert_eq!(refreshed.last_updated, now);
        assert_eq!(attempts(&store, "default", "1.2.3.4"), 2);
    }

    #[test]
    fn reverify_deletes_a_row_the_provider_no_longer_reports() {
        let store = InMemoryStore::default();
        let row = entry(1_000);
        insert_if_absent(&store, "default", "1.2.3.4", &row);

        let http = FakeHttpTransport::with_body(200, b"N|IP|0");
        let dns = FakeDnsResolver::default();
        let io = ProviderIo { http: &http, dns: &dns };
        let outcome = reverify(
            &store,
            &io,
            &ProviderRegistry::standard(),
            &cfg_with_botscout_key(),
            "default",
            "1.2.3.4",
            &row,
            1_000 + HORIZON + 5,
        );

        assert_eq!(outcome, ReverifyOutcome::Removed);
        assert_eq!(get(&store, "default", "1.2.3.4"), None);
    }

    #[test]
    fn reverify_keeps_the_row_when_the_provider_is_unreachable() {
        let store = InMemoryStore::default();
        let row = entry(1_000);
        insert_if_absent(&store, "default", "1.2.3.4", &row);

        let http = FakeHttpTransport::failing("timed out");
        let dns = FakeDnsResolver::default();
        let io = ProviderIo { http: &http, dns: &dns };
        let outcome = reverify(
            &store,
            &io,
            &ProviderRegistry::standard(),
            &cfg_with_botscout_key(),
            "default",
            "1.2.3.4",
            &row,
            1_000 + HORIZON + 5,
        );

        assert_eq!(outcome, ReverifyOutcome::Unknown);
        assert_eq!(get(&store, "default", "1.2.3.4").unwrap().last_updated, 1_000);
    }
}
