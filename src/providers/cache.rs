use serde::{Deserialize, Serialize};

use crate::providers::{ProviderId, Verdict};
use crate::storage::KeyValueStore;

#[derive(Serialize, Deserialize)]
struct CachedVerdict {
    verdict: Verdict,
    cached_until: u64,
}

fn cache_key(site_id: &str, provider: ProviderId, subject: &str) -> String {
    format!("repcache:{}:{}:{}", site_id, provider.as_str(), subject)
}

/// Unexpired cached verdict for `(provider, subject)`, if any. Expired and
/// unreadable entries are dropped and read as a miss.
pub fn get<S: KeyValueStore>(
    store: &S,
    site_id: &str,
    provider: ProviderId,
    subject: &str,
    now: u64,
) -> Option<Verdict> {
    let key = cache_key(site_id, provider, subject);
    let raw = store.get(&key).ok().flatten()?;
    match serde_json::from_slice::<CachedVerdict>(&raw) {
        Ok(entry) if now < entry.cached_until => Some(entry.verdict),
        _ => {
            let _ = store.delete(&key);
            None
        }
    }
}

/// Cache a verdict with the provider's TTL. TTL 0 disables caching for the
/// provider. Sub-threshold verdicts are cached like any other so the TTL
/// also bounds re-querying for clean subjects.
pub fn put<S: KeyValueStore>(
    store: &S,
    site_id: &str,
    provider: ProviderId,
    subject: &str,
    verdict: &Verdict,
    ttl_secs: u64,
    now: u64,
) {
    if ttl_secs == 0 {
        return;
    }
    let entry = CachedVerdict {
        verdict: verdict.clone(),
        cached_until: now + ttl_secs,
    };
    match serde_json::to_vec(&entry) {
        Ok(payload) => {
            if store
                .set(&cache_key(site_id, provider, subject), &payload)
                .is_err()
            {
                eprintln!(
                    "[providers][{}] failed caching verdict for {}",
                    provider.as_str(),
                    subject
                );
            }
        }
        Err(_) => eprintln!(
            "[providers][{}] failed serializing verdict for {}",
            provider.as_str(),
            subject
        ),
    }
}
