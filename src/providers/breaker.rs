use crate::providers::ProviderId;
use crate::storage::{read_counter, KeyValueStore};

/// Failures beyond this count within the window open the circuit.
pub const FAILURE_THRESHOLD: i64 = 5;
pub const OPEN_COOLDOWN_SECS: u64 = 600;
// Failures are counted per hour bucket, which approximates a rolling
// hourly window the same way the minute-bucketed rate counters do.
const WINDOW_SECS: u64 = 3600;

fn failures_key(site_id: &str, provider: ProviderId, window: u64) -> String {
    format!(
        "breaker:{}:{}:failures:{}",
        site_id,
        provider.as_str(),
        window
    )
}

fn open_key(site_id: &str, provider: ProviderId) -> String {
    format!("breaker:{}:{}:open_until", site_id, provider.as_str())
}

/// True while the provider is in cooldown. An unreadable state counts as
/// closed so a broken store never blocks lookups on its own.
pub fn is_open<S: KeyValueStore>(store: &S, site_id: &str, provider: ProviderId, now: u64) -> bool {
    let until = read_counter(store, &open_key(site_id, provider)).max(0) as u64;
    now < until
}

pub fn record_failure<S: KeyValueStore>(store: &S, site_id: &str, provider: ProviderId, now: u64) {
    let key = failures_key(site_id, provider, now / WINDOW_SECS);
    match store.increment(&key, 1) {
        Ok(count) if count > FAILURE_THRESHOLD => {
            let until = now + OPEN_COOLDOWN_SECS;
            if store
                .set(&open_key(site_id, provider), until.to_string().as_bytes())
                .is_err()
            {
                eprintln!(
                    "[breaker] failed persisting open state for {}",
                    provider.as_str()
                );
            }
            crate::log_line(&format!(
                "[breaker] {} open until {} after {} failures",
                provider.as_str(),
                until,
                count
            ));
        }
        Ok(_) => {}
        Err(_) => eprintln!(
            "[breaker] failed counting failure for {}",
            provider.as_str()
        ),
    }
}

pub fn record_success<S: KeyValueStore>(store: &S, site_id: &str, provider: ProviderId, now: u64) {
    let _ = store.set(&failures_key(site_id, provider, now / WINDOW_SECS), b"0");
    let _ = store.delete(&open_key(site_id, provider));
}
