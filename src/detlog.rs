// src/detlog.rs
// Durable detection log: one immutable record per denial or spam event,
// written to a distinct key to avoid read-modify-write races, pruned by
// hour bucket after the retention window.

use once_cell::sync::Lazy;
use rand::random;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::access::VisitorRecord;
use crate::config::{self, Config};
use crate::context::RequestContext;
use crate::geo::GeoLocator;
use crate::storage::KeyValueStore;

const DETLOG_PREFIX: &str = "detlog:v1";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Blocked,
    Comment,
    Registration,
    Contact,
    Generic,
}

impl DetectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionKind::Blocked => "blocked",
            DetectionKind::Comment => "comment",
            DetectionKind::Registration => "registration",
            DetectionKind::Contact => "contact",
            DetectionKind::Generic => "generic",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionLogEntry {
    pub ts: u64,
    pub ip: String,
    pub kind: DetectionKind,
    pub page_url: String,
    #[serde(default)]
    pub submission_data: Option<serde_json::Value>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

fn make_key(hour: u64, ts: u64) -> String {
    format!("{}:{}:{}-{:016x}", DETLOG_PREFIX, hour, ts, random::<u64>())
}

fn parse_entry_hour(key: &str) -> Option<u64> {
    let mut parts = key.splitn(4, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("detlog"), Some("v1"), Some(hour)) => hour.parse::<u64>().ok(),
        _ => None,
    }
}

static LAST_CLEANUP_HOUR: Lazy<Mutex<u64>> = Lazy::new(|| Mutex::new(0));

fn maybe_cleanup(store: &impl KeyValueStore, current_hour: u64) {
    let retention = config::detlog_retention_hours();
    if retention == 0 {
        return;
    }
    {
        let mut last = LAST_CLEANUP_HOUR
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last == current_hour {
            return;
        }
        *last = current_hour;
    }

    let cutoff_hour = current_hour.saturating_sub(retention);
    if let Ok(keys) = store.get_keys() {
        for key in keys {
            let Some(entry_hour) = parse_entry_hour(&key) else {
                continue;
            };
            if entry_hour < cutoff_hour {
                if let Err(err) = store.delete(&key) {
                    eprintln!("[detlog] failed deleting expired key {}: {:?}", key, err);
                }
            }
        }
    }
}

/// Append one detection record. Write failures never propagate; a failed
/// telemetry write must not change a decision already made.
pub fn record(store: &impl KeyValueStore, entry: &DetectionLogEntry) {
    let hour = entry.ts / 3600;
    let key = make_key(hour, entry.ts);
    match serde_json::to_vec(entry) {
        Ok(payload) => {
            if store.set(&key, &payload).is_err() {
                eprintln!("[detlog] KV error writing {}", key);
            }
        }
        Err(_) => eprintln!("[detlog] serialization error; dropping record for {}", key),
    }
    maybe_cleanup(store, hour);
}

/// Log a denial, subject to the logging-enabled setting, enriched with
/// whatever the geolocation box knows about the IP.
pub fn log_denial(
    store: &impl KeyValueStore,
    cfg: &Config,
    geo: &dyn GeoLocator,
    ctx: &RequestContext,
    record_out: &VisitorRecord,
) {
    if !cfg.logging_enabled {
        return;
    }
    let location = geo.locate(&ctx.ip);
    record(
        store,
        &DetectionLogEntry {
            ts: ctx.now,
            ip: record_out.ip.clone(),
            kind: DetectionKind::Blocked,
            page_url: ctx.page_url.clone(),
            submission_data: None,
            country: location.as_ref().and_then(|l| l.country.clone()),
            city: location.and_then(|l| l.city),
        },
    );
}

/// Every stored detection record, unordered. Admin presentation lives
/// elsewhere; this exists for reporting reads and tests.
pub fn entries(store: &impl KeyValueStore) -> Vec<DetectionLogEntry> {
    let Ok(keys) = store.get_keys() else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for key in keys {
        if parse_entry_hour(&key).is_none() {
            continue;
        }
        if let Ok(Some(raw)) = store.get(&key) {
            if let Ok(entry) = serde_json::from_slice::<DetectionLogEntry>(&raw) {
                found.push(entry);
            }
        }
    }
    found
}
