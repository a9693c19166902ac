// src/blocklist.rs
// Local deny records: permanent or time-windowed blocks keyed by IP or by
// a location key, with attempt counters kept in their own keys so denial
// increments stay atomic at the storage layer.

use serde::{Deserialize, Serialize};

use crate::storage::{read_counter, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Permanent,
    Temporary,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Permanent => "permanent",
            BlockKind::Temporary => "temporary",
        }
    }
}

/// What a block row is keyed by: a visitor IP, or a location key such as a
/// country code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSubject {
    Ip(String),
    Key { key_type: String, key: String },
}

impl BlockSubject {
    pub fn ip(ip: &str) -> Self {
        BlockSubject::Ip(ip.to_string())
    }

    pub fn country(code: &str) -> Self {
        BlockSubject::Key {
            key_type: "country".to_string(),
            key: code.to_string(),
        }
    }

    fn storage_suffix(&self) -> String {
        match self {
            BlockSubject::Ip(ip) => format!("ip:{}", ip),
            BlockSubject::Key { key_type, key } => format!("{}:{}", key_type, key),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockEntry {
    pub kind: BlockKind,
    pub start_block: u64,
    /// Required for temporary blocks, forbidden for permanent ones.
    #[serde(default)]
    pub end_block: Option<u64>,
    pub reason: String,
    pub date_added: u64,
}

/// Validation failures surfaced to the admin caller, never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValidation {
    PermanentWithEnd,
    TemporaryWithoutEnd,
    TemporaryEndsBeforeStart,
}

impl BlockValidation {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockValidation::PermanentWithEnd => "permanent_with_end",
            BlockValidation::TemporaryWithoutEnd => "temporary_without_end",
            BlockValidation::TemporaryEndsBeforeStart => "temporary_ends_before_start",
        }
    }
}

fn block_key(site_id: &str, subject: &BlockSubject) -> String {
    format!("block:{}:{}", site_id, subject.storage_suffix())
}

fn attempts_key(site_id: &str, subject: &BlockSubject) -> String {
    format!("block_attempts:{}:{}", site_id, subject.storage_suffix())
}

fn index_key(site_id: &str) -> String {
    format!("block_index:{}", site_id)
}

fn validate(entry: &BlockEntry) -> Result<(), BlockValidation> {
    match (entry.kind, entry.end_block) {
        (BlockKind::Permanent, Some(_)) => Err(BlockValidation::PermanentWithEnd),
        (BlockKind::Permanent, None) => Ok(()),
        (BlockKind::Temporary, None) => Err(BlockValidation::TemporaryWithoutEnd),
        (BlockKind::Temporary, Some(end)) if end <= entry.start_block => {
            Err(BlockValidation::TemporaryEndsBeforeStart)
        }
        (BlockKind::Temporary, Some(_)) => Ok(()),
    }
}

fn load_index(store: &impl KeyValueStore, site_id: &str) -> Vec<String> {
    store
        .get(&index_key(site_id))
        .ok()
        .flatten()
        .and_then(|v| serde_json::from_slice::<Vec<String>>(&v).ok())
        .unwrap_or_default()
}

fn save_index(store: &impl KeyValueStore, site_id: &str, index: &[String]) {
    if let Ok(val) = serde_json::to_vec(index) {
        let _ = store.set(&index_key(site_id), &val);
    }
}

fn add_to_index(store: &impl KeyValueStore, site_id: &str, suffix: &str) {
    let mut index = load_index(store, site_id);
    if !index.iter().any(|v| v == suffix) {
        index.push(suffix.to_string());
        save_index(store, site_id, &index);
    }
}

/// Validate and persist a block row. Validation failures surface to the
/// caller; a storage failure is logged and swallowed like any other
/// best-effort write.
pub fn upsert(
    store: &impl KeyValueStore,
    site_id: &str,
    subject: &BlockSubject,
    entry: &BlockEntry,
) -> Result<(), BlockValidation> {
    validate(entry)?;
    match serde_json::to_vec(entry) {
        Ok(payload) => {
            if store.set(&block_key(site_id, subject), &payload).is_err() {
                eprintln!(
                    "[blocklist] failed persisting block for {}",
                    subject.storage_suffix()
                );
            } else {
                add_to_index(store, site_id, &subject.storage_suffix());
            }
        }
        Err(_) => eprintln!(
            "[blocklist] failed serializing block for {}",
            subject.storage_suffix()
        ),
    }
    Ok(())
}

/// Active iff permanent, or temporary with `start <= now < end`.
pub fn is_active(entry: &BlockEntry, now: u64) -> bool {
    match entry.kind {
        BlockKind::Permanent => true,
        BlockKind::Temporary => entry
            .end_block
            .map(|end| entry.start_block <= now && now < end)
            .unwrap_or(false),
    }
}

/// The active block row for `subject`, if any. Inactive temporary rows are
/// left in place; they fall through, they are not deleted.
pub fn find_active(
    store: &impl KeyValueStore,
    site_id: &str,
    subject: &BlockSubject,
    now: u64,
) -> Option<BlockEntry> {
    let raw = store.get(&block_key(site_id, subject)).ok().flatten()?;
    let entry = serde_json::from_slice::<BlockEntry>(&raw).ok()?;
    is_active(&entry, now).then_some(entry)
}

/// Atomic denial counter bump, done at the storage layer.
pub fn increment_attempts(store: &impl KeyValueStore, site_id: &str, subject: &BlockSubject) -> i64 {
    store
        .increment(&attempts_key(site_id, subject), 1)
        .unwrap_or_else(|_| {
            eprintln!(
                "[blocklist] failed counting attempt for {}",
                subject.storage_suffix()
            );
            0
        })
}

pub fn attempts(store: &impl KeyValueStore, site_id: &str, subject: &BlockSubject) -> u64 {
    read_counter(store, &attempts_key(site_id, subject)).max(0) as u64
}

pub fn remove(store: &impl KeyValueStore, site_id: &str, subject: &BlockSubject) {
    let _ = store.delete(&block_key(site_id, subject));
    let _ = store.delete(&attempts_key(site_id, subject));
    let suffix = subject.storage_suffix();
    let mut index = load_index(store, site_id);
    let before = index.len();
    index.retain(|v| v != &suffix);
    if index.len() != before {
        save_index(store, site_id, &index);
    }
}

/// All currently active rows, with their attempt counts. Index members
/// whose rows are gone are pruned; inactive rows stay listed in the store
/// but are not returned.
pub fn list_active(
    store: &impl KeyValueStore,
    site_id: &str,
    now: u64,
) -> Vec<(String, BlockEntry, u64)> {
    let index = load_index(store, site_id);
    let mut active = Vec::new();
    let mut kept = Vec::new();
    let mut changed = false;

    for suffix in index {
        let key = format!("block:{}:{}", site_id, suffix);
        match store.get(&key) {
            Ok(Some(raw)) => {
                kept.push(suffix.clone());
                if let Ok(entry) = serde_json::from_slice::<BlockEntry>(&raw) {
                    if is_active(&entry, now) {
                        let count =
                            read_counter(store, &format!("block_attempts:{}:{}", site_id, suffix))
                                .max(0) as u64;
                        active.push((suffix, entry, count));
                    }
                }
            }
            _ => changed = true,
        }
    }

    if changed {
        save_index(store, site_id, &kept);
    }
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStore;

    fn temporary(start: u64, end: u64) -> BlockEntry {
        BlockEntry {
            kind: BlockKind::Temporary,
            start_block: start,
            end_block: Some(end),
            reason: "manual".to_string(),
            date_added: start,
        }
    }

    fn permanent() -> BlockEntry {
        BlockEntry {
            kind: BlockKind::Permanent,
            start_block: 1_000,
            end_block: None,
            reason: "abuse".to_string(),
            date_added: 1_000,
        }
    }

    #[test]
    fn upsert_rejects_invalid_shapes_distinctly() {
        let store = InMemoryStore::default();
        let subject = BlockSubject::ip("1.2.3.4");

        let mut bad = permanent();
        bad.end_block = Some(2_000);
        assert_eq!(
            upsert(&store, "default", &subject, &bad),
            Err(BlockValidation::PermanentWithEnd)
        );

        let mut bad = temporary(2_000, 3_000);
        bad.end_block = None;
        assert_eq!(
            upsert(&store, "default", &subject, &bad),
            Err(BlockValidation::TemporaryWithoutEnd)
        );

        assert_eq!(
            upsert(&store, "default", &subject, &temporary(3_000, 3_000)),
            Err(BlockValidation::TemporaryEndsBeforeStart)
        );

        // Nothing was persisted.
        assert_eq!(find_active(&store, "default", &subject, 2_500), None);
    }

    #[test]
    fn permanent_blocks_are_active_at_any_time() {
        let entry = permanent();
        assert!(is_active(&entry, 0));
        assert!(is_active(&entry, u64::MAX));
    }

    #[test]
    fn temporary_blocks_are_active_only_inside_their_window() {
        let entry = temporary(1_000, 2_000);
        assert!(!is_active(&entry, 999));
        assert!(is_active(&entry, 1_000));
        assert!(is_active(&entry, 1_999));
        assert!(!is_active(&entry, 2_000));
    }

    #[test]
    fn expired_temporary_rows_fall_through_but_stay_stored() {
        let store = InMemoryStore::default();
        let subject = BlockSubject::ip("1.2.3.4");
        upsert(&store, "default", &subject, &temporary(1_000, 2_000)).unwrap();

        assert_eq!(find_active(&store, "default", &subject, 5_000), None);
        // The row was not deleted.
        assert!(store.get("block:default:ip:1.2.3.4").unwrap().is_some());
    }

    #[test]
    fn location_keyed_rows_live_beside_ip_rows() {
        let store = InMemoryStore::default();
        upsert(&store, "default", &BlockSubject::country("KP"), &permanent()).unwrap();
        assert!(find_active(&store, "default", &BlockSubject::country("KP"), 0).is_some());
        assert_eq!(
            find_active(&store, "default", &BlockSubject::ip("KP"), 0),
            None
        );
    }

    #[test]
    fn concurrent_attempt_increments_lose_nothing() {
        let store = InMemoryStore::default();
        let subject = BlockSubject::ip("1.2.3.4");
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        increment_attempts(&store, "default", &subject);
                    }
                });
            }
        });
        assert_eq!(attempts(&store, "default", &subject), 200);
    }

    #[test]
    fn list_active_returns_live_rows_with_attempts_and_prunes_missing() {
        let store = InMemoryStore::default();
        let live = BlockSubject::ip("1.2.3.4");
        let expired = BlockSubject::ip("5.6.7.8");
        upsert(&store, "default", &live, &permanent()).unwrap();
        upsert(&store, "default", &expired, &temporary(1_000, 2_000)).unwrap();
        increment_attempts(&store, "default", &live);
        increment_attempts(&store, "default", &live);

        let listed = list_active(&store, "default", 10_000);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "ip:1.2.3.4");
        assert_eq!(listed[0].2, 2);

        remove(&store, "default", &live);
        assert!(list_active(&store, "default", 10_000).is_empty());
    }
}
