// src/storage.rs
// Key-value storage abstraction for Gatewarden
// All engine state (blocks, blacklist rows, query cache, breaker state,
// counters, detection log) lives behind this trait.

use spin_sdk::key_value::Store;

/// Storage contract the engine is written against.
///
/// Counters and first-detection inserts go through `increment` /
/// `set_if_absent` so callers never do a read-modify-write of shared
/// state themselves; each backend supplies its strongest primitive.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()>;
    fn delete(&self, key: &str) -> Result<(), ()>;
    fn get_keys(&self) -> Result<Vec<String>, ()> {
        Ok(Vec::new())
    }

    /// Add `delta` to the integer counter at `key` and return the new value.
    /// A missing or unreadable counter starts from zero.
    fn increment(&self, key: &str, delta: i64) -> Result<i64, ()> {
        let current = read_counter(self, key);
        let next = current.saturating_add(delta);
        self.set(key, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Write `value` only if `key` holds nothing yet. Returns true when the
    /// write happened.
    fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, ()> {
        if matches!(self.get(key), Ok(Some(_))) {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }
}

/// Read an integer counter, treating absence and parse failures as zero.
pub fn read_counter<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> i64 {
    store
        .get(key)
        .ok()
        .flatten()
        .and_then(|v| String::from_utf8(v).ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

// Spin's component store executes single-writer per instance, so the trait's
// default read-modify-write increment is the platform's best available
// primitive here. Backends with server-side INCR override it.
impl KeyValueStore for Store {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        Store::get(self, key).map_err(|_| ())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        Store::set(self, key, value).map_err(|_| ())
    }

    fn delete(&self, key: &str) -> Result<(), ()> {
        Store::delete(self, key).map_err(|_| ())
    }

    fn get_keys(&self) -> Result<Vec<String>, ()> {
        Store::get_keys(self).map_err(|_| ())
    }
}
