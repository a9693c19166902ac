// src/testing.rs
// Test doubles for the storage, transport, resolver and geolocation seams.
// Public so integration suites can drive the engine the same way unit
// tests do.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use spin_sdk::http::{Method, Request};

use crate::geo::{GeoLocation, GeoLocator};
use crate::providers::transport::{DnsResolver, HttpTransport, OutboundResponse};
use crate::storage::KeyValueStore;

/// Mutex-backed map store. `increment` and `set_if_absent` run under the
/// same lock as the write, so the atomic contract of the storage trait
/// holds for real here, including across threads.
#[derive(Default)]
pub struct InMemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), ()> {
        self.lock().remove(key);
        Ok(())
    }

    fn get_keys(&self) -> Result<Vec<String>, ()> {
        Ok(self.lock().keys().cloned().collect())
    }

    fn increment(&self, key: &str, delta: i64) -> Result<i64, ()> {
        let mut map = self.lock();
        let current = map
            .get(key)
            .and_then(|v| String::from_utf8(v.clone()).ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let next = current.saturating_add(delta);
        map.insert(key.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, ()> {
        let mut map = self.lock();
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), value.to_vec());
        Ok(true)
    }
}

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serializes tests that touch process env.
pub fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn request_with_headers(path: &str, headers: &[(&str, &str)]) -> Request {
    request_with_method_and_headers(Method::Get, path, headers)
}

pub fn request_with_method_and_headers(
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
) -> Request {
    request_with_body(method, path, headers, Vec::new())
}

pub fn request_with_body(
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> Request {
    let mut builder = Request::builder();
    builder.method(method).uri(path);
    for (key, value) in headers {
        builder.header(*key, *value);
    }
    builder.body(body);
    builder.build()
}

enum TransportMode {
    Respond(u16, Vec<u8>),
    Fail(String),
}

/// Canned HTTP transport with call counters and a record of posted bodies.
pub struct FakeHttpTransport {
    mode: TransportMode,
    calls: AtomicU32,
    posts: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeHttpTransport {
    pub fn with_body(status: u16, body: &[u8]) -> Self {
        FakeHttpTransport {
            mode: TransportMode::Respond(status, body.to_vec()),
            calls: AtomicU32::new(0),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        FakeHttpTransport {
            mode: TransportMode::Fail(error.to_string()),
            calls: AtomicU32::new(0),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn posts(&self) -> Vec<(String, Vec<u8>)> {
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn answer(&self) -> Result<OutboundResponse, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            TransportMode::Respond(status, body) => Ok(OutboundResponse {
                status: *status,
                body: body.clone(),
            }),
            TransportMode::Fail(error) => Err(error.clone()),
        }
    }
}

impl HttpTransport for FakeHttpTransport {
    fn get(&self, _url: &str, _timeout: Duration) -> Result<OutboundResponse, String> {
        self.answer()
    }

    fn post(&self, url: &str, body: &[u8], _timeout: Duration) -> Result<OutboundResponse, String> {
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((url.to_string(), body.to_vec()));
        self.answer()
    }
}

/// Scripted resolver: fixed A records per hostname and PTR names per IP.
#[derive(Default)]
pub struct FakeDnsResolver {
    a_records: HashMap<String, Vec<Ipv4Addr>>,
    ptrs: HashMap<String, String>,
    fail: Option<String>,
    lookups: AtomicU32,
}

impl FakeDnsResolver {
    pub fn with_a(mut self, host: &str, addrs: &[Ipv4Addr]) -> Self {
        self.a_records.insert(host.to_string(), addrs.to_vec());
        self
    }

    pub fn with_ptr(mut self, ip: &str, hostname: &str) -> Self {
        self.ptrs.insert(ip.to_string(), hostname.to_string());
        self
    }

    pub fn failing(error: &str) -> Self {
        FakeDnsResolver {
            fail: Some(error.to_string()),
            ..FakeDnsResolver::default()
        }
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DnsResolver for FakeDnsResolver {
    fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.fail {
            return Err(error.clone());
        }
        Ok(self.a_records.get(host).cloned().unwrap_or_default())
    }

    fn reverse_lookup(&self, ip: &str) -> Option<String> {
        self.ptrs.get(ip).cloned()
    }
}

/// Fixed geolocation answer.
pub struct StaticGeo {
    location: Option<GeoLocation>,
}

impl StaticGeo {
    pub fn country(code: &str) -> Self {
        StaticGeo {
            location: Some(GeoLocation {
                country: Some(code.to_string()),
                city: None,
            }),
        }
    }
}

impl GeoLocator for StaticGeo {
    fn locate(&self, _ip: &str) -> Option<GeoLocation> {
        self.location.clone()
    }
}
