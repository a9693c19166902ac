// src/context.rs
// Immutable per-request context for the access engine. Built once from the
// inbound request and configuration, then threaded through every call;
// nothing here is ambient or static.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use ipnet::IpNet;
use once_cell::sync::Lazy;
use spin_sdk::http::Request;

use crate::config::{self, Config};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub site_id: String,
    /// Resolved visitor IP, or "unknown" when no public address was found.
    pub ip: String,
    pub user_agent: String,
    pub page_url: String,
    /// Authenticated-session flag, asserted by the surrounding host.
    pub authenticated: bool,
    /// The client-held signed session mirror, if presented.
    pub session_token: Option<String>,
    /// One timestamp per evaluation.
    pub now: u64,
}

impl RequestContext {
    pub fn from_request(req: &Request, cfg: &Config, site_id: &str) -> Self {
        let header = |name: &str| {
            req.header(name)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        RequestContext {
            site_id: site_id.to_string(),
            ip: extract_client_ip(req, cfg),
            user_agent: header("user-agent"),
            page_url: req.path().to_string(),
            authenticated: req
                .header("x-warden-authenticated")
                .and_then(|v| v.as_str())
                .map(|v| v == "1")
                .unwrap_or(false),
            session_token: req
                .header("x-warden-session")
                .and_then(|v| v.as_str())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string()),
            now: now_ts(),
        }
    }
}

pub(crate) fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns true if forwarded IP headers should be trusted for this request.
/// If WARDEN_FORWARDED_IP_SECRET is set, require a matching
/// x-warden-forwarded-secret header.
fn forwarded_ip_trusted(req: &Request) -> bool {
    match config::forwarded_ip_secret() {
        Some(secret) => req
            .header("x-warden-forwarded-secret")
            .and_then(|v| v.as_str())
            .map(|v| v == secret)
            .unwrap_or(false),
        None => true,
    }
}

/// Walk the configured proxy headers in order and take the first public,
/// non-reserved address. Addresses that fail to parse, and every private /
/// loopback / CGNAT / reserved hop, are skipped.
pub fn extract_client_ip(req: &Request, cfg: &Config) -> String {
    if forwarded_ip_trusted(req) {
        for header in &cfg.proxy_headers {
            let Some(value) = req.header(header).and_then(|v| v.as_str()) else {
                continue;
            };
            for candidate in value.split(',') {
                let candidate = candidate.trim();
                if let Ok(addr) = candidate.parse::<IpAddr>() {
                    if is_public_ip(addr) {
                        return candidate.to_string();
                    }
                }
            }
        }
    }
    "unknown".to_string()
}

static NON_PUBLIC_NETS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        // CGNAT, IETF protocol assignments, benchmarking, class E.
        "100.64.0.0/10",
        "192.0.0.0/24",
        "198.18.0.0/15",
        "240.0.0.0/4",
        // Documentation ranges.
        "192.0.2.0/24",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "2001:db8::/32",
        // Unique-local and link-local.
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .map(|net| net.parse().expect("static net parses"))
    .collect()
});

pub(crate) fn is_public_ip(addr: IpAddr) -> bool {
    let basic = match addr {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_multicast())
        }
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified() || v6.is_multicast()),
    };
    basic && !NON_PUBLIC_NETS.iter().any(|net| net.contains(&addr))
}
