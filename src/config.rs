// src/config.rs
// Typed per-site configuration for Gatewarden
// Loaded once per request from the key-value store, env-overridden for
// secrets and deploy-time knobs, clamped on load. Never read ad hoc by
// string key at use sites.

use std::env;

use serde::{Deserialize, Serialize};

use crate::providers::ProviderId;
use crate::storage::KeyValueStore;

pub const CONFIDENCE_MAX: u8 = 100;

const PROVIDER_TIMEOUT_MIN: u64 = 1;
const PROVIDER_TIMEOUT_MAX: u64 = 30;
const PROVIDER_CACHE_TTL_MAX: u64 = 90 * 86_400;
const SESSION_TTL_MIN: u64 = 60;
const SESSION_TTL_MAX: u64 = 30 * 86_400;
const REVERIFY_MIN: u64 = 86_400;
const REVERIFY_MAX: u64 = 365 * 86_400;

/// Settings for one reputation provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Inclusive flagging threshold on the normalized 0-100 confidence.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Query-cache TTL for this provider. 0 disables caching.
    #[serde(default = "default_provider_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Base URL, or the DNSBL zone for httpbl.
    #[serde(default)]
    pub endpoint: String,
    /// Env-supplied, never persisted.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl ProviderSettings {
    fn with_endpoint(endpoint: &str) -> Self {
        ProviderSettings {
            enabled: true,
            min_confidence: default_min_confidence(),
            timeout_secs: default_provider_timeout(),
            cache_ttl_secs: default_provider_cache_ttl(),
            endpoint: endpoint.to_string(),
            api_key: None,
        }
    }
}

/// Per-provider settings, one field per known provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProviderConfigs {
    #[serde(default = "default_aggregator_settings")]
    pub aggregator: ProviderSettings,
    #[serde(default = "default_forumspam_settings")]
    pub forumspam: ProviderSettings,
    #[serde(default = "default_botscout_settings")]
    pub botscout: ProviderSettings,
    #[serde(default = "default_httpbl_settings")]
    pub httpbl: ProviderSettings,
}

impl Default for ProviderConfigs {
    fn default() -> Self {
        ProviderConfigs {
            aggregator: default_aggregator_settings(),
            forumspam: default_forumspam_settings(),
            botscout: default_botscout_settings(),
            httpbl: default_httpbl_settings(),
        }
    }
}

impl ProviderConfigs {
    pub fn get(&self, id: ProviderId) -> &ProviderSettings {
        match id {
            ProviderId::Aggregator => &self.aggregator,
            ProviderId::ForumSpam => &self.forumspam,
            ProviderId::BotScout => &self.botscout,
            ProviderId::HttpBl => &self.httpbl,
        }
    }

    // A stored partial override deserializes absent fields to their serde
    // defaults, which for endpoint is the empty string. The aggregator is
    // legitimately endpoint-less until configured; the public services are
    // not, so their endpoints are restored here.
    fn fill_missing_endpoints(&mut self) {
        if self.forumspam.endpoint.is_empty() {
            self.forumspam.endpoint = default_forumspam_settings().endpoint;
        }
        if self.botscout.endpoint.is_empty() {
            self.botscout.endpoint = default_botscout_settings().endpoint;
        }
        if self.httpbl.endpoint.is_empty() {
            self.httpbl.endpoint = default_httpbl_settings().endpoint;
        }
    }

    fn clamp_all(&mut self) {
        for settings in [
            &mut self.aggregator,
            &mut self.forumspam,
            &mut self.botscout,
            &mut self.httpbl,
        ] {
            settings.min_confidence = settings.min_confidence.min(CONFIDENCE_MAX);
            settings.timeout_secs = settings
                .timeout_secs
                .clamp(PROVIDER_TIMEOUT_MIN, PROVIDER_TIMEOUT_MAX);
            settings.cache_ttl_secs = settings.cache_ttl_secs.min(PROVIDER_CACHE_TTL_MAX);
        }
    }

    fn apply_env_keys(&mut self) {
        self.aggregator.api_key = env_nonempty("WARDEN_AGGREGATOR_LICENSE_KEY");
        self.botscout.api_key = env_nonempty("WARDEN_BOTSCOUT_API_KEY");
        self.httpbl.api_key = env_nonempty("WARDEN_HTTPBL_ACCESS_KEY");
    }
}

/// Configuration for a site, loaded from KV or defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// TTL of the signed client-held session mirror.
    #[serde(default = "default_session_ttl")]
    pub session_cache_ttl_secs: u64,
    /// Re-verification horizon for confirmed blacklist rows. Independent of
    /// the per-provider query-cache TTLs.
    #[serde(default = "default_blacklist_reverify")]
    pub blacklist_reverify_secs: u64,
    #[serde(default = "default_true")]
    pub logging_enabled: bool,
    /// Admin allow-list: exact IPs or CIDR ranges.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Proxy headers inspected for the client IP, in trust order.
    #[serde(default = "default_proxy_headers")]
    pub proxy_headers: Vec<String>,
    /// Reverse-DNS suffixes of crawlers always granted access.
    #[serde(default = "default_crawler_domains")]
    pub crawler_domains: Vec<String>,
    /// User-agent substrings of crawlers always granted access.
    #[serde(default = "default_bot_user_agents")]
    pub bot_user_agents: Vec<String>,
    #[serde(default)]
    pub providers: ProviderConfigs,
    /// Shared secret expected in form submissions. Env-overridden.
    #[serde(default)]
    pub form_secret: Option<String>,
    /// Endpoint deferred detection reports are forwarded to.
    #[serde(default)]
    pub report_endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_min_confidence() -> u8 {
    90
}

fn default_provider_timeout() -> u64 {
    5
}

fn default_provider_cache_ttl() -> u64 {
    14 * 86_400
}

fn default_session_ttl() -> u64 {
    7 * 86_400
}

fn default_blacklist_reverify() -> u64 {
    30 * 86_400
}

fn default_proxy_headers() -> Vec<String> {
    vec!["x-forwarded-for".to_string(), "x-real-ip".to_string()]
}

fn default_crawler_domains() -> Vec<String> {
    [
        "googlebot.com",
        "google.com",
        "search.msn.com",
        "crawl.yahoo.net",
        "yandex.com",
        "applebot.apple.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_bot_user_agents() -> Vec<String> {
    [
        "googlebot",
        "bingbot",
        "slurp",
        "duckduckbot",
        "yandexbot",
        "baiduspider",
        "applebot",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_aggregator_settings() -> ProviderSettings {
    // Licensed feed; the endpoint is deploy-specific and the provider stays
    // inert until one is configured.
    ProviderSettings::with_endpoint("")
}

fn default_forumspam_settings() -> ProviderSettings {
    ProviderSettings::with_endpoint("https://api.stopforumspam.org/api")
}

fn default_botscout_settings() -> ProviderSettings {
    ProviderSettings::with_endpoint("https://botscout.com/test/")
}

fn default_httpbl_settings() -> ProviderSettings {
    ProviderSettings::with_endpoint("dnsbl.httpbl.org")
}

fn env_nonempty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_bool_env(value: Option<&str>) -> Option<bool> {
    value.map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Fail mode when the key-value store is unavailable: open (default) lets
/// traffic through, closed returns an error page.
pub fn kv_store_fail_open() -> bool {
    parse_bool_env(env::var("WARDEN_KV_STORE_FAIL_OPEN").ok().as_deref()).unwrap_or(true)
}

pub fn fail_mode_label(fail_open: bool) -> &'static str {
    if fail_open {
        "open"
    } else {
        "closed"
    }
}

pub(crate) fn detlog_retention_hours_from_env(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse::<u64>().ok()).unwrap_or(720)
}

/// Detection-log retention in hours; 0 keeps records forever.
pub fn detlog_retention_hours() -> u64 {
    detlog_retention_hours_from_env(env::var("WARDEN_DETLOG_RETENTION_HOURS").ok().as_deref())
}

/// If set, forwarded IP headers are trusted only when the request carries a
/// matching x-warden-forwarded-secret header.
pub fn forwarded_ip_secret() -> Option<String> {
    env_nonempty("WARDEN_FORWARDED_IP_SECRET")
}

pub(crate) fn session_secret() -> String {
    env::var("WARDEN_SESSION_SECRET")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "changeme-session-secret".to_string())
}

impl Config {
    /// Loads config for a site from the key-value store, or returns defaults
    /// if not set. Env overrides and clamps are applied in both paths.
    pub fn load(store: &impl KeyValueStore, site_id: &str) -> Self {
        let key = format!("config:{}", site_id);
        let mut cfg = store
            .get(&key)
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice::<Config>(&v).ok())
            .unwrap_or_default();
        cfg.apply_env_overrides();
        cfg.clamp();
        cfg
    }

    fn apply_env_overrides(&mut self) {
        self.providers.apply_env_keys();
        if let Some(secret) = env_nonempty("WARDEN_FORM_SECRET") {
            self.form_secret = Some(secret);
        }
        if let Some(endpoint) = env_nonempty("WARDEN_REPORT_ENDPOINT") {
            self.report_endpoint = Some(endpoint);
        }
    }

    fn clamp(&mut self) {
        self.session_cache_ttl_secs = self
            .session_cache_ttl_secs
            .clamp(SESSION_TTL_MIN, SESSION_TTL_MAX);
        self.blacklist_reverify_secs = self
            .blacklist_reverify_secs
            .clamp(REVERIFY_MIN, REVERIFY_MAX);
        self.providers.fill_missing_endpoints();
        self.providers.clamp_all();
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session_cache_ttl_secs: default_session_ttl(),
            blacklist_reverify_secs: default_blacklist_reverify(),
            logging_enabled: true,
            allowlist: Vec::new(),
            proxy_headers: default_proxy_headers(),
            crawler_domains: default_crawler_domains(),
            bot_user_agents: default_bot_user_agents(),
            providers: ProviderConfigs::default(),
            form_secret: None,
            report_endpoint: None,
        }
    }
}
