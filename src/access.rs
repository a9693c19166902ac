// src/access.rs
// The ordered access decision pipeline. One evaluation walks the checks in
// strict order, stops at the first terminal outcome, and mirrors whatever
// it decided into a fresh session token.

use serde::{Deserialize, Serialize};

use crate::blacklist::{self, BlacklistEntry, ReverifyOutcome};
use crate::blocklist::{self, BlockKind, BlockSubject};
use crate::config::Config;
use crate::context::RequestContext;
use crate::detlog;
use crate::geo::GeoLocator;
use crate::metrics::{self, MetricName};
use crate::providers::{self, registry::ProviderRegistry, LookupOutcome, ProviderId, ProviderIo};
use crate::safelist;
use crate::session;
use crate::storage::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Authenticated,
    Cached,
    SafeIp,
    Whitelisted,
    PermanentBlock,
    TemporaryBlock,
    Blacklist,
    /// Nothing flagged the visitor.
    #[serde(rename = "none")]
    Clean,
}

impl AccessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessStatus::Authenticated => "authenticated",
            AccessStatus::Cached => "cached",
            AccessStatus::SafeIp => "safe_ip",
            AccessStatus::Whitelisted => "whitelisted",
            AccessStatus::PermanentBlock => "permanent_block",
            AccessStatus::TemporaryBlock => "temporary_block",
            AccessStatus::Blacklist => "blacklist",
            AccessStatus::Clean => "none",
        }
    }
}

/// The terminal outcome of one evaluation. Exactly one `checked` value per
/// evaluation; `blacklist_source` and `attempts` are set on denials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub ip: String,
    pub has_access: bool,
    pub checked: AccessStatus,
    #[serde(default)]
    pub blacklist_source: Option<ProviderId>,
    #[serde(default)]
    pub attempts: Option<u64>,
}

impl VisitorRecord {
    fn granted(ip: &str, checked: AccessStatus) -> Self {
        VisitorRecord {
            ip: ip.to_string(),
            has_access: true,
            checked,
            blacklist_source: None,
            attempts: None,
        }
    }

    fn denied(
        ip: &str,
        checked: AccessStatus,
        blacklist_source: Option<ProviderId>,
        attempts: u64,
    ) -> Self {
        VisitorRecord {
            ip: ip.to_string(),
            has_access: false,
            checked,
            blacklist_source,
            attempts: Some(attempts),
        }
    }
}

pub struct Evaluation {
    pub record: VisitorRecord,
    /// Refreshed session mirror for the client to hold.
    pub session_token: String,
}

/// Everything one evaluation consumes, assembled once by the caller.
pub struct EngineDeps<'a, S: KeyValueStore> {
    pub store: &'a S,
    pub cfg: &'a Config,
    pub registry: &'a ProviderRegistry,
    pub io: ProviderIo<'a>,
    pub geo: &'a dyn GeoLocator,
}

/// Evaluate a visitor. Always returns a terminal record plus the session
/// token mirroring it; denial bookkeeping (attempt counters, detection log)
/// happens before the record leaves here and never alters the outcome.
pub fn evaluate<S: KeyValueStore>(deps: &EngineDeps<'_, S>, ctx: &RequestContext) -> Evaluation {
    let record = decide(deps, ctx);
    metrics::increment(
        deps.store,
        MetricName::DecisionsTotal,
        Some(record.checked.as_str()),
    );
    if !record.has_access {
        metrics::increment(deps.store, MetricName::DeniedTotal, None);
    }
    let session_token = session::issue(&record, ctx.now, deps.cfg.session_cache_ttl_secs);
    Evaluation {
        record,
        session_token,
    }
}

fn decide<S: KeyValueStore>(deps: &EngineDeps<'_, S>, ctx: &RequestContext) -> VisitorRecord {
    if ctx.authenticated {
        return VisitorRecord::granted(&ctx.ip, AccessStatus::Authenticated);
    }
    if let Some(cached) = maybe_cached(deps, ctx) {
        return cached;
    }
    if let Some(safe) = maybe_safe_visitor(deps, ctx) {
        return safe;
    }
    if safelist::is_allowlisted(&ctx.ip, &deps.cfg.allowlist) {
        return VisitorRecord::granted(&ctx.ip, AccessStatus::Whitelisted);
    }
    if let Some(blocked) = maybe_blocked(deps, ctx) {
        return blocked;
    }
    if let Some(blacklisted) = maybe_blacklisted(deps, ctx) {
        return blacklisted;
    }
    if let Some(flagged) = maybe_provider_flagged(deps, ctx) {
        return flagged;
    }
    VisitorRecord::granted(&ctx.ip, AccessStatus::Clean)
}

/// Step 2: a valid session mirror for this exact IP short-circuits the
/// whole pipeline; no store row is consulted and no provider is called.
fn maybe_cached<S: KeyValueStore>(
    deps: &EngineDeps<'_, S>,
    ctx: &RequestContext,
) -> Option<VisitorRecord> {
    let token = ctx.session_token.as_deref()?;
    let record = session::recall(token, &ctx.ip, ctx.now)?;
    metrics::increment(deps.store, MetricName::SessionCacheHitsTotal, None);
    Some(record)
}

/// Step 3: reputable crawlers, identified by reverse DNS or user-agent.
/// Both signals are spoofable; this is a grant-only heuristic.
fn maybe_safe_visitor<S: KeyValueStore>(
    deps: &EngineDeps<'_, S>,
    ctx: &RequestContext,
) -> Option<VisitorRecord> {
    let safe = safelist::matches_bot_signature(&ctx.user_agent, &deps.cfg.bot_user_agents)
        || safelist::is_verified_crawler(&ctx.ip, deps.io.dns, &deps.cfg.crawler_domains);
    safe.then(|| VisitorRecord::granted(&ctx.ip, AccessStatus::SafeIp))
}

/// Step 5: administrator block rows, by IP first, then by the visitor's
/// country when the geolocation box knows one. Inactive temporary rows
/// fall through untouched.
fn maybe_blocked<S: KeyValueStore>(
    deps: &EngineDeps<'_, S>,
    ctx: &RequestContext,
) -> Option<VisitorRecord> {
    let mut subjects = vec![BlockSubject::ip(&ctx.ip)];
    if let Some(country) = deps.geo.locate(&ctx.ip).and_then(|l| l.country) {
        subjects.push(BlockSubject::country(&country));
    }

    for subject in subjects {
        let Some(entry) = blocklist::find_active(deps.store, &ctx.site_id, &subject, ctx.now)
        else {
            continue;
        };
        let attempts = blocklist::increment_attempts(deps.store, &ctx.site_id, &subject).max(0);
        let checked = match entry.kind {
            BlockKind::Permanent => AccessStatus::PermanentBlock,
            BlockKind::Temporary => AccessStatus::TemporaryBlock,
        };
        let record = VisitorRecord::denied(&ctx.ip, checked, None, attempts as u64);
        detlog::log_denial(deps.store, deps.cfg, deps.geo, ctx, &record);
        return Some(record);
    }
    None
}

/// Step 6: the confirmed-blacklist cache. Fresh rows deny immediately;
/// stale rows are re-verified against their owning provider and either
/// refreshed, removed, or (on no opinion) left alone without denying.
fn maybe_blacklisted<S: KeyValueStore>(
    deps: &EngineDeps<'_, S>,
    ctx: &RequestContext,
) -> Option<VisitorRecord> {
    let entry = blacklist::get(deps.store, &ctx.site_id, &ctx.ip)?;
    if entry.is_stale(ctx.now, deps.cfg.blacklist_reverify_secs) {
        match blacklist::reverify(
            deps.store,
            &deps.io,
            deps.registry,
            deps.cfg,
            &ctx.site_id,
            &ctx.ip,
            &entry,
            ctx.now,
        ) {
            ReverifyOutcome::StillFlagged => {}
            ReverifyOutcome::Removed | ReverifyOutcome::Unknown => return None,
        }
    }
    Some(deny_blacklisted(deps, ctx, entry.source))
}

/// Step 7: the provider sweep in fixed priority order. The first eligible
/// provider whose verdict meets its own threshold (inclusive) denies and
/// seeds the blacklist cache so step 6 short-circuits next time.
fn maybe_provider_flagged<S: KeyValueStore>(
    deps: &EngineDeps<'_, S>,
    ctx: &RequestContext,
) -> Option<VisitorRecord> {
    for provider in deps.registry.in_priority_order() {
        let settings = deps.cfg.providers.get(provider.id());
        let outcome = providers::lookup(
            deps.store,
            &deps.io,
            provider,
            settings,
            &ctx.site_id,
            &ctx.ip,
            ctx.now,
        );
        let LookupOutcome::Verdict(verdict) = outcome else {
            continue;
        };
        if !provider.eligible_for_deny()
            || !verdict.flagged
            || verdict.confidence < settings.min_confidence
        {
            continue;
        }
        blacklist::insert_if_absent(
            deps.store,
            &ctx.site_id,
            &ctx.ip,
            &BlacklistEntry {
                source: provider.id(),
                data: verdict.raw,
                last_updated: ctx.now,
            },
        );
        return Some(deny_blacklisted(deps, ctx, provider.id()));
    }
    None
}

fn deny_blacklisted<S: KeyValueStore>(
    deps: &EngineDeps<'_, S>,
    ctx: &RequestContext,
    source: ProviderId,
) -> VisitorRecord {
    let attempts = blacklist::increment_attempts(deps.store, &ctx.site_id, &ctx.ip).max(0);
    let record = VisitorRecord::denied(
        &ctx.ip,
        AccessStatus::Blacklist,
        Some(source),
        attempts as u64,
    );
    detlog::log_denial(deps.store, deps.cfg, deps.geo, ctx, &record);
    record
}
