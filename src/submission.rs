// src/submission.rs
// Spam guard for comment/registration/contact submissions: a shared-token
// presence check, a detection log write, and a deferred anonymized report
// for the aggregation endpoint. The caller performs the actual deny.

use std::collections::BTreeMap;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use rand::random;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::context::RequestContext;
use crate::detlog::{self, DetectionKind, DetectionLogEntry};
use crate::geo::GeoLocator;
use crate::metrics::{self, MetricName};
use crate::providers::transport::HttpTransport;
use crate::storage::KeyValueStore;

/// Form field carrying the site token.
pub const TOKEN_FIELD: &str = "warden_token";

const OUTBOX_PREFIX: &str = "report_outbox";
const REPORT_TIMEOUT_SECS: u64 = 5;
/// Bound on outbox entries forwarded per flush call.
const FLUSH_BATCH: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Comment,
    Registration,
    Contact,
    Generic,
}

impl SubmissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionKind::Comment => "comment",
            SubmissionKind::Registration => "registration",
            SubmissionKind::Contact => "contact",
            SubmissionKind::Generic => "generic",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "comment" => Some(SubmissionKind::Comment),
            "registration" => Some(SubmissionKind::Registration),
            "contact" => Some(SubmissionKind::Contact),
            "generic" => Some(SubmissionKind::Generic),
            _ => None,
        }
    }

    fn detection_kind(self) -> DetectionKind {
        match self {
            SubmissionKind::Comment => DetectionKind::Comment,
            SubmissionKind::Registration => DetectionKind::Registration,
            SubmissionKind::Contact => DetectionKind::Contact,
            SubmissionKind::Generic => DetectionKind::Generic,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub kind: SubmissionKind,
    pub secret_token: Option<String>,
    /// Decoded form fields, token excluded.
    pub fields: BTreeMap<String, String>,
}

impl Submission {
    /// Decode an application/x-www-form-urlencoded body.
    pub fn from_form(kind: SubmissionKind, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let mut secret_token = None;
        let mut fields = BTreeMap::new();
        for pair in text.split('&') {
            if pair.is_empty() {
                continue;
            }
            let mut halves = pair.splitn(2, '=');
            let name = decode_component(halves.next().unwrap_or(""));
            let value = decode_component(halves.next().unwrap_or(""));
            if name.is_empty() {
                continue;
            }
            if name == TOKEN_FIELD {
                secret_token = Some(value);
            } else {
                fields.insert(name, value);
            }
        }
        Submission {
            kind,
            secret_token,
            fields,
        }
    }
}

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or(plus_decoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionVerdict {
    Valid,
    Rejected,
}

impl SubmissionVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionVerdict::Valid => "valid",
            SubmissionVerdict::Rejected => "rejected",
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Mask the host part so forwarded reports carry no full address.
fn anonymize_ip(ip: &str) -> String {
    if let Some(last_dot) = ip.rfind('.') {
        if ip[..last_dot].split('.').count() == 3 {
            return format!("{}.x", &ip[..last_dot]);
        }
    }
    if ip.contains(':') {
        let mut groups = ip.split(':');
        let head = groups.next().unwrap_or("");
        let second = groups.next().unwrap_or("");
        return format!("{}:{}::x", head, second);
    }
    "unknown".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct DetectionReport {
    ts: u64,
    kind: String,
    ip_masked: String,
    page_url: String,
}

fn outbox_key(site_id: &str, ts: u64) -> String {
    format!("{}:{}:{}-{:016x}", OUTBOX_PREFIX, site_id, ts, random::<u64>())
}

fn enqueue_report(store: &impl KeyValueStore, cfg: &Config, ctx: &RequestContext, kind: SubmissionKind) {
    if cfg.report_endpoint.is_none() {
        return;
    }
    let report = DetectionReport {
        ts: ctx.now,
        kind: kind.as_str().to_string(),
        ip_masked: anonymize_ip(&ctx.ip),
        page_url: ctx.page_url.clone(),
    };
    match serde_json::to_vec(&report) {
        Ok(payload) => {
            if store.set(&outbox_key(&ctx.site_id, ctx.now), &payload).is_err() {
                eprintln!("[submission] failed queueing detection report");
            }
        }
        Err(_) => eprintln!("[submission] failed serializing detection report"),
    }
}

/// Classify one submission: valid iff its token equals the site token.
/// Invalid submissions are logged, queued for deferred reporting, and
/// signalled back as rejected; enforcement belongs to the caller. With no
/// site token configured the guard is inert and accepts everything.
pub fn classify<S: KeyValueStore>(
    store: &S,
    cfg: &Config,
    geo: &dyn GeoLocator,
    ctx: &RequestContext,
    submission: &Submission,
) -> SubmissionVerdict {
    let Some(expected) = cfg.form_secret.as_deref() else {
        return SubmissionVerdict::Valid;
    };
    if let Some(token) = submission.secret_token.as_deref() {
        if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            return SubmissionVerdict::Valid;
        }
    }

    metrics::increment(
        store,
        MetricName::SpamRejectedTotal,
        Some(submission.kind.as_str()),
    );
    if cfg.logging_enabled {
        let location = geo.locate(&ctx.ip);
        let submission_data = serde_json::to_value(&submission.fields).ok();
        detlog::record(
            store,
            &DetectionLogEntry {
                ts: ctx.now,
                ip: ctx.ip.clone(),
                kind: submission.kind.detection_kind(),
                page_url: ctx.page_url.clone(),
                submission_data,
                country: location.as_ref().and_then(|l| l.country.clone()),
                city: location.and_then(|l| l.city),
            },
        );
    }
    enqueue_report(store, cfg, ctx, submission.kind);
    SubmissionVerdict::Rejected
}

/// Drain queued detection reports to the aggregation endpoint. Runs off
/// the visitor path (scheduled task); a failing endpoint leaves the queue
/// in place for the next run.
pub fn flush_reports<S: KeyValueStore>(
    store: &S,
    http: &dyn HttpTransport,
    cfg: &Config,
    site_id: &str,
) -> usize {
    let Some(endpoint) = cfg.report_endpoint.as_deref() else {
        return 0;
    };
    let Ok(keys) = store.get_keys() else {
        return 0;
    };
    let prefix = format!("{}:{}:", OUTBOX_PREFIX, site_id);
    let mut flushed = 0;
    for key in keys.into_iter().filter(|k| k.starts_with(&prefix)) {
        if flushed >= FLUSH_BATCH {
            break;
        }
        let Ok(Some(payload)) = store.get(&key) else {
            continue;
        };
        match http.post(endpoint, &payload, Duration::from_secs(REPORT_TIMEOUT_SECS)) {
            Ok(resp) if (200..300).contains(&resp.status) => {
                let _ = store.delete(&key);
                metrics::increment(store, MetricName::ReportsFlushedTotal, None);
                flushed += 1;
            }
            Ok(resp) => {
                eprintln!(
                    "[submission] report endpoint answered {}; keeping queue",
                    resp.status
                );
                break;
            }
            Err(err) => {
                eprintln!("[submission] report forwarding failed: {}; keeping queue", err);
                break;
            }
        }
    }
    flushed
}
