// src/lib.rs
// Entry point for the Gatewarden access classification component.
// The engine decides; this layer only maps decisions onto responses.

use spin_sdk::http::{Method, Request, Response};
use spin_sdk::http_component;
use spin_sdk::key_value::Store;

pub mod access; // Ordered decision pipeline
pub mod blacklist; // Confirmed-malicious rows + re-verification
pub mod blocklist; // Admin deny rows (permanent/temporary, IP or location key)
pub mod config; // Typed per-site configuration
pub mod context; // Immutable per-request context
pub mod detlog; // Detection log sink
pub mod geo; // Black-box geolocation seam
pub mod metrics; // KV counters + Prometheus export
pub mod providers; // Reputation adapters, query cache, breaker, registry
pub mod safelist; // Allow-list + crawler heuristics
pub mod session; // Signed client-held decision mirror
pub mod storage; // Key-value storage trait
pub mod submission; // Spam guard + deferred reports
pub mod testing; // Public test doubles

const SITE_ID: &str = "default";

pub(crate) fn log_line(msg: &str) {
    println!("{}", msg);
}

fn kv_outage_response() -> Response {
    let fail_open = config::kv_store_fail_open();
    let mode = config::fail_mode_label(fail_open);
    log_line(&format!(
        "[kv outage] store unavailable during request handling; WARDEN_KV_STORE_FAIL_OPEN={}",
        fail_open
    ));

    if !fail_open {
        return Response::builder()
            .status(500)
            .header("x-kv-status", "unavailable")
            .header("x-warden-fail-mode", mode)
            .body("Key-value store error (fail-closed)")
            .build();
    }
    Response::builder()
        .status(200)
        .header("x-kv-status", "unavailable")
        .header("x-warden-fail-mode", mode)
        .body("OK (access checks bypassed: store unavailable)")
        .build()
}

/// First forwarded hop without the public-address filter; only used to
/// guard the loopback-only task route.
fn raw_peer_ip(req: &Request) -> String {
    for header in ["x-forwarded-for", "x-real-ip"] {
        if let Some(value) = req.header(header).and_then(|v| v.as_str()) {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    "unknown".to_string()
}

pub fn handle_request_impl(req: &Request) -> Response {
    let path = req.path();

    let store = match Store::open_default() {
        Ok(store) => store,
        Err(_) => return kv_outage_response(),
    };

    if path == "/metrics" {
        return metrics::handle_metrics(&store);
    }

    let cfg = config::Config::load(&store, SITE_ID);

    // Scheduled drain of the deferred report outbox; loopback only.
    if path == "/tasks/flush-reports" {
        if *req.method() != Method::Post {
            return Response::new(405, "Method Not Allowed");
        }
        if !["127.0.0.1", "::1"].contains(&raw_peer_ip(req).as_str()) {
            return Response::new(403, "Forbidden");
        }
        let flushed = submission::flush_reports(
            &store,
            &providers::transport::SpinHttpTransport,
            &cfg,
            SITE_ID,
        );
        return Response::new(200, format!("flushed {}", flushed));
    }

    metrics::increment(&store, metrics::MetricName::RequestsTotal, None);
    let ctx = context::RequestContext::from_request(req, &cfg, SITE_ID);

    // Form/comment/registration spam guard. The caller wires each form
    // integration to its category; rejection enforcement stays out there.
    if let Some(kind_label) = path.strip_prefix("/submit/") {
        if *req.method() != Method::Post {
            return Response::new(405, "Method Not Allowed");
        }
        let Some(kind) = submission::SubmissionKind::from_label(kind_label) else {
            return Response::new(404, "Not Found");
        };
        let geo = geo::EdgeHeaderGeo::from_request(req);
        let parsed = submission::Submission::from_form(kind, req.body());
        return match submission::classify(&store, &cfg, &geo, &ctx, &parsed) {
            submission::SubmissionVerdict::Valid => Response::new(200, "OK (submission accepted)"),
            submission::SubmissionVerdict::Rejected => {
                Response::new(403, "Forbidden (submission rejected)")
            }
        };
    }

    // Everything else: classify the visitor and enforce the bare minimum.
    let registry = providers::registry::ProviderRegistry::standard();
    let http = providers::transport::SpinHttpTransport;
    let dns = providers::transport::SystemDnsResolver;
    let geo = geo::EdgeHeaderGeo::from_request(req);
    let deps = access::EngineDeps {
        store: &store,
        cfg: &cfg,
        registry: &registry,
        io: providers::ProviderIo {
            http: &http,
            dns: &dns,
        },
        geo: &geo,
    };
    let eval = access::evaluate(&deps, &ctx);

    let status = if eval.record.has_access { 200 } else { 403 };
    let body = if eval.record.has_access {
        "OK"
    } else {
        "Forbidden"
    };
    Response::builder()
        .status(status)
        .header("x-warden-status", eval.record.checked.as_str())
        .header("x-warden-session", eval.session_token)
        .body(body)
        .build()
}

#[http_component]
pub fn handle_request(req: Request) -> Response {
    handle_request_impl(&req)
}
