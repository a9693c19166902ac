// The submission spam guard end to end: token check, category logging,
// deferred report queue and its drain.

use gatewarden::config::Config;
use gatewarden::context::RequestContext;
use gatewarden::detlog::{self, DetectionKind};
use gatewarden::geo::NoGeo;
use gatewarden::storage::KeyValueStore;
use gatewarden::submission::{self, Submission, SubmissionKind, SubmissionVerdict};
use gatewarden::testing::{FakeHttpTransport, InMemoryStore};

fn ctx(page_url: &str) -> RequestContext {
    RequestContext {
        site_id: "default".to_string(),
        ip: "1.2.3.4".to_string(),
        user_agent: "Mozilla/5.0".to_string(),
        page_url: page_url.to_string(),
        authenticated: false,
        session_token: None,
        now: 1_700_000_000,
    }
}

fn guarded_cfg() -> Config {
    let mut cfg = Config::default();
    cfg.form_secret = Some("site-token".to_string());
    cfg.report_endpoint = Some("https://reports.example/ingest".to_string());
    cfg
}

#[test]
fn each_category_is_classified_and_logged_independently() {
    let store = InMemoryStore::default();
    let cfg = guarded_cfg();

    let cases = [
        (SubmissionKind::Comment, DetectionKind::Comment, "/comments"),
        (
            SubmissionKind::Registration,
            DetectionKind::Registration,
            "/register",
        ),
        (SubmissionKind::Contact, DetectionKind::Contact, "/contact"),
    ];
    for (kind, expected, page) in cases {
        let spam = Submission::from_form(kind, b"body=cheap+pills");
        let verdict = submission::classify(&store, &cfg, &NoGeo, &ctx(page), &spam);
        assert_eq!(verdict, SubmissionVerdict::Rejected);

        let ham = Submission::from_form(kind, b"body=hello&warden_token=site-token");
        let verdict = submission::classify(&store, &cfg, &NoGeo, &ctx(page), &ham);
        assert_eq!(verdict, SubmissionVerdict::Valid);

        let logged: Vec<_> = detlog::entries(&store)
            .into_iter()
            .filter(|e| e.kind == expected)
            .collect();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].page_url, page);
    }
}

#[test]
fn rejection_never_blocks_on_the_aggregation_endpoint() {
    let store = InMemoryStore::default();
    let cfg = guarded_cfg();

    // Classification queues the report without any outbound call.
    let spam = Submission::from_form(SubmissionKind::Comment, b"body=spam");
    let verdict = submission::classify(&store, &cfg, &NoGeo, &ctx("/comments"), &spam);
    assert_eq!(verdict, SubmissionVerdict::Rejected);
    let queued = store
        .get_keys()
        .unwrap()
        .into_iter()
        .filter(|k| k.starts_with("report_outbox:default:"))
        .count();
    assert_eq!(queued, 1);

    // A broken aggregator only affects the deferred drain.
    let broken = FakeHttpTransport::failing("connection refused");
    assert_eq!(submission::flush_reports(&store, &broken, &cfg, "default"), 0);

    // Once it recovers the queue empties and the payload is anonymized.
    let healthy = FakeHttpTransport::with_body(200, b"ok");
    assert_eq!(submission::flush_reports(&store, &healthy, &cfg, "default"), 1);
    let posts = healthy.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, "https://reports.example/ingest");
    let report: serde_json::Value = serde_json::from_slice(&posts[0].1).unwrap();
    assert_eq!(report["ip_masked"], "1.2.3.x");
    assert!(report.get("ip").is_none());
}

#[test]
fn guard_is_independent_of_the_ip_engine_state() {
    let store = InMemoryStore::default();
    let cfg = guarded_cfg();

    // A valid token passes even for an IP the engine has blacklisted.
    gatewarden::blacklist::insert_if_absent(
        &store,
        "default",
        "1.2.3.4",
        &gatewarden::blacklist::BlacklistEntry {
            source: gatewarden::providers::ProviderId::BotScout,
            data: serde_json::Value::Null,
            last_updated: 1_700_000_000,
        },
    );
    let ham = Submission::from_form(SubmissionKind::Generic, b"warden_token=site-token");
    let verdict = submission::classify(&store, &cfg, &NoGeo, &ctx("/form"), &ham);
    assert_eq!(verdict, SubmissionVerdict::Valid);
}
