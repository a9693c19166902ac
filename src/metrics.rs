// src/metrics.rs
// KV-backed counters for the access engine, exported in Prometheus text
// format at /metrics.

use crate::storage::{read_counter, KeyValueStore};

const METRICS_PREFIX: &str = "metrics:";

#[derive(Debug, Clone, Copy)]
pub enum MetricName {
    RequestsTotal,
    DecisionsTotal,
    DeniedTotal,
    SessionCacheHitsTotal,
    ProviderQueriesTotal,
    ProviderFailuresTotal,
    ProviderCacheHitsTotal,
    BreakerOpenSkipsTotal,
    SpamRejectedTotal,
    ReportsFlushedTotal,
}

impl MetricName {
    fn as_str(&self) -> &'static str {
        match self {
            MetricName::RequestsTotal => "requests_total",
            MetricName::DecisionsTotal => "decisions_total",
            MetricName::DeniedTotal => "denied_total",
            MetricName::SessionCacheHitsTotal => "session_cache_hits_total",
            MetricName::ProviderQueriesTotal => "provider_queries_total",
            MetricName::ProviderFailuresTotal => "provider_failures_total",
            MetricName::ProviderCacheHitsTotal => "provider_cache_hits_total",
            MetricName::BreakerOpenSkipsTotal => "breaker_open_skips_total",
            MetricName::SpamRejectedTotal => "spam_rejected_total",
            MetricName::ReportsFlushedTotal => "reports_flushed_total",
        }
    }
}

fn metric_key(metric: MetricName, label: Option<&str>) -> String {
    match label {
        Some(l) => format!("{}{}:{}", METRICS_PREFIX, metric.as_str(), l),
        None => format!("{}{}", METRICS_PREFIX, metric.as_str()),
    }
}

/// Increment a counter metric, optionally with a label. Failures are logged
/// and swallowed; telemetry never changes a decision.
pub fn increment<S: KeyValueStore>(store: &S, metric: MetricName, label: Option<&str>) {
    let key = metric_key(metric, label);
    if store.increment(&key, 1).is_err() {
        eprintln!("[metrics] failed incrementing {}", key);
    }
}

fn write_counter_line(output: &mut String, store: &impl KeyValueStore, name: &str, label: Option<(&str, &str)>) {
    let key = match label {
        Some((_, value)) => format!("{}{}:{}", METRICS_PREFIX, name, value),
        None => format!("{}{}", METRICS_PREFIX, name),
    };
    let count = read_counter(store, &key);
    match label {
        Some((tag, value)) => output.push_str(&format!(
            "gatewarden_{}{{{}=\"{}\"}} {}\n",
            name, tag, value, count
        )),
        None => output.push_str(&format!("gatewarden_{} {}\n", name, count)),
    }
}

/// Generate Prometheus-format metrics output.
pub fn render_metrics(store: &impl KeyValueStore) -> String {
    let mut output = String::new();

    output.push_str("# TYPE gatewarden_requests_total counter\n");
    write_counter_line(&mut output, store, "requests_total", None);

    output.push_str("\n# TYPE gatewarden_decisions_total counter\n");
    output.push_str("# HELP gatewarden_decisions_total Terminal access decisions by status\n");
    for status in [
        "authenticated",
        "cached",
        "safe_ip",
        "whitelisted",
        "permanent_block",
        "temporary_block",
        "blacklist",
        "none",
    ] {
        write_counter_line(&mut output, store, "decisions_total", Some(("status", status)));
    }

    output.push_str("\n# TYPE gatewarden_denied_total counter\n");
    write_counter_line(&mut output, store, "denied_total", None);

    output.push_str("\n# TYPE gatewarden_session_cache_hits_total counter\n");
    write_counter_line(&mut output, store, "session_cache_hits_total", None);

    for name in [
        "provider_queries_total",
        "provider_failures_total",
        "provider_cache_hits_total",
        "breaker_open_skips_total",
    ] {
        output.push_str(&format!("\n# TYPE gatewarden_{} counter\n", name));
        for provider in ["aggregator", "forumspam", "botscout", "httpbl"] {
            write_counter_line(&mut output, store, name, Some(("provider", provider)));
        }
    }

    output.push_str("\n# TYPE gatewarden_spam_rejected_total counter\n");
    for kind in ["comment", "registration", "contact", "generic"] {
        write_counter_line(&mut output, store, "spam_rejected_total", Some(("kind", kind)));
    }

    output.push_str("\n# TYPE gatewarden_reports_flushed_total counter\n");
    write_counter_line(&mut output, store, "reports_flushed_total", None);

    output
}

/// Handle GET /metrics.
pub fn handle_metrics(store: &impl KeyValueStore) -> spin_sdk::http::Response {
    let body = render_metrics(store);
    spin_sdk::http::Response::builder()
        .status(200)
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(body)
        .build()
}
