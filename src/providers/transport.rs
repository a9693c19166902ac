use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::Value;
use spin_sdk::http::{Method, Request, Response};

pub struct OutboundResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Outbound HTTP seam for provider adapters and the report outbox.
pub trait HttpTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<OutboundResponse, String>;
    fn post(&self, url: &str, body: &[u8], timeout: Duration) -> Result<OutboundResponse, String>;
}

/// DNS seam for the DNSBL adapter and the crawler reverse-DNS heuristic.
pub trait DnsResolver {
    fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, String>;

    /// PTR lookup for a visitor IP. Resolvers without PTR support report
    /// no hostname, which downgrades the crawler check to user-agent
    /// matching only.
    fn reverse_lookup(&self, ip: &str) -> Option<String> {
        let _ = ip;
        None
    }
}

pub struct SpinHttpTransport;

impl SpinHttpTransport {
    fn dispatch(&self, req: Request) -> Result<OutboundResponse, String> {
        // Spin outbound requests expose no per-request deadline; the circuit
        // breaker bounds repeated exposure to a slow upstream.
        let resp: Response = spin_sdk::http::run(spin_sdk::http::send::<_, Response>(req))
            .map_err(|err| format!("outbound request failed ({:?})", err))?;
        Ok(OutboundResponse {
            status: *resp.status(),
            body: resp.body().to_vec(),
        })
    }
}

impl HttpTransport for SpinHttpTransport {
    fn get(&self, url: &str, _timeout: Duration) -> Result<OutboundResponse, String> {
        let mut builder = Request::builder();
        builder.method(Method::Get).uri(url);
        self.dispatch(builder.build())
    }

    fn post(&self, url: &str, body: &[u8], _timeout: Duration) -> Result<OutboundResponse, String> {
        let mut builder = Request::builder();
        builder
            .method(Method::Post)
            .uri(url)
            .header("content-type", "application/json")
            .body(body.to_vec());
        self.dispatch(builder.build())
    }
}

const DOH_ENDPOINT: &str = "https://cloudflare-dns.com/dns-query";
const TYPE_A: u64 = 1;
const TYPE_PTR: u64 = 12;
const RCODE_NOERROR: u64 = 0;
const RCODE_NXDOMAIN: u64 = 3;

/// Name resolution over DNS-over-HTTPS, the one lookup facility the
/// component actually has: the sandbox exposes no raw DNS, so A and PTR
/// queries ride the same outbound HTTP path as everything else.
pub struct SystemDnsResolver;

impl SystemDnsResolver {
    fn doh_query(&self, name: &str, record_type: &str) -> Result<Value, String> {
        let url = format!("{}?name={}&type={}", DOH_ENDPOINT, name, record_type);
        let mut builder = Request::builder();
        builder
            .method(Method::Get)
            .uri(url)
            .header("accept", "application/dns-json");
        let resp = SpinHttpTransport.dispatch(builder.build())?;
        if resp.status != 200 {
            return Err(format!("doh resolver answered status {}", resp.status));
        }
        serde_json::from_slice(&resp.body).map_err(|_| "doh payload was not json".to_string())
    }
}

fn rcode(value: &Value) -> Option<u64> {
    value.get("Status").and_then(Value::as_u64)
}

fn answers_of_type(value: &Value, record_type: u64) -> Vec<String> {
    value
        .get("Answer")
        .and_then(Value::as_array)
        .map(|answers| {
            answers
                .iter()
                .filter(|a| a.get("type").and_then(Value::as_u64) == Some(record_type))
                .filter_map(|a| a.get("data").and_then(Value::as_str))
                .map(|data| data.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// NXDOMAIN is a definitive empty answer (for a DNSBL: not listed); any
/// other non-success rcode is a resolver failure.
fn parse_a_response(value: &Value) -> Result<Vec<Ipv4Addr>, String> {
    match rcode(value) {
        Some(RCODE_NOERROR) => Ok(answers_of_type(value, TYPE_A)
            .iter()
            .filter_map(|data| data.parse().ok())
            .collect()),
        Some(RCODE_NXDOMAIN) => Ok(Vec::new()),
        Some(other) => Err(format!("doh resolver returned rcode {}", other)),
        None => Err("doh payload carried no status".to_string()),
    }
}

fn parse_ptr_response(value: &Value) -> Option<String> {
    if rcode(value) != Some(RCODE_NOERROR) {
        return None;
    }
    answers_of_type(value, TYPE_PTR)
        .into_iter()
        .next()
        .map(|name| name.trim_end_matches('.').to_string())
}

fn ptr_name(ip: &str) -> Option<String> {
    let addr: Ipv4Addr = ip.parse().ok()?;
    let [a, b, c, d] = addr.octets();
    Some(format!("{}.{}.{}.{}.in-addr.arpa", d, c, b, a))
}

impl DnsResolver for SystemDnsResolver {
    fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, String> {
        parse_a_response(&self.doh_query(host, "A")?)
    }

    fn reverse_lookup(&self, ip: &str) -> Option<String> {
        let name = ptr_name(ip)?;
        let value = self.doh_query(&name, "PTR").ok()?;
        parse_ptr_response(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ptr_name_reverses_the_octets_under_in_addr_arpa() {
        assert_eq!(ptr_name("1.2.3.4").as_deref(), Some("4.3.2.1.in-addr.arpa"));
        assert_eq!(ptr_name("not-an-ip"), None);
        assert_eq!(ptr_name("2001:db8::1"), None);
    }

    #[test]
    fn a_response_collects_only_a_records() {
        let value = json!({
            "Status": 0,
            "Answer": [
                {"name": "k.4.3.2.1.dnsbl.httpbl.org.", "type": 1, "data": "127.2.250.4"},
                {"name": "k.4.3.2.1.dnsbl.httpbl.org.", "type": 5, "data": "alias.example."}
            ]
        });
        assert_eq!(
            parse_a_response(&value).unwrap(),
            vec![Ipv4Addr::new(127, 2, 250, 4)]
        );
    }

    #[test]
    fn a_response_nxdomain_is_an_empty_answer_not_an_error() {
        let value = json!({ "Status": 3 });
        assert_eq!(parse_a_response(&value).unwrap(), Vec::<Ipv4Addr>::new());
    }

    #[test]
    fn a_response_servfail_is_a_resolver_failure() {
        let value = json!({ "Status": 2 });
        assert!(parse_a_response(&value).is_err());
        assert!(parse_a_response(&json!({"ok": true})).is_err());
    }

    #[test]
    fn ptr_response_takes_the_first_ptr_record_without_the_trailing_dot() {
        let value = json!({
            "Status": 0,
            "Answer": [
                {"name": "4.3.2.1.in-addr.arpa.", "type": 12, "data": "crawl-1-2-3-4.googlebot.com."}
            ]
        });
        assert_eq!(
            parse_ptr_response(&value).as_deref(),
            Some("crawl-1-2-3-4.googlebot.com")
        );
    }

    #[test]
    fn ptr_response_nxdomain_and_empty_answers_yield_no_hostname() {
        assert_eq!(parse_ptr_response(&json!({ "Status": 3 })), None);
        assert_eq!(parse_ptr_response(&json!({ "Status": 0, "Answer": [] })), None);
    }
}
