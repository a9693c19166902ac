use std::net::Ipv4Addr;

use crate::config::ProviderSettings;
use crate::providers::{FetchError, ProviderId, ProviderIo, ReputationProvider, Verdict};

/// DNSBL lookup: an A query for `<key>.<d.c.b.a>.<zone>`. An answer is
/// valid only when its first octet is 127; the remaining octets decode to
/// days-since-activity, a 0-255 threat score, and a visitor-type bitmask.
///
/// Advisory source: the decoded result is normalized, cached and visible
/// in logs and metrics, but it never drives a denial on its own.
pub(crate) struct HttpBlProvider;

pub(crate) const HTTPBL: HttpBlProvider = HttpBlProvider;

const CATEGORY_LABELS: [&[&str]; 8] = [
    &["search_engine"],
    &["suspicious"],
    &["harvester"],
    &["suspicious", "harvester"],
    &["comment_spammer"],
    &["suspicious", "comment_spammer"],
    &["harvester", "comment_spammer"],
    &["suspicious", "harvester", "comment_spammer"],
];

impl ReputationProvider for HttpBlProvider {
    fn id(&self) -> ProviderId {
        ProviderId::HttpBl
    }

    fn is_configured(&self, settings: &ProviderSettings) -> bool {
        settings.api_key.is_some()
    }

    fn eligible_for_deny(&self) -> bool {
        false
    }

    fn fetch(
        &self,
        io: &ProviderIo<'_>,
        settings: &ProviderSettings,
        subject: &str,
    ) -> Result<Verdict, FetchError> {
        let key = settings.api_key.as_deref().ok_or(FetchError::KeyRejected)?;
        let ip: Ipv4Addr = subject
            .parse()
            .map_err(|_| FetchError::Malformed("subject is not an ipv4 address"))?;
        let host = query_host(key, ip, &settings.endpoint);
        let addrs = io.dns.lookup_ipv4(&host).map_err(FetchError::Transport)?;
        let Some(answer) = addrs.first() else {
            // NXDOMAIN: not listed.
            return Ok(Verdict::clean());
        };
        decode_answer(*answer)
    }
}

fn query_host(key: &str, ip: Ipv4Addr, zone: &str) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{}.{}.{}.{}.{}.{}", key, d, c, b, a, zone)
}

fn decode_answer(answer: Ipv4Addr) -> Result<Verdict, FetchError> {
    let [marker, days, threat, kind] = answer.octets();
    if marker != 127 {
        return Err(FetchError::Malformed("first answer octet is not 127"));
    }
    let mask = (kind & 0x07) as usize;
    let categories = CATEGORY_LABELS[mask];
    let raw = serde_json::json!({
        "days_since_activity": days,
        "threat_score": threat,
        "categories": categories,
    });
    // Visitor type 0 is a search engine; everything else is a listing.
    if mask == 0 {
        return Ok(Verdict {
            flagged: false,
            confidence: 0,
            raw,
        });
    }
    Ok(Verdict::hit(scale_threat(threat), raw))
}

fn scale_threat(threat: u8) -> u8 {
    (u32::from(threat) * 100 / 255) as u8
}
