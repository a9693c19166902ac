// src/safelist.rs
// Administrator allow-list matching and known-crawler heuristics.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::providers::transport::DnsResolver;

/// True when `ip` matches an allow-list pattern: an exact address or a CIDR
/// range.
pub fn is_allowlisted(ip: &str, patterns: &[String]) -> bool {
    let parsed: Option<IpAddr> = ip.parse().ok();
    patterns.iter().any(|pattern| {
        if pattern == ip {
            return true;
        }
        match (pattern.parse::<IpNet>(), parsed) {
            (Ok(net), Some(addr)) => net.contains(&addr),
            _ => false,
        }
    })
}

/// Case-insensitive user-agent signature match.
pub fn matches_bot_signature(user_agent: &str, signatures: &[String]) -> bool {
    if user_agent.is_empty() {
        return false;
    }
    let ua = user_agent.to_lowercase();
    signatures
        .iter()
        .any(|sig| !sig.is_empty() && ua.contains(&sig.to_lowercase()))
}

/// Reverse-DNS crawler verification: the PTR hostname must equal one of the
/// reputable crawler domains or end with `.<domain>`. A visitor controlling
/// its own PTR record can claim any hostname, so this is consumed as a
/// grant-only heuristic.
pub fn is_verified_crawler(ip: &str, resolver: &dyn DnsResolver, domains: &[String]) -> bool {
    let Some(hostname) = resolver.reverse_lookup(ip) else {
        return false;
    };
    let hostname = hostname.trim_end_matches('.').to_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.trim_end_matches('.').to_lowercase();
        !domain.is_empty()
            && (hostname == domain || hostname.ends_with(&format!(".{}", domain)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDnsResolver;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn allowlist_matches_exact_ips_and_cidr_ranges() {
        let patterns = strings(&["1.2.3.4", "10.8.0.0/16"]);
        assert!(is_allowlisted("1.2.3.4", &patterns));
        assert!(is_allowlisted("10.8.44.2", &patterns));
        assert!(!is_allowlisted("10.9.0.1", &patterns));
        assert!(!is_allowlisted("5.6.7.8", &patterns));
    }

    #[test]
    fn allowlist_still_matches_exact_entries_for_unparseable_ips() {
        let patterns = strings(&["unknown"]);
        assert!(is_allowlisted("unknown", &patterns));
        assert!(!is_allowlisted("1.2.3.4", &patterns));
    }

    #[test]
    fn bot_signatures_match_case_insensitively() {
        let signatures = strings(&["googlebot", "bingbot"]);
        assert!(matches_bot_signature(
            "Mozilla/5.0 (compatible; Googlebot/2.1)",
            &signatures
        ));
        assert!(!matches_bot_signature("Mozilla/5.0 Firefox/120.0", &signatures));
        assert!(!matches_bot_signature("", &signatures));
    }

    #[test]
    fn crawler_check_requires_a_listed_ptr_suffix() {
        let domains = strings(&["googlebot.com", "search.msn.com"]);
        let resolver =
            FakeDnsResolver::default().with_ptr("1.2.3.4", "crawl-1-2-3-4.googlebot.com.");
        assert!(is_verified_crawler("1.2.3.4", &resolver, &domains));

        let impostor = FakeDnsResolver::default().with_ptr("5.6.7.8", "googlebot.com.evil.example");
        assert!(!is_verified_crawler("5.6.7.8", &impostor, &domains));

        let no_ptr = FakeDnsResolver::default();
        assert!(!is_verified_crawler("1.2.3.4", &no_ptr, &domains));
    }

    #[test]
    fn crawler_check_accepts_the_bare_domain() {
        let domains = strings(&["search.msn.com"]);
        let resolver = FakeDnsResolver::default().with_ptr("9.9.9.9", "SEARCH.MSN.COM");
        assert!(is_verified_crawler("9.9.9.9", &resolver, &domains));
    }
}
