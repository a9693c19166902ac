// src/geo.rs
// Geolocation consumed as a black box: ip -> location. The production
// implementation reads what the edge already resolved into headers.

use spin_sdk::http::Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub city: Option<String>,
}

pub trait GeoLocator {
    fn locate(&self, ip: &str) -> Option<GeoLocation>;
}

/// Location as resolved by the edge (X-Geo-Country / X-Geo-City headers),
/// captured once when the request context is built.
pub struct EdgeHeaderGeo {
    country: Option<String>,
    city: Option<String>,
}

impl EdgeHeaderGeo {
    pub fn from_request(req: &Request) -> Self {
        EdgeHeaderGeo {
            country: req
                .header("x-geo-country")
                .and_then(|v| v.as_str())
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_uppercase()),
            city: req
                .header("x-geo-city")
                .and_then(|v| v.as_str())
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string()),
        }
    }
}

impl GeoLocator for EdgeHeaderGeo {
    fn locate(&self, _ip: &str) -> Option<GeoLocation> {
        if self.country.is_none() && self.city.is_none() {
            return None;
        }
        Some(GeoLocation {
            country: self.country.clone(),
            city: self.city.clone(),
        })
    }
}

/// No geolocation available.
pub struct NoGeo;

impl GeoLocator for NoGeo {
    fn locate(&self, _ip: &str) -> Option<GeoLocation> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::request_with_headers;

    #[test]
    fn edge_headers_become_a_location() {
        let req = request_with_headers("/", &[("x-geo-country", "de"), ("x-geo-city", "Berlin")]);
        let geo = EdgeHeaderGeo::from_request(&req);
        let location = geo.locate("1.2.3.4").unwrap();
        assert_eq!(location.country.as_deref(), Some("DE"));
        assert_eq!(location.city.as_deref(), Some("Berlin"));
    }

    #[test]
    fn absent_headers_mean_no_location() {
        let req = request_with_headers("/", &[]);
        assert_eq!(EdgeHeaderGeo::from_request(&req).locate("1.2.3.4"), None);
    }
}
