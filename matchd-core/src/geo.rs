//! Best-effort city/country lookup for a remote address (spec.md §9 open
//! question: "GeoIP"). No MaxMind-format database ships with this stack,
//! so the default implementation reports nothing; an operator who has one
//! can provide their own [`GeoLocator`].

use std::net::IpAddr;

#[derive(Debug, Clone, Default)]
pub struct GeoInfo {
    pub city: String,
    pub country: String,
    pub country_code: String,
}

pub trait GeoLocator: Send + Sync {
    fn locate(&self, addr: IpAddr) -> GeoInfo;
}

/// Always returns empty fields. Matches what the wire protocol expects for
/// a peer whose location genuinely can't be determined.
pub struct NullGeoLocator;

impl GeoLocator for NullGeoLocator {
    fn locate(&self, _addr: IpAddr) -> GeoInfo {
        GeoInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_locator_returns_empty_fields() {
        let info = NullGeoLocator.locate("127.0.0.1".parse().unwrap());
        assert!(info.city.is_empty());
        assert!(info.country.is_empty());
    }
}
