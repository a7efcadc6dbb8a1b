// Reverse geocoding against OpenStreetMap Nominatim
//
// Place names are cosmetic: any failure is logged and treated as "no name".

use std::time::Duration;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::{Result, SyncError};

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Short city names get the state appended to tell them apart
const SHORT_CITY_CHARS: usize = 9;

pub trait Geocoder: Sync {
    fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Option<String>;
}

#[derive(Debug, Default, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Address,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Address {
    pub city: Option<String>,
    pub town: Option<String>,
    pub village: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
}

impl Address {
    fn locality(&self) -> Option<&str> {
        self.city
            .as_deref()
            .or(self.town.as_deref())
            .or(self.village.as_deref())
    }
}

pub struct Nominatim {
    client: Client,
    /// Country code (ISO 3166-1 alpha-2) omitted from place names
    default_country: Option<String>,
}

impl Nominatim {
    pub fn new(default_country: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SyncError::Geocode(e.to_string()))?;

        Ok(Nominatim {
            client,
            default_country: default_country.map(|c| c.to_lowercase()),
        })
    }

    fn lookup(&self, latitude: f64, longitude: f64) -> Result<Address> {
        let response: ReverseResponse = self
            .client
            .get(NOMINATIM_URL)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("zoom", "10".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| SyncError::Geocode(e.to_string()))?;

        Ok(response.address)
    }
}

impl Geocoder for Nominatim {
    fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Option<String> {
        match self.lookup(latitude, longitude) {
            Ok(address) => place_name(&address, self.default_country.as_deref()),
            Err(e) => {
                log::warn!("reverse geocoding {:.5},{:.5} failed: {}", latitude, longitude, e);
                None
            }
        }
    }
}

/// "City", "City State" for short names, plus the country when it is not
/// the default one
pub fn place_name(address: &Address, default_country: Option<&str>) -> Option<String> {
    let city = address.locality()?;
    let home = match (&address.country_code, default_country) {
        (Some(code), Some(default)) => code.eq_ignore_ascii_case(default),
        _ => false,
    };

    let mut parts = vec![city];
    if city.chars().count() < SHORT_CITY_CHARS {
        if let Some(state) = address.state.as_deref().filter(|s| !s.is_empty()) {
            parts.push(state);
        }
    }
    if !home {
        if let Some(country) = address.country.as_deref() {
            parts.push(country);
        }
    }

    Some(parts.join(" "))
}

/// Make a place name safe to use inside a file name
pub fn geoname_cleanup(input: &str) -> String {
    input
        .trim()
        .chars()
        .map(|c| match c {
            '/' | ':' | '\\' | '.' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(city: &str, state: &str) -> Address {
        Address {
            city: Some(city.to_string()),
            state: Some(state.to_string()),
            country: Some("España".to_string()),
            country_code: Some("es".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_short_city_gets_state() {
        let name = place_name(&address("Teruel", "Aragón"), Some("es")).unwrap();
        assert_eq!(name, "Teruel Aragón");
    }

    #[test]
    fn test_long_city_abroad_gets_country() {
        let name = place_name(&address("Valdelinares", "Aragón"), Some("fr")).unwrap();
        assert_eq!(name, "Valdelinares España");
    }

    #[test]
    fn test_town_used_when_no_city() {
        let addr = Address {
            town: Some("Mora".to_string()),
            country_code: Some("es".to_string()),
            ..Default::default()
        };
        assert_eq!(place_name(&addr, Some("ES")).as_deref(), Some("Mora"));
        assert_eq!(place_name(&Address::default(), None), None);
    }

    #[test]
    fn test_geoname_cleanup() {
        assert_eq!(geoname_cleanup("  St. Louis/Missouri: \\x "), "St_ Louis_Missouri_ _x");
    }
}
