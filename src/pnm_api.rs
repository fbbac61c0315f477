// HTTP clients for the PTV timetable API and the address geocoder
use crate::pnm_config::Config;
use crate::pnm_models::{
    parse_departures, parse_nearby_stops, Coordinates, Departure, PNMError, Result, StopRecord,
};
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use log::debug;
use reqwest::blocking;
use serde::Deserialize;
use sha1::Sha1;

// ============================================================================
// Seams
// ============================================================================

/// Transit data source. Calls block; front ends run them off the UI thread.
pub trait TransitApi: Send + Sync {
    fn nearby_stops(&self, center: Coordinates) -> Result<Vec<StopRecord>>;
    fn departures(&self, stop: &StopRecord, limit: u32) -> Result<Vec<Departure>>;
    fn health_check(&self) -> Result<HealthStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    #[serde(rename = "securityTokenOK")]
    pub security_token_ok: bool,
    #[serde(rename = "clientClockOK")]
    pub client_clock_ok: bool,
    #[serde(rename = "memcacheOK")]
    pub memcache_ok: bool,
    #[serde(rename = "databaseOK")]
    pub database_ok: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.security_token_ok && self.client_clock_ok && self.memcache_ok && self.database_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocodeStatus {
    Ok,
    ZeroResults,
    Denied(u16),
}

impl std::fmt::Display for GeocodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeStatus::Ok => write!(f, "OK"),
            GeocodeStatus::ZeroResults => write!(f, "ZERO_RESULTS"),
            GeocodeStatus::Denied(code) => write!(f, "REQUEST_DENIED ({})", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResponse {
    pub status: GeocodeStatus,
    pub location: Option<Coordinates>,
    pub display_name: Option<String>,
}

pub trait Geocoder: Send + Sync {
    fn geocode(&self, address: &str) -> Result<GeocodeResponse>;
}

// ============================================================================
// Request signing
// ============================================================================

type HmacSha1 = Hmac<Sha1>;

/// Appends the developer id and the HMAC-SHA1 signature PTV expects.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    dev_id: u32,
    key: String,
}

impl RequestSigner {
    pub fn new(dev_id: u32, key: impl Into<String>) -> Self {
        RequestSigner {
            dev_id,
            key: key.into(),
        }
    }

    /// Hex digest of `path_and_query` keyed with the secret.
    pub fn signature(&self, path_and_query: &str) -> Result<String> {
        let mut mac = HmacSha1::new_from_slice(self.key.as_bytes())
            .map_err(|e| PNMError::ConfigError(format!("Unusable signing key: {}", e)))?;
        mac.update(path_and_query.as_bytes());
        Ok(mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }

    /// `path` may already carry a query string; `devid` is added to it.
    pub fn signed_url(&self, base_url: &str, path: &str) -> Result<String> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let path_and_query = format!("{}{}devid={}", path, separator, self.dev_id);
        let signature = self.signature(&path_and_query)?;
        debug!("PTV request {}{}", base_url, path_and_query);
        Ok(format!("{}{}&signature={}", base_url, path_and_query, signature))
    }
}

// ============================================================================
// PTV client
// ============================================================================

pub struct PtvClient {
    base_url: String,
    signer: RequestSigner,
    client: blocking::Client,
}

impl PtvClient {
    pub fn new(config: &Config) -> Result<Self> {
        let key = config.secret_key.clone().ok_or_else(|| {
            PNMError::ConfigError("PTV_SECKEY is not set; PTV requests must be signed".to_string())
        })?;

        let client = blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PNMError::NetworkFailure(format!("Failed to create HTTP client: {}", e)))?;

        Ok(PtvClient {
            base_url: config.base_url.clone(),
            signer: RequestSigner::new(config.dev_id, key),
            client,
        })
    }

    pub fn nearme_path(center: Coordinates) -> String {
        format!("/v2/nearme/latitude/{}/longitude/{}", center.lat, center.lng)
    }

    pub fn departures_path(stop: &StopRecord, limit: u32) -> String {
        format!(
            "/v2/mode/{}/stop/{}/departures/by-destination/limit/{}",
            stop.route_type.code(),
            stop.stop_id,
            limit
        )
    }

    fn get(&self, path: &str) -> Result<String> {
        let url = self.signer.signed_url(&self.base_url, path)?;

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| PNMError::NetworkFailure(format!("PTV request failed: {}. Check your internet connection.", e)))?;

        if !response.status().is_success() {
            return Err(PNMError::NetworkFailure(format!("API returned error: {}", response.status())));
        }

        response
            .text()
            .map_err(|e| PNMError::NetworkFailure(format!("Failed to read response: {}", e)))
    }
}

impl TransitApi for PtvClient {
    fn nearby_stops(&self, center: Coordinates) -> Result<Vec<StopRecord>> {
        let body = self.get(&Self::nearme_path(center))?;
        parse_nearby_stops(&body)
    }

    fn departures(&self, stop: &StopRecord, limit: u32) -> Result<Vec<Departure>> {
        let body = self.get(&Self::departures_path(stop, limit))?;
        parse_departures(&body)
    }

    fn health_check(&self) -> Result<HealthStatus> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let body = self.get(&format!("/v2/healthcheck?timestamp={}", timestamp))?;
        serde_json::from_str(&body)
            .map_err(|e| PNMError::ParseError(format!("Invalid health check response: {}", e)))
    }
}

// ============================================================================
// Nominatim geocoder
// ============================================================================

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: Option<String>,
}

pub struct NominatimGeocoder {
    base_url: String,
    client: blocking::Client,
}

impl NominatimGeocoder {
    const USER_AGENT: &'static str = concat!("pnm/", env!("CARGO_PKG_VERSION"));

    pub fn new(config: &Config) -> Result<Self> {
        let client = blocking::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(Self::USER_AGENT)
            .build()
            .map_err(|e| PNMError::NetworkFailure(format!("Failed to create HTTP client: {}", e)))?;

        Ok(NominatimGeocoder {
            base_url: config.geocoder_url.clone(),
            client,
        })
    }
}

/// Turns a Nominatim search body into a response; an empty result list is
/// `ZeroResults`, not an error.
pub fn parse_geocode(body: &str) -> Result<GeocodeResponse> {
    let places: Vec<NominatimPlace> = serde_json::from_str(body)
        .map_err(|e| PNMError::ParseError(format!("Invalid geocoder response: {}", e)))?;

    let Some(place) = places.into_iter().next() else {
        return Ok(GeocodeResponse {
            status: GeocodeStatus::ZeroResults,
            location: None,
            display_name: None,
        });
    };

    let lat = place.lat.parse::<f64>();
    let lng = place.lon.parse::<f64>();
    match (lat, lng) {
        (Ok(lat), Ok(lng)) => Ok(GeocodeResponse {
            status: GeocodeStatus::Ok,
            location: Some(Coordinates::new(lat, lng)),
            display_name: place.display_name,
        }),
        _ => Err(PNMError::ParseError(format!(
            "Geocoder returned unreadable coordinates '{}', '{}'",
            place.lat, place.lon
        ))),
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, address: &str) -> Result<GeocodeResponse> {
        debug!("Geocoding '{}'", address);
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .map_err(|e| PNMError::NetworkFailure(format!("Geocoder request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            return Ok(GeocodeResponse {
                status: GeocodeStatus::Denied(status.as_u16()),
                location: None,
                display_name: None,
            });
        }
        if !status.is_success() {
            return Err(PNMError::NetworkFailure(format!("Geocoder returned error: {}", status)));
        }

        let body = response
            .text()
            .map_err(|e| PNMError::NetworkFailure(format!("Failed to read geocoder response: {}", e)))?;
        parse_geocode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnm_models::RouteType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hmac_sha1_signature() {
        // RFC 2202, test case 2
        let signer = RequestSigner::new(0, "Jefe");
        assert_eq!(
            signer.signature("what do ya want for nothing?").unwrap(),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn test_signed_url_appends_devid_then_signature() {
        let signer = RequestSigner::new(1000770, "secret");
        let path = PtvClient::nearme_path(Coordinates::new(-37.814, 144.963));
        assert_eq!(path, "/v2/nearme/latitude/-37.814/longitude/144.963");

        let url = signer.signed_url("http://timetableapi.ptv.vic.gov.au", &path).unwrap();
        let expected_signature = signer
            .signature("/v2/nearme/latitude/-37.814/longitude/144.963?devid=1000770")
            .unwrap();
        assert_eq!(
            url,
            format!(
                "http://timetableapi.ptv.vic.gov.au/v2/nearme/latitude/-37.814/longitude/144.963?devid=1000770&signature={}",
                expected_signature
            )
        );

        let health = signer.signed_url("http://h", "/v2/healthcheck?timestamp=t").unwrap();
        assert!(health.starts_with("http://h/v2/healthcheck?timestamp=t&devid=1000770&signature="));
    }

    #[test]
    fn test_departures_path() {
        let stop = StopRecord {
            name: "Swanston St".to_string(),
            stop_id: 2001,
            route_type: RouteType::Tram,
            coordinates: Coordinates::new(-37.817, 144.966),
        };
        assert_eq!(
            PtvClient::departures_path(&stop, 1),
            "/v2/mode/1/stop/2001/departures/by-destination/limit/1"
        );
    }

    #[test]
    fn test_client_requires_secret_key() {
        assert!(matches!(
            PtvClient::new(&Config::default()),
            Err(PNMError::ConfigError(_))
        ));
    }

    #[test]
    fn test_health_status_payload() {
        let status: HealthStatus = serde_json::from_str(
            r#"{"securityTokenOK": true, "clientClockOK": true, "memcacheOK": false, "databaseOK": true}"#,
        )
        .unwrap();
        assert!(!status.is_healthy());
        assert!(status.security_token_ok);
    }

    #[test]
    fn test_parse_geocode() {
        let found = parse_geocode(
            r#"[{"lat": "-37.8183", "lon": "144.9671", "display_name": "Flinders Street Station"}]"#,
        )
        .unwrap();
        assert_eq!(found.status, GeocodeStatus::Ok);
        assert_eq!(found.location, Some(Coordinates::new(-37.8183, 144.9671)));

        let missing = parse_geocode("[]").unwrap();
        assert_eq!(missing.status, GeocodeStatus::ZeroResults);
        assert_eq!(missing.location, None);

        assert!(parse_geocode(r#"[{"lat": "north", "lon": "144.9"}]"#).is_err());
    }
}
