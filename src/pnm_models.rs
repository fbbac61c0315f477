// Domain models and API payloads for PTV (Public Transport Victoria) nearby stops
// Timetable API v2: http://timetableapi.ptv.vic.gov.au
//
// API Endpoints:
// - Stops near a point: /v2/nearme/latitude/{lat}/longitude/{lng}
// - Departures at a stop: /v2/mode/{route_type}/stop/{stop_id}/departures/by-destination/limit/{n}
// - Health check: /v2/healthcheck

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use geo::{coord, Intersects, Rect};
use log::warn;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Geometry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Coordinates { lat, lng }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// Geographic rectangle currently visible on the map. Edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    rect: Rect<f64>,
}

impl Bounds {
    pub fn new(south_west: Coordinates, north_east: Coordinates) -> Self {
        Bounds {
            rect: Rect::new(
                coord! { x: south_west.lng, y: south_west.lat },
                coord! { x: north_east.lng, y: north_east.lat },
            ),
        }
    }

    /// Rectangle of the given angular size centred on `center`.
    pub fn around(center: Coordinates, lat_span: f64, lng_span: f64) -> Self {
        let half_lat = lat_span.abs() / 2.0;
        let half_lng = lng_span.abs() / 2.0;
        Self::new(
            Coordinates::new(center.lat - half_lat, center.lng - half_lng),
            Coordinates::new(center.lat + half_lat, center.lng + half_lng),
        )
    }

    pub fn contains(&self, point: Coordinates) -> bool {
        self.rect.intersects(&coord! { x: point.lng, y: point.lat })
    }

    pub fn south_west(&self) -> Coordinates {
        let min = self.rect.min();
        Coordinates::new(min.y, min.x)
    }

    pub fn north_east(&self) -> Coordinates {
        let max = self.rect.max();
        Coordinates::new(max.y, max.x)
    }
}

// ============================================================================
// Transit modes
// ============================================================================

/// PTV transport mode ("route_type" in the API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteType {
    Train,
    Tram,
    MetroBus,
    RegionalCoachOrTrain,
    NightBus,
    Unknown(i64),
}

impl From<i64> for RouteType {
    fn from(code: i64) -> Self {
        match code {
            0 => RouteType::Train,
            1 => RouteType::Tram,
            2 => RouteType::MetroBus,
            3 => RouteType::RegionalCoachOrTrain,
            4 => RouteType::NightBus,
            other => RouteType::Unknown(other),
        }
    }
}

impl RouteType {
    pub fn code(self) -> i64 {
        match self {
            RouteType::Train => 0,
            RouteType::Tram => 1,
            RouteType::MetroBus => 2,
            RouteType::RegionalCoachOrTrain => 3,
            RouteType::NightBus => 4,
            RouteType::Unknown(code) => code,
        }
    }

    /// Label shown in the timetable popup heading.
    pub fn label(self) -> &'static str {
        match self {
            RouteType::Train => "Metro Train",
            RouteType::Tram => "Tram",
            RouteType::MetroBus => "Metro Bus",
            RouteType::RegionalCoachOrTrain => "vLine",
            RouteType::NightBus => "Nightrider",
            RouteType::Unknown(_) => "Unknown",
        }
    }

    /// Metro trains are identified by destination only; every other known
    /// mode prefixes its rows with the line number.
    pub fn shows_line_number(self) -> bool {
        !matches!(self, RouteType::Train | RouteType::Unknown(_))
    }

    pub fn icon(self) -> MarkerIcon {
        match self {
            RouteType::Train => MarkerIcon::Train,
            RouteType::Tram => MarkerIcon::Tram,
            RouteType::MetroBus => MarkerIcon::Bus,
            RouteType::RegionalCoachOrTrain => MarkerIcon::RegionalCoach,
            RouteType::NightBus => MarkerIcon::NightRider,
            RouteType::Unknown(_) => MarkerIcon::Unknown,
        }
    }
}

/// Icon drawn for a marker on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerIcon {
    Train,
    Tram,
    Bus,
    RegionalCoach,
    NightRider,
    Unknown,
    YouAreHere,
}

impl MarkerIcon {
    pub fn glyph(self) -> &'static str {
        match self {
            MarkerIcon::Train => "🚆",
            MarkerIcon::Tram => "🚊",
            MarkerIcon::Bus => "🚌",
            MarkerIcon::RegionalCoach => "🚍",
            MarkerIcon::NightRider => "🌙",
            MarkerIcon::Unknown => "❓",
            MarkerIcon::YouAreHere => "🚩",
        }
    }

    /// Marker colour as RGB.
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            MarkerIcon::Train => (0, 114, 206),
            MarkerIcon::Tram => (120, 190, 32),
            MarkerIcon::Bus => (255, 130, 0),
            MarkerIcon::RegionalCoach => (128, 0, 128),
            MarkerIcon::NightRider => (40, 40, 90),
            MarkerIcon::Unknown => (120, 120, 120),
            MarkerIcon::YouAreHere => (220, 30, 30),
        }
    }
}

// ============================================================================
// Stops and departures
// ============================================================================

/// Stop identity: `stop_id` is only unique together with the transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StopKey {
    pub stop_id: i64,
    pub route_type: RouteType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopRecord {
    pub name: String,
    pub stop_id: i64,
    pub route_type: RouteType,
    pub coordinates: Coordinates,
}

impl StopRecord {
    pub fn key(&self) -> StopKey {
        StopKey {
            stop_id: self.stop_id,
            route_type: self.route_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub destination: String,
    pub line_number: Option<String>,
    pub scheduled: DateTime<Utc>,
}

// ============================================================================
// API payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct NearMeItem {
    result: NearMeResult,
}

#[derive(Debug, Deserialize)]
struct NearMeResult {
    location_name: String,
    stop_id: i64,
    route_type: i64,
    lat: f64,
    lon: f64,
}

impl From<NearMeResult> for StopRecord {
    fn from(result: NearMeResult) -> Self {
        StopRecord {
            name: result.location_name,
            stop_id: result.stop_id,
            route_type: RouteType::from(result.route_type),
            coordinates: Coordinates::new(result.lat, result.lon),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeparturesPayload {
    values: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DepartureValue {
    platform: PlatformInfo,
    time_timetable_utc: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PlatformInfo {
    direction: DirectionInfo,
}

#[derive(Debug, Deserialize)]
struct DirectionInfo {
    direction_name: String,
    line: LineInfo,
}

#[derive(Debug, Deserialize)]
struct LineInfo {
    #[serde(default)]
    line_number: Option<serde_json::Value>,
}

/// Outlets and other non-stop locations carry a different shape; they are
/// recognised by `type` before any typed parsing. Untyped items count as stops.
fn is_stop_item(item: &serde_json::Value) -> bool {
    item.get("type")
        .and_then(|kind| kind.as_str())
        .is_none_or(|kind| kind == "stop")
}

/// Parses a nearme response. Items that do not describe a stop are skipped.
pub fn parse_nearby_stops(body: &str) -> Result<Vec<StopRecord>> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| PNMError::ParseError(format!("Invalid JSON response: {}", e)))?;

    let items = json
        .as_array()
        .ok_or_else(|| PNMError::ParseError("Expected a list of nearby locations".to_string()))?;

    let stops = items
        .iter()
        .filter(|item| is_stop_item(item))
        .filter_map(|item| match NearMeItem::deserialize(item) {
            Ok(parsed) => Some(StopRecord::from(parsed.result)),
            Err(e) => {
                warn!("Skipping malformed nearme item: {}", e);
                None
            }
        })
        .collect();

    Ok(stops)
}

pub fn parse_departures(body: &str) -> Result<Vec<Departure>> {
    let payload: DeparturesPayload = serde_json::from_str(body)
        .map_err(|e| PNMError::ParseError(format!("Invalid departures response: {}", e)))?;

    let departures = payload
        .values
        .iter()
        .filter_map(|value| match DepartureValue::deserialize(value) {
            Ok(parsed) => Some(Departure {
                destination: parsed.platform.direction.direction_name,
                line_number: parsed
                    .platform
                    .direction
                    .line
                    .line_number
                    .and_then(|n| match n {
                        serde_json::Value::String(s) => Some(s),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    }),
                scheduled: parsed.time_timetable_utc,
            }),
            Err(e) => {
                warn!("Skipping malformed departure: {}", e);
                None
            }
        })
        .collect();

    Ok(departures)
}

/// Wall-clock `HH:MM:SS` of a UTC instant in the given zone.
pub fn format_wall_clock(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%H:%M:%S").to_string()
}

// ============================================================================
// Notices
// ============================================================================

pub const API_FAILURE_MESSAGE: &str = "Error with PTV API; please, check your internet connection";
pub const GEOLOCATION_MESSAGE: &str =
    "We could not locate where you are; please use the address input instead";
pub const GEOCODER_FAILURE_MESSAGE: &str =
    "Error with the address lookup; please, check your internet connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Error,
    Info,
}

/// User-visible alert raised by the core and drained by a front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Notice {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Notice {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Error)]
pub enum PNMError {
    #[error("Network error: {0}")]
    NetworkFailure(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Geocode unsuccessful: {0}")]
    GeocodeNotFound(String),
    #[error("Geolocation unavailable")]
    GeolocationUnavailable,
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, PNMError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_route_type_codes() {
        assert_eq!(RouteType::from(0), RouteType::Train);
        assert_eq!(RouteType::from(3), RouteType::RegionalCoachOrTrain);
        assert_eq!(RouteType::from(7), RouteType::Unknown(7));
        assert_eq!(RouteType::Unknown(7).code(), 7);
        assert_eq!(RouteType::NightBus.code(), 4);
    }

    #[test]
    fn test_route_labels_and_prefix() {
        assert_eq!(RouteType::Train.label(), "Metro Train");
        assert_eq!(RouteType::RegionalCoachOrTrain.label(), "vLine");
        assert_eq!(RouteType::Unknown(9).label(), "Unknown");
        assert!(!RouteType::Train.shows_line_number());
        assert!(RouteType::Tram.shows_line_number());
        assert!(RouteType::NightBus.shows_line_number());
    }

    #[test]
    fn test_icon_resolver() {
        assert_eq!(RouteType::Tram.icon(), MarkerIcon::Tram);
        assert_eq!(RouteType::Unknown(42).icon(), MarkerIcon::Unknown);
        assert_eq!(RouteType::RegionalCoachOrTrain.icon(), MarkerIcon::RegionalCoach);
    }

    #[test]
    fn test_bounds_contains_edges() {
        let bounds = Bounds::new(Coordinates::new(-38.0, 144.0), Coordinates::new(-37.0, 145.0));
        assert!(bounds.contains(Coordinates::new(-37.5, 144.5)));
        assert!(bounds.contains(Coordinates::new(-37.0, 145.0)));
        assert!(!bounds.contains(Coordinates::new(-36.9, 144.5)));
        assert!(!bounds.contains(Coordinates::new(-37.5, 145.1)));
    }

    #[test]
    fn test_bounds_around_center() {
        let bounds = Bounds::around(Coordinates::new(-37.814, 144.963), 0.02, 0.04);
        let sw = bounds.south_west();
        let ne = bounds.north_east();
        assert!((sw.lat - -37.824).abs() < 1e-9);
        assert!((ne.lng - 144.983).abs() < 1e-9);
        assert!(bounds.contains(Coordinates::new(-37.814, 144.963)));
    }

    #[test]
    fn test_parse_nearby_stops() {
        let body = r#"[
            {"result": {"location_name": "Flinders Street", "stop_id": 1071, "route_type": 0,
                        "lat": -37.818, "lon": 144.967, "suburb": "Melbourne"}, "type": "stop"},
            {"result": {"location_name": "Broken"}, "type": "stop"},
            {"result": {"location_name": "Myki outlet", "stop_id": 5, "route_type": 1,
                        "lat": -37.8, "lon": 144.9}, "type": "outlet"},
            {"result": {"location_name": "Swanston St", "stop_id": 2001, "route_type": 1,
                        "lat": -37.817, "lon": 144.966}}
        ]"#;

        let stops = parse_nearby_stops(body).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].name, "Flinders Street");
        assert_eq!(stops[0].key(), StopKey { stop_id: 1071, route_type: RouteType::Train });
        assert_eq!(stops[1].coordinates, Coordinates::new(-37.817, 144.966));
    }

    #[test]
    fn test_outlets_are_recognised_before_parsing() {
        let outlet = serde_json::json!({"result": {"location_name": "Myki outlet", "lat": -37.8, "lon": 144.9},
                                        "type": "outlet"});
        assert!(!is_stop_item(&outlet));
        assert!(NearMeItem::deserialize(&outlet).is_err());

        assert!(is_stop_item(&serde_json::json!({"result": {}, "type": "stop"})));
        assert!(is_stop_item(&serde_json::json!({"result": {}})));

        let body = format!("[{}]", outlet);
        assert_eq!(parse_nearby_stops(&body).unwrap(), Vec::new());
    }

    #[test]
    fn test_parse_nearby_stops_rejects_non_list() {
        assert!(matches!(
            parse_nearby_stops(r#"{"values": []}"#),
            Err(PNMError::ParseError(_))
        ));
        assert!(parse_nearby_stops("not json").is_err());
    }

    #[test]
    fn test_parse_departures() {
        let body = r#"{"values": [
            {"platform": {"direction": {"direction_name": "St Kilda Beach",
                          "line": {"line_number": "96"}}},
             "time_timetable_utc": "2016-06-02T03:40:00Z"},
            {"platform": {"direction": {"direction_name": "Frankston",
                          "line": {"line_number": null}}},
             "time_timetable_utc": "2016-06-02T03:45:00Z"},
            {"platform": {}}
        ]}"#;

        let departures = parse_departures(body).unwrap();
        assert_eq!(
            departures,
            vec![
                Departure {
                    destination: "St Kilda Beach".to_string(),
                    line_number: Some("96".to_string()),
                    scheduled: Utc.with_ymd_and_hms(2016, 6, 2, 3, 40, 0).unwrap(),
                },
                Departure {
                    destination: "Frankston".to_string(),
                    line_number: None,
                    scheduled: Utc.with_ymd_and_hms(2016, 6, 2, 3, 45, 0).unwrap(),
                },
            ]
        );
    }

    #[test]
    fn test_format_wall_clock() {
        let instant = Utc.with_ymd_and_hms(2016, 6, 2, 3, 40, 5).unwrap();
        assert_eq!(format_wall_clock(instant, chrono_tz::Australia::Melbourne), "13:40:05");
        assert_eq!(format_wall_clock(instant, chrono_tz::UTC), "03:40:05");
    }
}
