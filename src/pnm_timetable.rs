// Departure timetables shown in marker popups
use crate::pnm_map::{MapSurface, PopupContent, PopupRow};
use crate::pnm_models::{format_wall_clock, Departure, Result, StopKey, StopRecord};
use crate::pnm_registry::MarkerRegistry;
use chrono_tz::Tz;
use log::{debug, error};
use std::collections::HashMap;

/// Pending departures fetch for one stop.
#[derive(Debug, Clone)]
pub struct TimetableRequest {
    ticket: u64,
    stop: StopRecord,
    limit: u32,
}

impl TimetableRequest {
    pub fn stop(&self) -> &StopRecord {
        &self.stop
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// A newer request for the same stop was issued after this one.
    Superseded,
    /// The stop's marker was removed while the fetch was in flight.
    Detached,
}

pub struct TimetableRenderer {
    max_departures: u32,
    timezone: Tz,
    next_ticket: u64,
    latest: HashMap<StopKey, u64>,
}

impl TimetableRenderer {
    pub const DEFAULT_MAX_DEPARTURES: u32 = 1;

    pub fn new(max_departures: u32, timezone: Tz) -> Self {
        TimetableRenderer {
            max_departures: max_departures.max(1),
            timezone,
            next_ticket: 0,
            latest: HashMap::new(),
        }
    }

    pub fn begin(&mut self, stop: &StopRecord) -> TimetableRequest {
        self.next_ticket += 1;
        self.latest.insert(stop.key(), self.next_ticket);
        TimetableRequest {
            ticket: self.next_ticket,
            stop: stop.clone(),
            limit: self.max_departures,
        }
    }

    pub fn build_content(&self, stop: &StopRecord, departures: &[Departure]) -> PopupContent {
        let with_line = stop.route_type.shows_line_number();
        let rows = departures
            .iter()
            .map(|departure| PopupRow {
                destination: match (&departure.line_number, with_line) {
                    (Some(line), true) => format!("{} - {}", line, departure.destination),
                    _ => departure.destination.clone(),
                },
                time: format_wall_clock(departure.scheduled, self.timezone),
            })
            .collect();

        PopupContent {
            title: format!("{} Stop", stop.route_type.label()),
            subtitle: format!("({})", stop.name),
            rows,
        }
    }

    /// Renders a finished fetch into the stop's popup.
    ///
    /// Responses for superseded requests or detached stops are dropped without
    /// touching the map. A failed fetch is returned as the error and leaves
    /// the popup as it was.
    pub fn complete<M>(
        &mut self,
        map: &mut M,
        registry: &mut MarkerRegistry,
        request: TimetableRequest,
        result: Result<Vec<Departure>>,
    ) -> Result<RenderOutcome>
    where
        M: MapSurface + ?Sized,
    {
        let key = request.stop.key();
        if self.latest.get(&key) != Some(&request.ticket) {
            debug!("Dropping superseded timetable for {}", request.stop.name);
            return Ok(RenderOutcome::Superseded);
        }
        self.latest.remove(&key);

        let departures = result.inspect_err(|e| {
            error!("Timetable request for {} failed: {}", request.stop.name, e);
        })?;

        let content = self.build_content(&request.stop, &departures);
        if registry.present_popup(map, key, content) {
            Ok(RenderOutcome::Rendered)
        } else {
            debug!("Stop {} left the map before its timetable arrived", request.stop.name);
            Ok(RenderOutcome::Detached)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnm_map::SketchMap;
    use crate::pnm_models::{Bounds, Coordinates, PNMError, RouteType};
    use crate::pnm_registry::ModePolicy;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn stop(name: &str, stop_id: i64, route_type: RouteType) -> StopRecord {
        StopRecord {
            name: name.to_string(),
            stop_id,
            route_type,
            coordinates: Coordinates::new(-37.817, 144.966),
        }
    }

    fn departure(destination: &str, line: Option<&str>, minute: u32) -> Departure {
        Departure {
            destination: destination.to_string(),
            line_number: line.map(str::to_string),
            scheduled: Utc.with_ymd_and_hms(2016, 6, 2, 3, minute, 0).unwrap(),
        }
    }

    fn setup(stops: &[StopRecord]) -> (SketchMap, MarkerRegistry) {
        let mut map = SketchMap::new(Coordinates::new(-37.817, 144.966), 17.0);
        let mut registry = MarkerRegistry::new(ModePolicy::ExcludeRegional);
        let bounds = Bounds::around(Coordinates::new(-37.817, 144.966), 0.01, 0.01);
        registry.reconcile(&mut map, stops, |c| bounds.contains(c));
        (map, registry)
    }

    fn renderer() -> TimetableRenderer {
        TimetableRenderer::new(1, chrono_tz::Australia::Melbourne)
    }

    #[test]
    fn test_train_rows_have_no_line_prefix() {
        let flinders = stop("Flinders Street", 1071, RouteType::Train);
        let content = renderer().build_content(&flinders, &[departure("Frankston", Some("FKN"), 40)]);

        assert_eq!(content.title, "Metro Train Stop");
        assert_eq!(content.subtitle, "(Flinders Street)");
        assert_eq!(
            content.rows,
            vec![PopupRow {
                destination: "Frankston".to_string(),
                time: "13:40:00".to_string(),
            }]
        );
    }

    #[test]
    fn test_tram_rows_have_line_prefix() {
        let swanston = stop("Swanston St", 2001, RouteType::Tram);
        let content = renderer().build_content(
            &swanston,
            &[departure("East Coburg", Some("1"), 41), departure("Unnumbered", None, 42)],
        );

        assert_eq!(content.title, "Tram Stop");
        assert_eq!(content.rows[0].destination, "1 - East Coburg");
        assert_eq!(content.rows[1].destination, "Unnumbered");
    }

    #[test]
    fn test_complete_opens_popup_on_marker() {
        let swanston = stop("Swanston St", 2001, RouteType::Tram);
        let (mut map, mut registry) = setup(std::slice::from_ref(&swanston));
        let mut renderer = renderer();

        let request = renderer.begin(&swanston);
        assert_eq!(request.limit(), 1);
        let outcome = renderer
            .complete(&mut map, &mut registry, request, Ok(vec![departure("East Coburg", Some("1"), 41)]))
            .unwrap();

        assert_eq!(outcome, RenderOutcome::Rendered);
        let entry = registry.find(swanston.key()).unwrap();
        let open: Vec<_> = map.open_popups().collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].1, entry.marker());
        assert_eq!(open[0].2.rows[0].time, "13:41:00");
    }

    #[test]
    fn test_older_response_is_superseded() {
        let swanston = stop("Swanston St", 2001, RouteType::Tram);
        let (mut map, mut registry) = setup(std::slice::from_ref(&swanston));
        let mut renderer = renderer();

        let first = renderer.begin(&swanston);
        let second = renderer.begin(&swanston);
        let outcome = renderer
            .complete(&mut map, &mut registry, second, Ok(vec![departure("Newer", Some("1"), 45)]))
            .unwrap();
        assert_eq!(outcome, RenderOutcome::Rendered);

        let outcome = renderer
            .complete(&mut map, &mut registry, first, Ok(vec![departure("Older", Some("1"), 40)]))
            .unwrap();
        assert_eq!(outcome, RenderOutcome::Superseded);
        let open: Vec<_> = map.open_popups().collect();
        assert_eq!(open[0].2.rows[0].destination, "1 - Newer");
    }

    #[test]
    fn test_failure_leaves_previous_render() {
        let swanston = stop("Swanston St", 2001, RouteType::Tram);
        let (mut map, mut registry) = setup(std::slice::from_ref(&swanston));
        let mut renderer = renderer();

        let request = renderer.begin(&swanston);
        renderer
            .complete(&mut map, &mut registry, request, Ok(vec![departure("East Coburg", Some("1"), 41)]))
            .unwrap();

        let request = renderer.begin(&swanston);
        let result = renderer.complete(
            &mut map,
            &mut registry,
            request,
            Err(PNMError::NetworkFailure("timed out".to_string())),
        );

        assert!(matches!(result, Err(PNMError::NetworkFailure(_))));
        let open: Vec<_> = map.open_popups().collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].2.rows[0].destination, "1 - East Coburg");
    }

    #[test]
    fn test_detached_stop_is_not_rendered() {
        let swanston = stop("Swanston St", 2001, RouteType::Tram);
        let (mut map, mut registry) = setup(std::slice::from_ref(&swanston));
        let mut renderer = renderer();

        let request = renderer.begin(&swanston);
        registry.clear(&mut map);
        let outcome = renderer
            .complete(&mut map, &mut registry, request, Ok(Vec::new()))
            .unwrap();

        assert_eq!(outcome, RenderOutcome::Detached);
        assert_eq!(map.open_popups().count(), 0);
    }

    #[test]
    fn test_max_departures_is_at_least_one() {
        let swanston = stop("Swanston St", 2001, RouteType::Tram);
        assert_eq!(TimetableRenderer::new(0, chrono_tz::UTC).begin(&swanston).limit(), 1);
        assert_eq!(TimetableRenderer::new(5, chrono_tz::UTC).begin(&swanston).limit(), 5);
    }
}
