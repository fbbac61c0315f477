// Side-panel list of the stops visible on the map
use crate::pnm_models::{Coordinates, StopKey, StopRecord};
use crate::pnm_registry::MarkerEntry;

/// Case-insensitive substring match; an empty query matches everything.
pub fn name_matches(name: &str, query: &str) -> bool {
    query.is_empty() || name.to_lowercase().contains(&query.to_lowercase())
}

/// Current text filter of the side panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryState {
    text: String,
}

impl QueryState {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns true when the query actually changed.
    pub fn set(&mut self, text: &str) -> bool {
        if self.text == text {
            return false;
        }
        self.text = text.to_string();
        true
    }

    pub fn reset(&mut self) -> bool {
        self.set("")
    }
}

#[derive(Debug, Default)]
pub struct StopListView {
    stops: Vec<StopRecord>,
}

impl StopListView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the list from scratch in registry order.
    pub fn recompute<F>(&mut self, query: &str, entries: &[MarkerEntry], contains: F) -> &[StopRecord]
    where
        F: Fn(Coordinates) -> bool,
    {
        self.stops = entries
            .iter()
            .filter(|entry| entry.is_visible() && contains(entry.record().coordinates))
            .filter(|entry| name_matches(&entry.record().name, query))
            .map(|entry| entry.record().clone())
            .collect();
        &self.stops
    }

    pub fn stops(&self) -> &[StopRecord] {
        &self.stops
    }

    /// Stop shown at `index` in the latest list.
    pub fn select(&self, index: usize) -> Option<StopKey> {
        self.stops.get(index).map(StopRecord::key)
    }

    pub fn clear(&mut self) {
        self.stops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnm_map::SketchMap;
    use crate::pnm_models::{Bounds, RouteType};
    use crate::pnm_registry::{MarkerRegistry, ModePolicy};
    use pretty_assertions::assert_eq;

    fn registry_with(stops: &[(&str, i64, f64, f64)], bounds: &Bounds) -> (SketchMap, MarkerRegistry) {
        let mut map = SketchMap::new(bounds.south_west(), 17.0);
        let mut registry = MarkerRegistry::new(ModePolicy::ExcludeRegional);
        let records: Vec<StopRecord> = stops
            .iter()
            .map(|(name, id, lat, lng)| StopRecord {
                name: name.to_string(),
                stop_id: *id,
                route_type: RouteType::Tram,
                coordinates: Coordinates::new(*lat, *lng),
            })
            .collect();
        registry.reconcile(&mut map, &records, |c| bounds.contains(c));
        (map, registry)
    }

    fn names(stops: &[StopRecord]) -> Vec<&str> {
        stops.iter().map(|s| s.name.as_str()).collect()
    }

    fn cbd() -> Bounds {
        Bounds::new(Coordinates::new(-37.83, 144.94), Coordinates::new(-37.80, 144.98))
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches("Flinders Street", ""));
        assert!(name_matches("Flinders Street", "flinders"));
        assert!(name_matches("Flinders Street", "STREET"));
        assert!(!name_matches("Southern Cross", "flinders"));
    }

    #[test]
    fn test_query_filters_case_insensitively() {
        let bounds = cbd();
        let (_map, registry) = registry_with(
            &[("Flinders Street", 1, -37.818, 144.967), ("Southern Cross", 2, -37.818, 144.952)],
            &bounds,
        );
        let mut view = StopListView::new();

        let list = view.recompute("flinders", registry.entries(), |c| bounds.contains(c));
        assert_eq!(names(list), vec!["Flinders Street"]);

        let list = view.recompute("", registry.entries(), |c| bounds.contains(c));
        assert_eq!(names(list), vec!["Flinders Street", "Southern Cross"]);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let bounds = cbd();
        let (_map, registry) = registry_with(
            &[
                ("Collins St", 3, -37.815, 144.96),
                ("Bourke St", 4, -37.813, 144.962),
                ("Collins St West", 5, -37.817, 144.955),
            ],
            &bounds,
        );
        let mut view = StopListView::new();

        let first = view.recompute("collins", registry.entries(), |c| bounds.contains(c)).to_vec();
        let second = view.recompute("collins", registry.entries(), |c| bounds.contains(c)).to_vec();

        assert_eq!(first, second);
        assert_eq!(names(&first), vec!["Collins St", "Collins St West"]);
    }

    #[test]
    fn test_out_of_bounds_entries_are_not_listed() {
        let bounds = cbd();
        let (mut map, mut registry) = registry_with(
            &[("Flinders Street", 1, -37.818, 144.967), ("Southern Cross", 2, -37.818, 144.952)],
            &bounds,
        );
        let west = Bounds::new(Coordinates::new(-37.83, 144.94), Coordinates::new(-37.80, 144.96));
        registry.sync_visibility(&mut map, |c| west.contains(c), "");

        let mut view = StopListView::new();
        let list = view.recompute("", registry.entries(), |c| west.contains(c));
        assert_eq!(names(list), vec!["Southern Cross"]);
    }

    #[test]
    fn test_select_maps_rows_to_stops() {
        let bounds = cbd();
        let (_map, registry) = registry_with(
            &[("Flinders Street", 1, -37.818, 144.967), ("Southern Cross", 2, -37.818, 144.952)],
            &bounds,
        );
        let mut view = StopListView::new();
        view.recompute("cross", registry.entries(), |c| bounds.contains(c));

        assert_eq!(view.select(0), Some(StopKey { stop_id: 2, route_type: RouteType::Tram }));
        assert_eq!(view.select(1), None);

        view.clear();
        assert!(view.stops().is_empty());
    }

    #[test]
    fn test_query_state_reports_changes() {
        let mut query = QueryState::default();
        assert!(!query.set(""));
        assert!(query.set("tram"));
        assert!(!query.set("tram"));
        assert_eq!(query.text(), "tram");
        assert!(query.reset());
        assert_eq!(query.text(), "");
    }
}
