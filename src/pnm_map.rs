// Map surface abstraction and an in-memory implementation for the GUI and tests
use crate::pnm_models::{Bounds, Coordinates, MarkerIcon};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

// ============================================================================
// Handles and options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopupHandle(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerOptions {
    pub position: Coordinates,
    pub title: String,
    pub icon: MarkerIcon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupRow {
    pub destination: String,
    pub time: String,
}

/// Rendered timetable shown in a popup anchored to a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupContent {
    pub title: String,
    pub subtitle: String,
    pub rows: Vec<PopupRow>,
}

/// Capabilities the core needs from a map widget. Rendering is the widget's
/// business; the core only places markers and popups and reads the viewport.
pub trait MapSurface {
    fn center(&self) -> Coordinates;
    fn bounds(&self) -> Bounds;
    fn set_center(&mut self, center: Coordinates);

    fn add_marker(&mut self, options: MarkerOptions) -> MarkerHandle;
    fn remove_marker(&mut self, marker: MarkerHandle);
    fn set_marker_visible(&mut self, marker: MarkerHandle, visible: bool);
    fn animate_marker(&mut self, marker: MarkerHandle, duration: Duration);

    fn create_popup(&mut self) -> PopupHandle;
    fn set_popup_content(&mut self, popup: PopupHandle, content: PopupContent);
    fn open_popup(&mut self, popup: PopupHandle, anchor: MarkerHandle);
    fn close_popup(&mut self, popup: PopupHandle);
    fn remove_popup(&mut self, popup: PopupHandle);
}

// ============================================================================
// SketchMap
// ============================================================================

#[derive(Debug, Clone)]
pub struct SketchMarker {
    pub position: Coordinates,
    pub title: String,
    pub icon: MarkerIcon,
    pub visible: bool,
    pub bounce_until: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct SketchPopup {
    pub content: Option<PopupContent>,
    pub anchor: Option<MarkerHandle>,
}

/// Flat (equirectangular) viewport with Web-Mercator-like zoom levels.
pub struct SketchMap {
    center: Coordinates,
    zoom: f64,
    viewport: (f64, f64),
    markers: BTreeMap<MarkerHandle, SketchMarker>,
    popups: BTreeMap<PopupHandle, SketchPopup>,
    next_id: u64,
    moved: bool,
    last_change: Option<Instant>,
    dragging: bool,
}

impl SketchMap {
    pub const MIN_ZOOM: f64 = 3.0;
    pub const MAX_ZOOM: f64 = 20.0;
    const TILE_SIZE: f64 = 256.0;
    const MAX_LATITUDE: f64 = 85.0;
    /// How long the viewport must stay unchanged before it counts as idle.
    pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

    pub fn new(center: Coordinates, zoom: f64) -> Self {
        SketchMap {
            center: Self::clamp_center(center),
            zoom: zoom.clamp(Self::MIN_ZOOM, Self::MAX_ZOOM),
            viewport: (800.0, 600.0),
            markers: BTreeMap::new(),
            popups: BTreeMap::new(),
            next_id: 1,
            // the first settle() after construction reports idle
            moved: true,
            last_change: None,
            dragging: false,
        }
    }

    fn clamp_center(center: Coordinates) -> Coordinates {
        let lng = if (-180.0..=180.0).contains(&center.lng) {
            center.lng
        } else {
            ((center.lng + 540.0) % 360.0) - 180.0
        };
        Coordinates::new(center.lat.clamp(-Self::MAX_LATITUDE, Self::MAX_LATITUDE), lng)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn set_viewport_size(&mut self, width: f64, height: f64) {
        let size = (width.max(1.0), height.max(1.0));
        if size != self.viewport {
            self.viewport = size;
            self.touch();
        }
    }

    pub fn degrees_per_pixel(&self) -> f64 {
        360.0 / (Self::TILE_SIZE * 2f64.powf(self.zoom))
    }

    pub fn pan_by_pixels(&mut self, dx: f64, dy: f64) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        let dpp = self.degrees_per_pixel();
        self.center = Self::clamp_center(Coordinates::new(
            self.center.lat + dy * dpp,
            self.center.lng - dx * dpp,
        ));
        self.touch();
    }

    pub fn zoom_by(&mut self, delta: f64) {
        let zoom = (self.zoom + delta).clamp(Self::MIN_ZOOM, Self::MAX_ZOOM);
        if zoom != self.zoom {
            self.zoom = zoom;
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.moved = true;
        self.last_change = Some(Instant::now());
    }

    pub fn set_dragging(&mut self, dragging: bool) {
        if self.dragging && !dragging && self.moved {
            // the quiet period starts when the pointer lets go
            self.last_change = Some(Instant::now());
        }
        self.dragging = dragging;
    }

    /// A change is waiting for its quiet period to pass.
    pub fn is_settling(&self) -> bool {
        self.moved
    }

    pub fn settle(&mut self) -> bool {
        self.settle_at(Instant::now())
    }

    /// Returns true once, after the viewport has been left alone for
    /// [`Self::QUIET_PERIOD`] as of `now`. Nothing settles during a drag.
    pub fn settle_at(&mut self, now: Instant) -> bool {
        if !self.moved || self.dragging {
            return false;
        }
        let quiet = self
            .last_change
            .is_none_or(|changed| now.saturating_duration_since(changed) >= Self::QUIET_PERIOD);
        if quiet {
            self.moved = false;
        }
        quiet
    }

    /// Pixel offset of `point` from the viewport's top-left corner.
    pub fn project(&self, point: Coordinates) -> (f64, f64) {
        let dpp = self.degrees_per_pixel();
        let (width, height) = self.viewport;
        (
            width / 2.0 + (point.lng - self.center.lng) / dpp,
            height / 2.0 - (point.lat - self.center.lat) / dpp,
        )
    }

    pub fn unproject(&self, x: f64, y: f64) -> Coordinates {
        let dpp = self.degrees_per_pixel();
        let (width, height) = self.viewport;
        Coordinates::new(
            self.center.lat - (y - height / 2.0) * dpp,
            self.center.lng + (x - width / 2.0) * dpp,
        )
    }

    /// Topmost visible marker within `radius` pixels of `(x, y)`.
    pub fn marker_at(&self, x: f64, y: f64, radius: f64) -> Option<MarkerHandle> {
        self.markers
            .iter()
            .rev()
            .filter(|(_, marker)| marker.visible)
            .find(|(_, marker)| {
                let (mx, my) = self.project(marker.position);
                (mx - x).hypot(my - y) <= radius
            })
            .map(|(handle, _)| *handle)
    }

    pub fn markers(&self) -> impl Iterator<Item = (MarkerHandle, &SketchMarker)> {
        self.markers.iter().map(|(handle, marker)| (*handle, marker))
    }

    pub fn marker(&self, marker: MarkerHandle) -> Option<&SketchMarker> {
        self.markers.get(&marker)
    }

    pub fn popup(&self, popup: PopupHandle) -> Option<&SketchPopup> {
        self.popups.get(&popup)
    }

    /// Popups currently open, with their anchor marker.
    pub fn open_popups(&self) -> impl Iterator<Item = (PopupHandle, MarkerHandle, &PopupContent)> {
        self.popups.iter().filter_map(|(handle, popup)| {
            match (popup.anchor, popup.content.as_ref()) {
                (Some(anchor), Some(content)) => Some((*handle, anchor, content)),
                _ => None,
            }
        })
    }

    pub fn is_bouncing(&self, marker: MarkerHandle, now: Instant) -> bool {
        self.markers
            .get(&marker)
            .and_then(|m| m.bounce_until)
            .is_some_and(|until| until > now)
    }
}

impl MapSurface for SketchMap {
    fn center(&self) -> Coordinates {
        self.center
    }

    fn bounds(&self) -> Bounds {
        let dpp = self.degrees_per_pixel();
        let (width, height) = self.viewport;
        Bounds::around(self.center, height * dpp, width * dpp)
    }

    fn set_center(&mut self, center: Coordinates) {
        self.center = Self::clamp_center(center);
        self.touch();
    }

    fn add_marker(&mut self, options: MarkerOptions) -> MarkerHandle {
        let handle = MarkerHandle(self.next_id());
        self.markers.insert(
            handle,
            SketchMarker {
                position: options.position,
                title: options.title,
                icon: options.icon,
                visible: true,
                bounce_until: None,
            },
        );
        handle
    }

    fn remove_marker(&mut self, marker: MarkerHandle) {
        self.markers.remove(&marker);
        for popup in self.popups.values_mut() {
            if popup.anchor == Some(marker) {
                popup.anchor = None;
            }
        }
    }

    fn set_marker_visible(&mut self, marker: MarkerHandle, visible: bool) {
        if let Some(m) = self.markers.get_mut(&marker) {
            m.visible = visible;
        }
    }

    fn animate_marker(&mut self, marker: MarkerHandle, duration: Duration) {
        if let Some(m) = self.markers.get_mut(&marker) {
            m.bounce_until = Some(Instant::now() + duration);
        }
    }

    fn create_popup(&mut self) -> PopupHandle {
        let handle = PopupHandle(self.next_id());
        self.popups.insert(handle, SketchPopup::default());
        handle
    }

    fn set_popup_content(&mut self, popup: PopupHandle, content: PopupContent) {
        if let Some(p) = self.popups.get_mut(&popup) {
            p.content = Some(content);
        }
    }

    fn open_popup(&mut self, popup: PopupHandle, anchor: MarkerHandle) {
        if !self.markers.contains_key(&anchor) {
            return;
        }
        if let Some(p) = self.popups.get_mut(&popup) {
            p.anchor = Some(anchor);
        }
    }

    fn close_popup(&mut self, popup: PopupHandle) {
        if let Some(p) = self.popups.get_mut(&popup) {
            p.anchor = None;
        }
    }

    fn remove_popup(&mut self, popup: PopupHandle) {
        self.popups.remove(&popup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn melbourne() -> Coordinates {
        Coordinates::new(-37.814, 144.963)
    }

    #[test]
    fn test_bounds_follow_viewport_and_zoom() {
        let mut map = SketchMap::new(melbourne(), 17.0);
        map.set_viewport_size(512.0, 256.0);
        let bounds = map.bounds();
        let dpp = map.degrees_per_pixel();
        assert!((bounds.north_east().lng - bounds.south_west().lng - 512.0 * dpp).abs() < 1e-9);

        map.zoom_by(-1.0);
        let wider = map.bounds();
        assert!(wider.north_east().lat > bounds.north_east().lat);
    }

    #[test]
    fn test_project_round_trip_center() {
        let map = SketchMap::new(melbourne(), 16.0);
        let (x, y) = map.project(melbourne());
        assert!((x - 400.0).abs() < 1e-6 && (y - 300.0).abs() < 1e-6);
        let back = map.unproject(x, y);
        assert!((back.lat - melbourne().lat).abs() < 1e-9);
    }

    fn later() -> Instant {
        Instant::now() + SketchMap::QUIET_PERIOD
    }

    #[test]
    fn test_settle_reports_idle_once() {
        let mut map = SketchMap::new(melbourne(), 17.0);
        assert!(map.settle());
        assert!(!map.settle());

        map.set_dragging(true);
        map.pan_by_pixels(10.0, 0.0);
        assert!(!map.settle_at(later()));
        map.set_dragging(false);
        assert!(!map.settle());
        assert!(map.settle_at(later()));
        assert!(!map.settle_at(later()));
        assert!(map.center().lng < melbourne().lng);
    }

    #[test]
    fn test_wheel_zoom_settles_once() {
        let mut map = SketchMap::new(melbourne(), 17.0);
        assert!(map.settle());

        let start = Instant::now();
        let mut idle = 0;
        for frame in 0..8u32 {
            map.zoom_by(0.125);
            if map.settle_at(start + Duration::from_millis(16) * frame) {
                idle += 1;
            }
        }
        assert_eq!(idle, 0);
        assert!(map.is_settling());

        for _ in 0..3 {
            if map.settle_at(later()) {
                idle += 1;
            }
        }
        assert_eq!(idle, 1);
        assert!(!map.is_settling());
        assert_eq!(map.zoom(), 18.0);
    }

    #[test]
    fn test_resize_waits_for_quiet_period() {
        let mut map = SketchMap::new(melbourne(), 17.0);
        assert!(map.settle());
        for width in [801.0, 820.0, 900.0] {
            map.set_viewport_size(width, 600.0);
            assert!(!map.settle());
        }
        assert!(map.settle_at(later()));
    }

    #[test]
    fn test_marker_hit_testing_skips_hidden() {
        let mut map = SketchMap::new(melbourne(), 17.0);
        let marker = map.add_marker(MarkerOptions {
            position: melbourne(),
            title: "Here".to_string(),
            icon: MarkerIcon::Tram,
        });
        assert_eq!(map.marker_at(402.0, 299.0, 8.0), Some(marker));
        map.set_marker_visible(marker, false);
        assert_eq!(map.marker_at(402.0, 299.0, 8.0), None);
    }

    #[test]
    fn test_removing_marker_detaches_popup() {
        let mut map = SketchMap::new(melbourne(), 17.0);
        let marker = map.add_marker(MarkerOptions {
            position: melbourne(),
            title: "Here".to_string(),
            icon: MarkerIcon::Bus,
        });
        let popup = map.create_popup();
        map.set_popup_content(
            popup,
            PopupContent {
                title: "Metro Bus Stop".to_string(),
                subtitle: "Here".to_string(),
                rows: Vec::new(),
            },
        );
        map.open_popup(popup, marker);
        assert_eq!(map.open_popups().count(), 1);

        map.remove_marker(marker);
        assert_eq!(map.open_popups().count(), 0);
        assert!(map.popup(popup).is_some());
    }
}
