// GUI implementation for PTV Near Me using egui/eframe
use crate::pnm_api::{GeocodeResponse, Geocoder, TransitApi};
use crate::pnm_config::Config;
use crate::pnm_controllers::{initial_center, AppState, DiscoveryController, RefreshTicket};
use crate::pnm_map::{MapSurface, MarkerHandle, PopupContent, PopupHandle, SketchMap};
use crate::pnm_models::{Coordinates, Departure, Notice, NoticeKind, Result, StopRecord};
use crate::pnm_registry::ModePolicy;
use crate::pnm_timetable::TimetableRequest;
use chrono::{DateTime, Local};
use eframe::egui;
use egui::{Align2, Color32, FontId, Rect, RichText, Sense, Stroke, Ui, Vec2};
use egui_extras::{Column, TableBuilder};
use log::debug;
use poll_promise::Promise;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MARKER_RADIUS: f32 = 10.0;
const GRID_SPACING_PX: f64 = 120.0;

// ============================================================================
// Application State
// ============================================================================

pub struct PNMApp {
    state: AppState<SketchMap>,
    discovery: DiscoveryController,
    api: Arc<dyn TransitApi>,
    geocoder: Arc<dyn Geocoder>,

    // Background fetches
    discovery_jobs: Vec<(RefreshTicket, Promise<Result<Vec<StopRecord>>>)>,
    timetable_jobs: Vec<(TimetableRequest, Promise<Result<Vec<Departure>>>)>,
    geocode_job: Option<Promise<Result<GeocodeResponse>>>,

    // Side panel
    query_input: String,
    show_stop_list: bool,
    show_regional: bool,

    notices: VecDeque<Notice>,
    map_rect: Rect,
    highlighted: Option<MarkerHandle>,
}

impl PNMApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        config: &Config,
        api: Arc<dyn TransitApi>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        let (center, notice) = initial_center(config);
        let mut app = Self {
            state: AppState::new(SketchMap::new(center, Config::DEFAULT_ZOOM), config),
            discovery: DiscoveryController::new(),
            api,
            geocoder,
            discovery_jobs: Vec::new(),
            timetable_jobs: Vec::new(),
            geocode_job: None,
            query_input: String::new(),
            show_stop_list: true,
            show_regional: config.mode_policy == ModePolicy::ShowAll,
            notices: VecDeque::new(),
            map_rect: Rect::ZERO,
            highlighted: None,
        };
        app.notices.extend(notice);

        if let Some(address) = &config.start_address {
            app.state.address_input_mut().push_str(address);
            app.start_geocode();
        }

        app
    }

    fn start_discovery(&mut self) {
        let ticket = self.discovery.begin(self.state.map.center());
        let api = Arc::clone(&self.api);
        let center = ticket.center();
        let promise = Promise::spawn_thread("nearme", move || api.nearby_stops(center));
        self.discovery_jobs.push((ticket, promise));
    }

    fn start_geocode(&mut self) {
        let address = self.state.address_input().trim().to_string();
        if address.is_empty() || self.geocode_job.is_some() {
            return;
        }
        let geocoder = Arc::clone(&self.geocoder);
        self.geocode_job = Some(Promise::spawn_thread("geocode", move || geocoder.geocode(&address)));
    }

    fn start_timetable(&mut self, request: Option<TimetableRequest>) {
        let Some(request) = request else {
            return;
        };
        let api = Arc::clone(&self.api);
        let stop = request.stop().clone();
        let limit = request.limit();
        let promise = Promise::spawn_thread("departures", move || api.departures(&stop, limit));
        self.timetable_jobs.push((request, promise));
    }

    fn open_timetable_for_marker(&mut self, marker: MarkerHandle) {
        let request = self.state.begin_timetable_for_marker(marker);
        self.start_timetable(request);
    }

    fn open_timetable_for_row(&mut self, index: usize) {
        let request = self.state.begin_timetable_for_row(index);
        self.start_timetable(request);
    }

    /// Hands finished fetches back to the core, on the UI thread.
    fn poll_jobs(&mut self) {
        let mut pending = Vec::new();
        for (ticket, promise) in self.discovery_jobs.drain(..) {
            match promise.try_take() {
                Ok(result) => {
                    let outcome = self.discovery.complete(&mut self.state, ticket, result);
                    debug!(
                        "Refresh #{} finished: {:?} (latest applied #{})",
                        ticket.seq(),
                        outcome,
                        self.discovery.latest_applied()
                    );
                }
                Err(promise) => pending.push((ticket, promise)),
            }
        }
        self.discovery_jobs = pending;

        let mut pending = Vec::new();
        for (request, promise) in self.timetable_jobs.drain(..) {
            match promise.try_take() {
                Ok(result) => {
                    self.state.complete_timetable(request, result);
                }
                Err(promise) => pending.push((request, promise)),
            }
        }
        self.timetable_jobs = pending;

        if let Some(promise) = self.geocode_job.take() {
            match promise.try_take() {
                Ok(result) => {
                    // a successful lookup moves the map; the next idle refreshes
                    if let Err(e) = self.state.apply_geocode(result) {
                        debug!("Address lookup ended without a move: {}", e);
                    }
                }
                Err(promise) => self.geocode_job = Some(promise),
            }
        }
    }

    fn is_busy(&self) -> bool {
        !self.discovery_jobs.is_empty() || !self.timetable_jobs.is_empty() || self.geocode_job.is_some()
    }
}

impl eframe::App for PNMApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_jobs();
        self.notices.extend(self.state.take_notices());

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            self.show_header(ui);
        });

        if self.show_stop_list {
            egui::SidePanel::right("stop_panel").min_width(240.0).show(ctx, |ui| {
                self.show_stop_panel(ui);
            });
        } else {
            self.highlighted = None;
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                self.show_map(ui);
            });

        self.show_popups(ctx);
        self.show_notice(ctx);

        if self.state.map.settle() {
            self.state.on_viewport_idle();
            self.start_discovery();
        }

        let now = Instant::now();
        let bouncing = self
            .state
            .map
            .markers()
            .any(|(handle, _)| self.state.map.is_bouncing(handle, now));
        if self.is_busy() || bouncing || self.state.map.is_settling() {
            ctx.request_repaint_after(Duration::from_millis(50));
        } else {
            ctx.request_repaint_after(Duration::from_secs(1));
        }
    }
}

// ============================================================================
// View Implementations
// ============================================================================

impl PNMApp {
    fn show_header(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            ui.heading("🚊 PTV Near Me");
            ui.separator();

            ui.label("Address:");
            let input = ui.add(
                egui::TextEdit::singleline(self.state.address_input_mut())
                    .hint_text("Flinders Street Station")
                    .desired_width(280.0),
            );
            let submitted = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let busy = self.geocode_job.is_some();
            let go = ui.add_enabled(!busy, egui::Button::new("Go")).clicked();
            if (go || submitted) && !busy {
                self.start_geocode();
            }
            if busy {
                ui.spinner();
            }
            if let Some(center) = self.state.center_marker() {
                if ui.button("⌖").on_hover_text("Back to the searched address").clicked() {
                    if let Some(position) = self.state.map.marker(center).map(|m| m.position) {
                        self.state.map.set_center(position);
                    }
                }
            }

            ui.separator();
            if ui.checkbox(&mut self.show_regional, "Show v/Line").changed() {
                let policy = if self.show_regional {
                    ModePolicy::ShowAll
                } else {
                    ModePolicy::ExcludeRegional
                };
                self.state.set_mode_policy(policy);
                self.start_discovery();
            }
            if ui.selectable_label(self.show_stop_list, "🚏 Stops").clicked() {
                self.show_stop_list = !self.show_stop_list;
                if !self.show_stop_list {
                    self.query_input.clear();
                    self.state.reset_query();
                }
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let now: DateTime<Local> = Local::now();
                ui.label(now.format("%H:%M:%S").to_string());
                if !self.discovery_jobs.is_empty() {
                    ui.spinner();
                }
            });
        });
    }

    fn show_stop_panel(&mut self, ui: &mut Ui) {
        ui.heading(format!("Stops in view ({}/{})", self.state.stop_list().len(), self.state.registry().len()));
        ui.separator();

        ui.horizontal(|ui| {
            ui.label("Search:");
            if ui.text_edit_singleline(&mut self.query_input).changed() {
                self.state.set_query(&self.query_input);
            }
            if ui.button("Clear").clicked() {
                self.query_input.clear();
                self.state.reset_query();
            }
        });

        ui.separator();

        let stops = self.state.stop_list().to_vec();
        let registry = self.state.registry();
        let nothing_found = registry.is_empty();
        let mut selected = None;
        let mut hovered = None;
        egui::ScrollArea::vertical().show(ui, |ui| {
            if nothing_found {
                ui.label("No stops found here. Move or zoom out the map.");
            } else if stops.is_empty() {
                ui.label("No stops match. Move the map or clear the search.");
            }
            for (index, stop) in stops.iter().enumerate() {
                let text = format!("{} {}", stop.route_type.icon().glyph(), stop.name);
                let row = ui
                    .selectable_label(false, text)
                    .on_hover_text(format!("{} stop {}", stop.route_type.label(), stop.stop_id));
                if row.hovered() {
                    hovered = registry.find(stop.key()).map(|entry| entry.marker());
                }
                if row.clicked() {
                    selected = Some(index);
                }
            }
        });
        self.highlighted = hovered;

        if let Some(index) = selected {
            self.open_timetable_for_row(index);
        }
    }

    fn show_map(&mut self, ui: &mut Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;
        self.map_rect = rect;

        {
            let map = &mut self.state.map;
            map.set_viewport_size(rect.width() as f64, rect.height() as f64);
            if response.drag_started() {
                map.set_dragging(true);
            }
            if response.dragged() {
                let delta = response.drag_delta();
                map.pan_by_pixels(delta.x as f64, delta.y as f64);
            }
            if response.drag_stopped() {
                map.set_dragging(false);
            }
            if response.hovered() {
                let scroll = ui.input(|i| i.smooth_scroll_delta.y);
                if scroll != 0.0 {
                    map.zoom_by(scroll as f64 / 120.0);
                }
            }
        }

        painter.rect_filled(rect, 0.0, Color32::from_rgb(236, 240, 228));
        self.draw_grid(&painter, rect);

        let map = &self.state.map;
        let now = Instant::now();
        let time = ui.input(|i| i.time);
        let hover = response.hover_pos();
        let mut hovered_title = None;

        for (handle, marker) in map.markers() {
            if !marker.visible {
                continue;
            }
            let (x, y) = map.project(marker.position);
            let mut pos = rect.min + Vec2::new(x as f32, y as f32);
            if !rect.expand(MARKER_RADIUS).contains(pos) {
                continue;
            }
            if map.is_bouncing(handle, now) {
                pos.y -= ((time * 10.0).sin().abs() * 10.0) as f32;
            }

            if self.highlighted == Some(handle) {
                painter.circle_stroke(pos, MARKER_RADIUS + 4.0, Stroke::new(2.0, Color32::BLACK));
            }
            let (r, g, b) = marker.icon.rgb();
            painter.circle(pos, MARKER_RADIUS, Color32::from_rgb(r, g, b), Stroke::new(1.5, Color32::WHITE));
            painter.text(
                pos,
                Align2::CENTER_CENTER,
                marker.icon.glyph(),
                FontId::proportional(11.0),
                Color32::WHITE,
            );
            if hover.is_some_and(|p| p.distance(pos) <= MARKER_RADIUS) {
                hovered_title = Some((pos, marker.title.clone()));
            }
        }

        if let Some(pointer) = hover {
            let local = pointer - rect.min;
            let under = map.unproject(local.x as f64, local.y as f64);
            painter.text(
                rect.left_bottom() + Vec2::new(6.0, -6.0),
                Align2::LEFT_BOTTOM,
                format!("{}  zoom {:.1}", under, map.zoom()),
                FontId::monospace(11.0),
                Color32::DARK_GRAY,
            );
        }

        if let Some((pos, title)) = hovered_title {
            painter.text(
                pos - Vec2::new(0.0, MARKER_RADIUS + 4.0),
                Align2::CENTER_BOTTOM,
                title,
                FontId::proportional(13.0),
                Color32::BLACK,
            );
        }

        if response.clicked() {
            if let Some(pointer) = response.interact_pointer_pos() {
                let local = pointer - rect.min;
                let hit = self.state.map.marker_at(
                    local.x as f64,
                    local.y as f64,
                    (MARKER_RADIUS + 2.0) as f64,
                );
                if let Some(marker) = hit {
                    self.open_timetable_for_marker(marker);
                }
            }
        }
    }

    fn draw_grid(&self, painter: &egui::Painter, rect: Rect) {
        let map = &self.state.map;
        let bounds = map.bounds();
        let step = GRID_SPACING_PX * map.degrees_per_pixel();
        let stroke = Stroke::new(1.0, Color32::from_rgb(215, 220, 205));
        let (sw, ne) = (bounds.south_west(), bounds.north_east());

        let mut lng = (sw.lng / step).floor() * step;
        while lng <= ne.lng {
            let (x, _) = map.project(Coordinates::new(sw.lat, lng));
            let x = rect.min.x + x as f32;
            painter.line_segment([egui::pos2(x, rect.min.y), egui::pos2(x, rect.max.y)], stroke);
            lng += step;
        }

        let mut lat = (sw.lat / step).floor() * step;
        while lat <= ne.lat {
            let (_, y) = map.project(Coordinates::new(lat, sw.lng));
            let y = rect.min.y + y as f32;
            painter.line_segment([egui::pos2(rect.min.x, y), egui::pos2(rect.max.x, y)], stroke);
            lat += step;
        }
    }

    fn show_popups(&mut self, ctx: &egui::Context) {
        let open: Vec<(PopupHandle, MarkerHandle, PopupContent)> = self
            .state
            .map
            .open_popups()
            .map(|(popup, anchor, content)| (popup, anchor, content.clone()))
            .collect();

        for (popup, anchor, content) in open {
            let Some(marker) = self.state.map.marker(anchor) else {
                continue;
            };
            let (x, y) = self.state.map.project(marker.position);
            let pos = self.map_rect.min + Vec2::new(x as f32 + MARKER_RADIUS + 4.0, y as f32 - MARKER_RADIUS);

            let mut open = true;
            egui::Window::new(RichText::new(&content.title).strong())
                .id(egui::Id::new(("popup", popup)))
                .fixed_pos(pos)
                .collapsible(false)
                .resizable(false)
                .open(&mut open)
                .show(ctx, |ui| {
                    ui.label(&content.subtitle);
                    Self::show_timetable_table(ui, &content);
                });

            if !open {
                self.state.map.close_popup(popup);
            }
        }
    }

    fn show_timetable_table(ui: &mut Ui, content: &PopupContent) {
        if content.rows.is_empty() {
            ui.label("No upcoming departures");
            return;
        }

        TableBuilder::new(ui)
            .striped(true)
            .column(Column::auto().at_least(160.0))
            .column(Column::auto())
            .header(18.0, |mut header| {
                header.col(|ui| {
                    ui.strong("To:");
                });
                header.col(|ui| {
                    ui.strong("Time:");
                });
            })
            .body(|mut body| {
                for row in &content.rows {
                    body.row(18.0, |mut cells| {
                        cells.col(|ui| {
                            ui.label(&row.destination);
                        });
                        cells.col(|ui| {
                            ui.monospace(&row.time);
                        });
                    });
                }
            });
    }

    fn show_notice(&mut self, ctx: &egui::Context) {
        let Some(notice) = self.notices.front().cloned() else {
            return;
        };

        let title = match notice.kind {
            NoticeKind::Error => "❌ Error",
            NoticeKind::Info => "ℹ Notice",
        };
        let mut dismissed = false;
        egui::Window::new(title)
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, Vec2::ZERO)
            .show(ctx, |ui| {
                let color = match notice.kind {
                    NoticeKind::Error => Color32::RED,
                    NoticeKind::Info => ui.visuals().text_color(),
                };
                ui.colored_label(color, &notice.message);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });

        if dismissed {
            self.notices.pop_front();
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

pub fn run_gui(
    config: Config,
    api: Arc<dyn TransitApi>,
    geocoder: Arc<dyn Geocoder>,
) -> std::result::Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([800.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "PTV Near Me",
        options,
        Box::new(move |cc| Ok(Box::new(PNMApp::new(cc, &config, api, geocoder)))),
    )
}
