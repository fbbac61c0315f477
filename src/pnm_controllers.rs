// Controllers for PTV Near Me: application state, refresh cycle and console loop
use crate::pnm_api::{GeocodeResponse, GeocodeStatus, Geocoder, TransitApi};
use crate::pnm_config::Config;
use crate::pnm_map::{MapSurface, MarkerHandle, MarkerOptions, SketchMap};
use crate::pnm_models::{
    Coordinates, Departure, MarkerIcon, Notice, PNMError, Result, StopKey, StopRecord,
    API_FAILURE_MESSAGE, GEOCODER_FAILURE_MESSAGE, GEOLOCATION_MESSAGE,
};
use crate::pnm_registry::{MarkerRegistry, ModePolicy, ReconcileSummary};
use crate::pnm_stop_list::{QueryState, StopListView};
use crate::pnm_timetable::{RenderOutcome, TimetableRenderer, TimetableRequest};
use crate::pnm_views::PNMViews;
use log::{debug, error, info, warn};
use std::io::{self, Write};

// ============================================================================
// Application state
// ============================================================================

/// Everything the front ends share: the map surface, the marker registry, the
/// side list and its query, pending notices. Passed explicitly to whoever
/// needs it.
pub struct AppState<M: MapSurface> {
    pub map: M,
    registry: MarkerRegistry,
    stop_list: StopListView,
    query: QueryState,
    timetable: TimetableRenderer,
    notices: Vec<Notice>,
    center_marker: Option<MarkerHandle>,
    address_input: String,
}

impl<M: MapSurface> AppState<M> {
    pub fn new(map: M, config: &Config) -> Self {
        AppState {
            map,
            registry: MarkerRegistry::new(config.mode_policy),
            stop_list: StopListView::new(),
            query: QueryState::default(),
            timetable: TimetableRenderer::new(config.max_departures, config.timezone),
            notices: Vec::new(),
            center_marker: None,
            address_input: String::new(),
        }
    }

    pub fn registry(&self) -> &MarkerRegistry {
        &self.registry
    }

    /// Latest side-panel list.
    pub fn stop_list(&self) -> &[StopRecord] {
        self.stop_list.stops()
    }

    pub fn query(&self) -> &str {
        self.query.text()
    }

    pub fn set_query(&mut self, query: &str) {
        if self.query.set(query) {
            self.refresh_list();
        }
    }

    pub fn reset_query(&mut self) {
        self.query.reset();
        self.refresh_list();
    }

    /// Switches the mode policy. Existing markers are dropped; the next refresh
    /// repopulates them under the new policy.
    pub fn set_mode_policy(&mut self, policy: ModePolicy) {
        if self.registry.policy() == policy {
            return;
        }
        info!("Mode policy changed to {:?}", policy);
        self.registry.clear(&mut self.map);
        self.registry = MarkerRegistry::new(policy);
        self.stop_list.clear();
    }

    pub fn address_input(&self) -> &str {
        &self.address_input
    }

    pub fn address_input_mut(&mut self) -> &mut String {
        &mut self.address_input
    }

    pub fn center_marker(&self) -> Option<MarkerHandle> {
        self.center_marker
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// The map settled after a pan or zoom.
    pub fn on_viewport_idle(&mut self) {
        self.refresh_list();
    }

    /// Syncs marker visibility with bounds and query, then rebuilds the list,
    /// so list and markers never disagree.
    pub fn refresh_list(&mut self) {
        let bounds = self.map.bounds();
        self.registry
            .sync_visibility(&mut self.map, |c| bounds.contains(c), self.query.text());
        self.stop_list
            .recompute(self.query.text(), self.registry.entries(), |c| bounds.contains(c));
    }

    fn apply_discovery(&mut self, stops: &[StopRecord]) -> ReconcileSummary {
        let bounds = self.map.bounds();
        let summary = self
            .registry
            .reconcile(&mut self.map, stops, |c| bounds.contains(c));
        self.refresh_list();
        summary
    }

    /// Replaces the "You are here" marker.
    pub fn set_center_marker(&mut self, position: Coordinates) {
        if let Some(previous) = self.center_marker.take() {
            self.map.remove_marker(previous);
        }
        self.center_marker = Some(self.map.add_marker(MarkerOptions {
            position,
            title: "You are here".to_string(),
            icon: MarkerIcon::YouAreHere,
        }));
    }

    /// Applies a finished address lookup. The address input is cleared in
    /// every case; the map only moves on success.
    pub fn apply_geocode(&mut self, result: Result<GeocodeResponse>) -> Result<Coordinates> {
        self.address_input.clear();

        let response = result.inspect_err(|e| {
            error!("Geocoder request failed: {}", e);
        });
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.notify(Notice::error(GEOCODER_FAILURE_MESSAGE));
                return Err(e);
            }
        };

        match (response.status, response.location) {
            (GeocodeStatus::Ok, Some(location)) => {
                info!(
                    "Centering map on {} {}",
                    response.display_name.as_deref().unwrap_or("address"),
                    location
                );
                self.map.set_center(location);
                self.set_center_marker(location);
                Ok(location)
            }
            (status, _) => {
                warn!("Geocode unsuccessful: {}", status);
                Err(PNMError::GeocodeNotFound(status.to_string()))
            }
        }
    }

    /// Click on a stop marker: bounce it and start its timetable request.
    pub fn begin_timetable_for_marker(&mut self, marker: MarkerHandle) -> Option<TimetableRequest> {
        let record = self.registry.find_by_marker(marker)?.record().clone();
        Some(self.begin_timetable(&record))
    }

    /// Selection of row `index` in the side list.
    pub fn begin_timetable_for_row(&mut self, index: usize) -> Option<TimetableRequest> {
        let key = self.stop_list.select(index)?;
        let record = self.registry.find(key)?.record().clone();
        Some(self.begin_timetable(&record))
    }

    fn begin_timetable(&mut self, record: &StopRecord) -> TimetableRequest {
        self.registry.animate(&mut self.map, record.key());
        self.timetable.begin(record)
    }

    pub fn complete_timetable(
        &mut self,
        request: TimetableRequest,
        result: Result<Vec<Departure>>,
    ) -> Option<RenderOutcome> {
        match self
            .timetable
            .complete(&mut self.map, &mut self.registry, request, result)
        {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                self.notify(Notice::error(API_FAILURE_MESSAGE));
                None
            }
        }
    }

    pub fn find_stop(&self, key: StopKey) -> Option<&StopRecord> {
        self.registry.find(key).map(|entry| entry.record())
    }
}

/// Start position: the configured location, or Melbourne CBD with a notice
/// when the user's position is unknown.
pub fn initial_center(config: &Config) -> (Coordinates, Option<Notice>) {
    match config.locate() {
        Ok(center) => (center, None),
        Err(e) => {
            warn!("{}; using the default center", e);
            (Config::DEFAULT_LOCATION, Some(Notice::info(GEOLOCATION_MESSAGE)))
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Handle for one nearby-stops fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshTicket {
    seq: u64,
    center: Coordinates,
}

impl RefreshTicket {
    pub fn center(&self) -> Coordinates {
        self.center
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(ReconcileSummary),
    /// A newer refresh was issued; this result was dropped.
    Stale,
    Failed,
}

/// Sequences discovery refreshes so only the latest issued one is applied.
#[derive(Debug, Default)]
pub struct DiscoveryController {
    latest_issued: u64,
    latest_applied: u64,
}

impl DiscoveryController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, center: Coordinates) -> RefreshTicket {
        self.latest_issued += 1;
        debug!("Refresh #{} around {}", self.latest_issued, center);
        RefreshTicket {
            seq: self.latest_issued,
            center,
        }
    }

    pub fn latest_applied(&self) -> u64 {
        self.latest_applied
    }

    /// Applies a finished fetch. The registry is only touched when the fetch
    /// succeeded and no newer refresh has been issued since.
    pub fn complete<M: MapSurface>(
        &mut self,
        state: &mut AppState<M>,
        ticket: RefreshTicket,
        result: Result<Vec<StopRecord>>,
    ) -> RefreshOutcome {
        if ticket.seq != self.latest_issued {
            debug!(
                "Dropping refresh #{} (latest is #{})",
                ticket.seq, self.latest_issued
            );
            return RefreshOutcome::Stale;
        }

        match result {
            Ok(stops) => {
                let summary = state.apply_discovery(&stops);
                self.latest_applied = ticket.seq;
                info!(
                    "Refresh #{}: {} stops discovered, {} listed",
                    ticket.seq,
                    stops.len(),
                    state.stop_list().len()
                );
                RefreshOutcome::Applied(summary)
            }
            Err(e) => {
                error!("Nearby stops request failed: {}", e);
                state.notify(Notice::error(API_FAILURE_MESSAGE));
                RefreshOutcome::Failed
            }
        }
    }

    pub fn refresh_blocking<M: MapSurface>(
        &mut self,
        state: &mut AppState<M>,
        api: &dyn TransitApi,
        center: Coordinates,
    ) -> RefreshOutcome {
        let ticket = self.begin(center);
        let result = api.nearby_stops(ticket.center());
        self.complete(state, ticket, result)
    }
}

// ============================================================================
// Console front end
// ============================================================================

pub struct PNMControllers;

impl PNMControllers {
    /// Prints the PTV health check result.
    pub fn run_health_check(api: &dyn TransitApi) -> Result<()> {
        let status = api.health_check()?;
        PNMViews::show_health(&status);
        Ok(())
    }

    /// Text interface loop
    pub fn run_console(config: &Config, api: &dyn TransitApi, geocoder: &dyn Geocoder) {
        PNMViews::show_welcome();

        let (center, notice) = initial_center(config);
        let mut state = AppState::new(SketchMap::new(center, Config::DEFAULT_ZOOM), config);
        let mut discovery = DiscoveryController::new();
        if let Some(notice) = notice {
            state.notify(notice);
        }

        if let Some(address) = &config.start_address {
            Self::handle_address(&mut state, geocoder, address);
        }
        Self::refresh(&mut state, &mut discovery, api);

        loop {
            Self::flush_notices(&mut state);
            PNMViews::show_stop_list(state.stop_list(), state.query(), state.map.center());
            PNMViews::show_menu();

            match Self::read_input().trim() {
                "1" => {
                    let address = PNMViews::prompt_address();
                    if address.is_empty() {
                        println!("\n⚠️  No input provided");
                        continue;
                    }
                    if Self::handle_address(&mut state, geocoder, &address) {
                        Self::refresh(&mut state, &mut discovery, api);
                    }
                }
                "2" => {
                    let query = PNMViews::prompt_query();
                    state.set_query(&query);
                }
                "3" => {
                    state.reset_query();
                }
                "4" => {
                    Self::handle_timetable(&mut state, api);
                }
                "5" => {
                    state.map.zoom_by(-1.0);
                    Self::refresh(&mut state, &mut discovery, api);
                }
                "6" => {
                    state.map.zoom_by(1.0);
                    Self::refresh(&mut state, &mut discovery, api);
                }
                "0" => {
                    PNMViews::goodbye_message();
                    break;
                }
                "" => {}
                other => {
                    println!("\n✗ Invalid option '{}'. Please select 0-6.", other);
                }
            }
        }
    }

    fn refresh(state: &mut AppState<SketchMap>, discovery: &mut DiscoveryController, api: &dyn TransitApi) {
        PNMViews::show_loading("Looking for stops nearby");
        let center = state.map.center();
        let outcome = discovery.refresh_blocking(state, api, center);
        PNMViews::clear_loading();
        state.on_viewport_idle();
        PNMViews::show_refresh_outcome(outcome);
    }

    /// Returns true when the map moved.
    fn handle_address(state: &mut AppState<SketchMap>, geocoder: &dyn Geocoder, address: &str) -> bool {
        state.address_input_mut().push_str(address);
        let result = geocoder.geocode(address);
        match state.apply_geocode(result) {
            Ok(location) => {
                println!("\n✓ Map centered at {}", location);
                true
            }
            Err(PNMError::GeocodeNotFound(status)) => {
                PNMViews::address_not_found(address, &status);
                false
            }
            Err(_) => false,
        }
    }

    fn handle_timetable(state: &mut AppState<SketchMap>, api: &dyn TransitApi) {
        let count = state.stop_list().len();
        if count == 0 {
            PNMViews::no_stops_listed();
            return;
        }

        let Some(index) = PNMViews::prompt_stop_number(count) else {
            println!("✗ Invalid selection. Please enter a number between 1 and {}", count);
            return;
        };

        let Some(request) = state.begin_timetable_for_row(index) else {
            return;
        };
        let key = request.stop().key();
        if let Some(stop) = state.find_stop(key) {
            PNMViews::show_loading(&format!("Fetching departures for {}", stop.name));
        }
        let result = api.departures(request.stop(), request.limit());
        PNMViews::clear_loading();

        if let Some(RenderOutcome::Rendered) = state.complete_timetable(request, result) {
            let popup = state
                .registry()
                .find(key)
                .and_then(|entry| entry.popup())
                .and_then(|popup| state.map.popup(popup))
                .and_then(|popup| popup.content.clone());
            if let Some(content) = popup {
                PNMViews::show_timetable(&content);
            }
        }
    }

    fn flush_notices<M: MapSurface>(state: &mut AppState<M>) {
        for notice in state.take_notices() {
            PNMViews::show_notice(&notice);
        }
    }

    /// Read input from stdin with error handling
    fn read_input() -> String {
        print!("➜ Your choice: ");
        let _ = io::stdout().flush();
        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(_) => input,
            Err(e) => {
                eprintln!("⚠️  Error reading input: {}", e);
                String::new()
            }
        }
    }
}
