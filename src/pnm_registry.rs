// Live stop markers on the map and their reconciliation against discovery results
use crate::pnm_map::{MapSurface, MarkerHandle, MarkerOptions, PopupContent, PopupHandle};
use crate::pnm_models::{Coordinates, RouteType, StopKey, StopRecord};
use crate::pnm_stop_list::name_matches;
use log::{debug, info};
use std::collections::HashSet;
use std::time::Duration;

/// Which transport modes get a marker at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModePolicy {
    /// v/Line regional trains and coaches are not shown.
    #[default]
    ExcludeRegional,
    ShowAll,
}

impl ModePolicy {
    pub fn admits(self, route_type: RouteType) -> bool {
        match self {
            ModePolicy::ExcludeRegional => route_type != RouteType::RegionalCoachOrTrain,
            ModePolicy::ShowAll => true,
        }
    }
}

/// One stop marker. The entry owns its marker and popup handles and keeps its
/// own record, so click dispatch never depends on captured loop state.
#[derive(Debug, Clone)]
pub struct MarkerEntry {
    record: StopRecord,
    marker: MarkerHandle,
    popup: Option<PopupHandle>,
    visible: bool,
}

impl MarkerEntry {
    pub fn record(&self) -> &StopRecord {
        &self.record
    }

    pub fn key(&self) -> StopKey {
        self.record.key()
    }

    pub fn marker(&self) -> MarkerHandle {
        self.marker
    }

    pub fn popup(&self) -> Option<PopupHandle> {
        self.popup
    }

    /// Inside the viewport as of the last reconcile or visibility sync.
    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

#[derive(Debug, Default)]
pub struct MarkerRegistry {
    entries: Vec<MarkerEntry>,
    policy: ModePolicy,
}

impl MarkerRegistry {
    pub const BOUNCE_DURATION: Duration = Duration::from_millis(3600);

    pub fn new(policy: ModePolicy) -> Self {
        MarkerRegistry {
            entries: Vec::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ModePolicy {
        self.policy
    }

    pub fn entries(&self) -> &[MarkerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, key: StopKey) -> Option<&MarkerEntry> {
        self.entries.iter().find(|entry| entry.key() == key)
    }

    pub fn find_by_marker(&self, marker: MarkerHandle) -> Option<&MarkerEntry> {
        self.entries.iter().find(|entry| entry.marker == marker)
    }

    /// Brings the marker set in line with `discovered` inside the viewport.
    ///
    /// Afterwards the entries are exactly the admitted records of `discovered`
    /// that satisfy `contains`, one per [`StopKey`]. Entries that survive keep
    /// their marker and popup; everything else is released from the map.
    pub fn reconcile<M, F>(
        &mut self,
        map: &mut M,
        discovered: &[StopRecord],
        contains: F,
    ) -> ReconcileSummary
    where
        M: MapSurface + ?Sized,
        F: Fn(Coordinates) -> bool,
    {
        let mut wanted: Vec<&StopRecord> = Vec::new();
        let mut wanted_keys = HashSet::new();
        for record in discovered {
            if !self.policy.admits(record.route_type) || !contains(record.coordinates) {
                continue;
            }
            // first occurrence of a key wins
            if wanted_keys.insert(record.key()) {
                wanted.push(record);
            }
        }

        let mut summary = ReconcileSummary::default();

        let previous = std::mem::take(&mut self.entries);
        for entry in previous {
            if contains(entry.record.coordinates) && wanted_keys.contains(&entry.key()) {
                self.entries.push(entry);
            } else {
                debug!("Removing marker for {} ({:?})", entry.record.name, entry.key());
                Self::release(map, entry);
                summary.removed += 1;
            }
        }
        summary.kept = self.entries.len();

        for record in wanted {
            if self.find(record.key()).is_some() {
                continue;
            }
            let marker = map.add_marker(MarkerOptions {
                position: record.coordinates,
                title: record.name.clone(),
                icon: record.route_type.icon(),
            });
            self.entries.push(MarkerEntry {
                record: record.clone(),
                marker,
                popup: None,
                visible: true,
            });
            summary.added += 1;
        }

        for entry in &mut self.entries {
            entry.visible = true;
        }

        info!(
            "Reconciled markers: {} added, {} removed, {} kept",
            summary.added, summary.removed, summary.kept
        );
        summary
    }

    /// Updates `visible` from the viewport and shows only markers that are
    /// in bounds and match `query`. Hidden markers get their popup closed.
    /// Returns how many markers are shown.
    pub fn sync_visibility<M, F>(&mut self, map: &mut M, contains: F, query: &str) -> usize
    where
        M: MapSurface + ?Sized,
        F: Fn(Coordinates) -> bool,
    {
        let mut shown = 0;
        for entry in &mut self.entries {
            entry.visible = contains(entry.record.coordinates);
            let show = entry.visible && name_matches(&entry.record.name, query);
            map.set_marker_visible(entry.marker, show);
            if show {
                shown += 1;
            } else if let Some(popup) = entry.popup {
                map.close_popup(popup);
            }
        }
        shown
    }

    /// Puts `content` in the stop's popup, creating the popup on first use,
    /// and opens it on the stop's marker. False when the stop is not tracked.
    pub fn present_popup<M>(&mut self, map: &mut M, key: StopKey, content: PopupContent) -> bool
    where
        M: MapSurface + ?Sized,
    {
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.key() == key) else {
            return false;
        };
        let popup = *entry.popup.get_or_insert_with(|| map.create_popup());
        map.set_popup_content(popup, content);
        map.open_popup(popup, entry.marker);
        true
    }

    pub fn animate<M>(&self, map: &mut M, key: StopKey) -> bool
    where
        M: MapSurface + ?Sized,
    {
        match self.find(key) {
            Some(entry) => {
                map.animate_marker(entry.marker, Self::BOUNCE_DURATION);
                true
            }
            None => false,
        }
    }

    pub fn clear<M>(&mut self, map: &mut M)
    where
        M: MapSurface + ?Sized,
    {
        for entry in std::mem::take(&mut self.entries) {
            Self::release(map, entry);
        }
    }

    fn release<M>(map: &mut M, entry: MarkerEntry)
    where
        M: MapSurface + ?Sized,
    {
        if let Some(popup) = entry.popup {
            map.close_popup(popup);
            map.remove_popup(popup);
        }
        map.remove_marker(entry.marker);
    }
}
