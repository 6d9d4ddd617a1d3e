//! # Fleet Tracker
//!
//! Stateful engine that owns every piece of live-map state and composes the
//! reconciler, animation scheduler, visibility projector, overlay manager
//! and fetch controller.
//!
//! ## Architecture
//!
//! The tracker never performs I/O and never reads the clock. The host
//! (or [`crate::driver::run_tracker`]) feeds it:
//! - selection and option changes from the UI
//! - fetch completions for the [`FetchRequest`]s it handed out
//! - countdown ticks, timer polls and animation frames
//!
//! Every completion runs the same fixed pipeline: prune deselected groups,
//! reconcile the full scope, project visibility, drop a highlight whose
//! group was hidden and make sure the animation loop is running.

use std::collections::BTreeSet;
use std::time::Instant;

use log::{debug, info, warn};

use crate::animation::AnimationScheduler;
use crate::config::{Options, TrackerConfig};
use crate::error::{Result, TrackerError};
use crate::fetch::{FetchController, FetchKind, FetchRequest};
use crate::groups::{agency_of, tracking_title, GroupRegistry};
use crate::overlay::OverlayManager;
use crate::persistence::{PreferenceStore, SavedPreferences};
use crate::reconcile::{reconcile, ReconcileStats};
use crate::selection::SelectionState;
use crate::snapshot::{OverlayShapes, RawEntityUpdate};
use crate::store::{EntityStore, TrackedEntity};
use crate::surface::RenderSurface;
use crate::visibility::project;

/// Tracker statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerStats {
    pub entity_count: u32,
    pub animating_count: u32,
    pub overlay_shape_count: u32,
    pub attached_shape_count: u32,
    pub selected_group_count: u32,
    pub visible_group_count: u32,
    pub highlighted_group: Option<String>,
    pub fetches_completed: u32,
    /// Completions dropped because the selection changed while in flight
    pub fetches_discarded: u32,
    pub fetch_failures: u32,
    pub last_error: Option<String>,
}

/// Live vehicle map engine bound to a rendering surface.
pub struct FleetTracker<S: RenderSurface> {
    surface: S,
    config: TrackerConfig,
    options: Options,
    selection: SelectionState,
    /// Agencies whose routes may be selected; empty means unrestricted
    agencies: BTreeSet<String>,
    groups: GroupRegistry,
    store: EntityStore,
    overlays: OverlayManager,
    animation: AnimationScheduler,
    fetch: FetchController,
    fetches_completed: u32,
    fetches_discarded: u32,
    fetch_failures: u32,
    last_error: Option<TrackerError>,
}

impl<S: RenderSurface> FleetTracker<S> {
    /// Create a tracker.
    ///
    /// Fails with [`TrackerError::SurfaceUnavailable`] if the surface did not
    /// initialise, or [`TrackerError::Config`] for an unusable configuration.
    pub fn new(surface: S, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        if !surface.is_available() {
            return Err(TrackerError::SurfaceUnavailable {
                message: "rendering surface failed to initialise".to_string(),
            });
        }
        info!(
            "[FleetTracker] Created (animation: {}ms, countdown: {}s)",
            config.animation_duration_ms, config.countdown_seconds
        );
        Ok(Self {
            animation: AnimationScheduler::new(config.animation_duration()),
            fetch: FetchController::new(&config),
            overlays: OverlayManager::new(config.overlay_simplification_tolerance),
            surface,
            config,
            options: Options::default(),
            selection: SelectionState::default(),
            agencies: BTreeSet::new(),
            groups: GroupRegistry::new(),
            store: EntityStore::new(),
            fetches_completed: 0,
            fetches_discarded: 0,
            fetch_failures: 0,
            last_error: None,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut GroupRegistry {
        &mut self.groups
    }

    pub fn entities(&self) -> &EntityStore {
        &self.store
    }

    pub fn entity(&self, entity_id: &str) -> Option<&TrackedEntity> {
        self.store.get(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    pub fn overlays(&self) -> &OverlayManager {
        &self.overlays
    }

    pub fn highlighted_group(&self) -> Option<&str> {
        self.overlays.highlighted_group()
    }

    pub fn fetch_controller(&self) -> &FetchController {
        &self.fetch
    }

    /// Seconds left until the early fetch countdown wraps.
    pub fn countdown(&self) -> i64 {
        self.fetch.countdown()
    }

    /// Whether an animation frame is pending.
    pub fn needs_frame(&self) -> bool {
        self.animation.is_scheduled()
    }

    pub fn last_error(&self) -> Option<&TrackerError> {
        self.last_error.as_ref()
    }

    /// Title listing the selected routes.
    pub fn title(&self) -> String {
        tracking_title(&self.selection)
    }

    // ========================================================================
    // Selection & Options
    // ========================================================================

    /// Replace the selection, clear any highlight and restart the fetch
    /// cycle.
    ///
    /// Groups that left the selection are detached now and pruned on the
    /// next reconciliation. An empty selection clears everything at once.
    pub fn apply_selection(&mut self, selection: SelectionState, now: Instant) -> Vec<FetchRequest> {
        let mut selection = selection.normalized();
        if !self.agencies.is_empty() {
            let agencies = &self.agencies;
            selection.retain(|g| agencies.contains(agency_of(g)));
        }
        info!(
            "[FleetTracker] Selection: {} selected, {} visible",
            selection.selected().len(),
            selection.visible().len()
        );
        self.selection = selection;
        for group_id in self.selection.selected() {
            self.groups.ensure(group_id);
        }

        if self.selection.is_empty() {
            self.store.clear(&mut self.surface);
            self.overlays.clear(&mut self.surface);
        }
        self.overlays.clear_highlight(&mut self.surface);
        self.project_visibility();
        self.fetch.restart(self.selection.selected(), &self.options, now)
    }

    /// Restrict selectable groups to these agencies. Selected groups of
    /// other agencies are dropped.
    pub fn set_agencies<I>(&mut self, agencies: I, now: Instant) -> Vec<FetchRequest>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.agencies = agencies.into_iter().map(Into::into).collect();
        let selection = self.selection.clone();
        self.apply_selection(selection, now)
    }

    pub fn select_group(&mut self, group_id: &str, now: Instant) -> Vec<FetchRequest> {
        let mut selection = self.selection.clone();
        if !selection.select(group_id) {
            return Vec::new();
        }
        self.apply_selection(selection, now)
    }

    /// Deselect a group. Its vehicles are detached immediately and removed
    /// from tracking on the next reconciliation.
    pub fn deselect_group(&mut self, group_id: &str, now: Instant) -> Vec<FetchRequest> {
        let mut selection = self.selection.clone();
        if !selection.deselect(group_id) {
            return Vec::new();
        }
        self.apply_selection(selection, now)
    }

    /// Show or hide a selected group without refetching.
    pub fn set_group_visible(&mut self, group_id: &str, visible: bool) -> bool {
        if !self.selection.set_visible(group_id, visible) {
            return false;
        }
        debug!("[FleetTracker] Group {} visible: {}", group_id, visible);
        self.project_visibility();
        true
    }

    /// Apply new options, clear any highlight and restart the fetch cycle.
    pub fn apply_options(&mut self, options: Options, now: Instant) -> Vec<FetchRequest> {
        info!(
            "[FleetTracker] Options: live {}, paths {}, period {}ms",
            options.live_tracking_enabled, options.show_paths_enabled, options.refresh_period_ms
        );
        if !options.show_paths_enabled {
            self.overlays.clear(&mut self.surface);
        }
        self.options = options;
        self.overlays.clear_highlight(&mut self.surface);
        self.project_visibility();
        self.fetch.restart(self.selection.selected(), &self.options, now)
    }

    // ========================================================================
    // Fetch Cycle
    // ========================================================================

    /// Advance the one-second countdown.
    pub fn on_countdown_tick(&mut self) -> Option<FetchRequest> {
        self.fetch.tick_countdown()
    }

    /// Fire the repeating fetch if due.
    pub fn poll_fetch_timer(&mut self, now: Instant) -> Option<FetchRequest> {
        self.fetch.poll_timer(now)
    }

    fn is_current(&self, request: &FetchRequest) -> bool {
        request.scope == *self.selection.selected()
    }

    /// Handle an entity fetch completion.
    ///
    /// Returns the reconciliation counts, or `None` when the result was a
    /// failure or belonged to a superseded selection.
    pub fn complete_entity_fetch(
        &mut self,
        request: &FetchRequest,
        result: Result<Vec<RawEntityUpdate>>,
        now: Instant,
    ) -> Option<ReconcileStats> {
        self.fetch.complete(request.ticket);

        if !self.is_current(request) {
            debug!(
                "[FleetTracker] Discarding fetch #{} for superseded scope {}",
                request.ticket,
                request.scope_param()
            );
            self.fetches_discarded += 1;
            return None;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[FleetTracker] Fetch #{} failed: {}", request.ticket, e);
                self.fetch_failures += 1;
                self.last_error = Some(e);
                return None;
            }
        };

        let pruned = self
            .store
            .remove_outside(self.selection.selected(), &mut self.surface);
        if pruned > 0 {
            debug!("[FleetTracker] Pruned {} vehicles of deselected groups", pruned);
        }
        self.overlays
            .retain(self.selection.selected(), &mut self.surface);

        let stats = reconcile(
            &mut self.store,
            &mut self.groups,
            &mut self.surface,
            &snapshot,
            self.selection.selected(),
            now,
            self.config.position_tolerance_degrees,
        );
        self.project_visibility();
        self.animation.ensure_running(&self.store);
        self.fetches_completed += 1;
        Some(stats)
    }

    /// Handle a route-shape fetch completion. Returns the shapes that were
    /// rejected as degenerate.
    pub fn complete_overlay_fetch(
        &mut self,
        request: &FetchRequest,
        result: Result<OverlayShapes>,
    ) -> Vec<TrackerError> {
        if !self.is_current(request) || !self.options.show_paths_enabled {
            debug!("[FleetTracker] Discarding shapes #{}", request.ticket);
            self.fetches_discarded += 1;
            return Vec::new();
        }
        let shapes = match result {
            Ok(shapes) => shapes,
            Err(e) => {
                warn!("[FleetTracker] Shape fetch #{} failed: {}", request.ticket, e);
                self.fetch_failures += 1;
                self.last_error = Some(e);
                return Vec::new();
            }
        };

        let mut rejected = Vec::new();
        for (group_id, paths) in &shapes {
            if !self.selection.is_selected(group_id) {
                continue;
            }
            let color = self.groups.ensure(group_id).assigned_color.clone();
            rejected.extend(
                self.overlays
                    .load_shapes(group_id, paths, &color, &mut self.surface),
            );
        }
        self.project_visibility();
        self.fetches_completed += 1;
        rejected
    }

    /// Route a completion to the right handler by request kind.
    pub fn complete_fetch(
        &mut self,
        request: &FetchRequest,
        result: FetchResult,
        now: Instant,
    ) {
        match (request.kind, result) {
            (FetchKind::Entities, FetchResult::Entities(result)) => {
                self.complete_entity_fetch(request, result, now);
            }
            (FetchKind::Overlays, FetchResult::Overlays(result)) => {
                self.complete_overlay_fetch(request, result);
            }
            (kind, _) => {
                warn!(
                    "[FleetTracker] Completion for #{} does not match its {:?} request",
                    request.ticket, kind
                );
                self.fetch.complete(request.ticket);
            }
        }
    }

    // ========================================================================
    // Animation
    // ========================================================================

    /// Advance animations to `now`. Returns whether another frame is needed.
    pub fn animation_frame(&mut self, now: Instant) -> bool {
        if !self.animation.is_scheduled() {
            return false;
        }
        self.animation.tick(&mut self.store, &mut self.surface, now)
    }

    // ========================================================================
    // Interaction
    // ========================================================================

    fn project_visibility(&mut self) {
        project(
            &self.selection,
            &mut self.store,
            &mut self.overlays,
            &mut self.surface,
        );
        self.overlays
            .after_projection(&self.selection, &mut self.surface);
    }

    /// Click on a route path (or anything else identifying a group).
    /// Returns the highlighted group afterwards.
    pub fn interact(&mut self, group_id: &str) -> Option<String> {
        self.overlays
            .interact(group_id, &self.selection, &mut self.surface)
            .map(str::to_string)
    }

    fn close_info(&mut self) {
        for entity in self.store.iter_mut().filter(|e| e.info_open) {
            self.surface.close_auxiliary_info(&entity.entity_id);
            entity.info_open = false;
        }
    }

    /// Click on a vehicle marker: open its popup and interact with its
    /// group. Returns whether a popup was opened.
    pub fn marker_clicked(&mut self, entity_id: &str) -> bool {
        let Some(group_id) = self.store.get(entity_id).map(|e| e.group_id.clone()) else {
            return false;
        };
        self.close_info();

        let visible = self.selection.is_visible(&group_id);
        if visible {
            if let Some(entity) = self.store.get_mut(entity_id) {
                self.surface
                    .open_auxiliary_info(entity_id, &entity.info_content());
                entity.info_open = true;
            }
        }
        self.interact(&group_id);
        visible
    }

    /// Click on empty map: close the popup and clear the highlight.
    pub fn map_clicked(&mut self) {
        self.close_info();
        self.overlays.clear_highlight(&mut self.surface);
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    pub fn saved_preferences(&self) -> SavedPreferences {
        SavedPreferences::capture(
            &self.agencies,
            &self.selection,
            &self.options,
            self.groups.colors(),
        )
    }

    /// Restore saved state and start fetching for it.
    pub fn restore_preferences(
        &mut self,
        preferences: SavedPreferences,
        now: Instant,
    ) -> Vec<FetchRequest> {
        self.groups.restore_colors(&preferences.colors);
        self.agencies = preferences.agencies.clone();
        self.options = preferences.options.clone();
        self.apply_selection(preferences.selection(), now)
    }

    pub fn save_preferences<P: PreferenceStore + ?Sized>(&self, store: &P) -> Result<()> {
        store.save(&self.saved_preferences())
    }

    /// Load and restore preferences. Nothing saved yet is not an error.
    pub fn load_preferences<P: PreferenceStore + ?Sized>(
        &mut self,
        store: &P,
        now: Instant,
    ) -> Result<Vec<FetchRequest>> {
        match store.load()? {
            Some(preferences) => Ok(self.restore_preferences(preferences, now)),
            None => Ok(Vec::new()),
        }
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            entity_count: self.store.len() as u32,
            animating_count: self.store.animating_count() as u32,
            overlay_shape_count: self.overlays.shape_count() as u32,
            attached_shape_count: self.overlays.attached_shape_count() as u32,
            selected_group_count: self.selection.selected().len() as u32,
            visible_group_count: self.selection.visible().len() as u32,
            highlighted_group: self.overlays.highlighted_group().map(str::to_string),
            fetches_completed: self.fetches_completed,
            fetches_discarded: self.fetches_discarded,
            fetch_failures: self.fetch_failures,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Result of performing a [`FetchRequest`].
#[derive(Debug)]
pub enum FetchResult {
    Entities(Result<Vec<RawEntityUpdate>>),
    Overlays(Result<OverlayShapes>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{OverlayStyle, RecordingSurface};
    use crate::LatLng;
    use std::time::Duration;

    fn tracker() -> FleetTracker<RecordingSurface> {
        FleetTracker::new(RecordingSurface::new(), TrackerConfig::default()).unwrap()
    }

    fn entity_request(requests: Vec<FetchRequest>) -> FetchRequest {
        requests.into_iter().find(|r| r.is_entity_fetch()).unwrap()
    }

    /// Select `groups` and load one path per group.
    fn with_paths(groups: &[&str], now: Instant) -> FleetTracker<RecordingSurface> {
        let mut t = tracker();
        let requests = t.apply_selection(SelectionState::all_visible(groups.iter().copied()), now);
        let shapes_req = requests.iter().find(|r| !r.is_entity_fetch()).unwrap();
        let mut shapes = OverlayShapes::new();
        for g in groups {
            shapes.insert(
                g.to_string(),
                vec![vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)]],
            );
        }
        assert!(t.complete_overlay_fetch(shapes_req, Ok(shapes)).is_empty());
        t
    }

    #[test]
    fn test_unavailable_surface_is_fatal() {
        let result = FleetTracker::new(RecordingSurface::unavailable(), TrackerConfig::default());
        assert!(matches!(result, Err(TrackerError::SurfaceUnavailable { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrackerConfig {
            countdown_seconds: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            FleetTracker::new(RecordingSurface::new(), config),
            Err(TrackerError::Config { .. })
        ));
    }

    #[test]
    fn test_stale_completion_discarded() {
        let mut t = tracker();
        let now = Instant::now();
        let old = entity_request(t.apply_selection(SelectionState::all_visible(["R1"]), now));
        t.apply_selection(SelectionState::all_visible(["R2"]), now);

        let result = t.complete_entity_fetch(
            &old,
            Ok(vec![RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0))]),
            now,
        );
        assert!(result.is_none());
        assert_eq!(t.entity_count(), 0);
        assert_eq!(t.stats().fetches_discarded, 1);
    }

    #[test]
    fn test_failure_keeps_last_good_state() {
        let mut t = tracker();
        let now = Instant::now();
        let req = entity_request(t.apply_selection(SelectionState::all_visible(["R1"]), now));
        t.complete_entity_fetch(
            &req,
            Ok(vec![RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0))]),
            now,
        );

        let later = now + Duration::from_secs(20);
        let req = t.poll_fetch_timer(later).unwrap();
        let result = t.complete_entity_fetch(&req, Err(TrackerError::transport("502")), later);
        assert!(result.is_none());
        assert_eq!(t.entity_count(), 1);
        assert!(t.surface().is_marker_attached("v1"));
        assert_eq!(t.stats().fetch_failures, 1);
        assert!(t.last_error().is_some());
        assert!(t.fetch_controller().in_flight().is_none());
    }

    #[test]
    fn test_marker_click_opens_popup_and_highlights() {
        let mut t = tracker();
        let now = Instant::now();
        let requests = t.apply_selection(SelectionState::all_visible(["R1", "R2"]), now);
        for req in &requests {
            match req.kind {
                FetchKind::Overlays => {
                    let mut shapes = OverlayShapes::new();
                    for g in ["R1", "R2"] {
                        shapes.insert(
                            g.to_string(),
                            vec![vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)]],
                        );
                    }
                    assert!(t.complete_overlay_fetch(req, Ok(shapes)).is_empty());
                }
                FetchKind::Entities => {
                    t.complete_entity_fetch(
                        req,
                        Ok(vec![
                            RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0)),
                            RawEntityUpdate::new("v2", "R2", LatLng::new(2.0, 2.0)),
                        ]),
                        now,
                    );
                }
            }
        }

        assert!(t.marker_clicked("v1"));
        assert!(t.surface().is_info_open("v1"));
        assert_eq!(t.highlighted_group(), Some("R1"));

        assert!(t.marker_clicked("v2"));
        assert!(!t.surface().is_info_open("v1"));
        assert_eq!(t.surface().open_info_count(), 1);
        assert_eq!(t.highlighted_group(), Some("R2"));

        t.map_clicked();
        assert_eq!(t.surface().open_info_count(), 0);
        assert_eq!(t.highlighted_group(), None);
        assert!(!t.marker_clicked("ghost"));
    }

    #[test]
    fn test_hide_group_without_refetch() {
        let mut t = tracker();
        let now = Instant::now();
        let req = entity_request(t.apply_selection(SelectionState::all_visible(["R1"]), now));
        t.complete_entity_fetch(
            &req,
            Ok(vec![RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0))]),
            now,
        );

        assert!(t.set_group_visible("R1", false));
        assert!(!t.surface().is_marker_attached("v1"));
        assert_eq!(t.entity_count(), 1);
        assert!(!t.set_group_visible("R1", false));
        assert!(!t.set_group_visible("R9", true));
    }

    #[test]
    fn test_disabling_paths_clears_overlays() {
        let mut t = tracker();
        let now = Instant::now();
        let requests = t.apply_selection(SelectionState::all_visible(["R1"]), now);
        let shapes_req = requests.iter().find(|r| !r.is_entity_fetch()).unwrap().clone();
        let mut shapes = OverlayShapes::new();
        shapes.insert(
            "R1".to_string(),
            vec![vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)], vec![LatLng::new(5.0, 5.0)]],
        );
        let rejected = t.complete_overlay_fetch(&shapes_req, Ok(shapes));
        assert_eq!(rejected.len(), 1);
        assert_eq!(t.surface().overlay_count(), 1);

        let options = Options {
            show_paths_enabled: false,
            ..Options::default()
        };
        let requests = t.apply_options(options, now);
        assert_eq!(requests.len(), 1);
        assert_eq!(t.surface().overlay_count(), 0);
    }

    #[test]
    fn test_preferences_round_trip_through_tracker() {
        let mut t = tracker();
        let now = Instant::now();
        t.apply_selection(SelectionState::new(["2606_50", "2606_54"], ["2606_50"]), now);
        let saved = t.saved_preferences();
        assert_eq!(saved.colors.len(), 2);

        let mut restored = tracker();
        let requests = restored.restore_preferences(saved.clone(), now);
        assert_eq!(requests.len(), 2);
        assert_eq!(restored.selection(), t.selection());
        assert_eq!(restored.title(), "Tracking routes: 50, 54");
        assert_eq!(
            restored.groups().color_of("2606_50"),
            t.groups().color_of("2606_50")
        );
    }

    #[test]
    fn test_selection_change_clears_highlight() {
        let now = Instant::now();
        let mut t = with_paths(&["R1", "R2"], now);
        assert_eq!(t.interact("R1"), Some("R1".to_string()));

        t.select_group("R3", now);
        assert_eq!(t.highlighted_group(), None);
        let color = t.groups().color_of("R2").to_string();
        assert_eq!(
            t.surface().overlay("R2", 0).unwrap().style,
            OverlayStyle::default_for(&color)
        );
    }

    #[test]
    fn test_options_change_clears_highlight() {
        let now = Instant::now();
        let mut t = with_paths(&["R1", "R2"], now);
        t.interact("R1");

        let options = Options {
            refresh_period_ms: 30_000,
            ..Options::default()
        };
        assert_eq!(t.apply_options(options, now).len(), 2);
        assert_eq!(t.highlighted_group(), None);
        let color = t.groups().color_of("R1").to_string();
        assert_eq!(
            t.surface().overlay("R1", 0).unwrap().style,
            OverlayStyle::default_for(&color)
        );
        assert!(t.surface().overlay("R1", 0).unwrap().attached);
    }
}
