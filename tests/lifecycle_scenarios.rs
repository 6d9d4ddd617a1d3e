//! End-to-end lifecycle scenarios through `FleetTracker`.
//!
//! Each test drives the tracker the way a front-end would: apply a
//! selection, complete the fetches it hands out, advance animation frames,
//! and inspect the resulting scene on a `RecordingSurface`.
//!
//! Run with: `cargo test --test lifecycle_scenarios`
//! Log output: `RUST_LOG=debug cargo test --test lifecycle_scenarios -- --nocapture`

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use transit_live::surface::SurfaceCall;
use transit_live::{
    reconcile, FetchKind, FetchRequest, FleetTracker, GroupRegistry, EntityStore,
    JsonFilePreferences, LatLng, OverlayShapes, OverlayStyle, RawEntityUpdate, RecordingSurface,
    SelectionState, TrackerConfig,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tracker() -> FleetTracker<RecordingSurface> {
    init_logging();
    FleetTracker::new(RecordingSurface::new(), TrackerConfig::default())
        .expect("tracker should initialise")
}

fn shapes_for(groups: &[&str]) -> OverlayShapes {
    groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let offset = i as f64;
            (
                g.to_string(),
                vec![
                    vec![LatLng::new(offset, 0.0), LatLng::new(offset, 1.0)],
                    vec![LatLng::new(offset, 1.0), LatLng::new(offset + 0.5, 1.5)],
                ],
            )
        })
        .collect()
}

/// Complete every request: entity fetches with `snapshot`, shape fetches
/// with two shapes per requested group.
fn complete_all(
    tracker: &mut FleetTracker<RecordingSurface>,
    requests: &[FetchRequest],
    snapshot: &[RawEntityUpdate],
    now: Instant,
) {
    for request in requests {
        match request.kind {
            FetchKind::Entities => {
                tracker.complete_entity_fetch(request, Ok(snapshot.to_vec()), now);
            }
            FetchKind::Overlays => {
                let groups: Vec<&str> = request.scope.iter().map(String::as_str).collect();
                let rejected = tracker.complete_overlay_fetch(request, Ok(shapes_for(&groups)));
                assert!(rejected.is_empty());
            }
        }
    }
}

/// Issue a timer-driven entity fetch `after` the previous due time and
/// complete it with `snapshot`.
fn refresh(
    tracker: &mut FleetTracker<RecordingSurface>,
    snapshot: &[RawEntityUpdate],
    now: Instant,
) {
    let due = tracker
        .fetch_controller()
        .next_due()
        .expect("live tracking should arm the timer");
    let request = tracker
        .poll_fetch_timer(due.max(now))
        .expect("timer fetch should be issued");
    tracker.complete_entity_fetch(&request, Ok(snapshot.to_vec()), now);
}

// ============================================================================
// Visibility
// ============================================================================

#[test]
fn test_projection_is_idempotent() {
    let mut t = tracker();
    let now = Instant::now();
    let snapshot = vec![
        RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0)),
        RawEntityUpdate::new("v2", "R2", LatLng::new(2.0, 2.0)),
    ];
    let requests = t.apply_selection(SelectionState::new(["R1", "R2"], ["R1"]), now);
    complete_all(&mut t, &requests, &snapshot, now);
    assert!(t.surface().is_marker_attached("v1"));
    assert!(!t.surface().is_marker_attached("v2"));

    t.surface_mut().clear_calls();
    refresh(&mut t, &snapshot, now + Duration::from_secs(20));
    assert!(
        !t.surface().calls().iter().any(|c| c.is_attachment()),
        "unchanged selection must not re-attach anything: {:?}",
        t.surface().calls()
    );
}

#[test]
fn test_visible_subset_of_selected() {
    let mut t = tracker();
    let now = Instant::now();
    t.apply_selection(SelectionState::new(["R1", "R2"], ["R2", "R3"]), now);
    assert!(t.selection().visible().is_subset(t.selection().selected()));

    t.deselect_group("R2", now);
    assert!(!t.selection().is_selected("R2"));
    assert!(!t.selection().is_visible("R2"));
    assert!(!t.set_group_visible("R2", true));
    assert!(t.selection().visible().is_subset(t.selection().selected()));
}

// ============================================================================
// Animation
// ============================================================================

#[test]
fn test_retarget_mid_flight_starts_from_visual_position() {
    let mut t = tracker();
    let t0 = Instant::now();
    let requests = t.apply_selection(SelectionState::all_visible(["R1"]), t0);
    complete_all(
        &mut t,
        &requests,
        &[RawEntityUpdate::new("v1", "R1", LatLng::new(0.0, 0.0))],
        t0,
    );

    let t1 = t0 + Duration::from_secs(20);
    refresh(&mut t, &[RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0))], t1);
    assert!(t.needs_frame());

    // Half of the 10s animation
    let mid = t1 + Duration::from_secs(5);
    assert!(t.animation_frame(mid));
    let visual = t.entity("v1").unwrap().visual_position;
    assert!((visual.lat - 0.5).abs() < 1e-9 && (visual.lng - 0.5).abs() < 1e-9);

    refresh(&mut t, &[RawEntityUpdate::new("v1", "R1", LatLng::new(2.0, 2.0))], mid);
    let entity = t.entity("v1").unwrap();
    let start = entity.animation.start_position.unwrap();
    assert!((start.lat - 0.5).abs() < 1e-9 && (start.lng - 0.5).abs() < 1e-9);
    assert_eq!(entity.animation.target_position, LatLng::new(2.0, 2.0));
    assert_eq!(entity.animation.start_time, Some(mid));
    assert!(entity.is_animating());
}

#[test]
fn test_tolerance_snap_while_idle() {
    let mut t = tracker();
    let now = Instant::now();
    let requests = t.apply_selection(SelectionState::all_visible(["R1"]), now);
    complete_all(
        &mut t,
        &requests,
        &[RawEntityUpdate::new("v1", "R1", LatLng::new(10.0, 20.0))],
        now,
    );

    let nudged = LatLng::new(10.0000004, 19.9999996);
    refresh(&mut t, &[RawEntityUpdate::new("v1", "R1", nudged)], now);
    let entity = t.entity("v1").unwrap();
    assert!(!entity.is_animating());
    assert_eq!(entity.visual_position, nudged);
    assert!(entity.animation.start_position.is_none());
    assert!(!t.needs_frame());
}

#[test]
fn test_vehicle_glides_and_lands_exactly() {
    let mut t = tracker();
    let t0 = Instant::now();
    let requests = t.apply_selection(SelectionState::all_visible(["R1"]), t0);
    complete_all(
        &mut t,
        &requests,
        &[RawEntityUpdate::new("v1", "R1", LatLng::new(10.0, 20.0)).with_heading(90.0)],
        t0,
    );

    let t1 = t0 + Duration::from_secs(20);
    let target = LatLng::new(10.001, 20.001);
    refresh(&mut t, &[RawEntityUpdate::new("v1", "R1", target)], t1);
    assert!(t.entity("v1").unwrap().is_animating());

    let mut frame = t1;
    let mut frames = 0;
    while t.animation_frame(frame) {
        frame += Duration::from_millis(16);
        frames += 1;
        assert!(frames < 1_000, "animation never finished");
    }

    let entity = t.entity("v1").unwrap();
    assert!(!entity.is_animating());
    assert_eq!(entity.visual_position, target);
    assert_eq!(t.surface().marker_position("v1"), Some(target));
    // Bearing missing from the second record resets to north
    assert_eq!(t.surface().marker("v1").unwrap().icon.heading, 0.0);
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_removal_scoped_to_fetch_groups() {
    init_logging();
    let mut store = EntityStore::new();
    let mut groups = GroupRegistry::new();
    let mut surface = RecordingSurface::new();
    let now = Instant::now();
    let scope = |gs: &[&str]| -> BTreeSet<String> { gs.iter().map(|g| g.to_string()).collect() };

    reconcile(
        &mut store,
        &mut groups,
        &mut surface,
        &[
            RawEntityUpdate::new("a1", "A", LatLng::new(0.0, 0.0)),
            RawEntityUpdate::new("c1", "C", LatLng::new(0.0, 0.0)),
        ],
        &scope(&["A", "C"]),
        now,
        1e-6,
    );

    let stats = reconcile(
        &mut store,
        &mut groups,
        &mut surface,
        &[RawEntityUpdate::new("b1", "B", LatLng::new(0.0, 0.0))],
        &scope(&["A", "B"]),
        now,
        1e-6,
    );
    assert_eq!(stats.removed, 1);
    assert!(!store.contains("a1"));
    assert!(store.contains("c1"));
    assert!(surface
        .calls()
        .contains(&SurfaceCall::RemoveMarker { entity_id: "a1".to_string() }));
}

#[test]
fn test_deselect_mid_animation_detaches_then_removes() {
    let mut t = tracker();
    let t0 = Instant::now();
    let requests = t.apply_selection(SelectionState::all_visible(["R1", "R2"]), t0);
    complete_all(
        &mut t,
        &requests,
        &[
            RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0)),
            RawEntityUpdate::new("v2", "R2", LatLng::new(2.0, 2.0)),
        ],
        t0,
    );

    let t1 = t0 + Duration::from_secs(20);
    refresh(
        &mut t,
        &[
            RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0)),
            RawEntityUpdate::new("v2", "R2", LatLng::new(2.5, 2.5)),
        ],
        t1,
    );
    t.animation_frame(t1 + Duration::from_secs(3));
    assert!(t.entity("v2").unwrap().is_animating());

    let requests = t.deselect_group("R2", t1 + Duration::from_secs(3));
    assert!(!t.surface().is_marker_attached("v2"));
    assert!(t.entity("v2").is_some(), "removal waits for the next pass");

    let request = requests.into_iter().find(|r| r.is_entity_fetch()).unwrap();
    assert_eq!(request.scope_param(), "R1");
    t.complete_entity_fetch(
        &request,
        Ok(vec![RawEntityUpdate::new("v1", "R1", LatLng::new(1.0, 1.0))]),
        t1 + Duration::from_secs(4),
    );
    assert!(t.entity("v2").is_none());
    assert!(t.surface().marker("v2").is_none());
    assert!(t.surface().is_marker_attached("v1"));
    assert_eq!(t.surface().overlay("R2", 0), None);
}

// ============================================================================
// Highlight
// ============================================================================

#[test]
fn test_highlight_toggle_restores_default_styles() {
    let mut t = tracker();
    let now = Instant::now();
    let requests = t.apply_selection(SelectionState::all_visible(["R1", "R2"]), now);
    complete_all(&mut t, &requests, &[], now);
    assert_eq!(t.surface().overlay_count(), 4);
    let defaults = t.surface().overlay_styles();

    assert_eq!(t.interact("R1").as_deref(), Some("R1"));
    for ((group_id, _), style) in t.surface().overlay_styles() {
        let expected = if group_id == "R1" {
            OverlayStyle::HIGHLIGHTED_WEIGHT
        } else {
            OverlayStyle::DEEMPHASIZED_WEIGHT
        };
        assert_eq!(style.weight, expected);
    }

    assert_eq!(t.interact("R1"), None);
    assert_eq!(t.surface().overlay_styles(), defaults);
}

#[test]
fn test_hiding_highlighted_group_resets_highlight() {
    let mut t = tracker();
    let now = Instant::now();
    let requests = t.apply_selection(SelectionState::all_visible(["R1", "R2"]), now);
    complete_all(&mut t, &requests, &[], now);

    t.interact("R1");
    t.set_group_visible("R1", false);
    assert_eq!(t.highlighted_group(), None);
    let style = &t.surface().overlay("R2", 0).unwrap().style;
    assert_eq!(style.opacity, OverlayStyle::DEFAULT_OPACITY);
    assert!(!t.surface().overlay("R1", 0).unwrap().attached);
}

// ============================================================================
// Preferences
// ============================================================================

#[test]
fn test_preferences_survive_restart() {
    let dir = TempDir::new().unwrap();
    let store = JsonFilePreferences::new(dir.path().join("preferences.json"));
    let now = Instant::now();

    let mut first = tracker();
    first.apply_selection(SelectionState::new(["2606_50", "2606_54"], ["2606_54"]), now);
    first.save_preferences(&store).unwrap();

    let mut second = tracker();
    let requests = second.load_preferences(&store, now).unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(second.selection(), first.selection());
    assert_eq!(
        second.groups().color_of("2606_50"),
        first.groups().color_of("2606_50")
    );
    assert_eq!(second.title(), "Tracking routes: 50, 54");
}
