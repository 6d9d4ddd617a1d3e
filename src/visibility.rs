//! Visibility projection.
//!
//! Maps the current [`SelectionState`] onto surface attachment: markers and
//! path shapes of visible groups are attached, everything else is detached.
//! Attachment is tracked per binding so a repeated projection with an
//! unchanged selection issues no surface calls.

use log::debug;

use crate::overlay::OverlayManager;
use crate::selection::SelectionState;
use crate::store::EntityStore;
use crate::surface::RenderSurface;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub markers_attached: usize,
    pub markers_detached: usize,
    pub shapes_attached: usize,
    pub shapes_detached: usize,
}

impl ProjectionStats {
    pub fn transitions(&self) -> usize {
        self.markers_attached + self.markers_detached + self.shapes_attached + self.shapes_detached
    }
}

/// Project `selection` onto the surface.
///
/// Detaching a marker also closes its info popup.
pub fn project<S: RenderSurface + ?Sized>(
    selection: &SelectionState,
    store: &mut EntityStore,
    overlays: &mut OverlayManager,
    surface: &mut S,
) -> ProjectionStats {
    let mut stats = ProjectionStats::default();

    for entity in store.iter_mut() {
        let want = selection.is_visible(&entity.group_id);
        if entity.attached == want {
            continue;
        }
        if !want && entity.info_open {
            surface.close_auxiliary_info(&entity.entity_id);
            entity.info_open = false;
        }
        surface.set_marker_attachment(&entity.entity_id, want);
        entity.attached = want;
        if want {
            stats.markers_attached += 1;
        } else {
            stats.markers_detached += 1;
        }
    }

    let (shapes_attached, shapes_detached) =
        overlays.project_attachment(selection.visible(), surface);
    stats.shapes_attached = shapes_attached;
    stats.shapes_detached = shapes_detached;

    if stats.transitions() > 0 {
        debug!(
            "[Visibility] markers +{} -{}, shapes +{} -{}",
            stats.markers_attached,
            stats.markers_detached,
            stats.shapes_attached,
            stats.shapes_detached
        );
    }
    stats
}
