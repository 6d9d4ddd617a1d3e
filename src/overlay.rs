//! Route path overlays and the highlight protocol.
//!
//! Each group owns an ordered list of path shapes. Shapes are drawn once and
//! then only re-styled or (de)attached; the visibility projector decides
//! attachment, this module decides style.

use std::collections::{BTreeMap, BTreeSet};

use geo::{Coord, LineString, Simplify};
use log::{debug, warn};

use crate::error::TrackerError;
use crate::selection::SelectionState;
use crate::surface::{OverlayStyle, RenderSurface};
use crate::{Bounds, LatLng};

/// Minimum number of valid points for a drawable shape.
pub const MIN_SHAPE_POINTS: usize = 2;

/// Which group, if any, is emphasized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HighlightState {
    #[default]
    NoHighlight,
    Highlighted(String),
}

impl HighlightState {
    pub fn group(&self) -> Option<&str> {
        match self {
            HighlightState::NoHighlight => None,
            HighlightState::Highlighted(group_id) => Some(group_id),
        }
    }
}

/// One drawn path shape and its surface binding.
#[derive(Debug, Clone)]
struct ShapeBinding {
    /// Index of the shape in the source list
    index: usize,
    points: Vec<LatLng>,
    attached: bool,
}

#[derive(Debug, Clone)]
struct GroupOverlay {
    color: String,
    shapes: Vec<ShapeBinding>,
}

/// Owns every route overlay and the current highlight.
#[derive(Debug, Default)]
pub struct OverlayManager {
    groups: BTreeMap<String, GroupOverlay>,
    highlight: HighlightState,
    simplify_tolerance: f64,
}

impl OverlayManager {
    /// Create a manager. A positive `simplify_tolerance` (degrees) thins
    /// shapes with Douglas-Peucker before drawing.
    pub fn new(simplify_tolerance: f64) -> Self {
        Self {
            simplify_tolerance,
            ..Self::default()
        }
    }

    pub fn highlight(&self) -> &HighlightState {
        &self.highlight
    }

    pub fn highlighted_group(&self) -> Option<&str> {
        self.highlight.group()
    }

    pub fn has_group(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    pub fn group_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn shape_count(&self) -> usize {
        self.groups.values().map(|g| g.shapes.len()).sum()
    }

    pub fn attached_shape_count(&self) -> usize {
        self.groups
            .values()
            .flat_map(|g| g.shapes.iter())
            .filter(|s| s.attached)
            .count()
    }

    /// Bounding box of every shape of a group.
    pub fn bounds(&self, group_id: &str) -> Option<Bounds> {
        self.groups
            .get(group_id)?
            .shapes
            .iter()
            .filter_map(|s| Bounds::from_points(&s.points))
            .reduce(|a, b| a.union(&b))
    }

    /// Replace a group's shapes.
    ///
    /// Invalid points are dropped; shapes left with fewer than two points are
    /// discarded and reported, the remaining shapes are drawn detached with
    /// the default style.
    pub fn load_shapes<S: RenderSurface + ?Sized>(
        &mut self,
        group_id: &str,
        shapes: &[Vec<LatLng>],
        color: &str,
        surface: &mut S,
    ) -> Vec<TrackerError> {
        self.remove_group(group_id, surface);

        let mut rejected = Vec::new();
        let mut bindings = Vec::with_capacity(shapes.len());
        for (index, raw) in shapes.iter().enumerate() {
            let points: Vec<LatLng> = raw.iter().copied().filter(LatLng::is_valid).collect();
            if points.len() < MIN_SHAPE_POINTS {
                let err = TrackerError::MalformedOverlayShape {
                    group_id: group_id.to_string(),
                    shape_index: index,
                    valid_points: points.len(),
                };
                warn!("[OverlayManager] {}", err);
                rejected.push(err);
                continue;
            }
            let points = self.simplify(points);
            surface.draw_or_update_overlay(group_id, index, &points, &OverlayStyle::default_for(color));
            bindings.push(ShapeBinding {
                index,
                points,
                attached: false,
            });
        }

        debug!(
            "[OverlayManager] Loaded {} shapes for {} ({} rejected)",
            bindings.len(),
            group_id,
            rejected.len()
        );
        self.groups.insert(
            group_id.to_string(),
            GroupOverlay {
                color: color.to_string(),
                shapes: bindings,
            },
        );
        rejected
    }

    fn simplify(&self, points: Vec<LatLng>) -> Vec<LatLng> {
        if self.simplify_tolerance <= 0.0 {
            return points;
        }
        let line: LineString<f64> = points.iter().map(|p| Coord::from(*p)).collect();
        line.simplify(&self.simplify_tolerance)
            .coords()
            .map(|c| LatLng::from(*c))
            .collect()
    }

    /// Remove a group's shapes from the surface and forget them.
    pub fn remove_group<S: RenderSurface + ?Sized>(&mut self, group_id: &str, surface: &mut S) {
        let Some(group) = self.groups.remove(group_id) else {
            return;
        };
        for shape in &group.shapes {
            if shape.attached {
                surface.set_overlay_attachment(group_id, shape.index, false);
            }
            surface.remove_overlay(group_id, shape.index);
        }
        if self.highlight.group() == Some(group_id) {
            self.highlight = HighlightState::NoHighlight;
        }
    }

    /// Drop every group not in `keep`.
    pub fn retain<S: RenderSurface + ?Sized>(&mut self, keep: &BTreeSet<String>, surface: &mut S) {
        let doomed: Vec<String> = self
            .groups
            .keys()
            .filter(|g| !keep.contains(*g))
            .cloned()
            .collect();
        for group_id in doomed {
            self.remove_group(&group_id, surface);
        }
    }

    pub fn clear<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) {
        let all: Vec<String> = self.groups.keys().cloned().collect();
        for group_id in all {
            self.remove_group(&group_id, surface);
        }
    }

    /// Attach shapes of visible groups and detach the rest. Only real
    /// transitions reach the surface; a newly attached shape is restyled for
    /// the current highlight. Returns `(attached, detached)`.
    pub fn project_attachment<S: RenderSurface + ?Sized>(
        &mut self,
        visible: &BTreeSet<String>,
        surface: &mut S,
    ) -> (usize, usize) {
        let highlighted = self.highlight.group();
        let (mut attached, mut detached) = (0, 0);
        for (group_id, group) in self.groups.iter_mut() {
            let want = visible.contains(group_id);
            let style = style_for(highlighted, group_id, &group.color);
            for shape in group.shapes.iter_mut().filter(|s| s.attached != want) {
                surface.set_overlay_attachment(group_id, shape.index, want);
                shape.attached = want;
                if want {
                    surface.set_overlay_style(group_id, shape.index, &style);
                    attached += 1;
                } else {
                    detached += 1;
                }
            }
        }
        (attached, detached)
    }

    /// Handle a click on a group's path or vehicle.
    ///
    /// Returns the new highlighted group, if any.
    pub fn interact<S: RenderSurface + ?Sized>(
        &mut self,
        group_id: &str,
        selection: &SelectionState,
        surface: &mut S,
    ) -> Option<&str> {
        if !selection.is_visible(group_id) || self.highlight.group() == Some(group_id) {
            self.clear_highlight(surface);
        } else {
            self.highlight = HighlightState::Highlighted(group_id.to_string());
            self.apply_styles(surface);
        }
        self.highlight.group()
    }

    /// Return to no highlight, restoring default styles.
    pub fn clear_highlight<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) {
        if self.highlight == HighlightState::NoHighlight {
            return;
        }
        self.highlight = HighlightState::NoHighlight;
        self.apply_styles(surface);
    }

    /// Restyle every attached shape for the current highlight.
    pub fn apply_styles<S: RenderSurface + ?Sized>(&self, surface: &mut S) {
        let highlighted = self.highlight.group();
        for (group_id, group) in &self.groups {
            let style = style_for(highlighted, group_id, &group.color);
            for shape in group.shapes.iter().filter(|s| s.attached) {
                surface.set_overlay_style(group_id, shape.index, &style);
            }
        }
    }

    /// Drop the highlight if a projection hid its group.
    pub fn after_projection<S: RenderSurface + ?Sized>(
        &mut self,
        selection: &SelectionState,
        surface: &mut S,
    ) {
        let hidden = self
            .highlight
            .group()
            .is_some_and(|group_id| !selection.is_visible(group_id));
        if hidden {
            self.clear_highlight(surface);
        }
    }
}

fn style_for(highlighted: Option<&str>, group_id: &str, color: &str) -> OverlayStyle {
    match highlighted {
        None => OverlayStyle::default_for(color),
        Some(h) if h == group_id => OverlayStyle::emphasized(color),
        Some(_) => OverlayStyle::deemphasized(color),
    }
}
