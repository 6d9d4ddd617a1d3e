//! Tracked entity store.
//!
//! Owns every tracked vehicle together with its animation state, keyed by
//! entity id. The reconciler creates, updates and removes entries; the
//! animation scheduler advances `visual_position`; the visibility projector
//! only flips the `attached` binding.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::snapshot::DisplayFields;
use crate::surface::{InfoContent, MarkerIcon, RenderSurface};
use crate::LatLng;

/// Per-entity interpolation state.
///
/// Invariant: `is_animating` implies `start_position` and `start_time` are
/// set. When not animating the entity's visual position equals
/// `target_position` exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationState {
    pub start_position: Option<LatLng>,
    pub target_position: LatLng,
    pub start_time: Option<Instant>,
    pub is_animating: bool,
}

impl AnimationState {
    /// Resting state at `position`.
    pub fn at_rest(position: LatLng) -> Self {
        Self {
            start_position: None,
            target_position: position,
            start_time: None,
            is_animating: false,
        }
    }

    /// Begin a segment from `from` to `to` at `now`.
    pub fn start(&mut self, from: LatLng, to: LatLng, now: Instant) {
        self.start_position = Some(from);
        self.target_position = to;
        self.start_time = Some(now);
        self.is_animating = true;
    }

    /// Stop at the exact target, clearing the segment.
    pub fn finish(&mut self) {
        self.start_position = None;
        self.start_time = None;
        self.is_animating = false;
    }
}

/// A vehicle with stable identity across snapshots.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    pub entity_id: String,
    pub group_id: String,
    /// Last confirmed snapshot position
    pub position: LatLng,
    /// Position currently rendered on the surface
    pub visual_position: LatLng,
    /// Bearing in degrees [0, 360)
    pub heading: f64,
    pub label: String,
    pub color: String,
    pub metadata: DisplayFields,
    pub animation: AnimationState,
    /// Whether the marker is attached to the surface
    pub attached: bool,
    /// Whether this entity's info popup is open
    pub info_open: bool,
}

impl TrackedEntity {
    pub fn icon(&self) -> MarkerIcon {
        MarkerIcon::new(self.heading, &self.color, &self.label)
    }

    pub fn info_content(&self) -> InfoContent {
        InfoContent::for_vehicle(
            &self.entity_id,
            &self.group_id,
            self.position,
            self.metadata.speed.as_deref(),
            self.metadata.last_update,
        )
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_animating
    }
}

/// Owned map of tracked entities.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<String, TrackedEntity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: &str) -> Option<&TrackedEntity> {
        self.entities.get(entity_id)
    }

    pub fn get_mut(&mut self, entity_id: &str) -> Option<&mut TrackedEntity> {
        self.entities.get_mut(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn insert(&mut self, entity: TrackedEntity) {
        self.entities.insert(entity.entity_id.clone(), entity);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedEntity> {
        self.entities.values_mut()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    /// Whether any entity has an animation in flight.
    pub fn any_animating(&self) -> bool {
        self.entities.values().any(|e| e.animation.is_animating)
    }

    pub fn animating_count(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.animation.is_animating)
            .count()
    }

    /// Entity ids belonging to a group.
    pub fn ids_in_group(&self, group_id: &str) -> Vec<String> {
        self.entities
            .values()
            .filter(|e| e.group_id == group_id)
            .map(|e| e.entity_id.clone())
            .collect()
    }

    /// Remove an entity and tear down its surface binding: close its popup,
    /// detach and delete the marker.
    pub fn remove<S: RenderSurface + ?Sized>(
        &mut self,
        entity_id: &str,
        surface: &mut S,
    ) -> Option<TrackedEntity> {
        let entity = self.entities.remove(entity_id)?;
        if entity.info_open {
            surface.close_auxiliary_info(entity_id);
        }
        if entity.attached {
            surface.set_marker_attachment(entity_id, false);
        }
        surface.remove_marker(entity_id);
        Some(entity)
    }

    /// Remove every entity whose group is not in `groups`.
    pub fn remove_outside<S: RenderSurface + ?Sized>(
        &mut self,
        groups: &BTreeSet<String>,
        surface: &mut S,
    ) -> usize {
        let doomed: Vec<String> = self
            .entities
            .values()
            .filter(|e| !groups.contains(&e.group_id))
            .map(|e| e.entity_id.clone())
            .collect();
        for id in &doomed {
            self.remove(id, surface);
        }
        doomed.len()
    }

    /// Remove everything from the store and the surface.
    pub fn clear<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) {
        for id in self.ids() {
            self.remove(&id, surface);
        }
    }
}
