//! Snapshot reconciliation.
//!
//! Merges one vehicle snapshot into the [`EntityStore`]: creates markers for
//! new vehicles, retargets or snaps known ones, and removes vehicles that
//! disappeared from the snapshot's scope.
//!
//! ## Algorithm
//!
//! 1. Validate each record; skip bad ones individually
//! 2. De-duplicate by id (the later record wins)
//! 3. For known entities compare against the *visual* position, so a
//!    retarget mid-flight starts from wherever the marker is drawn
//! 4. Remove entities of in-scope groups that were not in the snapshot

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use log::debug;

use crate::error::{OptionExt, Result, TrackerError};
use crate::groups::GroupRegistry;
use crate::snapshot::{RawEntityUpdate, UNKNOWN_ID};
use crate::store::{AnimationState, EntityStore, TrackedEntity};
use crate::surface::RenderSurface;
use crate::{derive_label, LatLng};

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// New entities created
    pub created: usize,
    /// Known entities refreshed
    pub updated: usize,
    /// Entities that started a new animation segment
    pub animated: usize,
    /// Entities snapped to an update within tolerance
    pub snapped: usize,
    /// Entities removed because they left the snapshot
    pub removed: usize,
    /// Records rejected as malformed or out of scope
    pub skipped: usize,
}

/// A record that passed validation.
struct ValidUpdate<'a> {
    entity_id: &'a str,
    group_id: &'a str,
    position: LatLng,
    raw: &'a RawEntityUpdate,
}

fn validate<'a>(raw: &'a RawEntityUpdate, scope: &BTreeSet<String>) -> Result<ValidUpdate<'a>> {
    let entity_id = raw
        .entity_id
        .as_deref()
        .filter(|id| !id.is_empty() && *id != UNKNOWN_ID)
        .ok_or_malformed(UNKNOWN_ID, "missing vehicle id")?;
    let position = raw
        .position()
        .ok_or_malformed(entity_id, "missing or non-finite coordinates")?;
    let group_id = raw.group_or_unknown();
    if !scope.contains(group_id) {
        return Err(TrackerError::malformed_entity(
            entity_id,
            format!("group '{}' not in fetch scope", group_id),
        ));
    }
    Ok(ValidUpdate {
        entity_id,
        group_id,
        position,
        raw,
    })
}

/// Reconcile `snapshot` into `store` for the groups in `scope`.
///
/// Entities whose group is outside `scope` are never touched. New markers are
/// placed detached; attachment is the visibility projector's job.
pub fn reconcile<S: RenderSurface + ?Sized>(
    store: &mut EntityStore,
    groups: &mut GroupRegistry,
    surface: &mut S,
    snapshot: &[RawEntityUpdate],
    scope: &BTreeSet<String>,
    now: Instant,
    tolerance: f64,
) -> ReconcileStats {
    let mut stats = ReconcileStats::default();

    // Validate and de-duplicate, keeping first-seen order
    let mut valid: Vec<ValidUpdate> = Vec::with_capacity(snapshot.len());
    let mut index_of: BTreeMap<&str, usize> = BTreeMap::new();
    for raw in snapshot {
        match validate(raw, scope) {
            Ok(update) => match index_of.get(update.entity_id) {
                Some(&i) => valid[i] = update,
                None => {
                    index_of.insert(update.entity_id, valid.len());
                    valid.push(update);
                }
            },
            Err(e) => {
                debug!("[Reconciler] {}", e);
                stats.skipped += 1;
            }
        }
    }

    for update in &valid {
        apply_update(store, groups, surface, update, now, tolerance, &mut stats);
    }

    // Remove in-scope entities absent from this snapshot
    let doomed: Vec<String> = store
        .iter()
        .filter(|e| scope.contains(&e.group_id) && !index_of.contains_key(e.entity_id.as_str()))
        .map(|e| e.entity_id.clone())
        .collect();
    for entity_id in doomed {
        if store.remove(&entity_id, surface).is_some() {
            stats.removed += 1;
        }
    }

    debug!(
        "[Reconciler] {} records: {} created, {} updated ({} animated, {} snapped), {} removed, {} skipped",
        snapshot.len(),
        stats.created,
        stats.updated,
        stats.animated,
        stats.snapped,
        stats.removed,
        stats.skipped
    );

    stats
}

fn apply_update<S: RenderSurface + ?Sized>(
    store: &mut EntityStore,
    groups: &mut GroupRegistry,
    surface: &mut S,
    update: &ValidUpdate,
    now: Instant,
    tolerance: f64,
    stats: &mut ReconcileStats,
) {
    let color = groups.ensure(update.group_id).assigned_color.clone();
    let heading = update.raw.heading_degrees();
    let metadata = update.raw.display_fields();

    let Some(entity) = store.get_mut(update.entity_id) else {
        let entity = TrackedEntity {
            entity_id: update.entity_id.to_string(),
            group_id: update.group_id.to_string(),
            position: update.position,
            visual_position: update.position,
            heading,
            label: derive_label(update.group_id),
            color,
            metadata,
            animation: AnimationState::at_rest(update.position),
            attached: false,
            info_open: false,
        };
        surface.place_or_update_marker(&entity.entity_id, entity.visual_position, &entity.icon());
        store.insert(entity);
        stats.created += 1;
        return;
    };

    let target = update.position;
    let moved = !entity.visual_position.within_tolerance(&target, tolerance);
    let animation = &mut entity.animation;

    if moved && (!animation.is_animating || animation.target_position != target) {
        animation.start(entity.visual_position, target, now);
        stats.animated += 1;
    } else if !moved && !animation.is_animating {
        entity.visual_position = target;
        animation.target_position = target;
        animation.start_position = None;
        stats.snapped += 1;
    }

    entity.position = target;
    entity.heading = heading;
    entity.metadata = metadata;
    if entity.group_id != update.group_id {
        entity.group_id = update.group_id.to_string();
        entity.label = derive_label(update.group_id);
    }
    entity.color = color;
    stats.updated += 1;

    surface.place_or_update_marker(&entity.entity_id, entity.visual_position, &entity.icon());
    if entity.info_open {
        surface.open_auxiliary_info(&entity.entity_id, &entity.info_content());
    }
}
