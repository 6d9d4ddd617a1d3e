//! Snapshot source abstraction.
//!
//! The engine consumes snapshots through this trait and does not care where
//! they come from. [`crate::http::HttpSnapshotSource`] (feature `http`) talks
//! to the live backend; [`StaticSnapshotSource`] serves canned data.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};

use crate::error::{Result, TrackerError};
use crate::snapshot::{OverlayShapes, RawEntityUpdate};

/// Provider of vehicle snapshots and route shapes for a set of groups.
///
/// Futures are not required to be `Send`; the driver runs them on a
/// single-threaded `LocalSet`.
#[allow(async_fn_in_trait)]
pub trait SnapshotSource {
    async fn fetch_entities(&self, scope: &BTreeSet<String>) -> Result<Vec<RawEntityUpdate>>;

    async fn fetch_overlay_shapes(&self, scope: &BTreeSet<String>) -> Result<OverlayShapes>;
}

/// In-memory source replaying queued snapshots.
///
/// Each entity fetch pops the next queued result; once the queue is empty the
/// last snapshot is served again. Shapes are fixed.
#[derive(Debug, Default)]
pub struct StaticSnapshotSource {
    snapshots: RefCell<VecDeque<Result<Vec<RawEntityUpdate>>>>,
    last: RefCell<Vec<RawEntityUpdate>>,
    shapes: OverlayShapes,
}

impl StaticSnapshotSource {
    pub fn new(shapes: OverlayShapes) -> Self {
        Self {
            shapes,
            ..Self::default()
        }
    }

    pub fn push_snapshot(&self, snapshot: Vec<RawEntityUpdate>) {
        self.snapshots.borrow_mut().push_back(Ok(snapshot));
    }

    pub fn push_failure(&self, error: TrackerError) {
        self.snapshots.borrow_mut().push_back(Err(error));
    }
}

impl SnapshotSource for StaticSnapshotSource {
    async fn fetch_entities(&self, scope: &BTreeSet<String>) -> Result<Vec<RawEntityUpdate>> {
        let next = self.snapshots.borrow_mut().pop_front();
        let snapshot = match next {
            Some(Ok(snapshot)) => {
                *self.last.borrow_mut() = snapshot.clone();
                snapshot
            }
            Some(Err(e)) => return Err(e),
            None => self.last.borrow().clone(),
        };
        Ok(snapshot
            .into_iter()
            .filter(|u| u.group_id.as_ref().is_some_and(|g| scope.contains(g)))
            .collect())
    }

    async fn fetch_overlay_shapes(&self, scope: &BTreeSet<String>) -> Result<OverlayShapes> {
        Ok(self
            .shapes
            .iter()
            .filter(|(group_id, _)| scope.contains(*group_id))
            .map(|(group_id, shapes)| (group_id.clone(), shapes.clone()))
            .collect())
    }
}
