//! Frame-driven marker animation.
//!
//! The scheduler does not own a timer. The host (or the async driver) asks
//! [`AnimationScheduler::ensure_running`] after every reconciliation and, while
//! a frame is pending, calls [`AnimationScheduler::tick`] once per frame.

use std::time::{Duration, Instant};

use log::debug;

use crate::interpolate::{clamp_fraction, interpolate};
use crate::store::EntityStore;
use crate::surface::RenderSurface;

#[derive(Debug, Clone)]
pub struct AnimationScheduler {
    duration: Duration,
    scheduled: bool,
}

impl AnimationScheduler {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            scheduled: false,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether a frame is pending.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Schedule a frame if any entity is animating and none is pending.
    pub fn ensure_running(&mut self, store: &EntityStore) -> bool {
        if !self.scheduled && store.any_animating() {
            debug!(
                "[Animation] Starting frame loop for {} entities",
                store.animating_count()
            );
            self.scheduled = true;
        }
        self.scheduled
    }

    /// Fraction of the segment elapsed at `now`. A zero duration completes
    /// immediately.
    pub fn fraction(&self, start_time: Instant, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(start_time);
        clamp_fraction(elapsed.as_secs_f64() / self.duration.as_secs_f64())
    }

    /// Advance every animating entity to `now`.
    ///
    /// Returns `true` if another frame is needed.
    pub fn tick<S: RenderSurface + ?Sized>(
        &mut self,
        store: &mut EntityStore,
        surface: &mut S,
        now: Instant,
    ) -> bool {
        let mut still_animating = false;

        for entity in store.iter_mut().filter(|e| e.animation.is_animating) {
            let (Some(start), Some(start_time)) =
                (entity.animation.start_position, entity.animation.start_time)
            else {
                entity.visual_position = entity.animation.target_position;
                entity.animation.finish();
                surface.move_marker(&entity.entity_id, entity.visual_position);
                continue;
            };

            let target = entity.animation.target_position;
            let fraction = self.fraction(start_time, now);
            if fraction >= 1.0 {
                entity.visual_position = target;
                entity.animation.finish();
            } else {
                entity.visual_position = interpolate(start, target, fraction);
                still_animating = true;
            }
            surface.move_marker(&entity.entity_id, entity.visual_position);
        }

        self.scheduled = still_animating;
        still_animating
    }

    /// Drop any pending frame (e.g. on shutdown).
    pub fn cancel(&mut self) {
        self.scheduled = false;
    }
}
