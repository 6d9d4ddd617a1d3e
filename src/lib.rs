//! # Transit Live
//!
//! Live vehicle tracking engine for map front-ends.
//!
//! This library provides:
//! - Reconciliation of unordered vehicle snapshots into a stable tracked set
//! - Smooth marker animation between snapshots, retargeted mid-flight
//! - Route overlays with visibility toggling and highlight emphasis
//! - A fetch cycle controller (repeating refresh plus countdown pre-fetch)
//!
//! The map itself is abstracted behind [`RenderSurface`]; snapshot transport
//! behind [`SnapshotSource`].
//!
//! ## Features
//!
//! - **`runtime`** - Async driver running the engine on a tokio `LocalSet`
//! - **`http`** - HTTP snapshot source for the `bus_data`/`route_shapes` backend
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Instant;
//! use transit_live::{
//!     FleetTracker, LatLng, RawEntityUpdate, RecordingSurface, SelectionState, TrackerConfig,
//! };
//!
//! let mut tracker = FleetTracker::new(RecordingSurface::new(), TrackerConfig::default()).unwrap();
//! let now = Instant::now();
//!
//! let requests = tracker.apply_selection(SelectionState::all_visible(["2606_50"]), now);
//! let entity_fetch = requests.into_iter().find(|r| r.is_entity_fetch()).unwrap();
//!
//! let snapshot = vec![RawEntityUpdate::new("bus-1", "2606_50", LatLng::new(-33.51, 151.32))];
//! tracker.complete_entity_fetch(&entity_fetch, Ok(snapshot), now);
//!
//! assert_eq!(tracker.entity_count(), 1);
//! assert!(tracker.surface().is_marker_attached("bus-1"));
//! ```

use geo::Coord;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackerError};

// Engine configuration and user-facing options
pub mod config;
pub use config::{Options, TrackerConfig};

// Linear interpolation between two coordinates
pub mod interpolate;
pub use interpolate::interpolate;

// Snapshot wire types and lenient parsing
pub mod snapshot;
pub use snapshot::{DisplayFields, OverlayShapes, RawEntityUpdate};

// Group labels, colours and ordering
pub mod groups;
pub use groups::{derive_label, sort_labels, tracking_title, Group, GroupRegistry};

// Selected/visible group sets
pub mod selection;
pub use selection::SelectionState;

// Rendering surface abstraction
pub mod surface;
pub use surface::{InfoContent, MarkerIcon, OverlayStyle, RecordingSurface, RenderSurface};

// Tracked entity store (entity + animation state)
pub mod store;
pub use store::{AnimationState, EntityStore, TrackedEntity};

// Snapshot reconciliation
pub mod reconcile;
pub use reconcile::{reconcile, ReconcileStats};

// Frame-driven marker animation
pub mod animation;
pub use animation::AnimationScheduler;

// Route path overlays and highlight protocol
pub mod overlay;
pub use overlay::{HighlightState, OverlayManager};

// Visibility projection onto the surface
pub mod visibility;
pub use visibility::{project, ProjectionStats};

// Fetch cycle state machine
pub mod fetch;
pub use fetch::{FetchController, FetchKind, FetchRequest};

// Snapshot source abstraction
pub mod source;
pub use source::{SnapshotSource, StaticSnapshotSource};

// Saved selection/options/colours
pub mod persistence;
pub use persistence::{JsonFilePreferences, PreferenceStore, SavedPreferences};

// Stateful engine composing all of the above
pub mod tracker;
pub use tracker::{FetchResult, FleetTracker, TrackerStats};

// Async driver for the timers and fetches
#[cfg(feature = "runtime")]
pub mod driver;
#[cfg(feature = "runtime")]
pub use driver::run_tracker;

// HTTP module for snapshot fetching
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::HttpSnapshotSource;

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use transit_live::LatLng;
/// let point = LatLng::new(-33.8688, 151.2093); // Sydney
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Create a new coordinate.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the point has finite, in-range coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }

    /// Whether `other` lies within `tolerance` degrees on both axes.
    pub fn within_tolerance(&self, other: &LatLng, tolerance: f64) -> bool {
        (self.lat - other.lat).abs() <= tolerance && (self.lng - other.lng).abs() <= tolerance
    }
}

impl From<LatLng> for Coord {
    fn from(p: LatLng) -> Self {
        Coord { x: p.lng, y: p.lat }
    }
}

impl From<Coord> for LatLng {
    fn from(c: Coord) -> Self {
        LatLng::new(c.y, c.x)
    }
}

/// Bounding box of a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from points. Returns `None` for an empty slice.
    pub fn from_points(points: &[LatLng]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.lat);
            max_lat = max_lat.max(p.lat);
            min_lng = min_lng.min(p.lng);
            max_lng = max_lng.max(p.lng);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Grow these bounds to also cover `other`.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
