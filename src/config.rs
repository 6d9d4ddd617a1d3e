//! Engine configuration and user-facing options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Configuration for the tracking engine.
///
/// These values are fixed for the lifetime of a [`crate::FleetTracker`].
/// User-adjustable settings live in [`Options`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How long a marker takes to glide to a new position, in milliseconds.
    /// Bounds the visual transition regardless of the time between snapshots.
    /// Default: 10000 (half the default 20s refresh period)
    pub animation_duration_ms: u64,

    /// Per-axis tolerance (degrees) below which a position change is snapped
    /// instead of animated.
    /// Default: 1e-6
    pub position_tolerance_degrees: f64,

    /// Countdown start value for the pre-fetch timer, in seconds.
    /// Default: 10
    pub countdown_seconds: u32,

    /// Countdown value at which the early fetch is issued.
    /// Default: 1
    pub countdown_trigger_at: u32,

    /// Animation frame interval for the async driver, in milliseconds.
    /// Default: 16 (~60 fps)
    pub frame_interval_ms: u64,

    /// Douglas-Peucker tolerance (degrees) applied to route shapes before
    /// drawing. 0 keeps every vertex.
    /// Default: 0.0
    pub overlay_simplification_tolerance: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            animation_duration_ms: 10_000,
            position_tolerance_degrees: 1e-6,
            countdown_seconds: 10,
            countdown_trigger_at: 1,
            frame_interval_ms: 16,
            overlay_simplification_tolerance: 0.0,
        }
    }
}

impl TrackerConfig {
    pub fn animation_duration(&self) -> Duration {
        Duration::from_millis(self.animation_duration_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Reject configurations the fetch controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.countdown_seconds == 0 {
            return Err(TrackerError::Config {
                message: "countdown_seconds must be at least 1".to_string(),
            });
        }
        if self.countdown_trigger_at > self.countdown_seconds {
            return Err(TrackerError::Config {
                message: format!(
                    "countdown_trigger_at ({}) exceeds countdown_seconds ({})",
                    self.countdown_trigger_at, self.countdown_seconds
                ),
            });
        }
        if !self.position_tolerance_degrees.is_finite() || self.position_tolerance_degrees < 0.0 {
            return Err(TrackerError::Config {
                message: "position_tolerance_degrees must be a non-negative number".to_string(),
            });
        }
        if !self.overlay_simplification_tolerance.is_finite()
            || self.overlay_simplification_tolerance < 0.0
        {
            return Err(TrackerError::Config {
                message: "overlay_simplification_tolerance must be a non-negative number"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Shortest repeating fetch period honoured, in milliseconds.
pub const MIN_REFRESH_PERIOD_MS: u64 = 1_000;

/// User-adjustable refresh options, persisted alongside the selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Repeating fetch period in milliseconds. Default: 20000.
    /// Values below [`MIN_REFRESH_PERIOD_MS`] are raised to it.
    #[serde(alias = "updateIntervalMs")]
    pub refresh_period_ms: u64,
    /// Keep fetching after the initial snapshot. Default: true
    pub live_tracking_enabled: bool,
    /// Fetch and draw route paths. Default: true
    #[serde(alias = "showRoutePathsEnabled")]
    pub show_paths_enabled: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            refresh_period_ms: 20_000,
            live_tracking_enabled: true,
            show_paths_enabled: true,
        }
    }
}

impl Options {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_period_ms.max(MIN_REFRESH_PERIOD_MS))
    }
}
