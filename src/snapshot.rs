//! Snapshot wire types.
//!
//! The backend emits one JSON object per vehicle. Fields are frequently
//! missing or of the wrong type (`null` coordinates, `"N/A"` ids, string
//! bearings), so every field is parsed leniently and validation is left to
//! the reconciler, which skips bad records one at a time instead of failing
//! the whole snapshot.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, TrackerError};
use crate::LatLng;

/// Sentinel the backend uses for an unknown vehicle or route id.
pub const UNKNOWN_ID: &str = "N/A";

/// Route shapes keyed by group id. Each shape is an ordered point list.
pub type OverlayShapes = BTreeMap<String, Vec<Vec<LatLng>>>;

/// One vehicle record from a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntityUpdate {
    #[serde(rename = "vehicle_id", default, deserialize_with = "lenient_string")]
    pub entity_id: Option<String>,
    #[serde(rename = "route_id", default, deserialize_with = "lenient_string")]
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "json_number")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "json_number")]
    pub longitude: Option<f64>,
    #[serde(rename = "bearing", default, deserialize_with = "number_or_numeric_string")]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub speed: Option<String>,
    #[serde(default, deserialize_with = "json_integer")]
    pub raw_timestamp: Option<i64>,
}

impl RawEntityUpdate {
    /// Build a well-formed record (mostly for tests and synthetic feeds).
    pub fn new(entity_id: &str, group_id: &str, position: LatLng) -> Self {
        Self {
            entity_id: Some(entity_id.to_string()),
            group_id: Some(group_id.to_string()),
            latitude: Some(position.lat),
            longitude: Some(position.lng),
            ..Self::default()
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_speed(mut self, speed: &str) -> Self {
        self.speed = Some(speed.to_string());
        self
    }

    pub fn with_timestamp(mut self, unix_seconds: i64) -> Self {
        self.raw_timestamp = Some(unix_seconds);
        self
    }

    /// Group id, falling back to the unknown sentinel.
    pub fn group_or_unknown(&self) -> &str {
        self.group_id.as_deref().unwrap_or(UNKNOWN_ID)
    }

    /// Validated position, or `None` if either axis is missing or not finite.
    pub fn position(&self) -> Option<LatLng> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                Some(LatLng::new(lat, lng))
            }
            _ => None,
        }
    }

    /// Heading in degrees, normalised to [0, 360). Non-finite or missing is 0.
    pub fn heading_degrees(&self) -> f64 {
        match self.heading {
            Some(h) if h.is_finite() => h.rem_euclid(360.0),
            _ => 0.0,
        }
    }

    pub fn display_fields(&self) -> DisplayFields {
        DisplayFields {
            speed: self.speed.clone().filter(|s| !s.is_empty() && s != UNKNOWN_ID),
            last_update: self.raw_timestamp,
        }
    }
}

/// Free-form display metadata carried alongside a vehicle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFields {
    /// Pre-formatted speed text, e.g. "32.4 km/h"
    pub speed: Option<String>,
    /// Unix timestamp (seconds) of the vehicle's last report
    pub last_update: Option<i64>,
}

/// Parse a vehicle snapshot body. The body must be a JSON array; an error
/// object or malformed JSON is a transport failure.
pub fn parse_entity_snapshot(body: &str) -> Result<Vec<RawEntityUpdate>> {
    serde_json::from_str(body).map_err(|e| TrackerError::Transport {
        message: format!("Malformed snapshot payload: {}", e),
        status_code: None,
    })
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    #[serde(default, deserialize_with = "json_number")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "json_number")]
    lng: Option<f64>,
}

/// Parse a route-shape body: `{ "route": [[{"lat":..,"lng":..}, ...], ...] }`.
///
/// Points without numeric coordinates are dropped here; shapes left with too
/// few points are rejected later by the overlay manager.
pub fn parse_overlay_shapes(body: &str) -> Result<OverlayShapes> {
    let raw: BTreeMap<String, Value> =
        serde_json::from_str(body).map_err(|e| TrackerError::Transport {
            message: format!("Malformed shapes payload: {}", e),
            status_code: None,
        })?;

    let mut shapes = OverlayShapes::new();
    for (group_id, value) in raw {
        let Value::Array(paths) = value else {
            warn!("[Snapshot] Shapes for group {} are not an array, skipping", group_id);
            continue;
        };
        let parsed: Vec<Vec<LatLng>> = paths
            .into_iter()
            .map(|path| match path {
                Value::Array(points) => points
                    .into_iter()
                    .filter_map(|p| serde_json::from_value::<WirePoint>(p).ok())
                    .filter_map(|p| Some(LatLng::new(p.lat?, p.lng?)))
                    .collect(),
                _ => Vec::new(),
            })
            .collect();
        shapes.insert(group_id, parsed);
    }
    Ok(shapes)
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn json_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        _ => None,
    })
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn json_integer<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}
