//! Rendering surface abstraction.
//!
//! The engine never talks to a map SDK directly. Everything it draws goes
//! through [`RenderSurface`], whose methods are plain "put this here" calls.
//! [`RecordingSurface`] is an in-memory implementation that keeps the
//! resulting scene and a call log, used by tests and headless runs.

use std::collections::BTreeMap;

use chrono::DateTime;

use crate::LatLng;

/// Size of the marker glyph in pixels.
pub const ICON_SIZE: f64 = 50.0;

/// Primitives the engine needs from a map or canvas.
pub trait RenderSurface {
    /// Whether the surface initialised. An unavailable surface is fatal.
    fn is_available(&self) -> bool {
        true
    }

    /// Create a marker, or update the icon and position of an existing one.
    fn place_or_update_marker(&mut self, entity_id: &str, position: LatLng, icon: &MarkerIcon);

    /// Move an existing marker (animation frames).
    fn move_marker(&mut self, entity_id: &str, position: LatLng);

    fn set_marker_attachment(&mut self, entity_id: &str, attached: bool);

    fn remove_marker(&mut self, entity_id: &str);

    /// Create or replace one path shape of a group.
    fn draw_or_update_overlay(
        &mut self,
        group_id: &str,
        shape_index: usize,
        points: &[LatLng],
        style: &OverlayStyle,
    );

    fn set_overlay_style(&mut self, group_id: &str, shape_index: usize, style: &OverlayStyle);

    fn set_overlay_attachment(&mut self, group_id: &str, shape_index: usize, attached: bool);

    fn remove_overlay(&mut self, group_id: &str, shape_index: usize);

    fn open_auxiliary_info(&mut self, entity_id: &str, content: &InfoContent);

    fn close_auxiliary_info(&mut self, entity_id: &str);
}

// ============================================================================
// Marker Icon
// ============================================================================

/// Visual descriptor for a vehicle marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerIcon {
    /// Bearing in degrees, 0 = north
    pub heading: f64,
    pub color: String,
    pub label: String,
}

impl MarkerIcon {
    pub fn new(heading: f64, color: &str, label: &str) -> Self {
        Self {
            heading,
            color: color.to_string(),
            label: label.to_string(),
        }
    }

    /// Label font size shrinks for longer route names.
    pub fn font_size(&self) -> u32 {
        match self.label.chars().count() {
            0..=2 => 10,
            3 => 8,
            _ => 7,
        }
    }

    /// Arrow glyph rotated to the heading, with an upright route label.
    pub fn to_svg(&self) -> String {
        let s = ICON_SIZE;
        let c = s / 2.0;
        format!(
            concat!(
                r#"<svg version="1.1" width="{s}" height="{s}" xmlns="http://www.w3.org/2000/svg">"#,
                r#"<g transform="rotate({h}, {c}, {c})">"#,
                r#"<polygon points="{p1x},{p1y} {p2x},{p2y} {p3x},{p3y} {p4x},{p3y} {p5x},{p2y}" fill="{color}" stroke="black" stroke-width="1.5"/>"#,
                r#"<circle cx="{c}" cy="{c}" r="{r}" fill="black"/>"#,
                r#"<text x="{c}" y="{c}" font-size="{fs}" text-anchor="middle" dominant-baseline="central" fill="white" font-family="Arial, sans-serif" transform="rotate({nh}, {c}, {c})">{label}</text>"#,
                r#"</g></svg>"#
            ),
            s = s,
            c = c,
            h = self.heading,
            nh = -self.heading,
            p1x = s * 0.5,
            p1y = s * 0.2,
            p2x = s * 0.7,
            p2y = s * 0.3,
            p3x = s * 0.65,
            p3y = s * 0.7,
            p4x = s * 0.35,
            p5x = s * 0.3,
            r = s * 0.15,
            color = self.color,
            fs = self.font_size(),
            label = escape_xml(&self.label),
        )
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Overlay Style
// ============================================================================

/// Stroke style for a route path.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub color: String,
    pub opacity: f64,
    pub weight: f64,
    pub z_index: i32,
}

impl OverlayStyle {
    pub const DEFAULT_OPACITY: f64 = 0.35;
    pub const DEFAULT_WEIGHT: f64 = 5.0;
    pub const DEFAULT_Z_INDEX: i32 = 1;

    pub const HIGHLIGHTED_OPACITY: f64 = 0.9;
    pub const HIGHLIGHTED_WEIGHT: f64 = 7.0;
    pub const HIGHLIGHTED_Z_INDEX: i32 = 5;

    pub const DEEMPHASIZED_OPACITY: f64 = 0.15;
    pub const DEEMPHASIZED_WEIGHT: f64 = 4.0;

    pub fn default_for(color: &str) -> Self {
        Self {
            color: color.to_string(),
            opacity: Self::DEFAULT_OPACITY,
            weight: Self::DEFAULT_WEIGHT,
            z_index: Self::DEFAULT_Z_INDEX,
        }
    }

    pub fn emphasized(color: &str) -> Self {
        Self {
            color: color.to_string(),
            opacity: Self::HIGHLIGHTED_OPACITY,
            weight: Self::HIGHLIGHTED_WEIGHT,
            z_index: Self::HIGHLIGHTED_Z_INDEX,
        }
    }

    pub fn deemphasized(color: &str) -> Self {
        Self {
            color: color.to_string(),
            opacity: Self::DEEMPHASIZED_OPACITY,
            weight: Self::DEEMPHASIZED_WEIGHT,
            z_index: Self::DEFAULT_Z_INDEX,
        }
    }
}

// ============================================================================
// Info Content
// ============================================================================

/// Text shown in a vehicle's info popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoContent {
    pub title: String,
    pub lines: Vec<String>,
}

impl InfoContent {
    pub fn for_vehicle(
        entity_id: &str,
        group_id: &str,
        position: LatLng,
        speed: Option<&str>,
        last_update: Option<i64>,
    ) -> Self {
        let mut lines = vec![
            format!("Route: {}", group_id),
            format!("Vehicle: {}", entity_id),
        ];
        if let Some(speed) = speed {
            lines.push(format!("Speed: {}", speed));
        }
        lines.push(format!("Last Update: {}", format_timestamp(last_update)));
        lines.push(format!("Coords: {:.5}, {:.5}", position.lat, position.lng));
        Self {
            title: format!("Bus {}", entity_id),
            lines,
        }
    }

    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Format a unix timestamp (seconds) as `HH:MM:SS` UTC.
pub fn format_timestamp(unix_seconds: Option<i64>) -> String {
    match unix_seconds {
        None => "No TS".to_string(),
        Some(ts) => match DateTime::from_timestamp(ts, 0) {
            Some(dt) => dt.format("%H:%M:%S").to_string(),
            None => "Inv TS Data".to_string(),
        },
    }
}

// ============================================================================
// Recording Surface
// ============================================================================

/// One call made against a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    PlaceMarker { entity_id: String, position: LatLng },
    MoveMarker { entity_id: String, position: LatLng },
    MarkerAttachment { entity_id: String, attached: bool },
    RemoveMarker { entity_id: String },
    DrawOverlay { group_id: String, shape_index: usize },
    OverlayStyle { group_id: String, shape_index: usize },
    OverlayAttachment { group_id: String, shape_index: usize, attached: bool },
    RemoveOverlay { group_id: String, shape_index: usize },
    OpenInfo { entity_id: String },
    CloseInfo { entity_id: String },
}

impl SurfaceCall {
    /// Whether this call attaches or detaches something.
    pub fn is_attachment(&self) -> bool {
        matches!(
            self,
            SurfaceCall::MarkerAttachment { .. } | SurfaceCall::OverlayAttachment { .. }
        )
    }
}

/// Current state of a marker on a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerState {
    pub position: LatLng,
    pub icon: MarkerIcon,
    pub attached: bool,
}

/// Current state of an overlay shape on a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayState {
    pub points: Vec<LatLng>,
    pub style: OverlayStyle,
    pub attached: bool,
}

/// In-memory surface that records the scene and every call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    available: bool,
    markers: BTreeMap<String, MarkerState>,
    overlays: BTreeMap<(String, usize), OverlayState>,
    open_info: BTreeMap<String, InfoContent>,
    calls: Vec<SurfaceCall>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            available: true,
            ..Self::default()
        }
    }

    /// A surface that failed to initialise.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[SurfaceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn marker(&self, entity_id: &str) -> Option<&MarkerState> {
        self.markers.get(entity_id)
    }

    pub fn marker_position(&self, entity_id: &str) -> Option<LatLng> {
        self.markers.get(entity_id).map(|m| m.position)
    }

    pub fn is_marker_attached(&self, entity_id: &str) -> bool {
        self.markers.get(entity_id).is_some_and(|m| m.attached)
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn overlay(&self, group_id: &str, shape_index: usize) -> Option<&OverlayState> {
        self.overlays.get(&(group_id.to_string(), shape_index))
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    /// Styles of every overlay, keyed by (group, shape index).
    pub fn overlay_styles(&self) -> BTreeMap<(String, usize), OverlayStyle> {
        self.overlays
            .iter()
            .map(|(k, v)| (k.clone(), v.style.clone()))
            .collect()
    }

    pub fn is_info_open(&self, entity_id: &str) -> bool {
        self.open_info.contains_key(entity_id)
    }

    pub fn open_info_count(&self) -> usize {
        self.open_info.len()
    }
}

impl RenderSurface for RecordingSurface {
    fn is_available(&self) -> bool {
        self.available
    }

    fn place_or_update_marker(&mut self, entity_id: &str, position: LatLng, icon: &MarkerIcon) {
        self.calls.push(SurfaceCall::PlaceMarker {
            entity_id: entity_id.to_string(),
            position,
        });
        let marker = self
            .markers
            .entry(entity_id.to_string())
            .or_insert_with(|| MarkerState {
                position,
                icon: icon.clone(),
                attached: false,
            });
        marker.position = position;
        marker.icon = icon.clone();
    }

    fn move_marker(&mut self, entity_id: &str, position: LatLng) {
        self.calls.push(SurfaceCall::MoveMarker {
            entity_id: entity_id.to_string(),
            position,
        });
        if let Some(marker) = self.markers.get_mut(entity_id) {
            marker.position = position;
        }
    }

    fn set_marker_attachment(&mut self, entity_id: &str, attached: bool) {
        self.calls.push(SurfaceCall::MarkerAttachment {
            entity_id: entity_id.to_string(),
            attached,
        });
        if let Some(marker) = self.markers.get_mut(entity_id) {
            marker.attached = attached;
        }
    }

    fn remove_marker(&mut self, entity_id: &str) {
        self.calls.push(SurfaceCall::RemoveMarker {
            entity_id: entity_id.to_string(),
        });
        self.markers.remove(entity_id);
    }

    fn draw_or_update_overlay(
        &mut self,
        group_id: &str,
        shape_index: usize,
        points: &[LatLng],
        style: &OverlayStyle,
    ) {
        self.calls.push(SurfaceCall::DrawOverlay {
            group_id: group_id.to_string(),
            shape_index,
        });
        let overlay = self
            .overlays
            .entry((group_id.to_string(), shape_index))
            .or_insert_with(|| OverlayState {
                points: Vec::new(),
                style: style.clone(),
                attached: false,
            });
        overlay.points = points.to_vec();
        overlay.style = style.clone();
    }

    fn set_overlay_style(&mut self, group_id: &str, shape_index: usize, style: &OverlayStyle) {
        self.calls.push(SurfaceCall::OverlayStyle {
            group_id: group_id.to_string(),
            shape_index,
        });
        if let Some(overlay) = self.overlays.get_mut(&(group_id.to_string(), shape_index)) {
            overlay.style = style.clone();
        }
    }

    fn set_overlay_attachment(&mut self, group_id: &str, shape_index: usize, attached: bool) {
        self.calls.push(SurfaceCall::OverlayAttachment {
            group_id: group_id.to_string(),
            shape_index,
            attached,
        });
        if let Some(overlay) = self.overlays.get_mut(&(group_id.to_string(), shape_index)) {
            overlay.attached = attached;
        }
    }

    fn remove_overlay(&mut self, group_id: &str, shape_index: usize) {
        self.calls.push(SurfaceCall::RemoveOverlay {
            group_id: group_id.to_string(),
            shape_index,
        });
        self.overlays.remove(&(group_id.to_string(), shape_index));
    }

    fn open_auxiliary_info(&mut self, entity_id: &str, content: &InfoContent) {
        self.calls.push(SurfaceCall::OpenInfo {
            entity_id: entity_id.to_string(),
        });
        self.open_info.insert(entity_id.to_string(), content.clone());
    }

    fn close_auxiliary_info(&mut self, entity_id: &str) {
        self.calls.push(SurfaceCall::CloseInfo {
            entity_id: entity_id.to_string(),
        });
        self.open_info.remove(entity_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_font_size() {
        assert_eq!(MarkerIcon::new(0.0, "#FF0000", "50").font_size(), 10);
        assert_eq!(MarkerIcon::new(0.0, "#FF0000", "505").font_size(), 8);
        assert_eq!(MarkerIcon::new(0.0, "#FF0000", "T505").font_size(), 7);
    }

    #[test]
    fn test_icon_svg_rotation() {
        let svg = MarkerIcon::new(90.0, "#3375FF", "5<0").to_svg();
        assert!(svg.contains(r#"rotate(90, 25, 25)"#));
        assert!(svg.contains(r#"rotate(-90, 25, 25)"#));
        assert!(svg.contains("#3375FF"));
        assert!(svg.contains("5&lt;0"));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(None), "No TS");
        assert_eq!(format_timestamp(Some(3_600 + 120 + 5)), "01:02:05");
        assert_eq!(format_timestamp(Some(i64::MAX)), "Inv TS Data");
    }

    #[test]
    fn test_info_content_lines() {
        let info = InfoContent::for_vehicle(
            "v1",
            "2606_50",
            LatLng::new(-33.123456, 151.654321),
            Some("30.0 km/h"),
            None,
        );
        assert_eq!(info.title, "Bus v1");
        assert_eq!(
            info.lines,
            vec![
                "Route: 2606_50",
                "Vehicle: v1",
                "Speed: 30.0 km/h",
                "Last Update: No TS",
                "Coords: -33.12346, 151.65432",
            ]
        );
    }

    #[test]
    fn test_recording_surface_tracks_scene() {
        let mut surface = RecordingSurface::new();
        let icon = MarkerIcon::new(0.0, "#FF0000", "50");
        surface.place_or_update_marker("v1", LatLng::new(1.0, 2.0), &icon);
        assert!(!surface.is_marker_attached("v1"));
        surface.set_marker_attachment("v1", true);
        surface.move_marker("v1", LatLng::new(1.5, 2.5));
        assert!(surface.is_marker_attached("v1"));
        assert_eq!(surface.marker_position("v1"), Some(LatLng::new(1.5, 2.5)));
        surface.remove_marker("v1");
        assert_eq!(surface.marker_count(), 0);
        assert_eq!(surface.calls().len(), 4);
        assert!(!RecordingSurface::unavailable().is_available());
    }
}
