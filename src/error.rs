//! Unified error handling for the tracking engine.
//!
//! Most failures are recovered locally: a malformed record or path shape is
//! skipped and reported, a failed fetch leaves the last good state on screen.
//! Only a missing rendering surface is fatal.

use thiserror::Error;

/// Unified error type for tracking operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    /// Snapshot fetch failed, returned a non-success status, or was unparseable
    #[error("{}", transport_message(.message, .status_code))]
    Transport {
        message: String,
        status_code: Option<u16>,
    },
    /// A single snapshot record was rejected
    #[error("Entity '{entity_id}' skipped: {reason}")]
    MalformedEntity { entity_id: String, reason: String },
    /// A path shape had fewer than two valid points
    #[error("Shape {shape_index} of group '{group_id}' has {valid_points} valid points, minimum 2 required")]
    MalformedOverlayShape {
        group_id: String,
        shape_index: usize,
        valid_points: usize,
    },
    /// The map/canvas could not be initialised
    #[error("Rendering surface unavailable: {message}")]
    SurfaceUnavailable { message: String },
    /// Preference load/save error
    #[error("Persistence error: {message}")]
    Persistence { message: String },
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn transport_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("Transport error ({}): {}", code, message),
        None => format!("Transport error: {}", message),
    }
}

impl TrackerError {
    /// Shorthand for a transport failure without a status code.
    pub fn transport(message: impl Into<String>) -> Self {
        TrackerError::Transport {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn malformed_entity(entity_id: &str, reason: impl Into<String>) -> Self {
        TrackerError::MalformedEntity {
            entity_id: entity_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the engine can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TrackerError::SurfaceUnavailable { .. })
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Persistence {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        TrackerError::Persistence {
            message: e.to_string(),
        }
    }
}

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Extension trait for converting Option to TrackerError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a malformed entity error.
    fn ok_or_malformed(self, entity_id: &str, reason: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_malformed(self, entity_id: &str, reason: &str) -> Result<T> {
        self.ok_or_else(|| TrackerError::malformed_entity(entity_id, reason))
    }
}
