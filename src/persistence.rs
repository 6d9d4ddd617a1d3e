//! Saved user preferences.
//!
//! Persists the selection, refresh options and assigned group colours so a
//! restarted front-end comes back showing the same routes in the same
//! colours. [`JsonFilePreferences`] stores them as a single JSON document.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::Options;
use crate::error::{Result, TrackerError};
use crate::groups::agency_of;
use crate::selection::SelectionState;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedPreferences {
    /// Agencies whose routes may be selected. Empty means no restriction.
    pub agencies: BTreeSet<String>,
    pub selected: BTreeSet<String>,
    /// `None` when never saved; restores as "all selected groups visible".
    pub visible: Option<BTreeSet<String>>,
    pub options: Options,
    pub colors: BTreeMap<String, String>,
}

impl SavedPreferences {
    /// Snapshot current state for saving.
    pub fn capture(
        agencies: &BTreeSet<String>,
        selection: &SelectionState,
        options: &Options,
        colors: BTreeMap<String, String>,
    ) -> Self {
        Self {
            agencies: agencies.clone(),
            selected: selection.selected().clone(),
            visible: Some(selection.visible().clone()),
            options: options.clone(),
            colors,
        }
    }

    /// Selection implied by these preferences.
    ///
    /// Groups of agencies that are no longer selected are dropped, visible
    /// entries outside the selection are dropped, and a missing visible list
    /// means every selected group is visible.
    pub fn selection(&self) -> SelectionState {
        let mut selection = match &self.visible {
            Some(visible) => {
                SelectionState::new(self.selected.iter().cloned(), visible.iter().cloned())
            }
            None => SelectionState::all_visible(self.selected.iter().cloned()),
        };
        if !self.agencies.is_empty() {
            selection.retain(|g| self.agencies.contains(agency_of(g)));
        }
        selection
    }
}

/// Storage backend for [`SavedPreferences`].
pub trait PreferenceStore {
    /// Load saved preferences. `Ok(None)` when nothing was saved yet.
    fn load(&self) -> Result<Option<SavedPreferences>>;

    fn save(&self, preferences: &SavedPreferences) -> Result<()>;
}

/// Preferences kept in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFilePreferences {
    path: PathBuf,
}

impl JsonFilePreferences {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn load(&self) -> Result<Option<SavedPreferences>> {
        let body = match fs::read_to_string(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let preferences: SavedPreferences = serde_json::from_str(&body).map_err(|e| {
            warn!(
                "[Preferences] Unreadable preferences at {}: {}",
                self.path.display(),
                e
            );
            TrackerError::Persistence {
                message: format!("Invalid preferences file {}: {}", self.path.display(), e),
            }
        })?;
        info!(
            "[Preferences] Loaded {} selected groups from {}",
            preferences.selected.len(),
            self.path.display()
        );
        Ok(Some(preferences))
    }

    fn save(&self, preferences: &SavedPreferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(preferences)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
