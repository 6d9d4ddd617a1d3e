//! Selected/visible group sets.
//!
//! `selected` groups are fetched; `visible` groups are drawn. The invariant
//! `visible ⊆ selected` is enforced by every mutator, so the fields are
//! private.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    selected: BTreeSet<String>,
    visible: BTreeSet<String>,
}

impl SelectionState {
    /// Build a selection, dropping any visible group that is not selected.
    pub fn new<S, V>(selected: S, visible: V) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let selected: BTreeSet<String> = selected.into_iter().map(Into::into).collect();
        let visible = visible
            .into_iter()
            .map(Into::into)
            .filter(|g| selected.contains(g))
            .collect();
        Self { selected, visible }
    }

    /// Select the given groups and make all of them visible.
    pub fn all_visible<S>(groups: S) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let selected: BTreeSet<String> = groups.into_iter().map(Into::into).collect();
        Self {
            visible: selected.clone(),
            selected,
        }
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    pub fn visible(&self) -> &BTreeSet<String> {
        &self.visible
    }

    pub fn is_selected(&self, group_id: &str) -> bool {
        self.selected.contains(group_id)
    }

    pub fn is_visible(&self, group_id: &str) -> bool {
        self.visible.contains(group_id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Select a group. Newly selected groups start visible.
    pub fn select(&mut self, group_id: &str) -> bool {
        if self.selected.insert(group_id.to_string()) {
            self.visible.insert(group_id.to_string());
            true
        } else {
            false
        }
    }

    /// Deselect a group, removing it from both sets.
    pub fn deselect(&mut self, group_id: &str) -> bool {
        self.visible.remove(group_id);
        self.selected.remove(group_id)
    }

    /// Show or hide a selected group. Returns false (and does nothing) for
    /// groups that are not selected or already in the requested state.
    pub fn set_visible(&mut self, group_id: &str, visible: bool) -> bool {
        if !self.selected.contains(group_id) {
            return false;
        }
        if visible {
            self.visible.insert(group_id.to_string())
        } else {
            self.visible.remove(group_id)
        }
    }

    /// Keep only groups accepted by `keep` (e.g. groups of selected agencies).
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.selected.retain(|g| keep(g));
        let selected = &self.selected;
        self.visible.retain(|g| selected.contains(g));
    }

    /// Re-establish `visible ⊆ selected` after deserialization.
    pub fn normalized(mut self) -> Self {
        let selected = &self.selected;
        self.visible.retain(|g| selected.contains(g));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_subset(s: &SelectionState) {
        assert!(s.visible().is_subset(s.selected()));
    }

    #[test]
    fn test_new_drops_unselected_visible() {
        let s = SelectionState::new(["A", "B"], ["B", "C"]);
        assert!(s.is_visible("B"));
        assert!(!s.is_visible("C"));
        assert_subset(&s);
    }

    #[test]
    fn test_deselect_removes_from_both() {
        let mut s = SelectionState::all_visible(["A", "B"]);
        assert!(s.deselect("A"));
        assert!(!s.is_selected("A"));
        assert!(!s.is_visible("A"));
        assert!(!s.deselect("A"));
        assert_subset(&s);
    }

    #[test]
    fn test_set_visible_requires_selection() {
        let mut s = SelectionState::all_visible(["A"]);
        assert!(!s.set_visible("Z", true));
        assert!(!s.is_visible("Z"));
        assert!(s.set_visible("A", false));
        assert!(!s.set_visible("A", false));
        assert!(s.is_selected("A"));
        assert!(s.select("B"));
        assert!(s.is_visible("B"));
        assert_subset(&s);
    }

    #[test]
    fn test_retain_and_normalize() {
        let mut s = SelectionState::all_visible(["2606_50", "2436_10"]);
        s.retain(|g| g.starts_with("2606"));
        assert_eq!(s.selected().len(), 1);
        assert_subset(&s);

        let raw: SelectionState =
            serde_json::from_str(r#"{"selected": ["A"], "visible": ["A", "B"]}"#).unwrap();
        let s = raw.normalized();
        assert_eq!(s.visible().len(), 1);
        assert_subset(&s);
    }
}
