//! Group (route) identity helpers: display labels, colours and ordering.
//!
//! Group ids follow the `<agency>_<short name>` convention used by the
//! realtime feed (e.g. `2606_50`). Everything that depends on that format is
//! kept here.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::selection::SelectionState;

/// Delimiter between the agency prefix and the route short name.
pub const GROUP_ID_DELIMITER: char = '_';

/// Palette used for automatic colour assignment.
pub const GROUP_COLORS: [&str; 15] = [
    "#FF5733", "#3375FF", "#33FF57", "#FFC300", "#C70039", "#900C3F", "#581845", "#FF8C00",
    "#00CED1", "#DA70D6", "#20B2AA", "#FF4500", "#4682B4", "#8A2BE2", "#D2691E",
];

/// Colour used when a group has no assignment (e.g. the unknown sentinel).
pub const FALLBACK_COLOR: &str = "#FF0000";

/// Short display label for a group: the suffix after the last delimiter.
///
/// # Example
/// ```
/// use transit_live::derive_label;
/// assert_eq!(derive_label("2606_50"), "50");
/// assert_eq!(derive_label("2606_X_N1"), "N1");
/// assert_eq!(derive_label("T1"), "T1");
/// ```
pub fn derive_label(group_id: &str) -> String {
    match group_id.rsplit_once(GROUP_ID_DELIMITER) {
        Some((_, suffix)) => suffix.to_string(),
        None => group_id.to_string(),
    }
}

/// Agency prefix of a group id (the part before the first delimiter).
pub fn agency_of(group_id: &str) -> &str {
    group_id
        .split_once(GROUP_ID_DELIMITER)
        .map(|(agency, _)| agency)
        .unwrap_or(group_id)
}

/// Deterministic palette colour for a group id.
///
/// Uses the classic `h = c + (h << 5) - h` string hash over UTF-16 units with
/// 32-bit wrapping, so colours match what the web front-end assigned.
pub fn assign_color(group_id: &str) -> &'static str {
    let mut hash: i32 = 0;
    for unit in group_id.encode_utf16() {
        hash = (unit as i32)
            .wrapping_add(hash.wrapping_shl(5))
            .wrapping_sub(hash);
    }
    let index = (hash as i64).unsigned_abs() as usize % GROUP_COLORS.len();
    GROUP_COLORS[index]
}

fn leading_number(label: &str) -> Option<u64> {
    let digits: String = label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Compare two labels: by first embedded number when both have one and the
/// numbers differ, otherwise lexically.
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    match (leading_number(a), leading_number(b)) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Sort labels in natural route order ("5" < "50" < "54").
pub fn sort_labels(labels: &mut [String]) {
    labels.sort_by(|a, b| compare_labels(a, b));
}

/// Title text listing the selected routes.
pub fn tracking_title(selection: &SelectionState) -> String {
    if selection.selected().is_empty() {
        return "Tracking routes: None selected".to_string();
    }
    let mut labels: Vec<String> = selection.selected().iter().map(|g| derive_label(g)).collect();
    sort_labels(&mut labels);
    format!("Tracking routes: {}", labels.join(", "))
}

/// A route group as known to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub group_id: String,
    pub display_name: String,
    pub assigned_color: String,
}

/// Session-stable group metadata. Once a colour is assigned it never changes.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: BTreeMap<String, Group>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed colours restored from saved preferences. Existing assignments win.
    pub fn restore_colors(&mut self, colors: &BTreeMap<String, String>) {
        for (group_id, color) in colors {
            self.groups
                .entry(group_id.clone())
                .or_insert_with(|| Group {
                    group_id: group_id.clone(),
                    display_name: derive_label(group_id),
                    assigned_color: color.clone(),
                });
        }
    }

    /// Get or create the group entry, assigning a colour on first sight.
    pub fn ensure(&mut self, group_id: &str) -> &Group {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(|| Group {
                group_id: group_id.to_string(),
                display_name: derive_label(group_id),
                assigned_color: assign_color(group_id).to_string(),
            })
    }

    pub fn get(&self, group_id: &str) -> Option<&Group> {
        self.groups.get(group_id)
    }

    /// Colour for a group, or the fallback if it has never been seen.
    pub fn color_of(&self, group_id: &str) -> &str {
        self.groups
            .get(group_id)
            .map(|g| g.assigned_color.as_str())
            .unwrap_or(FALLBACK_COLOR)
    }

    /// All assigned colours, for persistence.
    pub fn colors(&self) -> BTreeMap<String, String> {
        self.groups
            .values()
            .map(|g| (g.group_id.clone(), g.assigned_color.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
