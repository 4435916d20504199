use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version for persisted profiles. Every read path migrates
/// to this version before the value reaches a caller.
pub const PROFILE_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AxisScale {
    #[default]
    #[serde(rename = "linear")]
    Linear,
    #[serde(rename = "log10")]
    Log10,
    #[serde(rename = "symlog10")]
    Symlog10,
}

impl AxisScale {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Log10 => "log10",
            Self::Symlog10 => "symlog10",
        }
    }

    /// Total name mapping: unrecognized names fall back to linear.
    pub fn from_name(name: &str) -> Self {
        match name {
            "log10" => Self::Log10,
            "symlog10" => Self::Symlog10,
            _ => Self::Linear,
        }
    }

    pub fn is_known_name(name: &str) -> bool {
        matches!(name, "linear" | "log10" | "symlog10")
    }
}

/// Per-axis scale override for a single tag. Omitted axes keep the global
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TagAxisScale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<AxisScale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<AxisScale>,
}

/// A card pinned at the top of the dashboard. `tags`/`title` are only
/// present for multi-tag (superimposed) pins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedCard {
    pub plugin: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PinnedCard {
    pub fn scalar(tag: &str) -> Self {
        Self {
            plugin: "scalars".to_string(),
            tag: tag.to_string(),
            run_id: None,
            sample: None,
            tags: None,
            title: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunColorEntry {
    pub run_id: String,
    pub color: String,
}

/// Stable group-to-palette-slot assignment. `group_key` encodes both the
/// grouping scope and the group identity as `"<scope>|<groupId>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupColorEntry {
    pub group_key: String,
    pub color_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperimposedCard {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub run_id: Option<String>,
}

impl SuperimposedCard {
    /// Builds a card with a fresh unique id.
    pub fn new(title: &str, tags: Vec<String>, run_id: Option<String>) -> Self {
        Self {
            id: format!("superimposed-{}", uuid::Uuid::new_v4()),
            title: title.to_string(),
            tags,
            run_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunSelectionType {
    #[serde(rename = "RUN_ID")]
    RunId,
    #[serde(rename = "RUN_NAME")]
    RunName,
}

/// Declares whether a single run is visible. Runs without an entry default
/// to visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSelectionEntry {
    #[serde(rename = "type")]
    pub selection_type: RunSelectionType,
    pub value: String,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupByKey {
    #[serde(rename = "RUN")]
    Run,
    #[serde(rename = "EXPERIMENT")]
    Experiment,
    #[serde(rename = "REGEX")]
    Regex,
    #[serde(rename = "REGEX_BY_EXP")]
    RegexByExp,
}

impl GroupByKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "RUN",
            Self::Experiment => "EXPERIMENT",
            Self::Regex => "REGEX",
            Self::RegexByExp => "REGEX_BY_EXP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBy {
    pub key: GroupByKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_string: Option<String>,
}

impl GroupBy {
    /// Scope identifier for group-color assignments: grouping mode plus the
    /// regex (when one applies), so distinct regexes get distinct palettes.
    pub fn scope(&self) -> String {
        match self.key {
            GroupByKey::Regex | GroupByKey::RegexByExp => format!(
                "{}:{}",
                self.key.as_str(),
                self.regex_string.as_deref().unwrap_or("")
            ),
            _ => self.key.as_str().to_string(),
        }
    }
}

/// A named, versioned snapshot of dashboard configuration.
///
/// Unknown fields written by newer versions survive a load/save round-trip
/// through the flattened `extra` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub version: i64,
    pub name: String,
    pub last_modified_timestamp: i64,
    pub pinned_cards: Vec<PinnedCard>,
    pub run_colors: Vec<RunColorEntry>,
    pub group_colors: Vec<GroupColorEntry>,
    pub superimposed_cards: Vec<SuperimposedCard>,
    pub tag_filter: String,
    pub run_filter: String,
    pub smoothing: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_selection: Option<Vec<RunSelectionEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_descriptions: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis_scale: Option<AxisScale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis_scale: Option<AxisScale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_axis_scales: Option<BTreeMap<String, TagAxisScale>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Lightweight projection for listing without deserializing full payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    pub name: String,
    pub last_modified_timestamp: i64,
}

/// Export/import envelope: `{version, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedProfile {
    pub version: i64,
    pub data: serde_json::Value,
}

// ─── Independently persisted fragments ──────────────────────────────────────
//
// Each fragment lives in its own storage slot, versioned and defensively
// parsed: corrupt or missing data reads as the default, never as an error.

pub const FRAGMENT_VERSION: i64 = 1;

fn fragment_version() -> i64 {
    FRAGMENT_VERSION
}

/// The user's explicit tag filter. A stored fragment with an empty string
/// records an explicit clear, which is distinct from "never touched"
/// (slot absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagFilterFragment {
    #[serde(default = "fragment_version")]
    pub version: i64,
    pub tag_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorOverridesFragment {
    #[serde(default = "fragment_version")]
    pub version: i64,
    #[serde(default)]
    pub run_colors: Vec<RunColorEntry>,
    #[serde(default)]
    pub group_colors: Vec<GroupColorEntry>,
}

impl Default for ColorOverridesFragment {
    fn default() -> Self {
        Self {
            version: FRAGMENT_VERSION,
            run_colors: Vec::new(),
            group_colors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSelectionFragment {
    #[serde(default = "fragment_version")]
    pub version: i64,
    #[serde(default)]
    pub entries: Vec<RunSelectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisScaleFragment {
    #[serde(default = "fragment_version")]
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis_scale: Option<AxisScale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis_scale: Option<AxisScale>,
    #[serde(default)]
    pub tag_axis_scales: BTreeMap<String, TagAxisScale>,
}

impl Default for AxisScaleFragment {
    fn default() -> Self {
        Self {
            version: FRAGMENT_VERSION,
            y_axis_scale: None,
            x_axis_scale: None,
            tag_axis_scales: BTreeMap::new(),
        }
    }
}

impl AxisScaleFragment {
    pub fn is_empty(&self) -> bool {
        self.y_axis_scale.is_none()
            && self.x_axis_scale.is_none()
            && self.tag_axis_scales.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedCardsFragment {
    #[serde(default = "fragment_version")]
    pub version: i64,
    #[serde(default)]
    pub cards: Vec<PinnedCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperimposedCardsFragment {
    #[serde(default = "fragment_version")]
    pub version: i64,
    #[serde(default)]
    pub cards: Vec<SuperimposedCard>,
}

// ─── Inputs consumed as plain data from the surrounding UI ──────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub id: String,
    pub name: String,
    pub experiment_id: String,
}

/// The scattered live UI state a save operation collapses into one Profile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveState {
    pub pinned_cards: Vec<PinnedCard>,
    pub run_colors: Vec<RunColorEntry>,
    pub group_colors: Vec<GroupColorEntry>,
    pub superimposed_cards: Vec<SuperimposedCard>,
    pub run_selection: Vec<RunSelectionEntry>,
    pub tag_filter: String,
    pub run_filter: String,
    pub metric_descriptions: BTreeMap<String, String>,
    pub smoothing: f64,
    pub group_by: Option<GroupBy>,
    pub y_axis_scale: Option<AxisScale>,
    pub x_axis_scale: Option<AxisScale>,
    pub tag_axis_scales: BTreeMap<String, TagAxisScale>,
}

/// Higher-priority live values that beat profile fields on activation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiveOverrides {
    /// `Some("")` means the user explicitly cleared the filter.
    pub tag_filter: Option<String>,
    pub run_selection: Option<Vec<RunSelectionEntry>>,
}

/// The single coherent state the UI applies after precedence resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub pinned_cards: Vec<PinnedCard>,
    pub run_colors: Vec<RunColorEntry>,
    pub group_colors: Vec<GroupColorEntry>,
    pub superimposed_cards: Vec<SuperimposedCard>,
    /// Visibility per known run id; every known run has an entry.
    pub run_visibility: BTreeMap<String, bool>,
    pub tag_filter: String,
    pub run_filter: String,
    pub metric_descriptions: BTreeMap<String, String>,
    pub smoothing: f64,
    pub group_by: Option<GroupBy>,
    pub y_axis_scale: AxisScale,
    pub x_axis_scale: AxisScale,
    pub tag_axis_scales: BTreeMap<String, TagAxisScale>,
}
