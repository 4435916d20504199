use crate::errors::{AppError, AppResult};
use crate::models::{
    AxisScaleFragment, ColorOverridesFragment, PinnedCard, PinnedCardsFragment, Profile,
    ProfileMetadata, RunSelectionEntry, RunSelectionFragment, SerializedProfile,
    SuperimposedCard, SuperimposedCardsFragment, TagFilterFragment, FRAGMENT_VERSION,
    PROFILE_VERSION,
};
use crate::validation::migrate_profile;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Hard cap on the number of named profiles. Inserting past the cap evicts
/// the oldest-indexed name (FIFO by index position, not LRU).
pub const MAX_PROFILES: usize = 50;

const PROFILE_KEY_PREFIX: &str = "profile/";
const INDEX_KEY: &str = "profile-index";
const ACTIVE_KEY: &str = "active-profile";
const TAG_FILTER_KEY: &str = "tag-filter";
const COLOR_OVERRIDES_KEY: &str = "color-overrides";
const RUN_SELECTION_KEY: &str = "run-selection";
const AXIS_SCALES_KEY: &str = "axis-scales";
const PINNED_CARDS_KEY: &str = "pinned-cards";
const SUPERIMPOSED_CARDS_KEY: &str = "superimposed-cards";

use crate::storage::StorageBackend;

/// Durable name→profile store with an enumeration index, an active-profile
/// pointer, and the independently persisted UI fragments.
pub struct ProfileStore {
    backend: Box<dyn StorageBackend>,
}

impl ProfileStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn profile_key(name: &str) -> String {
        format!("{PROFILE_KEY_PREFIX}{name}")
    }

    fn index(&self) -> Vec<String> {
        let Some(raw) = self.backend.get(INDEX_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(names) => names,
            Err(error) => {
                tracing::warn!(error = %error, "profile index corrupt; treating as empty");
                Vec::new()
            }
        }
    }

    fn write_index(&self, names: &[String]) -> AppResult<()> {
        let raw = serde_json::to_string(names)?;
        self.backend.set(INDEX_KEY, &raw)
    }

    /// Stamps the modification time, writes the payload, and indexes the
    /// name. A colliding name overwrites in place; a new name past the cap
    /// first evicts the oldest-indexed profile.
    pub fn save_profile(&self, profile: &Profile) -> AppResult<Profile> {
        if profile.name.is_empty() {
            return Err(AppError::InvalidProfile(
                "profile name must not be empty".to_string(),
            ));
        }
        let mut stamped = profile.clone();
        stamped.version = PROFILE_VERSION;
        stamped.last_modified_timestamp = Utc::now().timestamp_millis();

        let mut names = self.index();
        if !names.contains(&stamped.name) {
            if names.len() >= MAX_PROFILES {
                let evicted = names.remove(0);
                tracing::debug!(name = %evicted, "profile cap reached; evicting oldest entry");
                self.remove_profile_entry(&evicted)?;
            }
            names.push(stamped.name.clone());
        }

        let raw = serde_json::to_string(&stamped)?;
        self.backend.set(&Self::profile_key(&stamped.name), &raw)?;
        self.write_index(&names)?;
        Ok(stamped)
    }

    /// Returns `None` for a missing key, corrupt JSON, or a structurally
    /// invalid payload. Successful loads are always migrated.
    pub fn load_profile(&self, name: &str) -> Option<Profile> {
        let raw = self.backend.get(&Self::profile_key(name))?;
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(name, error = %error, "stored profile is not valid JSON");
                return None;
            }
        };
        let migrated = migrate_profile(&value);
        if migrated.is_none() {
            tracing::warn!(name, "stored profile failed validation");
        }
        migrated
    }

    /// Metadata for every loadable indexed profile, sorted descending by
    /// modification time. Names that fail to load are silently dropped.
    pub fn list_profiles(&self) -> Vec<ProfileMetadata> {
        let mut entries: Vec<ProfileMetadata> = self
            .index()
            .iter()
            .filter_map(|name| {
                let raw = self.backend.get(&Self::profile_key(name))?;
                serde_json::from_str::<ProfileMetadata>(&raw).ok()
            })
            .collect();
        entries.sort_by(|a, b| {
            b.last_modified_timestamp
                .cmp(&a.last_modified_timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });
        entries
    }

    pub fn delete_profile(&self, name: &str) -> AppResult<()> {
        let mut names = self.index();
        names.retain(|indexed| indexed != name);
        self.write_index(&names)?;
        self.remove_profile_entry(name)
    }

    fn remove_profile_entry(&self, name: &str) -> AppResult<()> {
        self.backend.remove(&Self::profile_key(name))?;
        if self.get_active_profile_name().as_deref() == Some(name) {
            self.set_active_profile_name(None)?;
        }
        Ok(())
    }

    pub fn profile_exists(&self, name: &str) -> bool {
        self.index().iter().any(|indexed| indexed == name)
    }

    /// Probes `base`, `base (1)`, `base (2)`, … until an unused name is
    /// found. Bounded by the index size plus one, so it always terminates.
    pub fn generate_unique_name(&self, base: &str) -> String {
        if !self.profile_exists(base) {
            return base.to_string();
        }
        let limit = self.index().len() + 1;
        for i in 1..=limit {
            let candidate = format!("{base} ({i})");
            if !self.profile_exists(&candidate) {
                return candidate;
            }
        }
        // Unreachable: there are at most `limit - 1` taken names.
        format!("{base} ({limit})")
    }

    pub fn get_active_profile_name(&self) -> Option<String> {
        self.backend.get(ACTIVE_KEY).filter(|name| !name.is_empty())
    }

    pub fn set_active_profile_name(&self, name: Option<&str>) -> AppResult<()> {
        match name {
            Some(name) => self.backend.set(ACTIVE_KEY, name),
            None => self.backend.remove(ACTIVE_KEY),
        }
    }

    /// Wipes every stored profile payload (indexed or orphaned), the
    /// index, and the active pointer. Fragments are left alone.
    pub fn clear_all_profiles(&self) -> AppResult<()> {
        for key in self.backend.keys() {
            if key.starts_with(PROFILE_KEY_PREFIX) {
                self.backend.remove(&key)?;
            }
        }
        self.backend.remove(INDEX_KEY)?;
        self.backend.remove(ACTIVE_KEY)?;
        Ok(())
    }

    // ─── Export / import ────────────────────────────────────────────────

    /// Pretty-printed `{version, data}` envelope.
    pub fn export_profile(&self, profile: &Profile) -> AppResult<String> {
        let envelope = SerializedProfile {
            version: PROFILE_VERSION,
            data: serde_json::to_value(profile)?,
        };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }

    /// Accepts either the versioned envelope or a raw profile payload.
    /// Returns `None` on any parse or validation failure; successful
    /// imports are migrated.
    pub fn import_profile(&self, json: &str) -> Option<Profile> {
        let value: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(error = %error, "import payload is not valid JSON");
                return None;
            }
        };
        let payload = match (value.get("version"), value.get("data")) {
            (Some(version), Some(data)) if version.is_number() && data.is_object() => data,
            _ => &value,
        };
        migrate_profile(payload)
    }

    /// Download name for an exported profile: non-alphanumeric characters
    /// become `_`, suffixed `_profile.json`.
    pub fn export_file_name(name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{sanitized}_profile.json")
    }

    // ─── Independently persisted fragments ──────────────────────────────

    fn read_fragment<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.get(key)?;
        match serde_json::from_str::<T>(&raw) {
            Ok(fragment) => Some(fragment),
            Err(error) => {
                tracing::warn!(key, error = %error, "stored fragment corrupt; using default");
                None
            }
        }
    }

    fn write_fragment<T: Serialize>(&self, key: &str, fragment: &T) -> AppResult<()> {
        let raw = serde_json::to_string(fragment)?;
        self.backend.set(key, &raw)
    }

    /// `None` = the user never touched the filter. `Some("")` = the user
    /// explicitly cleared it, which outranks any profile's filter.
    pub fn tag_filter(&self) -> Option<String> {
        self.read_fragment::<TagFilterFragment>(TAG_FILTER_KEY)
            .map(|fragment| fragment.tag_filter)
    }

    pub fn set_tag_filter(&self, filter: &str) -> AppResult<()> {
        self.write_fragment(
            TAG_FILTER_KEY,
            &TagFilterFragment {
                version: FRAGMENT_VERSION,
                tag_filter: filter.to_string(),
            },
        )
    }

    /// Forgets the explicit filter entirely (back to "never touched").
    pub fn reset_tag_filter(&self) -> AppResult<()> {
        self.backend.remove(TAG_FILTER_KEY)
    }

    pub fn color_overrides(&self) -> ColorOverridesFragment {
        self.read_fragment(COLOR_OVERRIDES_KEY).unwrap_or_default()
    }

    pub fn set_color_overrides(&self, overrides: &ColorOverridesFragment) -> AppResult<()> {
        self.write_fragment(COLOR_OVERRIDES_KEY, overrides)
    }

    /// `None` when no selection has ever been stored.
    pub fn run_selection(&self) -> Option<Vec<RunSelectionEntry>> {
        self.read_fragment::<RunSelectionFragment>(RUN_SELECTION_KEY)
            .map(|fragment| fragment.entries)
    }

    pub fn set_run_selection(&self, entries: &[RunSelectionEntry]) -> AppResult<()> {
        self.write_fragment(
            RUN_SELECTION_KEY,
            &RunSelectionFragment {
                version: FRAGMENT_VERSION,
                entries: entries.to_vec(),
            },
        )
    }

    pub fn axis_scales(&self) -> AxisScaleFragment {
        self.read_fragment(AXIS_SCALES_KEY).unwrap_or_default()
    }

    pub fn set_axis_scales(&self, fragment: &AxisScaleFragment) -> AppResult<()> {
        self.write_fragment(AXIS_SCALES_KEY, fragment)
    }

    pub fn pinned_cards(&self) -> Vec<PinnedCard> {
        self.read_fragment::<PinnedCardsFragment>(PINNED_CARDS_KEY)
            .map(|fragment| fragment.cards)
            .unwrap_or_default()
    }

    pub fn set_pinned_cards(&self, cards: &[PinnedCard]) -> AppResult<()> {
        self.write_fragment(
            PINNED_CARDS_KEY,
            &PinnedCardsFragment {
                version: FRAGMENT_VERSION,
                cards: cards.to_vec(),
            },
        )
    }

    pub fn superimposed_cards(&self) -> Vec<SuperimposedCard> {
        self.read_fragment::<SuperimposedCardsFragment>(SUPERIMPOSED_CARDS_KEY)
            .map(|fragment| fragment.cards)
            .unwrap_or_default()
    }

    pub fn set_superimposed_cards(&self, cards: &[SuperimposedCard]) -> AppResult<()> {
        self.write_fragment(
            SUPERIMPOSED_CARDS_KEY,
            &SuperimposedCardsFragment {
                version: FRAGMENT_VERSION,
                cards: cards.to_vec(),
            },
        )
    }

    /// Whether this user has any state worth protecting: saved pins, any
    /// profile in the index, saved superimposed cards, or stored axis
    /// scale preferences. Backend defaults only apply on a blank slate.
    pub fn has_local_footprint(&self) -> bool {
        !self.index().is_empty()
            || !self.pinned_cards().is_empty()
            || !self.superimposed_cards().is_empty()
            || !self.axis_scales().is_empty()
    }
}
