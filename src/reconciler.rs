use crate::color;
use crate::defaults::ExperimentDataSource;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AxisScaleFragment, EffectiveSettings, GroupBy, GroupByKey, LiveOverrides, LiveState, Profile,
    RunColorEntry, RunMetadata, RunSelectionType,
};
use crate::store::ProfileStore;
use crate::validation::{create_empty_profile, migrate_profile};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Progress of the per-experiment backend-default fetch. `Failed` counts
/// as complete with no data: the dashboard never blocks on defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FetchState {
    #[default]
    NotStarted,
    Pending,
    Resolved(Option<Profile>),
    Failed,
}

impl FetchState {
    fn is_complete(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Failed)
    }
}

/// Where an activated profile came from. Precedence between the profile's
/// fields and live overrides depends on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationSource {
    LocalLoad,
    BackendDefault,
}

/// Join state for one experiment: the default profile only applies after
/// both the run list and the fetch have settled, and at most once.
#[derive(Debug, Clone, Default)]
struct NavState {
    runs_loaded: bool,
    fetch: FetchState,
    default_applied: bool,
}

/// A profile activation the surrounding UI should apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub profile: Profile,
    pub source: ActivationSource,
    pub settings: EffectiveSettings,
}

/// Coordinates the profile store, the backend defaults, and the live
/// dashboard state. All methods run on the caller's thread; asynchrony is
/// modeled as explicit fetch-state transitions driven by the caller.
pub struct Reconciler<S: ExperimentDataSource> {
    store: ProfileStore,
    source: S,
    nav: HashMap<String, NavState>,
    active_profile_name: Option<String>,
    known_runs: Vec<RunMetadata>,
    selected_experiments: Vec<String>,
    dark_mode: bool,
    hash_coloring: bool,
}

impl<S: ExperimentDataSource> Reconciler<S> {
    pub fn new(store: ProfileStore, source: S) -> Self {
        Self {
            store,
            source,
            nav: HashMap::new(),
            active_profile_name: None,
            known_runs: Vec::new(),
            selected_experiments: Vec::new(),
            dark_mode: false,
            hash_coloring: true,
        }
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn set_dark_mode(&mut self, dark_mode: bool) {
        self.dark_mode = dark_mode;
    }

    pub fn set_hash_coloring(&mut self, enabled: bool) {
        self.hash_coloring = enabled;
    }

    pub fn active_profile_name(&self) -> Option<&str> {
        self.active_profile_name.as_deref()
    }

    pub fn set_selected_experiments(&mut self, experiment_ids: Vec<String>) {
        self.selected_experiments = experiment_ids;
    }

    /// Restores the session: re-activates the stored active profile, if it
    /// still loads. A dangling pointer is cleared.
    pub fn on_startup(&mut self) -> AppResult<Option<Activation>> {
        let Some(name) = self.store.get_active_profile_name() else {
            return Ok(None);
        };
        match self.store.load_profile(&name) {
            Some(profile) => {
                tracing::info!(name = %profile.name, "restoring active profile");
                Ok(Some(self.activate_local(profile, &self.live_overrides())))
            }
            None => {
                tracing::warn!(name, "active profile no longer loads; clearing pointer");
                self.store.set_active_profile_name(None)?;
                Ok(None)
            }
        }
    }

    fn live_overrides(&self) -> LiveOverrides {
        LiveOverrides {
            tag_filter: self.store.tag_filter(),
            run_selection: self.store.run_selection(),
        }
    }

    fn activate_local(&mut self, profile: Profile, overrides: &LiveOverrides) -> Activation {
        let settings = resolve_effective_settings(
            &profile,
            overrides,
            &self.known_runs,
            ActivationSource::LocalLoad,
        );
        self.active_profile_name = Some(profile.name.clone());
        Activation {
            profile,
            source: ActivationSource::LocalLoad,
            settings,
        }
    }

    // ─── Backend-default join ───────────────────────────────────────────

    fn nav_entry(&mut self, experiment_id: &str) -> &mut NavState {
        self.nav.entry(experiment_id.to_string()).or_default()
    }

    pub fn begin_default_fetch(&mut self, experiment_id: &str) {
        let entry = self.nav_entry(experiment_id);
        if entry.fetch == FetchState::NotStarted {
            entry.fetch = FetchState::Pending;
        }
    }

    /// Feeds a fetched raw payload in. Malformed payloads resolve to "no
    /// default" rather than an error.
    pub fn on_default_profile_fetched(
        &mut self,
        experiment_id: &str,
        payload: Option<Value>,
    ) -> Option<Activation> {
        let profile = payload.as_ref().and_then(migrate_profile);
        if payload.is_some() && profile.is_none() {
            tracing::warn!(experiment_id, "backend default profile failed validation");
        }
        self.nav_entry(experiment_id).fetch = FetchState::Resolved(profile);
        self.try_apply_default(experiment_id)
    }

    pub fn on_default_fetch_failed(&mut self, experiment_id: &str) -> Option<Activation> {
        tracing::warn!(experiment_id, "backend default profile fetch failed");
        self.nav_entry(experiment_id).fetch = FetchState::Failed;
        self.try_apply_default(experiment_id)
    }

    /// Synchronous convenience: drives the whole fetch against the data
    /// source in one call.
    pub fn fetch_default_profile(&mut self, experiment_id: &str) -> Option<Activation> {
        self.begin_default_fetch(experiment_id);
        let payload = self.source.fetch_default_profile(experiment_id);
        self.on_default_profile_fetched(experiment_id, payload)
    }

    /// Registers the loaded run list for an experiment. May complete the
    /// default-profile join.
    pub fn on_runs_loaded(
        &mut self,
        experiment_id: &str,
        runs: Vec<RunMetadata>,
    ) -> Option<Activation> {
        self.known_runs
            .retain(|run| run.experiment_id != experiment_id);
        self.known_runs.extend(runs);
        self.nav_entry(experiment_id).runs_loaded = true;
        self.try_apply_default(experiment_id)
    }

    /// Fires when both join legs are in. The applied flag is set the
    /// moment the join completes, even when the gate rejects, so a later
    /// state change can never re-trigger the default.
    fn try_apply_default(&mut self, experiment_id: &str) -> Option<Activation> {
        let entry = self.nav.get(experiment_id)?;
        if entry.default_applied || !entry.runs_loaded || !entry.fetch.is_complete() {
            return None;
        }
        let profile = match &entry.fetch {
            FetchState::Resolved(profile) => profile.clone(),
            _ => None,
        };
        self.nav_entry(experiment_id).default_applied = true;

        let profile = profile?;
        if !self.default_gate_open(experiment_id) {
            tracing::debug!(experiment_id, "backend default suppressed by local state");
            return None;
        }

        tracing::info!(experiment_id, name = %profile.name, "applying backend default profile");
        let overrides = self.live_overrides();
        let settings = resolve_effective_settings(
            &profile,
            &overrides,
            &self.known_runs,
            ActivationSource::BackendDefault,
        );
        // The stored active pointer stays untouched: a backend default is
        // a session-scoped suggestion, not a user choice.
        self.active_profile_name = Some(profile.name.clone());
        Some(Activation {
            profile,
            source: ActivationSource::BackendDefault,
            settings,
        })
    }

    /// Blank-slate gate: a backend default only applies when nothing local
    /// would be clobbered and the experiment whose join completed is the
    /// single experiment in view. A join for any other experiment resolves
    /// harmlessly; its payload stays stored in the nav state.
    fn default_gate_open(&self, experiment_id: &str) -> bool {
        self.active_profile_name.is_none()
            && self.store.get_active_profile_name().is_none()
            && self.selected_experiments.len() == 1
            && self.selected_experiments[0] == experiment_id
            && !self.store.has_local_footprint()
    }

    // ─── Profile lifecycle ──────────────────────────────────────────────

    /// Collapses the live dashboard state into a named profile, persists
    /// it, and marks it active.
    pub fn save_snapshot(&mut self, name: &str, live: &LiveState) -> AppResult<Profile> {
        let mut profile = create_empty_profile(name);
        profile.pinned_cards = live.pinned_cards.clone();
        profile.run_colors = live.run_colors.clone();
        profile.group_colors = live.group_colors.clone();
        profile.superimposed_cards = live.superimposed_cards.clone();
        profile.run_selection = Some(live.run_selection.clone());
        profile.tag_filter = live.tag_filter.clone();
        profile.run_filter = live.run_filter.clone();
        profile.smoothing = live.smoothing;
        profile.group_by = live.group_by.clone();
        profile.y_axis_scale = live.y_axis_scale;
        profile.x_axis_scale = live.x_axis_scale;
        if !live.metric_descriptions.is_empty() {
            profile.metric_descriptions = Some(live.metric_descriptions.clone());
        }
        if !live.tag_axis_scales.is_empty() {
            profile.tag_axis_scales = Some(live.tag_axis_scales.clone());
        }

        let saved = self.store.save_profile(&profile)?;
        self.store.set_active_profile_name(Some(&saved.name))?;
        self.active_profile_name = Some(saved.name.clone());
        Ok(saved)
    }

    /// Loads and activates a stored profile by name.
    pub fn activate_profile(&mut self, name: &str) -> AppResult<Activation> {
        let profile = self
            .store
            .load_profile(name)
            .ok_or_else(|| AppError::NotFound(name.to_string()))?;
        self.store.set_active_profile_name(Some(name))?;
        let overrides = self.live_overrides();
        Ok(self.activate_local(profile, &overrides))
    }

    /// Rename is delete-plus-save under the new name; the active pointer
    /// follows when it referenced the old name.
    pub fn rename_profile(&mut self, old_name: &str, new_name: &str) -> AppResult<Profile> {
        if old_name == new_name {
            return self
                .store
                .load_profile(old_name)
                .ok_or_else(|| AppError::NotFound(old_name.to_string()));
        }
        if self.store.profile_exists(new_name) {
            return Err(AppError::InvalidProfile(format!(
                "a profile named {new_name:?} already exists"
            )));
        }
        let mut profile = self
            .store
            .load_profile(old_name)
            .ok_or_else(|| AppError::NotFound(old_name.to_string()))?;
        let was_active = self.store.get_active_profile_name().as_deref() == Some(old_name);

        // Delete first: saving the new name while the old one is still
        // indexed would count as a 51st profile at capacity and evict an
        // unrelated one.
        self.store.delete_profile(old_name)?;
        profile.name = new_name.to_string();
        let saved = self.store.save_profile(&profile)?;
        if was_active {
            self.store.set_active_profile_name(Some(new_name))?;
        }
        if self.active_profile_name.as_deref() == Some(old_name) {
            self.active_profile_name = Some(new_name.to_string());
        }
        Ok(saved)
    }

    /// Imports a profile from exported JSON. A name collision picks the
    /// next free numbered name unless the caller pins one explicitly.
    pub fn import_profile_json(
        &mut self,
        json: &str,
        explicit_name: Option<&str>,
    ) -> AppResult<Profile> {
        let mut profile = self
            .store
            .import_profile(json)
            .ok_or_else(|| AppError::InvalidProfile("import payload rejected".to_string()))?;
        profile.name = match explicit_name {
            Some(name) => name.to_string(),
            None => self.store.generate_unique_name(&profile.name),
        };
        self.store.save_profile(&profile)
    }

    pub fn delete_profile(&mut self, name: &str) -> AppResult<()> {
        self.store.delete_profile(name)?;
        if self.active_profile_name.as_deref() == Some(name) {
            self.active_profile_name = None;
        }
        Ok(())
    }

    // ─── Run colors ─────────────────────────────────────────────────────

    /// Resolution order: explicit override, hash-derived color, legacy
    /// palette slot. Empty ids read as inactive gray.
    pub fn resolve_run_color(&self, run_id: &str) -> String {
        if run_id.is_empty() {
            return color::INACTIVE_COLOR.to_string();
        }
        let overrides = self.store.color_overrides();
        if let Some(entry) = overrides.run_colors.iter().find(|e| e.run_id == run_id) {
            return entry.color.clone();
        }
        if self.hash_coloring {
            return color::hash_color_to_hex(color::fnv1a32(run_id), self.dark_mode);
        }
        let palette = &*color::DEFAULT_PALETTE;
        let slot = color::fnv1a32(run_id) as usize % palette.len();
        palette[slot].clone()
    }

    pub fn build_color_map(&self) -> BTreeMap<String, String> {
        self.known_runs
            .iter()
            .map(|run| (run.id.clone(), self.resolve_run_color(&run.id)))
            .collect()
    }

    /// Pulls published run colors for an experiment into the override
    /// fragment. Existing overrides win; the API only fills gaps. Keys are
    /// matched by run name and stored under the run id.
    pub fn merge_api_run_colors(&mut self, experiment_id: &str) -> AppResult<()> {
        let api_colors = self.source.fetch_run_colors(experiment_id);
        if api_colors.is_empty() {
            return Ok(());
        }
        let mut overrides = self.store.color_overrides();
        let taken: BTreeSet<String> = overrides
            .run_colors
            .iter()
            .map(|entry| entry.run_id.clone())
            .collect();
        let mut added = 0usize;
        for run in &self.known_runs {
            if run.experiment_id != experiment_id || taken.contains(&run.id) {
                continue;
            }
            if let Some(hex) = api_colors.get(&run.name) {
                overrides.run_colors.push(RunColorEntry {
                    run_id: run.id.clone(),
                    color: hex.clone(),
                });
                added += 1;
            }
        }
        if added > 0 {
            tracing::debug!(experiment_id, added, "merged published run colors");
            self.store.set_color_overrides(&overrides)?;
        }
        Ok(())
    }

    /// Runs the clash repair over the current color map and persists any
    /// reassignment as an override so it survives reloads. Explicitly
    /// overridden runs are locked.
    pub fn repair_clashes(&mut self) -> AppResult<BTreeMap<String, String>> {
        let active: Vec<(String, String)> = self
            .build_color_map()
            .into_iter()
            .collect();
        let overrides = self.store.color_overrides();
        let locked: BTreeSet<String> = overrides
            .run_colors
            .iter()
            .map(|entry| entry.run_id.clone())
            .collect();

        let changed = color::resolve_clashes(&active, &locked, self.dark_mode);
        if !changed.is_empty() {
            let mut overrides = overrides;
            for (run_id, hex) in &changed {
                overrides.run_colors.push(RunColorEntry {
                    run_id: run_id.clone(),
                    color: hex.clone(),
                });
            }
            self.store.set_color_overrides(&overrides)?;
        }
        Ok(changed)
    }

    // ─── Grouping ───────────────────────────────────────────────────────

    /// Partitions the known runs under a grouping mode. Regex modes bucket
    /// by concatenated capture groups (the whole match when the pattern
    /// has none); runs the pattern does not match fall into their own
    /// singleton groups. An invalid pattern degrades to RUN grouping.
    pub fn group_runs(&self, group_by: &GroupBy) -> BTreeMap<String, Vec<RunMetadata>> {
        let mut groups: BTreeMap<String, Vec<RunMetadata>> = BTreeMap::new();
        let pattern = match group_by.key {
            GroupByKey::Regex | GroupByKey::RegexByExp => {
                let raw = group_by.regex_string.as_deref().unwrap_or("");
                match regex::Regex::new(raw) {
                    Ok(pattern) => Some(pattern),
                    Err(error) => {
                        tracing::warn!(pattern = raw, error = %error, "invalid grouping regex");
                        None
                    }
                }
            }
            _ => None,
        };

        for run in &self.known_runs {
            let group_id = match (group_by.key, &pattern) {
                (GroupByKey::Run, _) => run.name.clone(),
                (GroupByKey::Experiment, _) => run.experiment_id.clone(),
                (_, None) => run.name.clone(),
                (key, Some(pattern)) => {
                    let base = match regex_group_id(pattern, &run.name) {
                        Some(id) => id,
                        None => run.name.clone(),
                    };
                    if key == GroupByKey::RegexByExp {
                        format!("{}/{}", run.experiment_id, base)
                    } else {
                        base
                    }
                }
            };
            groups.entry(group_id).or_default().push(run.clone());
        }
        groups
    }

    /// Assigns palette slots to the groups produced by `group_by` and
    /// persists any new assignment. Returns group id → hex.
    pub fn apply_grouping(&mut self, group_by: &GroupBy) -> AppResult<BTreeMap<String, String>> {
        let scope = group_by.scope();
        let groups = self.group_runs(group_by);
        let keys: Vec<String> = groups
            .keys()
            .map(|group_id| format!("{scope}|{group_id}"))
            .collect();

        let mut overrides = self.store.color_overrides();
        let new_entries =
            color::assign_group_colors(&overrides.group_colors, &keys, &color::DEFAULT_PALETTE);
        if !new_entries.is_empty() {
            overrides.group_colors.extend(new_entries);
            self.store.set_color_overrides(&overrides)?;
        }

        let by_key: BTreeMap<&str, i64> = overrides
            .group_colors
            .iter()
            .map(|entry| (entry.group_key.as_str(), entry.color_id))
            .collect();
        let palette = &*color::DEFAULT_PALETTE;
        Ok(groups
            .keys()
            .filter_map(|group_id| {
                let key = format!("{scope}|{group_id}");
                let id = *by_key.get(key.as_str())?;
                let hex = palette.get(id as usize)?.clone();
                Some((group_id.clone(), hex))
            })
            .collect())
    }
}

fn regex_group_id(pattern: &regex::Regex, run_name: &str) -> Option<String> {
    let captures = pattern.captures(run_name)?;
    if captures.len() <= 1 {
        return Some(captures.get(0)?.as_str().to_string());
    }
    let parts: Vec<&str> = captures
        .iter()
        .skip(1)
        .filter_map(|group| group.map(|m| m.as_str()))
        .collect();
    Some(parts.join("/"))
}

/// Collapses a profile plus live overrides into the one coherent state the
/// UI applies. Pure: no storage access.
///
/// Precedence depends on where the profile came from. A locally loaded
/// profile is an explicit user choice, so its run selection beats the live
/// one; a backend default is a suggestion, so live selections beat it. The
/// tag filter is the exception: an explicit live filter (even an explicit
/// clear, `Some("")`) always wins.
pub fn resolve_effective_settings(
    profile: &Profile,
    overrides: &LiveOverrides,
    known_runs: &[RunMetadata],
    source: ActivationSource,
) -> EffectiveSettings {
    let tag_filter = overrides
        .tag_filter
        .clone()
        .unwrap_or_else(|| profile.tag_filter.clone());

    let selection = match source {
        ActivationSource::LocalLoad => profile
            .run_selection
            .as_ref()
            .or(overrides.run_selection.as_ref()),
        ActivationSource::BackendDefault => overrides
            .run_selection
            .as_ref()
            .or(profile.run_selection.as_ref()),
    };

    // Every known run gets an entry; runs without a matching selection
    // entry stay visible.
    let mut run_visibility: BTreeMap<String, bool> = known_runs
        .iter()
        .map(|run| (run.id.clone(), true))
        .collect();
    if let Some(entries) = selection {
        for entry in entries {
            for run in known_runs {
                let matches = match entry.selection_type {
                    RunSelectionType::RunId => run.id == entry.value,
                    RunSelectionType::RunName => run.name == entry.value,
                };
                if matches {
                    run_visibility.insert(run.id.clone(), entry.selected);
                }
            }
        }
    }
    // A selection that hides every run renders a blank dashboard with no
    // hint why; fall back to everything visible.
    if !run_visibility.is_empty() && run_visibility.values().all(|visible| !visible) {
        for visible in run_visibility.values_mut() {
            *visible = true;
        }
    }

    EffectiveSettings {
        pinned_cards: profile.pinned_cards.clone(),
        run_colors: profile.run_colors.clone(),
        group_colors: profile.group_colors.clone(),
        superimposed_cards: profile.superimposed_cards.clone(),
        run_visibility,
        tag_filter,
        run_filter: profile.run_filter.clone(),
        metric_descriptions: profile.metric_descriptions.clone().unwrap_or_default(),
        smoothing: profile.smoothing,
        group_by: profile.group_by.clone(),
        y_axis_scale: profile.y_axis_scale.unwrap_or_default(),
        x_axis_scale: profile.x_axis_scale.unwrap_or_default(),
        tag_axis_scales: profile.tag_axis_scales.clone().unwrap_or_default(),
    }
}

/// Axis scale for one tag after layering the per-tag map over the globals.
pub fn resolve_axis_scales(settings: &EffectiveSettings, tag: &str) -> (crate::models::AxisScale, crate::models::AxisScale) {
    match settings.tag_axis_scales.get(tag) {
        Some(per_tag) => (
            per_tag.y.unwrap_or(settings.y_axis_scale),
            per_tag.x.unwrap_or(settings.x_axis_scale),
        ),
        None => (settings.y_axis_scale, settings.x_axis_scale),
    }
}

/// Same layering for the fragment-persisted scales used outside any
/// profile.
pub fn fragment_axis_scales(
    fragment: &AxisScaleFragment,
    tag: &str,
) -> (crate::models::AxisScale, crate::models::AxisScale) {
    let y = fragment.y_axis_scale.unwrap_or_default();
    let x = fragment.x_axis_scale.unwrap_or_default();
    match fragment.tag_axis_scales.get(tag) {
        Some(per_tag) => (per_tag.y.unwrap_or(y), per_tag.x.unwrap_or(x)),
        None => (y, x),
    }
}
