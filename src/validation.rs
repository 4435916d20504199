use crate::models::{AxisScale, Profile, PROFILE_VERSION};
use chrono::Utc;
use serde_json::Value;

/// Tagged validation result. Read boundaries branch on this instead of
/// catching exceptions; `Invalid` carries a reason naming the offending
/// field so the UI can report failed imports specifically.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileValidation {
    Valid(Profile),
    Invalid(String),
}

impl ProfileValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn into_profile(self) -> Option<Profile> {
        match self {
            Self::Valid(profile) => Some(profile),
            Self::Invalid(_) => None,
        }
    }
}

/// Returns a fresh profile with default settings.
pub fn create_empty_profile(name: &str) -> Profile {
    Profile {
        version: PROFILE_VERSION,
        name: name.to_string(),
        last_modified_timestamp: Utc::now().timestamp_millis(),
        pinned_cards: Vec::new(),
        run_colors: Vec::new(),
        group_colors: Vec::new(),
        superimposed_cards: Vec::new(),
        tag_filter: String::new(),
        run_filter: String::new(),
        smoothing: 0.6,
        run_selection: None,
        metric_descriptions: None,
        group_by: None,
        y_axis_scale: None,
        x_axis_scale: None,
        tag_axis_scales: None,
        extra: Default::default(),
    }
}

pub fn is_valid_profile(value: &Value) -> bool {
    validate_profile(value).is_valid()
}

/// Structural validation of untrusted input (parsed storage payloads,
/// import files, collaborator responses).
///
/// The asymmetry here is deliberate and load-bearing: a missing optional
/// field is always valid, the same field present but malformed is always
/// invalid. That is what lets newer code read profiles written by older
/// code.
///
/// One rule is stricter than "name must be a string": the empty string is
/// rejected, because an empty name cannot be keyed in storage, listed, or
/// pointed at by the active-profile slot.
pub fn validate_profile(value: &Value) -> ProfileValidation {
    let Some(obj) = value.as_object() else {
        return invalid("profile payload is not an object");
    };

    // Required fields.
    if !obj.get("version").is_some_and(Value::is_number) {
        return invalid("missing or non-numeric field: version");
    }
    let Some(name) = obj.get("name").and_then(Value::as_str) else {
        return invalid("missing or non-string field: name");
    };
    if name.is_empty() {
        return invalid("field name must be a non-empty string");
    }
    if !obj.get("lastModifiedTimestamp").is_some_and(Value::is_number) {
        return invalid("missing or non-numeric field: lastModifiedTimestamp");
    }
    for field in ["tagFilter", "runFilter"] {
        if !obj.get(field).is_some_and(Value::is_string) {
            return invalid(&format!("missing or non-string field: {field}"));
        }
    }
    if !obj.get("smoothing").is_some_and(Value::is_number) {
        return invalid("missing or non-numeric field: smoothing");
    }

    let Some(pinned) = obj.get("pinnedCards").and_then(Value::as_array) else {
        return invalid("missing or non-array field: pinnedCards");
    };
    for card in pinned {
        if let Err(reason) = check_pinned_card(card) {
            return invalid(&reason);
        }
    }

    let Some(run_colors) = obj.get("runColors").and_then(Value::as_array) else {
        return invalid("missing or non-array field: runColors");
    };
    for entry in run_colors {
        if !field_is_str(entry, "runId") || !field_is_str(entry, "color") {
            return invalid("runColors entry needs string runId and color");
        }
    }

    let Some(group_colors) = obj.get("groupColors").and_then(Value::as_array) else {
        return invalid("missing or non-array field: groupColors");
    };
    for entry in group_colors {
        let ok = field_is_str(entry, "groupKey")
            && entry.get("colorId").is_some_and(Value::is_number);
        if !ok {
            return invalid("groupColors entry needs string groupKey and numeric colorId");
        }
    }

    let Some(superimposed) = obj.get("superimposedCards").and_then(Value::as_array) else {
        return invalid("missing or non-array field: superimposedCards");
    };
    for card in superimposed {
        if let Err(reason) = check_superimposed_card(card) {
            return invalid(&reason);
        }
    }

    // Optional fields: absence is valid, malformed presence is not.
    if let Some(selection) = obj.get("runSelection") {
        let Some(entries) = selection.as_array() else {
            return invalid("runSelection must be an array when present");
        };
        for entry in entries {
            if let Err(reason) = check_selection_entry(entry) {
                return invalid(&reason);
            }
        }
    }

    if let Some(descriptions) = obj.get("metricDescriptions") {
        let Some(map) = descriptions.as_object() else {
            return invalid("metricDescriptions must be an object when present");
        };
        if map.values().any(|v| !v.is_string()) {
            return invalid("metricDescriptions values must be strings");
        }
    }

    if let Some(group_by) = obj.get("groupBy") {
        if !group_by.is_null() {
            if let Err(reason) = check_group_by(group_by) {
                return invalid(&reason);
            }
        }
    }

    for field in ["yAxisScale", "xAxisScale"] {
        if let Some(scale) = obj.get(field) {
            let recognized = scale.as_str().is_some_and(AxisScale::is_known_name);
            if !recognized {
                return invalid(&format!("{field} must be one of linear, log10, symlog10"));
            }
        }
    }

    if let Some(scales) = obj.get("tagAxisScales") {
        let Some(map) = scales.as_object() else {
            return invalid("tagAxisScales must be an object when present");
        };
        for (tag, axes) in map {
            if let Err(reason) = check_tag_axes(tag, axes) {
                return invalid(&reason);
            }
        }
    }

    match serde_json::from_value::<Profile>(value.clone()) {
        Ok(profile) => ProfileValidation::Valid(profile),
        // Structural checks above should make this unreachable; degrade to
        // Invalid rather than assert.
        Err(error) => invalid(&format!("profile failed to deserialize: {error}")),
    }
}

/// Forward migration of a structurally valid payload to `PROFILE_VERSION`.
///
/// Idempotent: migrating an already-current profile returns an equivalent
/// value. Returns `None` for values that are not profiles at all; read
/// boundaries treat that as corrupt data and degrade. Unknown future
/// fields pass through untouched.
pub fn migrate_profile(value: &Value) -> Option<Profile> {
    let mut profile = match validate_profile(value) {
        ProfileValidation::Valid(profile) => profile,
        ProfileValidation::Invalid(reason) => {
            tracing::debug!(reason = %reason, "profile payload rejected during migration");
            return None;
        }
    };

    // Profiles written before v1 predate the runSelection field; normalize
    // it so downstream precedence logic sees an explicit (empty) selection.
    if profile.version < 1 && profile.run_selection.is_none() {
        profile.run_selection = Some(Vec::new());
    }

    if profile.version < PROFILE_VERSION {
        profile.version = PROFILE_VERSION;
    }
    Some(profile)
}

fn invalid(reason: &str) -> ProfileValidation {
    ProfileValidation::Invalid(reason.to_string())
}

fn field_is_str(value: &Value, field: &str) -> bool {
    value.get(field).is_some_and(Value::is_string)
}

fn check_pinned_card(card: &Value) -> Result<(), String> {
    let plugin = card.get("plugin").and_then(Value::as_str);
    let tag = card.get("tag").and_then(Value::as_str);
    match (plugin, tag) {
        (Some(plugin), Some(tag)) if !plugin.is_empty() && !tag.is_empty() => {}
        _ => return Err("pinnedCards entry needs non-empty string plugin and tag".to_string()),
    }
    if let Some(run_id) = card.get("runId") {
        if !run_id.is_string() {
            return Err("pinnedCards entry runId must be a string when present".to_string());
        }
    }
    if let Some(sample) = card.get("sample") {
        if !sample.is_number() {
            return Err("pinnedCards entry sample must be a number when present".to_string());
        }
    }
    if let Some(tags) = card.get("tags") {
        let all_strings = tags
            .as_array()
            .is_some_and(|tags| tags.iter().all(Value::is_string));
        if !all_strings {
            return Err("pinnedCards entry tags must be an array of strings".to_string());
        }
    }
    if let Some(title) = card.get("title") {
        if !title.is_string() {
            return Err("pinnedCards entry title must be a string when present".to_string());
        }
    }
    Ok(())
}

fn check_superimposed_card(card: &Value) -> Result<(), String> {
    if !field_is_str(card, "id") || !field_is_str(card, "title") {
        return Err("superimposedCards entry needs string id and title".to_string());
    }
    let tags_ok = card
        .get("tags")
        .and_then(Value::as_array)
        .is_some_and(|tags| tags.iter().all(Value::is_string));
    if !tags_ok {
        return Err("superimposedCards entry tags must be an array of strings".to_string());
    }
    match card.get("runId") {
        None => {}
        Some(run_id) if run_id.is_null() || run_id.is_string() => {}
        Some(_) => {
            return Err("superimposedCards entry runId must be a string or null".to_string())
        }
    }
    Ok(())
}

fn check_selection_entry(entry: &Value) -> Result<(), String> {
    let type_ok = entry
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| matches!(t, "RUN_ID" | "RUN_NAME"));
    let value_ok = field_is_str(entry, "value");
    let selected_ok = entry.get("selected").is_some_and(Value::is_boolean);
    if type_ok && value_ok && selected_ok {
        Ok(())
    } else {
        Err("runSelection entry needs a recognized type, string value, and boolean selected"
            .to_string())
    }
}

fn check_group_by(group_by: &Value) -> Result<(), String> {
    let key_ok = group_by
        .get("key")
        .and_then(Value::as_str)
        .is_some_and(|k| matches!(k, "RUN" | "EXPERIMENT" | "REGEX" | "REGEX_BY_EXP"));
    if !key_ok {
        return Err("groupBy.key must be one of RUN, EXPERIMENT, REGEX, REGEX_BY_EXP".to_string());
    }
    if let Some(regex) = group_by.get("regexString") {
        if !regex.is_string() {
            return Err("groupBy.regexString must be a string when present".to_string());
        }
    }
    Ok(())
}

fn check_tag_axes(tag: &str, axes: &Value) -> Result<(), String> {
    let Some(map) = axes.as_object() else {
        return Err(format!("tagAxisScales entry for {tag:?} must be an object"));
    };
    for (axis, scale) in map {
        if axis != "y" && axis != "x" {
            return Err(format!("tagAxisScales entry for {tag:?} has unknown axis {axis:?}"));
        }
        if !scale.as_str().is_some_and(AxisScale::is_known_name) {
            return Err(format!(
                "tagAxisScales entry for {tag:?} axis {axis:?} must be one of linear, log10, symlog10"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> Value {
        json!({
            "version": 1,
            "name": "P1",
            "lastModifiedTimestamp": 1000,
            "pinnedCards": [{"plugin": "scalars", "tag": "loss"}],
            "runColors": [{"runId": "train", "color": "#ff0000"}],
            "groupColors": [{"groupKey": "EXPERIMENT|exp1", "colorId": 3}],
            "superimposedCards": [
                {"id": "s1", "title": "Loss", "tags": ["a", "b"], "runId": null}
            ],
            "tagFilter": "loss",
            "runFilter": "",
            "smoothing": 0.6
        })
    }

    #[test]
    fn accepts_valid_payload() {
        assert!(is_valid_profile(&valid_payload()));
    }

    #[test]
    fn rejects_non_objects() {
        assert!(!is_valid_profile(&json!("profile")));
        assert!(!is_valid_profile(&json!(null)));
        assert!(!is_valid_profile(&json!([1, 2])));
    }

    #[test]
    fn rejects_missing_required_fields() {
        for field in [
            "version",
            "name",
            "lastModifiedTimestamp",
            "pinnedCards",
            "runColors",
            "groupColors",
            "superimposedCards",
            "tagFilter",
            "runFilter",
            "smoothing",
        ] {
            let mut payload = valid_payload();
            payload.as_object_mut().expect("object").remove(field);
            assert!(!is_valid_profile(&payload), "should reject missing {field}");
        }
    }

    #[test]
    fn rejects_empty_name() {
        let mut payload = valid_payload();
        payload["name"] = json!("");
        match validate_profile(&payload) {
            ProfileValidation::Invalid(reason) => assert!(reason.contains("name")),
            ProfileValidation::Valid(_) => panic!("expected invalid"),
        }
    }

    #[test]
    fn absent_optional_is_valid_malformed_optional_is_not() {
        let absent = valid_payload();
        assert!(is_valid_profile(&absent));

        let mut malformed = valid_payload();
        malformed["yAxisScale"] = json!("quadratic");
        assert!(!is_valid_profile(&malformed));

        let mut well_formed = valid_payload();
        well_formed["yAxisScale"] = json!("log10");
        assert!(is_valid_profile(&well_formed));
    }

    #[test]
    fn rejects_malformed_array_elements() {
        let mut bad_pin = valid_payload();
        bad_pin["pinnedCards"] = json!([{"plugin": "scalars"}]);
        assert!(!is_valid_profile(&bad_pin));

        let mut empty_tag = valid_payload();
        empty_tag["pinnedCards"] = json!([{"plugin": "scalars", "tag": ""}]);
        assert!(!is_valid_profile(&empty_tag));

        let mut bad_color = valid_payload();
        bad_color["runColors"] = json!([{"runId": "train", "color": 42}]);
        assert!(!is_valid_profile(&bad_color));

        let mut bad_group = valid_payload();
        bad_group["groupColors"] = json!([{"groupKey": "RUN|a", "colorId": "3"}]);
        assert!(!is_valid_profile(&bad_group));

        let mut bad_selection = valid_payload();
        bad_selection["runSelection"] =
            json!([{"type": "RUN_PATH", "value": "x", "selected": true}]);
        assert!(!is_valid_profile(&bad_selection));
    }

    #[test]
    fn rejects_malformed_group_by_but_accepts_null() {
        let mut with_null = valid_payload();
        with_null["groupBy"] = json!(null);
        assert!(is_valid_profile(&with_null));

        let mut with_regex = valid_payload();
        with_regex["groupBy"] = json!({"key": "REGEX", "regexString": "(.*)"});
        assert!(is_valid_profile(&with_regex));

        let mut bad_key = valid_payload();
        bad_key["groupBy"] = json!({"key": "COLOR"});
        assert!(!is_valid_profile(&bad_key));
    }

    #[test]
    fn invalid_reason_names_the_field() {
        let mut payload = valid_payload();
        payload["tagAxisScales"] = json!({"train/loss": {"z": "log10"}});
        match validate_profile(&payload) {
            ProfileValidation::Invalid(reason) => assert!(reason.contains("train/loss")),
            ProfileValidation::Valid(_) => panic!("expected invalid"),
        }
    }

    #[test]
    fn migration_is_idempotent() {
        let mut payload = valid_payload();
        payload["version"] = json!(0);
        let once = migrate_profile(&payload).expect("first migration");
        let once_value = serde_json::to_value(&once).expect("serialize");
        let twice = migrate_profile(&once_value).expect("second migration");
        assert_eq!(once, twice);
        assert_eq!(twice.version, PROFILE_VERSION);
    }

    #[test]
    fn migration_normalizes_pre_v1_run_selection() {
        let mut payload = valid_payload();
        payload["version"] = json!(0);
        let migrated = migrate_profile(&payload).expect("migrate");
        assert_eq!(migrated.run_selection, Some(Vec::new()));

        // A current-version profile without the field stays without it.
        let current = migrate_profile(&valid_payload()).expect("migrate current");
        assert_eq!(current.run_selection, None);
    }

    #[test]
    fn migration_preserves_unknown_fields() {
        let mut payload = valid_payload();
        payload["experimentalLayout"] = json!({"columns": 3});
        let migrated = migrate_profile(&payload).expect("migrate");
        assert_eq!(
            migrated.extra.get("experimentalLayout"),
            Some(&json!({"columns": 3}))
        );
    }

    #[test]
    fn migration_never_panics_on_garbage() {
        assert_eq!(migrate_profile(&json!(12)), None);
        assert_eq!(migrate_profile(&json!({"version": "one"})), None);
    }

    #[test]
    fn create_empty_profile_defaults() {
        let profile = create_empty_profile("Fresh");
        assert_eq!(profile.version, PROFILE_VERSION);
        assert_eq!(profile.name, "Fresh");
        assert_eq!(profile.smoothing, 0.6);
        assert!(profile.pinned_cards.is_empty());
        assert!(profile.group_by.is_none());
        assert!(profile.last_modified_timestamp > 0);
    }
}
