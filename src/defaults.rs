use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const DOTDIR: &str = ".tensorboard";
const DEFAULT_PROFILE_FILE: &str = "default_profile.json";
const RUN_COLORS_FILE: &str = "run_colors.json";

/// Read side of experiment-scoped defaults published next to the logs.
///
/// Both calls are best-effort: a missing file, unreadable directory, or
/// malformed payload yields the empty answer, never an error.
pub trait ExperimentDataSource {
    /// Raw default-profile payload for one experiment, unvalidated.
    fn fetch_default_profile(&self, experiment_id: &str) -> Option<Value>;

    /// Run-name→hex color assignments published for one experiment.
    fn fetch_run_colors(&self, experiment_id: &str) -> BTreeMap<String, String>;
}

/// Data source backed by a log directory on disk. Looks for payloads
/// under `<logdir>/<experiment_id>/.tensorboard/`, falling back to a
/// logdir-wide `<logdir>/.tensorboard/` when the experiment has none.
#[derive(Debug, Clone)]
pub struct LogdirSource {
    logdir: PathBuf,
}

impl LogdirSource {
    pub fn new(logdir: impl Into<PathBuf>) -> Self {
        Self {
            logdir: logdir.into(),
        }
    }

    fn read_json(&self, experiment_id: &str, file_name: &str) -> Option<Value> {
        let scoped = self.logdir.join(experiment_id).join(DOTDIR).join(file_name);
        let shared = self.logdir.join(DOTDIR).join(file_name);
        read_json_file(&scoped).or_else(|| read_json_file(&shared))
    }
}

fn read_json_file(path: &Path) -> Option<Value> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "failed to read defaults file");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "defaults file is not valid JSON");
            None
        }
    }
}

impl ExperimentDataSource for LogdirSource {
    fn fetch_default_profile(&self, experiment_id: &str) -> Option<Value> {
        self.read_json(experiment_id, DEFAULT_PROFILE_FILE)
    }

    fn fetch_run_colors(&self, experiment_id: &str) -> BTreeMap<String, String> {
        let Some(value) = self.read_json(experiment_id, RUN_COLORS_FILE) else {
            return BTreeMap::new();
        };
        let Some(object) = value.as_object() else {
            tracing::warn!(experiment_id, "run colors payload is not an object");
            return BTreeMap::new();
        };
        object
            .iter()
            .filter_map(|(run, color)| {
                let color = color.as_str()?;
                Some((run.clone(), color.to_string()))
            })
            .collect()
    }
}

/// Canned data source for tests.
#[derive(Debug, Default)]
pub struct StaticSource {
    pub profiles: BTreeMap<String, Value>,
    pub run_colors: BTreeMap<String, BTreeMap<String, String>>,
}

impl ExperimentDataSource for StaticSource {
    fn fetch_default_profile(&self, experiment_id: &str) -> Option<Value> {
        self.profiles.get(experiment_id).cloned()
    }

    fn fetch_run_colors(&self, experiment_id: &str) -> BTreeMap<String, String> {
        self.run_colors
            .get(experiment_id)
            .cloned()
            .unwrap_or_default()
    }
}
