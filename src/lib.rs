pub mod color;
pub mod defaults;
pub mod errors;
pub mod models;
pub mod reconciler;
pub mod storage;
pub mod store;
pub mod validation;

pub use crate::defaults::{ExperimentDataSource, LogdirSource, StaticSource};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    AxisScale, EffectiveSettings, GroupBy, GroupByKey, LiveOverrides, LiveState, PinnedCard,
    Profile, ProfileMetadata, RunColorEntry, RunMetadata, RunSelectionEntry, RunSelectionType,
    SuperimposedCard, PROFILE_VERSION,
};
pub use crate::reconciler::{
    resolve_effective_settings, Activation, ActivationSource, FetchState, Reconciler,
};
pub use crate::storage::{MemoryStorage, SqliteStorage, StorageBackend};
pub use crate::store::{ProfileStore, MAX_PROFILES};
pub use crate::validation::{create_empty_profile, migrate_profile, validate_profile};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global JSON tracing subscriber with a daily-rolling file
/// appender. Safe to call once per process; a second call is an error from
/// the subscriber, surfaced as `AppError::Internal`.
pub fn init_tracing(app_data_dir: &Path) -> AppResult<()> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| AppError::Io(error.to_string()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "profiles.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
