use std::env;
use std::path::PathBuf;

use rollcall_config::{self as config_file, ConfigFile, ResolvedConfig, DEFAULT_STORE_DIR};
use rollcall_face_core::attendance::AttendanceCalendar;
use rollcall_face_core::faces::{ExtractionSettings, MatchThreshold, MAX_EMBEDDING_DIMENSION};
use tracing::debug;

use crate::cli::ModelArgs;
use crate::errors::{AppError, AppResult};

pub const STORE_DIR_ENV: &str = "ROLLCALL_STORE_DIR";

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub store_dir: Option<PathBuf>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub jitters: Option<u32>,
    pub threshold: Option<f64>,
}

impl SettingsOverrides {
    pub fn with_models(mut self, models: &ModelArgs) -> Self {
        self.landmark_model = models.landmark_model.clone();
        self.encoder_model = models.encoder_model.clone();
        self.jitters = models.jitters;
        self
    }
}

/// Everything a command needs after flags, config file and environment are merged.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub store_dir: PathBuf,
    /// Unset paths fall back to `$DLIB_LANDMARK_MODEL` / `$DLIB_ENCODER_MODEL`
    /// when the backend loads.
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub extraction: ExtractionSettings,
    pub threshold: MatchThreshold,
    pub calendar: AttendanceCalendar,
}

pub fn load_settings(overrides: &SettingsOverrides) -> AppResult<RuntimeSettings> {
    let raw = match config_file::load_config()? {
        Some(loaded) => {
            debug!(source = %loaded.source().display(), "loaded configuration");
            loaded.contents
        }
        None => {
            debug!("no configuration file found; using defaults");
            ConfigFile::default()
        }
    };
    resolve_settings(raw, overrides, env::var_os(STORE_DIR_ENV).map(PathBuf::from))
}

/// Precedence: flag, config file, environment, built-in default.
pub fn resolve_settings(
    raw: ConfigFile,
    overrides: &SettingsOverrides,
    env_store_dir: Option<PathBuf>,
) -> AppResult<RuntimeSettings> {
    let resolved = ResolvedConfig::from_raw(raw);
    let store_dir = overrides
        .store_dir
        .clone()
        .or_else(|| resolved.store_dir.clone())
        .or(env_store_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));

    if !(1..=MAX_EMBEDDING_DIMENSION).contains(&resolved.embedding_dimension) {
        return Err(AppError::InvalidSetting {
            key: "embedding_dimension",
            message: format!("must be between 1 and {MAX_EMBEDDING_DIMENSION}"),
        });
    }

    let jitters = overrides.jitters.unwrap_or(resolved.jitters);
    if jitters == 0 {
        return Err(AppError::InvalidSetting {
            key: "jitters",
            message: "must be at least 1".into(),
        });
    }

    let threshold =
        MatchThreshold::new(overrides.threshold.unwrap_or(resolved.match_threshold))?;
    let calendar = AttendanceCalendar::with_offset_minutes(resolved.utc_offset_minutes)?;

    Ok(RuntimeSettings {
        store_dir,
        landmark_model: overrides
            .landmark_model
            .clone()
            .or(resolved.landmark_model),
        encoder_model: overrides.encoder_model.clone().or(resolved.encoder_model),
        extraction: ExtractionSettings {
            dimension: resolved.embedding_dimension,
            multi_face_policy: resolved.multi_face_policy,
            jitters,
        },
        threshold,
        calendar,
    })
}
