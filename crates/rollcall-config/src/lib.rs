use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rollcall_face_core::faces::{
    MultiFacePolicy, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_JITTERS, DEFAULT_MATCH_THRESHOLD,
};
use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/rollcall/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/rollcall/config.toml";
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 0;
pub const DEFAULT_STORE_DIR: &str = "/var/lib/rollcall";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub match_threshold: Option<f64>,
    pub embedding_dimension: Option<usize>,
    pub multi_face_policy: Option<MultiFacePolicy>,
    pub utc_offset_minutes: Option<i32>,
    pub store_dir: Option<PathBuf>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub jitters: Option<u32>,
}

/// File values with defaults filled in. `store_dir` stays optional because the
/// environment ranks between the file and [`DEFAULT_STORE_DIR`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub match_threshold: f64,
    pub embedding_dimension: usize,
    pub multi_face_policy: MultiFacePolicy,
    pub utc_offset_minutes: i32,
    pub store_dir: Option<PathBuf>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub jitters: u32,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        Self {
            match_threshold: raw.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD),
            embedding_dimension: raw
                .embedding_dimension
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSION),
            multi_face_policy: raw.multi_face_policy.unwrap_or_default(),
            utc_offset_minutes: raw
                .utc_offset_minutes
                .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES),
            store_dir: raw.store_dir,
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS).max(1),
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

/// A parsed config file together with the path it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config {path} is malformed: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

pub fn default_sources() -> [PathBuf; 2] {
    [PRIMARY_CONFIG_PATH, SECONDARY_CONFIG_PATH].map(PathBuf::from)
}

pub fn load_config() -> Result<Option<LoadedConfig>, ConfigError> {
    load_from_paths(&default_sources())
}

/// Parses the first candidate that exists. A present but unreadable or
/// malformed file is an error rather than a reason to try the next path.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        let Some(text) = read_if_present(path)? else {
            continue;
        };
        let contents = toml::from_str::<ConfigFile>(&text).map_err(|err| ConfigError::Parse {
            path: path.clone(),
            message: err.message().to_string(),
        })?;
        return Ok(Some(LoadedConfig {
            contents,
            source: path.clone(),
        }));
    }
    Ok(None)
}

fn read_if_present(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn earlier_candidate_shadows_later_one() {
        let dir = tempdir().unwrap();
        let etc = write(&dir, "etc.toml", "match_threshold = 0.5");
        let local = write(&dir, "local.toml", "match_threshold = 0.4");

        let loaded = load_from_paths(&[etc.clone(), local]).unwrap().unwrap();
        assert_eq!(loaded.source(), etc.as_path());
        assert_eq!(loaded.contents.match_threshold, Some(0.5));
    }

    #[test]
    fn missing_candidates_are_skipped() {
        let dir = tempdir().unwrap();
        let local = write(&dir, "local.toml", "multi_face_policy = \"reject\"");

        let loaded = load_from_paths(&[dir.path().join("absent.toml"), local.clone()])
            .unwrap()
            .unwrap();
        assert_eq!(loaded.source, local);
        assert_eq!(loaded.contents.multi_face_policy, Some(MultiFacePolicy::Reject));
    }

    #[test]
    fn no_candidates_means_no_config() {
        assert!(load_from_paths(&[]).unwrap().is_none());
    }

    #[test]
    fn malformed_files_report_their_path() {
        let dir = tempdir().unwrap();
        for (name, body) in [
            ("table.toml", "store_dir = { nested = true }"),
            ("policy.toml", "multi_face_policy = \"first\""),
            ("typo.toml", "match_treshold = 0.5"),
        ] {
            let path = write(&dir, name, body);
            let err = load_from_paths(&[path.clone()]).unwrap_err();
            assert!(matches!(err, ConfigError::Parse { .. }), "{name}: {err}");
            assert_eq!(err.path(), path.as_path());
        }
    }

    #[test]
    fn unreadable_candidate_stops_the_search() {
        let dir = tempdir().unwrap();
        let as_dir = dir.path().join("config.toml");
        fs::create_dir_all(&as_dir).unwrap();
        let fallback = write(&dir, "fallback.toml", "jitters = 2");

        match load_from_paths(&[as_dir.clone(), fallback]).unwrap_err() {
            ConfigError::Read { path, .. } => assert_eq!(path, as_dir),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn defaults_fill_every_key() {
        assert_eq!(
            ResolvedConfig::default(),
            ResolvedConfig {
                match_threshold: DEFAULT_MATCH_THRESHOLD,
                embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
                multi_face_policy: MultiFacePolicy::Largest,
                utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
                store_dir: None,
                landmark_model: None,
                encoder_model: None,
                jitters: DEFAULT_JITTERS,
            }
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "config.toml",
            "utc_offset_minutes = 480\nstore_dir = \"/srv/rollcall\"\njitters = 0\n\
             encoder_model = \"/opt/dlib/encoder.dat\"\n",
        );

        let loaded = load_from_paths(&[path]).unwrap().unwrap();
        let resolved = ResolvedConfig::from_raw(loaded.contents);
        assert_eq!(resolved.utc_offset_minutes, 480);
        assert_eq!(resolved.store_dir, Some(PathBuf::from("/srv/rollcall")));
        assert_eq!(
            resolved.encoder_model,
            Some(PathBuf::from("/opt/dlib/encoder.dat"))
        );
        assert_eq!(resolved.jitters, 1);
        assert_eq!(resolved.match_threshold, DEFAULT_MATCH_THRESHOLD);
    }
}
